// SPDX-License-Identifier: MPL-2.0

//! GStreamer codec backend
//!
//! Each backend runs one pipeline:
//!
//! ```text
//! H.264: appsrc ! videoconvert ! <encoder> ! h264parse ! byte-stream/au ! appsink
//! AAC:   appsrc ! audioconvert ! audioresample ! <encoder> ! aacparse ! raw ! appsink
//! ```
//!
//! GStreamer has no notion of codec-owned input buffers, so slots are
//! emulated: the bytes pushed for a slot are wrapped in memory that returns
//! the slot index when GStreamer frees it. A dispatcher thread is the single
//! callback thread; it delivers slot returns, encoded samples and bus errors
//! in order.

use super::{
    AudioFormat, BackendFactory, BufferInfo, CodecCallbacks, CodecKind, EncoderBackend,
    InputSlot, MediaFormat, OutputFormat, VideoFormat,
};
use crate::config::EncoderSettings;
use crate::constants::threads;
use crate::errors::EncoderError;
use crate::media::formats::ParameterSets;
use crate::media::formats::h264::split_parameter_sets;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// H.264 encoders in order of preference (hardware first)
pub const VIDEO_ENCODERS: &[&str] = &[
    "vah264enc",
    "vaapih264enc",
    "nvh264enc",
    "qsvh264enc",
    "v4l2h264enc",
    "x264enc",
    "openh264enc",
];

/// AAC encoders in order of preference
pub const AAC_ENCODERS: &[&str] = &["fdkaacenc", "avenc_aac", "voaacenc", "faac"];

/// Emulated input slots per session
const DEFAULT_SLOT_COUNT: usize = 4;

/// How often the dispatcher checks the bus while idle
const BUS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Check if a specific GStreamer element is installed
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().ok();
    gst::ElementFactory::find(element_name).is_some()
}

/// An installed encoder element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableEncoder {
    pub kind: CodecKind,
    pub element: String,
    /// Position in the preference list (0 = preferred)
    pub priority: usize,
}

/// Installed H.264 and AAC encoders, in preference order per codec
pub fn list_available_encoders() -> Vec<AvailableEncoder> {
    let mut available = Vec::new();
    for (kind, candidates) in [(CodecKind::H264, VIDEO_ENCODERS), (CodecKind::AacLc, AAC_ENCODERS)] {
        for (priority, element) in candidates.iter().enumerate() {
            if is_element_available(element) {
                debug!(kind = ?kind, element, "Encoder available");
                available.push(AvailableEncoder {
                    kind,
                    element: element.to_string(),
                    priority,
                });
            }
        }
    }
    info!("Detected {} encoders", available.len());
    available
}

/// Creates [`GstEncoderBackend`]s with the best installed encoder
#[derive(Debug, Clone, Default)]
pub struct GstBackendFactory {
    video_encoder: Option<String>,
    audio_encoder: Option<String>,
}

impl GstBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Honour the element overrides in `settings`
    pub fn from_settings(settings: &EncoderSettings) -> Self {
        Self {
            video_encoder: settings.video_encoder.clone(),
            audio_encoder: settings.audio_encoder.clone(),
        }
    }

    fn select(&self, kind: CodecKind) -> Result<String, EncoderError> {
        let (forced, candidates) = match kind {
            CodecKind::H264 => (&self.video_encoder, VIDEO_ENCODERS),
            CodecKind::AacLc => (&self.audio_encoder, AAC_ENCODERS),
        };

        if let Some(name) = forced {
            if is_element_available(name) {
                return Ok(name.clone());
            }
            return Err(EncoderError::NotAvailable(format!(
                "configured encoder {} is not installed",
                name
            )));
        }

        candidates
            .iter()
            .find(|name| is_element_available(name))
            .map(|name| name.to_string())
            .ok_or_else(|| {
                EncoderError::NotAvailable(format!("no {} encoder installed", kind.mime_type()))
            })
    }
}

impl BackendFactory for GstBackendFactory {
    fn create(&self, kind: CodecKind) -> Result<Box<dyn EncoderBackend>, EncoderError> {
        gst::init().map_err(|e| EncoderError::NotAvailable(format!("GStreamer init failed: {}", e)))?;
        let element = self.select(kind)?;
        info!(kind = ?kind, element = %element, "Selected encoder");
        Ok(Box::new(GstEncoderBackend::new(kind, element)))
    }
}

enum DispatchEvent {
    InputReleased(usize),
    Output(gst::Sample),
    Eos,
    Shutdown,
}

/// Buffer memory for one input slot; hands the slot back when freed
struct SlotMemory {
    data: Vec<u8>,
    index: usize,
    release: Sender<DispatchEvent>,
}

impl AsRef<[u8]> for SlotMemory {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for SlotMemory {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for SlotMemory {
    fn drop(&mut self) {
        // Receiver is gone once the session is released
        let _ = self.release.send(DispatchEvent::InputReleased(self.index));
    }
}

struct Dispatch {
    receiver: Receiver<DispatchEvent>,
    callbacks: Box<dyn CodecCallbacks>,
}

/// One GStreamer encoding pipeline behind the codec callback interface
pub struct GstEncoderBackend {
    kind: CodecKind,
    element_name: String,
    slot_count: usize,
    pipeline: Option<gst::Pipeline>,
    appsrc: Option<gst_app::AppSrc>,
    appsink: Option<gst_app::AppSink>,
    events: Option<Sender<DispatchEvent>>,
    /// Receiver and callbacks waiting for `start`
    pending: Mutex<Option<Dispatch>>,
    dispatcher: Option<JoinHandle<()>>,
    max_input_size: usize,
}

impl GstEncoderBackend {
    pub fn new(kind: CodecKind, element_name: String) -> Self {
        Self {
            kind,
            element_name,
            slot_count: DEFAULT_SLOT_COUNT,
            pipeline: None,
            appsrc: None,
            appsink: None,
            events: None,
            pending: Mutex::new(None),
            dispatcher: None,
            max_input_size: 0,
        }
    }

    fn pipeline_description(&self, format: &MediaFormat) -> String {
        match format {
            MediaFormat::Video(_) => format!(
                "appsrc name=src ! videoconvert ! {} name=enc ! \
                 h264parse config-interval=-1 ! \
                 video/x-h264,stream-format=byte-stream,alignment=au ! \
                 appsink name=sink",
                self.element_name
            ),
            MediaFormat::Audio(_) => format!(
                "appsrc name=src ! audioconvert ! audioresample ! {} name=enc ! \
                 aacparse ! audio/mpeg,mpegversion=4,stream-format=raw ! \
                 appsink name=sink",
                self.element_name
            ),
        }
    }
}

fn input_caps(format: &MediaFormat) -> gst::Caps {
    match format {
        MediaFormat::Video(video) => gst::Caps::builder("video/x-raw")
            .field("format", video.input_layout.name())
            .field("width", video.width as i32)
            .field("height", video.height as i32)
            .field("framerate", gst::Fraction::new(video.frame_rate as i32, 1))
            .build(),
        MediaFormat::Audio(audio) => gst::Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("layout", "interleaved")
            .field("rate", audio.sample_rate as i32)
            .field("channels", audio.channels as i32)
            .build(),
    }
}

/// Set a property from its string form if the element has it
fn set_if_present(element: &gst::Element, name: &str, value: &str) {
    if element.find_property(name).is_some() {
        element.set_property_from_str(name, value);
    } else {
        debug!(property = name, "Encoder has no such property, skipping");
    }
}

fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, format: &VideoFormat) {
    let kbps = (format.bitrate / 1000).max(1).to_string();
    let gop = (format.frame_rate * format.keyframe_interval_secs).to_string();

    match encoder_name {
        "x264enc" => {
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "key-int-max", &gop);
        }
        "vah264enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "key-int-max", &gop);
        }
        "vaapih264enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "keyframe-period", &gop);
        }
        "nvh264enc" | "qsvh264enc" => {
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "gop-size", &gop);
        }
        "openh264enc" => {
            set_if_present(encoder, "rate-control", "bitrate");
            // Bits per second
            set_if_present(encoder, "bitrate", &format.bitrate.to_string());
            set_if_present(encoder, "usage-type", "camera");
            set_if_present(encoder, "gop-size", &gop);
        }
        _ => {
            debug!(encoder = encoder_name, "Using encoder default configuration");
        }
    }
    debug!(
        encoder = encoder_name,
        bitrate_kbps = %kbps,
        gop = %gop,
        "Configured video encoder"
    );
}

fn configure_aac_encoder(encoder: &gst::Element, encoder_name: &str, format: &AudioFormat) {
    match encoder_name {
        // faac takes kbps
        "faac" => set_if_present(encoder, "bitrate", &(format.bitrate / 1000).to_string()),
        _ => set_if_present(encoder, "bitrate", &format.bitrate.to_string()),
    }
    debug!(
        encoder = encoder_name,
        bitrate = format.bitrate,
        "Configured AAC encoder"
    );
}

fn element<T: IsA<gst::Element>>(pipeline: &gst::Pipeline, name: &str) -> Result<T, EncoderError> {
    pipeline
        .by_name(name)
        .ok_or_else(|| EncoderError::Configuration(format!("pipeline has no element {}", name)))?
        .dynamic_cast::<T>()
        .map_err(|_| EncoderError::Configuration(format!("element {} has the wrong type", name)))
}

impl EncoderBackend for GstEncoderBackend {
    fn name(&self) -> &str {
        &self.element_name
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        callbacks: Box<dyn CodecCallbacks>,
    ) -> Result<(), EncoderError> {
        if self.pipeline.is_some() {
            return Err(EncoderError::InvalidState {
                operation: "configure",
                state: "configured",
            });
        }

        let description = self.pipeline_description(format);
        debug!(pipeline = %description, "Creating encoder pipeline");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| EncoderError::Configuration(format!("Failed to create pipeline: {}", e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| EncoderError::Configuration("Failed to downcast to Pipeline".into()))?;

        let encoder: gst::Element = element(&pipeline, "enc")?;
        match format {
            MediaFormat::Video(video) => {
                configure_video_encoder(&encoder, &self.element_name, video);
                self.max_input_size = video.frame_size();
            }
            MediaFormat::Audio(audio) => {
                configure_aac_encoder(&encoder, &self.element_name, audio);
                self.max_input_size = audio.max_input_size;
            }
        }

        let appsrc: gst_app::AppSrc = element(&pipeline, "src")?;
        appsrc.set_caps(Some(&input_caps(format)));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_property("block", false);

        let (sender, receiver) = crossbeam_channel::unbounded();

        let appsink: gst_app::AppSink = element(&pipeline, "sink")?;
        appsink.set_property("sync", false);
        let sample_sender = sender.clone();
        let eos_sender = sender.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    sample_sender
                        .send(DispatchEvent::Output(sample))
                        .map_err(|_| gst::FlowError::Flushing)?;
                    Ok(gst::FlowSuccess::Ok)
                })
                .eos(move |_| {
                    let _ = eos_sender.send(DispatchEvent::Eos);
                })
                .build(),
        );

        *self.pending.lock() = Some(Dispatch {
            receiver,
            callbacks,
        });
        self.pipeline = Some(pipeline);
        self.appsrc = Some(appsrc);
        self.appsink = Some(appsink);
        self.events = Some(sender);
        info!(encoder = %self.element_name, "Encoder pipeline configured");
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        let (Some(pipeline), Some(events)) = (&self.pipeline, &self.events) else {
            return Err(EncoderError::InvalidState {
                operation: "start",
                state: "unconfigured",
            });
        };
        let Some(dispatch) = self.pending.lock().take() else {
            return Err(EncoderError::InvalidState {
                operation: "start",
                state: "started",
            });
        };
        let bus = pipeline
            .bus()
            .ok_or_else(|| EncoderError::Codec("pipeline has no bus".into()))?;

        let kind = self.kind;
        let dispatcher = thread::Builder::new()
            .name(threads::CODEC_DISPATCH.to_string())
            .spawn(move || dispatch_loop(kind, dispatch, bus))
            .map_err(|e| EncoderError::Codec(format!("Failed to spawn dispatcher: {}", e)))?;
        self.dispatcher = Some(dispatcher);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Codec(format!("Failed to start encoder pipeline: {}", e)))?;

        for index in 0..self.slot_count {
            let _ = events.send(DispatchEvent::InputReleased(index));
        }
        info!(encoder = %self.element_name, slots = self.slot_count, "Encoder pipeline started");
        Ok(())
    }

    fn queue_input(
        &self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: u64,
    ) -> Result<(), EncoderError> {
        let (Some(appsrc), Some(events)) = (&self.appsrc, &self.events) else {
            return Err(EncoderError::InvalidState {
                operation: "queue_input",
                state: "unconfigured",
            });
        };
        if data.len() > self.max_input_size {
            return Err(EncoderError::Configuration(format!(
                "input of {} bytes exceeds slot size {}",
                data.len(),
                self.max_input_size
            )));
        }

        let mut buffer = gst::Buffer::from_mut_slice(SlotMemory {
            data: data.to_vec(),
            index: slot.index(),
            release: events.clone(),
        });
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_useconds(presentation_time_us));
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::Codec(format!("Failed to push input: {:?}", e)))?;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(appsrc) = self.appsrc.take() {
            let _ = appsrc.end_of_stream();
        }
        if let Some(appsink) = self.appsink.take() {
            appsink.set_callbacks(gst_app::AppSinkCallbacks::builder().build());
        }
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                warn!(error = %e, "Failed to stop encoder pipeline");
            }
        }
        if let Some(events) = self.events.take() {
            let _ = events.send(DispatchEvent::Shutdown);
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.thread().id() == thread::current().id() {
                debug!("Release called from dispatcher thread, not joining");
            } else if dispatcher.join().is_err() {
                warn!("Codec dispatcher thread panicked");
            }
        }
        self.pending.lock().take();
        debug!(encoder = %self.element_name, "Encoder pipeline released");
    }
}

impl Drop for GstEncoderBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-session output bookkeeping on the dispatcher thread
struct OutputTracker {
    kind: CodecKind,
    parameter_sets: Option<ParameterSets>,
    audio_format_reported: bool,
    samples: u64,
}

fn dispatch_loop(kind: CodecKind, dispatch: Dispatch, bus: gst::Bus) {
    let Dispatch {
        receiver,
        mut callbacks,
    } = dispatch;
    let mut tracker = OutputTracker {
        kind,
        parameter_sets: None,
        audio_format_reported: false,
        samples: 0,
    };

    debug!(kind = ?kind, "Codec dispatcher started");
    loop {
        match receiver.recv_timeout(BUS_POLL_INTERVAL) {
            Ok(DispatchEvent::InputReleased(index)) => {
                callbacks.on_input_available(InputSlot::new(index));
            }
            Ok(DispatchEvent::Output(sample)) => {
                tracker.deliver(&sample, callbacks.as_mut());
            }
            Ok(DispatchEvent::Eos) => debug!(kind = ?kind, "Encoder reached end of stream"),
            Ok(DispatchEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                error!(
                    error = %err.error(),
                    debug = ?err.debug(),
                    source = ?err.src().map(|s| s.name()),
                    "Encoder pipeline error"
                );
                callbacks.on_error(EncoderError::Codec(err.error().to_string()));
            }
        }
    }
    debug!(kind = ?kind, samples = tracker.samples, "Codec dispatcher exiting");
}

impl OutputTracker {
    fn deliver(&mut self, sample: &gst::Sample, callbacks: &mut dyn CodecCallbacks) {
        let Some(buffer) = sample.buffer() else {
            return;
        };
        let Ok(map) = buffer.map_readable() else {
            warn!("Failed to map encoder output");
            return;
        };
        self.samples += 1;

        let presentation_time_us = buffer.pts().map(|t| t.useconds()).unwrap_or(0);
        let is_key_frame = !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);
        let data = map.as_slice();

        match self.kind {
            CodecKind::H264 if is_key_frame => {
                let (sets, access_unit) = split_parameter_sets(data);
                if let Some(sets) = sets {
                    if self.parameter_sets.as_ref() != Some(&sets) {
                        callbacks.on_output_format_changed(&OutputFormat::Video(sets.clone()));
                        self.parameter_sets = Some(sets);
                    }
                }
                let info = BufferInfo {
                    size: access_unit.len(),
                    presentation_time_us,
                    is_key_frame: true,
                    is_codec_config: false,
                };
                callbacks.on_output_available(&access_unit, &info);
            }
            CodecKind::H264 => {
                let info = BufferInfo {
                    size: data.len(),
                    presentation_time_us,
                    is_key_frame: false,
                    is_codec_config: false,
                };
                callbacks.on_output_available(data, &info);
            }
            CodecKind::AacLc => {
                if !self.audio_format_reported {
                    if let Some(format) = sample.caps().and_then(audio_format_from_caps) {
                        callbacks.on_output_format_changed(&OutputFormat::Audio(format));
                    }
                    self.audio_format_reported = true;
                }
                let info = BufferInfo {
                    size: data.len(),
                    presentation_time_us,
                    is_key_frame: true,
                    is_codec_config: buffer.flags().contains(gst::BufferFlags::HEADER),
                };
                callbacks.on_output_available(data, &info);
            }
        }
        trace!(kind = ?self.kind, size = data.len(), pts = presentation_time_us, "Encoder output");
    }
}

fn audio_format_from_caps(caps: &gst::CapsRef) -> Option<AudioFormat> {
    let structure = caps.structure(0)?;
    let rate = structure.get::<i32>("rate").ok()?;
    let channels = structure.get::<i32>("channels").ok()?;
    let bitrate = structure.get::<u32>("bitrate").unwrap_or(0);
    Some(AudioFormat::new(
        u32::try_from(rate).ok()?,
        u8::try_from(channels).ok()?,
        bitrate,
    ))
}
