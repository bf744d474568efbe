// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for integration tests
//!
//! The fake codec delivers every callback synchronously on the calling
//! thread, which keeps the tests deterministic.

#![allow(dead_code)]

use camera_stream::backends::camera::{CameraSource, FrameHandler, LensFacing, RawVideoFrame};
use camera_stream::backends::microphone::MicrophoneSource;
use camera_stream::errors::{CaptureError, EncoderError};
use camera_stream::media::codec::{
    AudioFormat, BackendFactory, BufferInfo, CodecCallbacks, CodecKind, EncoderBackend,
    InputSlot, MediaFormat, OutputFormat,
};
use camera_stream::media::formats::ParameterSets;
use camera_stream::media::sink::{EncodedAacFrame, EncodedAccessUnit, PreviewSink, StreamSink};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E, 0xDA];
pub const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80];

/// Encoded bytes the fake codec emits per AAC frame
pub const FAKE_AAC_PAYLOAD: usize = 12;

/// How the fake H.264 codec publishes its parameter sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSetDelivery {
    /// Never publishes them
    None,
    /// `on_output_format_changed` before the first output
    FormatChange,
    /// A codec-config output buffer before the first frame
    CodecConfigBuffer,
}

#[derive(Debug, Clone)]
pub struct FakeCodecConfig {
    pub slots: usize,
    /// Return each slot right after its input is consumed
    pub recycle_slots: bool,
    pub parameter_sets: ParameterSetDelivery,
    /// Every n-th video frame is a key frame (the first always is)
    pub key_frame_interval: usize,
    /// Format the fake AAC codec reports on start
    pub audio_format: Option<AudioFormat>,
    /// Emit an AAC codec-config buffer on start
    pub audio_codec_config: bool,
    /// Bytes per encoded AAC frame
    pub audio_payload: usize,
    pub fail_configure: bool,
    pub fail_start: bool,
    /// `queue_input` fails from this input on (0-based)
    pub fail_queue_from: Option<usize>,
    /// The factory has no codec of this kind
    pub unavailable: Option<CodecKind>,
}

impl Default for FakeCodecConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            recycle_slots: true,
            parameter_sets: ParameterSetDelivery::FormatChange,
            key_frame_interval: 30,
            audio_format: None,
            audio_codec_config: false,
            audio_payload: FAKE_AAC_PAYLOAD,
            fail_configure: false,
            fail_start: false,
            fail_queue_from: None,
            unavailable: None,
        }
    }
}

type SharedCallbacks = Arc<Mutex<Box<dyn CodecCallbacks>>>;

/// Record of one queued input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedInput {
    pub kind: CodecKind,
    pub slot: usize,
    pub len: usize,
    pub pts: u64,
}

/// What the fake codecs did, shared with the test
#[derive(Default)]
pub struct FakeCodecLog {
    pub created: AtomicUsize,
    pub released: AtomicUsize,
    pub queued: Mutex<Vec<QueuedInput>>,
    pub formats: Mutex<Vec<MediaFormat>>,
    live: Mutex<HashMap<CodecKind, SharedCallbacks>>,
}

impl FakeCodecLog {
    /// Raise a codec error on the live session of `kind`
    pub fn inject_error(&self, kind: CodecKind, message: &str) -> bool {
        let callbacks = self.live.lock().get(&kind).cloned();
        match callbacks {
            Some(callbacks) => {
                callbacks.lock().on_error(EncoderError::Codec(message.to_string()));
                true
            }
            None => false,
        }
    }

    /// Return a held slot to the live session of `kind`
    pub fn return_slot(&self, kind: CodecKind, index: usize) -> bool {
        let callbacks = self.live.lock().get(&kind).cloned();
        match callbacks {
            Some(callbacks) => {
                callbacks.lock().on_input_available(InputSlot::new(index));
                true
            }
            None => false,
        }
    }

    pub fn queued_for(&self, kind: CodecKind) -> Vec<QueuedInput> {
        self.queued
            .lock()
            .iter()
            .filter(|q| q.kind == kind)
            .cloned()
            .collect()
    }

    pub fn is_live(&self, kind: CodecKind) -> bool {
        self.live.lock().contains_key(&kind)
    }
}

#[derive(Clone, Default)]
pub struct FakeBackendFactory {
    pub config: FakeCodecConfig,
    pub log: Arc<FakeCodecLog>,
}

impl FakeBackendFactory {
    pub fn new(config: FakeCodecConfig) -> Self {
        Self {
            config,
            log: Arc::new(FakeCodecLog::default()),
        }
    }
}

impl BackendFactory for FakeBackendFactory {
    fn create(&self, kind: CodecKind) -> Result<Box<dyn EncoderBackend>, EncoderError> {
        if self.config.unavailable == Some(kind) {
            return Err(EncoderError::NotAvailable(format!("no {:?} codec", kind)));
        }
        self.log.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBackend {
            kind,
            config: self.config.clone(),
            log: Arc::clone(&self.log),
            callbacks: None,
            inputs: AtomicUsize::new(0),
            released: false,
        }))
    }
}

struct FakeBackend {
    kind: CodecKind,
    config: FakeCodecConfig,
    log: Arc<FakeCodecLog>,
    callbacks: Option<SharedCallbacks>,
    inputs: AtomicUsize,
    released: bool,
}

impl FakeBackend {
    fn emit_video(&self, callbacks: &mut dyn CodecCallbacks, n: usize, pts: u64) {
        let key = n % self.config.key_frame_interval.max(1) == 0;
        if n == 0 {
            match self.config.parameter_sets {
                ParameterSetDelivery::None => {}
                ParameterSetDelivery::FormatChange => callbacks
                    .on_output_format_changed(&OutputFormat::Video(ParameterSets::new(SPS, PPS))),
                ParameterSetDelivery::CodecConfigBuffer => {
                    let config = [SPS, PPS].concat();
                    callbacks.on_output_available(
                        &config,
                        &BufferInfo {
                            size: config.len(),
                            presentation_time_us: pts,
                            is_key_frame: false,
                            is_codec_config: true,
                        },
                    );
                }
            }
        }

        let nal_header = if key { 0x65 } else { 0x41 };
        let unit = [0, 0, 0, 1, nal_header, n as u8, 0xAB, 0xCD];
        callbacks.on_output_available(
            &unit,
            &BufferInfo {
                size: unit.len(),
                presentation_time_us: pts,
                is_key_frame: key,
                is_codec_config: false,
            },
        );
    }

    fn emit_audio(&self, callbacks: &mut dyn CodecCallbacks, n: usize, pts: u64) {
        let frame = vec![n as u8; self.config.audio_payload];
        callbacks.on_output_available(
            &frame,
            &BufferInfo {
                size: frame.len(),
                presentation_time_us: pts,
                is_key_frame: true,
                is_codec_config: false,
            },
        );
    }
}

impl EncoderBackend for FakeBackend {
    fn name(&self) -> &str {
        match self.kind {
            CodecKind::H264 => "fake-h264",
            CodecKind::AacLc => "fake-aac",
        }
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        callbacks: Box<dyn CodecCallbacks>,
    ) -> Result<(), EncoderError> {
        if self.config.fail_configure {
            return Err(EncoderError::Configuration("fake codec refused format".into()));
        }
        self.log.formats.lock().push(format.clone());
        let callbacks = Arc::new(Mutex::new(callbacks));
        self.log.live.lock().insert(self.kind, Arc::clone(&callbacks));
        self.callbacks = Some(callbacks);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        if self.config.fail_start {
            return Err(EncoderError::Codec("fake codec failed to start".into()));
        }
        let Some(callbacks) = &self.callbacks else {
            return Err(EncoderError::InvalidState {
                operation: "start",
                state: "unconfigured",
            });
        };
        let mut callbacks = callbacks.lock();

        if self.kind == CodecKind::AacLc {
            if let Some(format) = &self.config.audio_format {
                callbacks.on_output_format_changed(&OutputFormat::Audio(format.clone()));
            }
            if self.config.audio_codec_config {
                let asc = [0x12, 0x08];
                callbacks.on_output_available(
                    &asc,
                    &BufferInfo {
                        size: asc.len(),
                        presentation_time_us: 0,
                        is_key_frame: false,
                        is_codec_config: true,
                    },
                );
            }
        }

        for index in 0..self.config.slots {
            callbacks.on_input_available(InputSlot::new(index));
        }
        Ok(())
    }

    fn queue_input(
        &self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: u64,
    ) -> Result<(), EncoderError> {
        let n = self.inputs.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_queue_from.is_some_and(|from| n >= from) {
            return Err(EncoderError::Codec("fake codec rejected input".into()));
        }
        let Some(callbacks) = &self.callbacks else {
            return Err(EncoderError::InvalidState {
                operation: "queue_input",
                state: "released",
            });
        };

        self.log.queued.lock().push(QueuedInput {
            kind: self.kind,
            slot: slot.index(),
            len: data.len(),
            pts: presentation_time_us,
        });

        let mut callbacks = callbacks.lock();
        match self.kind {
            CodecKind::H264 => self.emit_video(callbacks.as_mut(), n, presentation_time_us),
            CodecKind::AacLc => self.emit_audio(callbacks.as_mut(), n, presentation_time_us),
        }
        if self.config.recycle_slots {
            callbacks.on_input_available(slot);
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.callbacks = None;
        self.log.live.lock().remove(&self.kind);
        self.log.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything a [`RecordingSink`] saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    ParameterSets(ParameterSets),
    Video {
        data: Vec<u8>,
        size: usize,
        key: bool,
        pts: u64,
    },
    Audio {
        data: Vec<u8>,
        pts: u64,
        adts: bool,
    },
    AudioFormat(AudioFormat),
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn video_units(&self) -> Vec<(Vec<u8>, usize, bool)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Video { data, size, key, .. } => Some((data.clone(), *size, *key)),
                _ => None,
            })
            .collect()
    }

    pub fn audio_frames(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Audio { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn parameter_set_events(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, SinkEvent::ParameterSets(_)))
            .count()
    }

    pub fn audio_formats(&self) -> Vec<AudioFormat> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::AudioFormat(format) => Some(format.clone()),
                _ => None,
            })
            .collect()
    }
}

impl StreamSink for RecordingSink {
    fn on_parameter_sets(&self, parameter_sets: &ParameterSets) {
        self.events
            .lock()
            .push(SinkEvent::ParameterSets(parameter_sets.clone()));
    }

    fn on_video_access_unit(&self, unit: &EncodedAccessUnit<'_>) {
        self.events.lock().push(SinkEvent::Video {
            data: unit.data.to_vec(),
            size: unit.info.size,
            key: unit.is_key_frame(),
            pts: unit.presentation_time_us(),
        });
    }

    fn on_audio_frame(&self, frame: &EncodedAacFrame<'_>) {
        self.events.lock().push(SinkEvent::Audio {
            data: frame.data.to_vec(),
            pts: frame.presentation_time_us,
            adts: frame.has_adts_header,
        });
    }

    fn on_audio_format(&self, format: &AudioFormat) {
        self.events.lock().push(SinkEvent::AudioFormat(format.clone()));
    }
}

/// Counts preview frames
#[derive(Default)]
pub struct CountingPreview {
    pub frames: AtomicUsize,
}

impl PreviewSink for CountingPreview {
    fn on_preview_frame(&self, _frame: &RawVideoFrame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CameraState {
    handler: Mutex<Option<FrameHandler>>,
    binds: Mutex<Vec<LensFacing>>,
    unbinds: AtomicUsize,
    fail_bind: AtomicBool,
}

/// Test-side control of a [`ScriptedCamera`]
#[derive(Clone, Default)]
pub struct CameraHandle {
    state: Arc<CameraState>,
}

impl CameraHandle {
    pub fn source(&self) -> Box<dyn CameraSource> {
        Box::new(ScriptedCamera {
            state: Arc::clone(&self.state),
        })
    }

    /// Deliver a frame on the calling thread; false if nothing is bound
    pub fn push_frame(&self, frame: RawVideoFrame) -> bool {
        let mut handler = self.state.handler.lock();
        match handler.as_mut() {
            Some(handler) => {
                handler(frame);
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.state.handler.lock().is_some()
    }

    pub fn binds(&self) -> Vec<LensFacing> {
        self.state.binds.lock().clone()
    }

    pub fn unbinds(&self) -> usize {
        self.state.unbinds.load(Ordering::SeqCst)
    }

    pub fn fail_next_bind(&self, fail: bool) {
        self.state.fail_bind.store(fail, Ordering::SeqCst);
    }
}

struct ScriptedCamera {
    state: Arc<CameraState>,
}

impl CameraSource for ScriptedCamera {
    fn bind(&mut self, lens: LensFacing, handler: FrameHandler) -> Result<(), CaptureError> {
        if self.state.fail_bind.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::DeviceNotFound(format!("{} camera", lens)));
        }
        self.state.binds.lock().push(lens);
        *self.state.handler.lock() = Some(handler);
        Ok(())
    }

    fn unbind(&mut self) {
        if self.state.handler.lock().take().is_some() {
            self.state.unbinds.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MicrophoneState {
    chunks: Mutex<VecDeque<Result<Vec<u8>, CaptureError>>>,
    started: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    reads: AtomicUsize,
    fail_start: AtomicBool,
    sample_rate: u32,
    channels: u8,
}

/// Test-side control of a [`ScriptedMicrophone`]
#[derive(Clone)]
pub struct MicrophoneHandle {
    state: Arc<MicrophoneState>,
}

impl MicrophoneHandle {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            state: Arc::new(MicrophoneState {
                chunks: Mutex::new(VecDeque::new()),
                started: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
                fail_start: AtomicBool::new(false),
                sample_rate,
                channels,
            }),
        }
    }

    pub fn source(&self) -> Box<dyn MicrophoneSource> {
        Box::new(ScriptedMicrophone {
            state: Arc::clone(&self.state),
        })
    }

    pub fn push_chunk(&self, chunk: Vec<u8>) {
        self.state.chunks.lock().push_back(Ok(chunk));
    }

    pub fn push_error(&self, error: CaptureError) {
        self.state.chunks.lock().push_back(Err(error));
    }

    pub fn pending(&self) -> usize {
        self.state.chunks.lock().len()
    }

    pub fn is_started(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    pub fn fail_next_start(&self, fail: bool) {
        self.state.fail_start.store(fail, Ordering::SeqCst);
    }
}

struct ScriptedMicrophone {
    state: Arc<MicrophoneState>,
}

impl MicrophoneSource for ScriptedMicrophone {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.state.fail_start.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::InitializationFailed("microphone busy".into()));
        }
        self.state.started.store(true, Ordering::SeqCst);
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        let next = self.state.chunks.lock().pop_front();
        match next {
            Some(Ok(chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => {
                thread::sleep(Duration::from_millis(2));
                Ok(0)
            }
        }
    }

    fn stop(&mut self) {
        if self.state.started.swap(false, Ordering::SeqCst) {
            self.state.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_rate(&self) -> u32 {
        self.state.sample_rate
    }

    fn channel_count(&self) -> u8 {
        self.state.channels
    }
}

/// Tightly packed I420 frame with a luma ramp and flat chroma
pub fn i420_frame(width: u32, height: u32) -> RawVideoFrame {
    let (w, h) = (width as usize, height as usize);
    let mut data: Vec<u8> = (0..w * h).map(|i| i as u8).collect();
    data.extend(std::iter::repeat_n(0x40, (w / 2) * (h / 2)));
    data.extend(std::iter::repeat_n(0xC0, (w / 2) * (h / 2)));
    RawVideoFrame::from_i420(width, height, &data).expect("valid I420 buffer")
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
