// SPDX-License-Identifier: MPL-2.0

//! GStreamer microphone
//!
//! Pulls interleaved S16LE PCM from `<source> ! audioconvert ! audioresample
//! ! caps ! appsink` and serves it through blocking reads with a short
//! timeout.
//!
//! With voice processing enabled the capture first passes through
//! `webrtcdsp` at 48 kHz (noise suppression, gain control and optionally
//! echo cancellation). Without the element, or if that pipeline does not
//! start, capture falls back to the plain chain.

use super::MicrophoneSource;
use crate::config::{AudioSettings, MicrophoneSettings};
use crate::constants::{audio, timing};
use crate::errors::CaptureError;
use crate::media::codec::gstreamer::is_element_available;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use tracing::{debug, error, info, warn};

const START_CHECK_MS: u64 = 500;

struct ActiveCapture {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
}

/// Voice processing stage options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VoiceProcessing {
    echo_cancel: bool,
}

/// `gst-launch` description of the capture pipeline
fn capture_description(
    source: &str,
    rate: u32,
    channels: u8,
    voice: Option<VoiceProcessing>,
) -> String {
    let output_caps = format!(
        "audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={}",
        rate, channels
    );
    match voice {
        Some(voice) => format!(
            "{source} ! audioconvert ! audioresample ! \
             audio/x-raw,format=S16LE,layout=interleaved,rate={dsp_rate},channels={channels} ! \
             {element} name=dsp echo-cancel={echo} noise-suppression=true gain-control=true ! \
             audioconvert ! audioresample ! {output_caps} ! appsink name=sink",
            dsp_rate = audio::VOICE_PROCESSING_RATE,
            element = audio::VOICE_PROCESSING_ELEMENT,
            echo = voice.echo_cancel,
        ),
        None => format!(
            "{} ! audioconvert ! audioresample ! {} ! appsink name=sink",
            source, output_caps
        ),
    }
}

/// Microphone backed by a GStreamer appsink
pub struct GstMicrophone {
    source: String,
    requested_rate: u32,
    requested_channels: u8,
    channels: u8,
    voice: Option<VoiceProcessing>,
    active: Option<ActiveCapture>,
    /// Unread remainder of the last pulled buffer
    pending: Vec<u8>,
    pending_offset: usize,
}

impl GstMicrophone {
    pub fn new(microphone: &MicrophoneSettings, audio: &AudioSettings) -> Self {
        Self {
            source: microphone.source.clone(),
            requested_rate: audio.sample_rate,
            requested_channels: audio.channels.max(1),
            channels: audio.channels.max(1),
            voice: microphone.voice_processing.then_some(VoiceProcessing {
                echo_cancel: microphone.echo_cancel,
            }),
            active: None,
            pending: Vec::new(),
            pending_offset: 0,
        }
    }

    fn launch(
        &self,
        channels: u8,
        voice: Option<VoiceProcessing>,
    ) -> Result<ActiveCapture, CaptureError> {
        let description =
            capture_description(&self.source, self.requested_rate, channels, voice);
        debug!(pipeline = %description, "Creating microphone pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CaptureError::DeviceNotFound(format!("microphone: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| CaptureError::InitializationFailed("Failed to downcast to Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::InitializationFailed("Failed to get appsink".into()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| CaptureError::InitializationFailed("Failed to cast appsink".into()))?;
        appsink.set_property("sync", false);

        pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
            let _ = pipeline.set_state(gstreamer::State::Null);
            CaptureError::InitializationFailed(format!("Failed to start microphone: {}", e))
        })?;

        if let Some(bus) = pipeline.bus()
            && let Some(msg) = bus.timed_pop_filtered(
                gstreamer::ClockTime::from_mseconds(START_CHECK_MS),
                &[gstreamer::MessageType::Error],
            )
            && let gstreamer::MessageView::Error(err) = msg.view()
        {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(CaptureError::InitializationFailed(err.error().to_string()));
        }

        Ok(ActiveCapture { pipeline, appsink })
    }

    /// Pull the next buffer into `pending`; `Ok(false)` on timeout
    fn refill(&mut self) -> Result<bool, CaptureError> {
        let Some(active) = &self.active else {
            return Err(CaptureError::ReadFailed("microphone not started".into()));
        };

        let timeout = gstreamer::ClockTime::from_mseconds(timing::MIC_READ_TIMEOUT.as_millis() as u64);
        let Some(sample) = active.appsink.try_pull_sample(timeout) else {
            if active.appsink.is_eos() {
                return Err(CaptureError::Disconnected);
            }
            return Ok(false);
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::ReadFailed("No buffer in sample".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| CaptureError::ReadFailed(format!("Failed to map buffer: {}", e)))?;

        self.pending.clear();
        self.pending.extend_from_slice(map.as_slice());
        self.pending_offset = 0;
        Ok(true)
    }
}

impl MicrophoneSource for GstMicrophone {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Ok(());
        }
        gstreamer::init().map_err(|e| CaptureError::InitializationFailed(e.to_string()))?;

        let mut layouts = vec![self.requested_channels];
        if self.requested_channels > 1 {
            layouts.push(1);
        }

        let voice = match self.voice {
            Some(voice) if is_element_available(audio::VOICE_PROCESSING_ELEMENT) => Some(voice),
            Some(_) => {
                warn!(
                    element = audio::VOICE_PROCESSING_ELEMENT,
                    "Voice processing element not installed, capturing unprocessed audio"
                );
                None
            }
            None => None,
        };
        let stages = if voice.is_some() { vec![voice, None] } else { vec![None] };

        let mut last_error = None;
        for (stage, channels) in stages
            .iter()
            .flat_map(|&stage| layouts.iter().map(move |&channels| (stage, channels)))
        {
            match self.launch(channels, stage) {
                Ok(active) => {
                    if voice.is_some() && stage.is_none() {
                        warn!("Voice processing pipeline failed, capturing unprocessed audio");
                    }
                    if channels != self.requested_channels {
                        warn!(
                            requested = self.requested_channels,
                            channels, "Falling back to mono microphone capture"
                        );
                    }
                    self.channels = channels;
                    self.active = Some(active);
                    self.pending.clear();
                    self.pending_offset = 0;
                    info!(
                        sample_rate = self.requested_rate,
                        channels,
                        voice_processing = stage.is_some(),
                        "Microphone started"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        channels,
                        voice_processing = stage.is_some(),
                        error = %e,
                        "Microphone configuration failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| CaptureError::InitializationFailed("no channel layout".into()));
        error!(error = %err, "Could not start microphone");
        Err(err)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CaptureError> {
        if self.pending_offset >= self.pending.len() && !self.refill()? {
            return Ok(0);
        }

        let available = &self.pending[self.pending_offset..];
        let n = available.len().min(buffer.len());
        buffer[..n].copy_from_slice(&available[..n]);
        self.pending_offset += n;
        Ok(n)
    }

    fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if let Err(e) = active.pipeline.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to stop microphone pipeline");
        }
        self.pending.clear();
        self.pending_offset = 0;
        debug!("Microphone pipeline stopped");
    }

    fn sample_rate(&self) -> u32 {
        self.requested_rate
    }

    fn channel_count(&self) -> u8 {
        self.channels
    }
}

impl Drop for GstMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
