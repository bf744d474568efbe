// SPDX-License-Identifier: MPL-2.0

//! H.264 encoder session
//!
//! Accepts semi-planar 4:2:0 frames and emits Annex-B access units. Key
//! frames are prefixed with the session's SPS/PPS so every one of them can
//! start a decoder on its own.

use super::session::{EncoderCore, EncoderStats, FatalErrorHandler, OutputHandler, Submission};
use super::state::EncoderState;
use crate::constants::timing;
use crate::errors::EncoderError;
use crate::media::codec::{BackendFactory, BufferInfo, MediaFormat, OutputFormat, VideoFormat};
use crate::media::formats::ParameterSets;
use crate::media::formats::h264::to_hex;
use crate::media::sink::{EncodedAccessUnit, StreamKind, StreamSink};
use crate::media::yuv::ChromaLayout;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What to do with a key frame that arrives before any SPS/PPS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissingParameterSets {
    /// Forward the key frame unmodified (logged once per session)
    #[default]
    PassThrough,
    /// Discard the key frame
    Drop,
}

/// Callback-thread half of the video session
struct VideoOutputHandler {
    sink: Arc<dyn StreamSink>,
    parameter_sets: Option<ParameterSets>,
    policy: MissingParameterSets,
    warned_missing: bool,
}

impl VideoOutputHandler {
    fn new(sink: Arc<dyn StreamSink>, policy: MissingParameterSets) -> Self {
        Self {
            sink,
            parameter_sets: None,
            policy,
            warned_missing: false,
        }
    }

    fn update_parameter_sets(&mut self, parameter_sets: ParameterSets) {
        if self.parameter_sets.as_ref() == Some(&parameter_sets) {
            return;
        }

        debug!(
            sps = %to_hex(parameter_sets.sps()),
            pps = %to_hex(parameter_sets.pps()),
            "New H.264 parameter sets"
        );
        self.sink.on_parameter_sets(&parameter_sets);
        self.parameter_sets = Some(parameter_sets);
    }

    fn emit(&self, data: &[u8], info: BufferInfo) {
        self.sink
            .on_video_access_unit(&EncodedAccessUnit { data, info });
    }
}

impl OutputHandler for VideoOutputHandler {
    fn on_output(&mut self, data: &[u8], info: &BufferInfo) {
        if info.is_codec_config {
            match ParameterSets::from_annex_b(data) {
                Some(parameter_sets) => self.update_parameter_sets(parameter_sets),
                None => warn!(size = data.len(), "Codec config buffer without SPS/PPS"),
            }
            return;
        }

        if !info.is_key_frame {
            self.emit(data, *info);
            return;
        }

        match self.parameter_sets.as_ref() {
            Some(parameter_sets) => {
                let combined = parameter_sets.prefixed(data);
                let combined_info = BufferInfo {
                    size: combined.len(),
                    ..*info
                };
                self.emit(&combined, combined_info);
            }
            None => match self.policy {
                MissingParameterSets::PassThrough => {
                    if !self.warned_missing {
                        warn!("Key frame before parameter sets, forwarding without SPS/PPS");
                        self.warned_missing = true;
                    }
                    self.emit(data, *info);
                }
                MissingParameterSets::Drop => {
                    warn!(
                        pts = info.presentation_time_us,
                        "Key frame before parameter sets, dropping"
                    );
                }
            },
        }
    }

    fn on_format_changed(&mut self, format: &OutputFormat) {
        match format {
            OutputFormat::Video(parameter_sets) => {
                self.update_parameter_sets(parameter_sets.clone())
            }
            OutputFormat::Audio(_) => warn!("Audio format reported by video encoder, ignoring"),
        }
    }
}

/// H.264 encoder
///
/// All methods take `&self`; the encoder is meant to be shared between the
/// camera thread (`encode`) and a control thread (`init`/`start`/`stop`).
pub struct VideoEncoder {
    core: EncoderCore,
    sink: Arc<dyn StreamSink>,
    input_layout: ChromaLayout,
    missing_parameter_sets: MissingParameterSets,
    format: Mutex<Option<VideoFormat>>,
    size_mismatches: AtomicU64,
}

impl VideoEncoder {
    pub fn new(factory: Arc<dyn BackendFactory>, sink: Arc<dyn StreamSink>) -> Self {
        Self {
            core: EncoderCore::new(StreamKind::Video, factory),
            sink,
            input_layout: ChromaLayout::default(),
            missing_parameter_sets: MissingParameterSets::default(),
            format: Mutex::new(None),
            size_mismatches: AtomicU64::new(0),
        }
    }

    /// Delay between `stop()` and backend release
    pub fn with_release_grace(mut self, grace: Duration) -> Self {
        self.core.set_release_grace(grace);
        self
    }

    /// Chroma order of the frames passed to [`VideoEncoder::encode`]
    pub fn with_input_layout(mut self, layout: ChromaLayout) -> Self {
        self.input_layout = layout;
        self
    }

    pub fn with_missing_parameter_sets(mut self, policy: MissingParameterSets) -> Self {
        self.missing_parameter_sets = policy;
        self
    }

    pub fn set_fatal_error_handler(&self, handler: FatalErrorHandler) {
        self.core.set_fatal_error_handler(handler);
    }

    /// Configure a new session for `width x height` frames
    ///
    /// Bit rate is `width * height * 5`, 30 fps, one key frame per second.
    /// Allowed from `Uninitialized` and `Stopped`. Any previously cached
    /// parameter sets are discarded.
    pub fn init(&self, width: u32, height: u32) -> Result<(), EncoderError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(EncoderError::Configuration(format!(
                "video dimensions must be even and non-zero, got {}x{}",
                width, height
            )));
        }

        let format = VideoFormat::new(width, height, self.input_layout);
        let handler = VideoOutputHandler::new(Arc::clone(&self.sink), self.missing_parameter_sets);
        self.core
            .configure(MediaFormat::Video(format.clone()), handler)?;

        info!(
            width,
            height,
            bitrate = format.bitrate,
            fps = format.frame_rate,
            "Video encoder initialized"
        );
        *self.format.lock() = Some(format);
        Ok(())
    }

    pub fn start(&self) -> Result<(), EncoderError> {
        self.core.start()
    }

    /// Submit one semi-planar frame; never blocks
    ///
    /// Frames are dropped when the encoder is not running, when no input
    /// slot is free, or when the frame size does not match the session.
    pub fn encode(&self, frame: &[u8]) -> Submission {
        if self.core.state() != EncoderState::Running {
            return Submission::Inactive;
        }

        let expected = self.format.lock().as_ref().map(VideoFormat::frame_size);
        if expected != Some(frame.len()) {
            let count = self
                .size_mismatches
                .fetch_add(1, Ordering::Relaxed)
                + 1;
            if count == 1 || count % timing::DROP_LOG_INTERVAL == 0 {
                warn!(
                    got = frame.len(),
                    expected = ?expected,
                    count,
                    "Frame size does not match video session, dropping"
                );
            }
            return Submission::Dropped;
        }

        self.core.submit(frame)
    }

    /// Stop accepting frames; the backend is released after the grace delay
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Block until the deferred release triggered by `stop()` has finished
    pub fn wait_released(&self) {
        self.core.wait_released();
    }

    pub fn state(&self) -> EncoderState {
        self.core.state()
    }

    /// Dimensions of the configured session
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.format
            .lock()
            .as_ref()
            .map(|format| (format.width, format.height))
    }

    pub fn stats(&self) -> EncoderStats {
        self.core.stats()
    }
}
