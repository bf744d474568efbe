// SPDX-License-Identifier: MPL-2.0

//! AAC-LC encoder session
//!
//! Accepts 16-bit PCM chunks and emits AAC frames, optionally wrapped in a
//! 7-byte ADTS header so the output is a playable `.aac` stream.

use super::session::{EncoderCore, EncoderStats, FatalErrorHandler, OutputHandler, Submission};
use super::state::EncoderState;
use crate::constants::{adts::HEADER_LEN, audio};
use crate::errors::EncoderError;
use crate::media::codec::{AudioFormat, BackendFactory, BufferInfo, MediaFormat, OutputFormat};
use crate::media::formats::adts::{self, AdtsParams};
use crate::media::sink::{EncodedAacFrame, StreamKind, StreamSink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requested AAC session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacConfig {
    pub sample_rate: u32,
    pub channels: u8,
    /// Bits per second
    pub bitrate: u32,
    /// Prepend an ADTS header to every frame
    pub adts: bool,
}

impl Default for AacConfig {
    fn default() -> Self {
        Self {
            sample_rate: audio::DEFAULT_SAMPLE_RATE,
            channels: audio::DEFAULT_CHANNELS,
            bitrate: audio::DEFAULT_BITRATE,
            adts: true,
        }
    }
}

impl AacConfig {
    /// Check the parameters can be encoded and framed
    pub fn validate(&self) -> Result<AdtsParams, EncoderError> {
        if self.bitrate == 0 {
            return Err(EncoderError::Configuration(
                "AAC bit rate must be non-zero".to_string(),
            ));
        }
        if self.channels == 0 || self.channels > audio::MAX_CHANNELS {
            return Err(EncoderError::Configuration(format!(
                "unsupported AAC channel count {} (1-{})",
                self.channels,
                audio::MAX_CHANNELS
            )));
        }
        AdtsParams::new(self.sample_rate, self.channels).ok_or_else(|| {
            EncoderError::Configuration(format!(
                "sample rate {} Hz has no MPEG-4 frequency index",
                self.sample_rate
            ))
        })
    }

    pub fn media_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, self.bitrate)
    }
}

/// Callback-thread half of the audio session
struct AudioOutputHandler {
    sink: Arc<dyn StreamSink>,
    adts: Option<AdtsParams>,
    frame: Vec<u8>,
}

impl AudioOutputHandler {
    fn new(sink: Arc<dyn StreamSink>, adts: Option<AdtsParams>) -> Self {
        Self {
            sink,
            adts,
            frame: Vec::new(),
        }
    }
}

impl OutputHandler for AudioOutputHandler {
    fn on_output(&mut self, data: &[u8], info: &BufferInfo) {
        if info.is_codec_config {
            debug!(size = data.len(), "Skipping AAC codec config buffer");
            return;
        }
        if data.is_empty() {
            return;
        }

        match self.adts {
            Some(_) if !adts::fits(data.len()) => {
                warn!(size = data.len(), "AAC frame too long for ADTS header, dropping");
            }
            Some(params) => {
                self.frame.clear();
                self.frame.reserve(HEADER_LEN + data.len());
                self.frame.extend_from_slice(&params.header(data.len()));
                self.frame.extend_from_slice(data);
                self.sink.on_audio_frame(&EncodedAacFrame {
                    data: &self.frame,
                    presentation_time_us: info.presentation_time_us,
                    has_adts_header: true,
                });
            }
            None => self.sink.on_audio_frame(&EncodedAacFrame {
                data,
                presentation_time_us: info.presentation_time_us,
                has_adts_header: false,
            }),
        }
    }

    fn on_format_changed(&mut self, format: &OutputFormat) {
        let OutputFormat::Audio(negotiated) = format else {
            warn!("Video format reported by audio encoder, ignoring");
            return;
        };

        info!(
            sample_rate = negotiated.sample_rate,
            channels = negotiated.channels,
            "AAC output format negotiated"
        );

        if self.adts.is_some() {
            match AdtsParams::new(negotiated.sample_rate, negotiated.channels) {
                Some(params) => self.adts = Some(params),
                None => warn!(
                    sample_rate = negotiated.sample_rate,
                    channels = negotiated.channels,
                    "Negotiated format not representable in ADTS, keeping requested values"
                ),
            }
        }

        self.sink.on_audio_format(negotiated);
    }
}

/// AAC-LC encoder
pub struct AudioEncoder {
    core: EncoderCore,
    sink: Arc<dyn StreamSink>,
    config: Mutex<AacConfig>,
}

impl AudioEncoder {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        sink: Arc<dyn StreamSink>,
        config: AacConfig,
    ) -> Self {
        Self {
            core: EncoderCore::new(StreamKind::Audio, factory),
            sink,
            config: Mutex::new(config),
        }
    }

    /// Delay between `stop()` and backend release
    pub fn with_release_grace(mut self, grace: Duration) -> Self {
        self.core.set_release_grace(grace);
        self
    }

    pub fn set_fatal_error_handler(&self, handler: FatalErrorHandler) {
        self.core.set_fatal_error_handler(handler);
    }

    pub fn config(&self) -> AacConfig {
        *self.config.lock()
    }

    /// Configure a session with the stored parameters
    pub fn initialize(&self) -> Result<(), EncoderError> {
        let config = self.config();
        self.initialize_with(config)
    }

    /// Replace the stored parameters and configure a session with them
    ///
    /// Allowed from `Uninitialized` and `Stopped`.
    pub fn initialize_with(&self, config: AacConfig) -> Result<(), EncoderError> {
        let params = config.validate()?;
        let handler = AudioOutputHandler::new(Arc::clone(&self.sink), config.adts.then_some(params));

        self.core
            .configure(MediaFormat::Audio(config.media_format()), handler)?;
        *self.config.lock() = config;

        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            bitrate = config.bitrate,
            adts = config.adts,
            "Audio encoder initialized"
        );
        Ok(())
    }

    pub fn start(&self) -> Result<(), EncoderError> {
        self.core.start()
    }

    /// Submit one PCM chunk; never blocks
    ///
    /// Chunks larger than one input slot are refused.
    pub fn encode(&self, pcm: &[u8]) -> Submission {
        if self.core.state() != EncoderState::Running {
            return Submission::Inactive;
        }
        if pcm.len() > audio::MAX_INPUT_SIZE {
            warn!(
                size = pcm.len(),
                max = audio::MAX_INPUT_SIZE,
                "PCM chunk larger than input slot, dropping"
            );
            return Submission::Dropped;
        }
        self.core.submit(pcm)
    }

    /// Stop accepting PCM; the backend is released after the grace delay
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

    pub fn stats(&self) -> EncoderStats {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AacConfig::default();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 1);
        assert_eq!(config.bitrate, 128_000);
        assert!(config.adts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let bad_rate = AacConfig {
            sample_rate: 44_000,
            ..Default::default()
        };
        assert!(matches!(
            bad_rate.validate(),
            Err(EncoderError::Configuration(_))
        ));

        let bad_channels = AacConfig {
            channels: 8,
            ..Default::default()
        };
        assert!(bad_channels.validate().is_err());

        let no_bitrate = AacConfig {
            bitrate: 0,
            ..Default::default()
        };
        assert!(no_bitrate.validate().is_err());
    }
}
