// SPDX-License-Identifier: MPL-2.0

//! Asynchronous codec backend interface
//!
//! An encoder backend owns a fixed set of input slots. It announces a free
//! slot through [`CodecCallbacks::on_input_available`]; the encoder fills it
//! with [`EncoderBackend::queue_input`], which consumes the slot. Output,
//! format changes and errors arrive on the backend's own callback thread.

#[cfg(feature = "gstreamer")]
pub mod gstreamer;

use crate::constants::{audio, video};
use crate::errors::EncoderError;
use crate::media::formats::ParameterSets;
use crate::media::yuv::ChromaLayout;

/// Handle to one encoder-owned input slot
///
/// Deliberately not `Clone`: a slot is announced once by the backend and
/// consumed once by `queue_input`.
#[derive(Debug, PartialEq, Eq)]
pub struct InputSlot {
    index: usize,
}

impl InputSlot {
    /// Called by backends when a slot becomes free
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Codecs the pipeline can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    AacLc,
}

impl CodecKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            CodecKind::H264 => video::MIME_TYPE,
            CodecKind::AacLc => audio::MIME_TYPE,
        }
    }
}

/// H.264 session parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Bits per second
    pub bitrate: u32,
    pub frame_rate: u32,
    pub keyframe_interval_secs: u32,
    /// Layout of the semi-planar frames passed to `queue_input`
    pub input_layout: ChromaLayout,
}

impl VideoFormat {
    /// Fixed-rate session for `width x height` frames
    pub fn new(width: u32, height: u32, input_layout: ChromaLayout) -> Self {
        Self {
            width,
            height,
            bitrate: video::bitrate_for(width, height),
            frame_rate: video::FRAME_RATE,
            keyframe_interval_secs: video::KEYFRAME_INTERVAL_SECS,
            input_layout,
        }
    }

    /// Bytes in one input frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }
}

/// AAC session parameters, also used for the negotiated output format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    /// Bits per second
    pub bitrate: u32,
    pub max_input_size: usize,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u8, bitrate: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bitrate,
            max_input_size: audio::MAX_INPUT_SIZE,
        }
    }
}

/// What `EncoderBackend::configure` is asked to set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl MediaFormat {
    pub fn kind(&self) -> CodecKind {
        match self {
            MediaFormat::Video(_) => CodecKind::H264,
            MediaFormat::Audio(_) => CodecKind::AacLc,
        }
    }
}

/// Metadata for one output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub size: usize,
    pub presentation_time_us: u64,
    pub is_key_frame: bool,
    /// Buffer carries codec configuration (SPS/PPS, AudioSpecificConfig)
    /// rather than media
    pub is_codec_config: bool,
}

/// Output format reported by the backend once known
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Video(ParameterSets),
    Audio(AudioFormat),
}

/// Events raised by a backend on its callback thread
///
/// The output slice passed to `on_output_available` is only valid for the
/// duration of the call; the backend reclaims the buffer afterwards.
pub trait CodecCallbacks: Send {
    fn on_input_available(&mut self, slot: InputSlot);
    fn on_output_available(&mut self, data: &[u8], info: &BufferInfo);
    fn on_output_format_changed(&mut self, format: &OutputFormat);
    fn on_error(&mut self, error: EncoderError);
}

/// One codec instance
pub trait EncoderBackend: Send + Sync {
    /// Element or device name, for logging
    fn name(&self) -> &str;

    /// Configure the codec and register the callback sink
    fn configure(
        &mut self,
        format: &MediaFormat,
        callbacks: Box<dyn CodecCallbacks>,
    ) -> Result<(), EncoderError>;

    /// Start processing; input slots are announced after this
    fn start(&mut self) -> Result<(), EncoderError>;

    /// Fill `slot` with `data` and submit it
    fn queue_input(
        &self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: u64,
    ) -> Result<(), EncoderError>;

    /// Stop the codec and free its resources. Idempotent.
    fn release(&mut self);
}

/// Creates backends for a codec
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: CodecKind) -> Result<Box<dyn EncoderBackend>, EncoderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_format_derives_bitrate() {
        let format = VideoFormat::new(720, 1280, ChromaLayout::Nv12);
        assert_eq!(format.bitrate, 720 * 1280 * 5);
        assert_eq!(format.frame_rate, 30);
        assert_eq!(format.keyframe_interval_secs, 1);
        assert_eq!(format.frame_size(), 720 * 1280 * 3 / 2);
    }

    #[test]
    fn test_audio_format_input_size() {
        let format = AudioFormat::new(44_100, 1, 128_000);
        assert_eq!(format.max_input_size, 16_384);
        assert_eq!(MediaFormat::Audio(format).kind(), CodecKind::AacLc);
    }
}
