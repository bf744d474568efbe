// SPDX-License-Identifier: MPL-2.0

//! Downstream interfaces for encoded output and preview frames

use crate::backends::camera::RawVideoFrame;
use crate::media::codec::{AudioFormat, BufferInfo};
use crate::media::formats::ParameterSets;

/// Which encoder an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// One H.264 access unit, borrowed from the encoder's output buffer
///
/// Key frames carry their parameter sets in front when the session has them.
#[derive(Debug, Clone, Copy)]
pub struct EncodedAccessUnit<'a> {
    pub data: &'a [u8],
    pub info: BufferInfo,
}

impl EncodedAccessUnit<'_> {
    pub fn is_key_frame(&self) -> bool {
        self.info.is_key_frame
    }

    pub fn presentation_time_us(&self) -> u64 {
        self.info.presentation_time_us
    }
}

/// One AAC frame, borrowed from the encoder's output buffer
#[derive(Debug, Clone, Copy)]
pub struct EncodedAacFrame<'a> {
    pub data: &'a [u8],
    pub presentation_time_us: u64,
    /// `data` starts with a 7-byte ADTS header
    pub has_adts_header: bool,
}

/// Receiver of encoded streams
///
/// Called synchronously on the encoder callback threads. Data is only valid
/// during the call; copy it to keep it. Implementations should return
/// quickly, since a slow sink stalls the encoder.
pub trait StreamSink: Send + Sync {
    fn on_parameter_sets(&self, parameter_sets: &ParameterSets);
    fn on_video_access_unit(&self, unit: &EncodedAccessUnit<'_>);
    fn on_audio_frame(&self, frame: &EncodedAacFrame<'_>);
    fn on_audio_format(&self, format: &AudioFormat);
}

/// Receiver of raw camera frames for on-screen preview
pub trait PreviewSink: Send + Sync {
    fn on_preview_frame(&self, frame: &RawVideoFrame);
}
