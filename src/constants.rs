// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// H.264 session parameters
pub mod video {
    /// MIME type handed to the codec backend
    pub const MIME_TYPE: &str = "video/avc";

    /// Target bit rate is `width * height * BITRATE_FACTOR` bits per second
    pub const BITRATE_FACTOR: u32 = 5;

    /// Nominal capture frame rate
    pub const FRAME_RATE: u32 = 30;

    /// Seconds between forced key frames
    pub const KEYFRAME_INTERVAL_SECS: u32 = 1;

    /// Bit rate for a session of the given (post-rotation) dimensions
    pub fn bitrate_for(width: u32, height: u32) -> u32 {
        width
            .saturating_mul(height)
            .saturating_mul(BITRATE_FACTOR)
    }

    /// Key frame interval expressed in frames
    pub const fn keyframe_interval_frames() -> u32 {
        FRAME_RATE * KEYFRAME_INTERVAL_SECS
    }
}

/// AAC-LC session parameters
pub mod audio {
    /// MIME type handed to the codec backend
    pub const MIME_TYPE: &str = "audio/mp4a-latm";

    /// Default microphone sample rate (Hz)
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u8 = 1;

    /// Default AAC bit rate (bits per second)
    pub const DEFAULT_BITRATE: u32 = 128_000;

    /// Largest PCM chunk accepted by one encoder input slot
    pub const MAX_INPUT_SIZE: usize = 16_384;

    /// Size of one microphone read
    pub const READ_CHUNK_SIZE: usize = 4_096;

    /// Bytes per PCM sample (16-bit little endian)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Highest channel configuration representable in an ADTS header
    pub const MAX_CHANNELS: u8 = 7;

    /// Rate the voice processing stage runs at; capture is resampled around it
    pub const VOICE_PROCESSING_RATE: u32 = 48_000;

    /// GStreamer element providing noise suppression, gain control and
    /// echo cancellation
    pub const VOICE_PROCESSING_ELEMENT: &str = "webrtcdsp";
}

/// ADTS header layout
pub mod adts {
    /// Header length without CRC
    pub const HEADER_LEN: usize = 7;

    /// Largest frame length the header can carry: the 13-bit length field
    /// plus the bit of byte 3 that `frame_len >> 11` spills into
    pub const MAX_FRAME_LEN: usize = 0x3FFF;

    /// MPEG-4 audio object type minus one (AAC LC = 2)
    pub const PROFILE_AAC_LC_MINUS_ONE: u8 = 1;
}

/// Timing constants for the encoding pipeline
pub mod timing {
    use super::Duration;

    /// Delay between `stop()` and releasing the codec backend, letting
    /// in-flight output callbacks finish
    pub const RELEASE_GRACE: Duration = Duration::from_millis(1000);

    /// Sleep after an empty or failed microphone read
    pub const READ_BACKOFF: Duration = Duration::from_millis(10);

    /// How often (in events) to repeat a "sample dropped" log line
    pub const DROP_LOG_INTERVAL: u64 = 30;

    /// How long a blocking microphone read waits for data before returning 0
    pub const MIC_READ_TIMEOUT: Duration = Duration::from_millis(100);

    /// Default recording duration for the CLI
    pub const DEFAULT_RECORD_SECS: u64 = 10;
}

/// Names used for spawned threads
pub mod threads {
    pub const AUDIO_LOOP: &str = "audio-capture";
    pub const VIDEO_RELEASE: &str = "video-encoder-release";
    pub const AUDIO_RELEASE: &str = "audio-encoder-release";
    pub const FATAL_STOP: &str = "pipeline-fatal-stop";
    pub const FILE_WRITER: &str = "stream-writer";
    pub const CODEC_DISPATCH: &str = "codec-dispatch";
}
