// SPDX-License-Identifier: MPL-2.0

//! Microphone sources
//!
//! A microphone delivers interleaved 16-bit little-endian PCM through
//! blocking reads. `Ok(0)` and `Err(_)` are both transient: the capture
//! loop backs off and reads again.

#[cfg(feature = "gstreamer")]
pub mod gstreamer;

use crate::errors::CaptureError;

#[cfg(feature = "gstreamer")]
pub use self::gstreamer::GstMicrophone;

pub trait MicrophoneSource: Send {
    /// Open the device and begin capturing
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Fill `buf` with up to `buf.len()` bytes of PCM
    ///
    /// Blocks for a bounded time. Returns the number of bytes written, which
    /// may be 0 when no data arrived.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError>;

    /// Stop capturing and close the device. Idempotent.
    fn stop(&mut self);

    /// Sample rate actually in use (valid after `start`)
    fn sample_rate(&self) -> u32;

    /// Channel count actually in use (valid after `start`)
    fn channel_count(&self) -> u8;
}
