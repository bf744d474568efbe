// SPDX-License-Identifier: MPL-2.0

//! Encoder sessions
//!
//! Each encoder wraps one asynchronous codec backend:
//! - Input slots announced by the backend are pooled and consumed one per sample
//! - Samples are dropped, never queued, when no slot is free
//! - Output is framed for downstream use (SPS/PPS prefixing, ADTS headers)
//! - `stop()` returns at once; the backend is released after a grace delay

pub mod audio;
mod session;
pub mod state;
pub mod video;

pub use audio::{AacConfig, AudioEncoder};
pub use session::{EncoderStats, FatalErrorHandler, Submission};
pub use state::EncoderState;
pub use video::{MissingParameterSets, VideoEncoder};
