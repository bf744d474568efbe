// SPDX-License-Identifier: MPL-2.0

//! Camera Stream - dual-stream camera and microphone capture
//!
//! Captures camera frames and microphone PCM, encodes them concurrently to
//! H.264 (parameter sets prefixed on key frames) and AAC (ADTS framed), and
//! hands the encoded streams to a [`media::StreamSink`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera and microphone sources, capture loop thread
//! - [`media`]: Pixel conversion, codec backends, encoder sessions, bitstream formats
//! - [`pipelines`]: Stream orchestration and elementary stream files
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let manager = StreamManager::new(factory, sink, camera, microphone, settings);
//! manager.start()?;
//! // ...
//! manager.switch_camera()?;
//! // ...
//! manager.stop();
//! manager.wait_stopped();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use backends::camera::{CameraSource, LensFacing, RawVideoFrame};
pub use backends::microphone::MicrophoneSource;
pub use config::Config;
pub use errors::{AppError, AppResult, CaptureError, EncoderError};
pub use media::encoders::{AudioEncoder, EncoderState, Submission, VideoEncoder};
pub use media::{BufferIndexPool, StreamSink};
pub use pipelines::{ElementaryStreamWriter, PipelineSettings, StreamManager};
