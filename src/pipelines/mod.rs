// SPDX-License-Identifier: MPL-2.0

//! Capture pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌────────────────────┐
//! │ Camera Frame │ ──▶ │  StreamManager    │ ──▶ │  StreamSink        │
//! │ (I420)       │     │  - NV21 + rotate  │     │  (e.g. .h264/.aac  │
//! │ Microphone   │     │  - H.264 / AAC    │     │   file writer)     │
//! │ (PCM S16LE)  │     │                   │     │                    │
//! └──────────────┘     └───────────────────┘     └────────────────────┘
//! ```
//!
//! - [`stream_manager`]: owns both encoders and routes capture into them
//! - [`writer`]: elementary stream files for the encoded output

pub mod stream_manager;
pub mod writer;

pub use stream_manager::{FrameStats, PipelineSettings, StreamManager};
pub use writer::{ElementaryStreamWriter, WriterStats};
