// SPDX-License-Identifier: MPL-2.0

//! Media processing for the capture pipelines
//!
//! # Color Space Conversion
//!
//! Camera frames arrive as planar YUV 4:2:0 with arbitrary strides. The
//! [`yuv`] module packs them into semi-planar buffers (NV21/NV12) and
//! rotates them by quarter turns for the encoder.
//!
//! # Encoding
//!
//! The [`encoders`] module drives asynchronous codec backends:
//! - **Video**: H.264, parameter sets prefixed on key frames
//! - **Audio**: AAC-LC, optionally framed with ADTS headers
//!
//! # Modules
//!
//! - [`buffer_pool`]: Free input slots announced by a codec
//! - [`codec`]: Codec backend interface and the GStreamer implementation
//! - [`encoders`]: Video/audio encoder sessions
//! - [`formats`]: H.264 Annex-B and ADTS bitstream helpers
//! - [`sink`]: Consumers of encoded output and preview frames
//! - [`yuv`]: Pixel format conversion and rotation

pub mod buffer_pool;
pub mod codec;
pub mod encoders;
pub mod formats;
pub mod sink;
pub mod yuv;

pub use buffer_pool::BufferIndexPool;
pub use sink::{PreviewSink, StreamKind, StreamSink};
