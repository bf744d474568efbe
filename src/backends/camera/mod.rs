// SPDX-License-Identifier: MPL-2.0

//! Camera sources
//!
//! ```text
//! ┌─────────────────────┐
//! │   StreamManager     │  ← bind(lens, handler) / unbind()
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CameraSource Trait  │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!            ▼
//!      ┌───────────┐
//!      │ GStreamer │  ← Concrete implementation (feature `gstreamer`)
//!      └───────────┘
//! ```

#[cfg(feature = "gstreamer")]
pub mod gstreamer;
pub mod types;

#[cfg(feature = "gstreamer")]
pub use self::gstreamer::GstCameraSource;
pub use types::*;
