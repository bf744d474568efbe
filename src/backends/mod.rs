// SPDX-License-Identifier: MPL-2.0

//! Capture backends
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                StreamManager                 │
//! └──────────────┬────────────────────┬──────────┘
//!                │                    │
//! ┌──────────────┴─────┐   ┌──────────┴──────────┐
//! │   CameraSource     │   │  MicrophoneSource   │
//! │ (frame callbacks)  │   │  (blocking reads on │
//! │                    │   │   a capture loop)   │
//! └────────────────────┘   └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Camera trait, frame types and the GStreamer source
//! - [`microphone`]: Microphone trait and the GStreamer source
//! - [`capture_loop`]: Named thread driving blocking reads

pub mod camera;
pub mod capture_loop;
pub mod microphone;
