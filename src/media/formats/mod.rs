// SPDX-License-Identifier: MPL-2.0

//! Bitstream framing
//!
//! - [`adts`]: 7-byte ADTS headers for raw AAC frames
//! - [`h264`]: Annex-B NAL scanning and SPS/PPS handling

pub mod adts;
pub mod h264;

pub use h264::ParameterSets;
