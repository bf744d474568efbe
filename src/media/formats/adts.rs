// SPDX-License-Identifier: MPL-2.0

//! ADTS framing for raw AAC-LC access units
//!
//! Fixed 7-byte header with the ID bit set, no CRC, buffer fullness 0x7FF (VBR).

use crate::constants::adts::{HEADER_LEN, MAX_FRAME_LEN, PROFILE_AAC_LC_MINUS_ONE};
use tracing::warn;

/// MPEG-4 sampling frequency table (index = position)
pub const SAMPLING_FREQUENCIES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Sampling frequency index for `sample_rate`, if it is one of the 13 standard rates
pub fn frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|idx| idx as u8)
}

/// Header parameters that stay fixed for a whole stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsParams {
    pub frequency_index: u8,
    pub channel_config: u8,
}

impl AdtsParams {
    /// `None` when the rate has no frequency index or the channel count
    /// does not fit the 3-bit channel configuration
    pub fn new(sample_rate: u32, channels: u8) -> Option<Self> {
        if channels == 0 || channels > 7 {
            return None;
        }
        Some(Self {
            frequency_index: frequency_index(sample_rate)?,
            channel_config: channels,
        })
    }

    /// Header for a payload of `payload_len` bytes
    pub fn header(&self, payload_len: usize) -> [u8; HEADER_LEN] {
        header(payload_len, self.frequency_index, self.channel_config)
    }
}

/// Whether a payload of `payload_len` bytes fits the header's length bits
pub fn fits(payload_len: usize) -> bool {
    payload_len + HEADER_LEN <= MAX_FRAME_LEN
}

/// Build the 7-byte ADTS header for a raw AAC payload of `payload_len` bytes
///
/// The frame length covers header plus payload. `frame_len >> 11` is packed
/// into the low bits of byte 3 unmasked, so lengths up to [`MAX_FRAME_LEN`]
/// round-trip through [`parse_frame_length`]. Longer payloads must be
/// rejected by the caller (see [`fits`]); their length is truncated.
pub fn header(payload_len: usize, frequency_index: u8, channel_config: u8) -> [u8; HEADER_LEN] {
    let frame_len = payload_len + HEADER_LEN;
    if frame_len > MAX_FRAME_LEN {
        warn!(
            frame_len,
            max = MAX_FRAME_LEN,
            "AAC frame too long for ADTS length field"
        );
    }
    let frame_len = frame_len & MAX_FRAME_LEN;

    [
        0xFF,
        0xF9,
        (PROFILE_AAC_LC_MINUS_ONE << 6)
            | ((frequency_index & 0x0F) << 2)
            | ((channel_config >> 2) & 0x01),
        ((channel_config & 0x03) << 6) | (frame_len >> 11) as u8,
        ((frame_len & 0x7FF) >> 3) as u8,
        (((frame_len & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ]
}

/// Whether `data` starts with an ADTS sync word (0xFFF, layer 0)
pub fn has_sync_word(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] & 0xF6 == 0xF0
}

/// Read the 13-bit frame length field back out of a header
pub fn parse_frame_length(header: &[u8]) -> Option<usize> {
    if header.len() < HEADER_LEN || !has_sync_word(header) {
        return None;
    }
    let len = ((header[3] as usize & 0x07) << 11)
        | ((header[4] as usize) << 3)
        | (header[5] as usize >> 5);
    Some(len)
}

/// Channel configuration stored in a header
pub fn parse_channel_config(header: &[u8]) -> Option<u8> {
    if header.len() < HEADER_LEN || !has_sync_word(header) {
        return None;
    }
    Some(((header[2] & 0x01) << 2) | (header[3] >> 6))
}

/// Sampling frequency index stored in a header
pub fn parse_frequency_index(header: &[u8]) -> Option<u8> {
    if header.len() < HEADER_LEN || !has_sync_word(header) {
        return None;
    }
    Some((header[2] >> 2) & 0x0F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_table() {
        assert_eq!(frequency_index(96_000), Some(0));
        assert_eq!(frequency_index(48_000), Some(3));
        assert_eq!(frequency_index(44_100), Some(4));
        assert_eq!(frequency_index(8_000), Some(11));
        assert_eq!(frequency_index(7_350), Some(12));
        assert_eq!(frequency_index(44_000), None);
    }

    #[test]
    fn test_known_header_bytes() {
        // 44.1 kHz mono, 100-byte payload -> frame length 107
        let h = header(100, 4, 1);
        assert_eq!(h, [0xFF, 0xF9, 0x50, 0x40, 0x0D, 0x7F, 0xFC]);
    }

    #[test]
    fn test_largest_payload_header_bytes() {
        // 8191-byte payload -> frame length 8198, which spills into byte 3
        let h = header(8191, 4, 1);
        assert_eq!(h, [0xFF, 0xF9, 0x50, 0x44, 0x00, 0xDF, 0xFC]);
        assert_eq!(parse_frame_length(&h), Some(8198));
        assert_eq!(parse_channel_config(&h), Some(1));
    }

    #[test]
    fn test_fits() {
        assert!(fits(0));
        assert!(fits(8191));
        assert!(fits(MAX_FRAME_LEN - HEADER_LEN));
        assert!(!fits(MAX_FRAME_LEN - HEADER_LEN + 1));
    }

    #[test]
    fn test_length_field_for_boundary_sizes() {
        for total in [7usize, 8, 107, 2047, 8191, 8198] {
            let h = header(total - HEADER_LEN, 4, 2);
            assert_eq!(h[0], 0xFF);
            assert_eq!(h[1], 0xF9);
            assert_eq!(parse_frame_length(&h), Some(total), "frame length {}", total);
            assert_eq!(parse_channel_config(&h), Some(2));
            assert_eq!(parse_frequency_index(&h), Some(4));
        }
    }

    #[test]
    fn test_length_field_tracks_payload() {
        for payload in [0usize, 1, 100, 2047, 8191] {
            let h = header(payload, 4, 1);
            assert_eq!(&h[..2], &[0xFF, 0xF9]);
            assert_eq!(parse_frame_length(&h), Some(payload + HEADER_LEN));
            assert_eq!(h[2] >> 6, PROFILE_AAC_LC_MINUS_ONE);
            assert_eq!(h[5] & 0x1F, 0x1F);
            assert_eq!(h[6], 0xFC);
        }
    }

    #[test]
    fn test_seven_channel_config_spans_bytes() {
        let h = header(10, 4, 7);
        assert_eq!(h[2] & 0x01, 1);
        assert_eq!(h[3] >> 6, 3);
        assert_eq!(parse_channel_config(&h), Some(7));
    }

    #[test]
    fn test_params_reject_unsupported() {
        assert!(AdtsParams::new(44_100, 0).is_none());
        assert!(AdtsParams::new(44_100, 8).is_none());
        assert!(AdtsParams::new(12_345, 1).is_none());
        let p = AdtsParams::new(48_000, 2).unwrap();
        assert_eq!(p.frequency_index, 3);
        assert_eq!(p.header(0)[3] >> 6, 2);
    }

    #[test]
    fn test_parse_rejects_non_adts() {
        assert_eq!(parse_frame_length(&[0x00; 7]), None);
        assert_eq!(parse_frame_length(&[0xFF, 0xF9]), None);
    }
}
