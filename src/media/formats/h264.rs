// SPDX-License-Identifier: MPL-2.0

//! H.264 Annex-B helpers: NAL scanning and parameter-set handling

/// NAL unit types used by the pipeline
pub mod nal_type {
    pub const IDR: u8 = 5;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
}

/// 4-byte Annex-B start code
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// One NAL unit inside an Annex-B byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// The NAL including its leading start code
    pub raw: &'a [u8],
    /// The NAL without start code (first byte is the NAL header)
    pub payload: &'a [u8],
}

impl NalUnit<'_> {
    pub fn nal_type(&self) -> u8 {
        self.payload.first().map(|b| b & 0x1F).unwrap_or(0)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self.nal_type(), nal_type::SPS | nal_type::PPS)
    }
}

/// Split an Annex-B stream into NAL units
///
/// Both 3- and 4-byte start codes are recognised. Bytes before the first
/// start code are ignored.
pub fn nal_units(data: &[u8]) -> Vec<NalUnit<'_>> {
    // (start code offset, payload offset)
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            starts.push((code_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(idx, &(code_start, payload_start))| {
            let end = starts
                .get(idx + 1)
                .map(|&(next_code, _)| next_code)
                .unwrap_or(data.len());
            (payload_start < end).then(|| NalUnit {
                raw: &data[code_start..end],
                payload: &data[payload_start..end],
            })
        })
        .collect()
}

/// Whether the stream contains an IDR slice
pub fn contains_idr(data: &[u8]) -> bool {
    nal_units(data)
        .iter()
        .any(|nal| nal.nal_type() == nal_type::IDR)
}

fn with_start_code(nal: &[u8]) -> Vec<u8> {
    if nal.starts_with(&START_CODE) || nal.starts_with(&START_CODE[1..]) {
        nal.to_vec()
    } else {
        let mut out = Vec::with_capacity(START_CODE.len() + nal.len());
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
        out
    }
}

/// Sequence/picture parameter sets of one encoder session
///
/// Each set is stored in Annex-B form (start code included) so it can be
/// written straight in front of a key frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    sps: Vec<u8>,
    pps: Vec<u8>,
    vps: Option<Vec<u8>>,
}

impl ParameterSets {
    /// Build from SPS and PPS bytes, with or without start codes
    pub fn new(sps: &[u8], pps: &[u8]) -> Self {
        Self {
            sps: with_start_code(sps),
            pps: with_start_code(pps),
            vps: None,
        }
    }

    /// Attach a video parameter set (H.265 sessions)
    pub fn with_vps(mut self, vps: &[u8]) -> Self {
        self.vps = Some(with_start_code(vps));
        self
    }

    /// Collect the first SPS and PPS found in an Annex-B buffer
    pub fn from_annex_b(data: &[u8]) -> Option<Self> {
        let nals = nal_units(data);
        let sps = nals.iter().find(|n| n.nal_type() == nal_type::SPS)?;
        let pps = nals.iter().find(|n| n.nal_type() == nal_type::PPS)?;
        Some(Self::new(sps.raw, pps.raw))
    }

    pub fn sps(&self) -> &[u8] {
        &self.sps
    }

    pub fn pps(&self) -> &[u8] {
        &self.pps
    }

    pub fn vps(&self) -> Option<&[u8]> {
        self.vps.as_deref()
    }

    /// Total length of the prefix written before key frames
    pub fn prefix_len(&self) -> usize {
        self.vps.as_ref().map_or(0, Vec::len) + self.sps.len() + self.pps.len()
    }

    /// Append `[VPS] SPS PPS` to `out`
    pub fn write_prefix(&self, out: &mut Vec<u8>) {
        if let Some(vps) = &self.vps {
            out.extend_from_slice(vps);
        }
        out.extend_from_slice(&self.sps);
        out.extend_from_slice(&self.pps);
    }

    /// `[VPS] SPS PPS` followed by `access_unit`
    pub fn prefixed(&self, access_unit: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix_len() + access_unit.len());
        self.write_prefix(&mut out);
        out.extend_from_slice(access_unit);
        out
    }
}

/// Separate in-band SPS/PPS from the rest of an access unit
///
/// Returns the parameter sets (if both are present) and the access unit
/// with every SPS/PPS NAL removed. Access units without in-band parameter
/// sets come back unchanged.
pub fn split_parameter_sets(access_unit: &[u8]) -> (Option<ParameterSets>, Vec<u8>) {
    let nals = nal_units(access_unit);
    if !nals.iter().any(NalUnit::is_parameter_set) {
        return (None, access_unit.to_vec());
    }

    let parameter_sets = ParameterSets::from_annex_b(access_unit);
    let mut rest = Vec::with_capacity(access_unit.len());
    for nal in nals.iter().filter(|n| !n.is_parameter_set()) {
        rest.extend_from_slice(nal.raw);
    }
    (parameter_sets, rest)
}

/// Hex rendering used when logging parameter sets
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
