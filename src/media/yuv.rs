// SPDX-License-Identifier: MPL-2.0

//! CPU-side YUV 4:2:0 conversion and rotation
//!
//! All functions here are pure. Buffers are expected to be correctly sized
//! for the given dimensions; a mismatch is a caller bug and panics.
//!
//! Semi-planar layout used throughout:
//! - Y plane: `width * height` bytes, row stride = width
//! - Chroma plane: `height/2` rows of `width/2` interleaved pairs
//!   (NV21 = V,U pairs; NV12 = U,V pairs)

use serde::{Deserialize, Serialize};

/// Interleaving order of the semi-planar chroma plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChromaLayout {
    /// V first (Android camera layout)
    Nv21,
    /// U first (what most hardware encoders expect)
    #[default]
    Nv12,
}

impl ChromaLayout {
    /// GStreamer / fourcc style name
    pub fn name(&self) -> &'static str {
        match self {
            ChromaLayout::Nv21 => "NV21",
            ChromaLayout::Nv12 => "NV12",
        }
    }
}

/// Borrowed view of one plane of a planar image
///
/// `pixel_stride` is the distance in bytes between two horizontally
/// adjacent samples (1 for fully planar, 2 for interleaved chroma).
#[derive(Debug, Clone, Copy)]
pub struct PlaneView<'a> {
    pub data: &'a [u8],
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl<'a> PlaneView<'a> {
    pub fn new(data: &'a [u8], row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Minimum number of bytes needed to address `cols x rows` samples
    fn required_len(&self, cols: usize, rows: usize) -> usize {
        if cols == 0 || rows == 0 {
            return 0;
        }
        (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
    }

    #[inline]
    fn sample(&self, col: usize, row: usize) -> u8 {
        self.data[row * self.row_stride + col * self.pixel_stride]
    }
}

/// Size in bytes of a semi-planar 4:2:0 frame
#[inline]
pub fn semi_planar_size(width: usize, height: usize) -> usize {
    width * height * 3 / 2
}

fn assert_dimensions(width: usize, height: usize) {
    assert!(
        width > 0 && height > 0 && width % 2 == 0 && height % 2 == 0,
        "4:2:0 image dimensions must be even and non-zero, got {}x{}",
        width,
        height
    );
}

fn assert_semi_planar_len(buffer: &[u8], width: usize, height: usize) {
    assert_dimensions(width, height);
    assert_eq!(
        buffer.len(),
        semi_planar_size(width, height),
        "semi-planar buffer length does not match {}x{}",
        width,
        height
    );
}

/// Convert a three-plane Y/U/V image into a single NV21 buffer
///
/// Row and pixel strides are honoured per plane. Rows with a pixel stride
/// of 1 are copied as slices; anything else is gathered sample by sample.
pub fn to_semi_planar_420(planes: &[PlaneView<'_>; 3], width: usize, height: usize) -> Vec<u8> {
    assert_dimensions(width, height);

    let [y_plane, u_plane, v_plane] = planes;
    let chroma_width = width / 2;
    let chroma_height = height / 2;

    assert!(
        y_plane.data.len() >= y_plane.required_len(width, height),
        "Y plane too small for {}x{}",
        width,
        height
    );
    for (name, plane) in [("U", u_plane), ("V", v_plane)] {
        assert!(
            plane.data.len() >= plane.required_len(chroma_width, chroma_height),
            "{} plane too small for {}x{}",
            name,
            width,
            height
        );
    }

    let mut out = vec![0u8; semi_planar_size(width, height)];
    let (luma, chroma) = out.split_at_mut(width * height);

    for row in 0..height {
        let dst = &mut luma[row * width..(row + 1) * width];
        if y_plane.pixel_stride == 1 {
            let start = row * y_plane.row_stride;
            dst.copy_from_slice(&y_plane.data[start..start + width]);
        } else {
            for (col, px) in dst.iter_mut().enumerate() {
                *px = y_plane.sample(col, row);
            }
        }
    }

    for row in 0..chroma_height {
        let dst = &mut chroma[row * width..(row + 1) * width];
        for col in 0..chroma_width {
            dst[col * 2] = v_plane.sample(col, row);
            dst[col * 2 + 1] = u_plane.sample(col, row);
        }
    }

    out
}

/// Rotate a semi-planar 4:2:0 image 90° clockwise
///
/// Returns a `height x width` image. Chroma pairs move as a unit.
pub fn rotate90(buffer: &[u8], width: usize, height: usize) -> Vec<u8> {
    assert_semi_planar_len(buffer, width, height);

    let mut out = vec![0u8; buffer.len()];
    let luma_size = width * height;

    // Output row r, column c comes from input row (h-1-c), column r
    for r in 0..width {
        for c in 0..height {
            out[r * height + c] = buffer[(height - 1 - c) * width + r];
        }
    }

    let chroma_width = width / 2;
    let chroma_height = height / 2;
    let src = &buffer[luma_size..];
    let dst = &mut out[luma_size..];
    for r in 0..chroma_width {
        for c in 0..chroma_height {
            let from = (chroma_height - 1 - c) * width + r * 2;
            let to = r * height + c * 2;
            dst[to] = src[from];
            dst[to + 1] = src[from + 1];
        }
    }

    out
}

/// Rotate a semi-planar 4:2:0 image 270° clockwise (90° counter-clockwise)
///
/// Returns a `height x width` image. Chroma pairs move as a unit.
pub fn rotate270(buffer: &[u8], width: usize, height: usize) -> Vec<u8> {
    assert_semi_planar_len(buffer, width, height);

    let mut out = vec![0u8; buffer.len()];
    let luma_size = width * height;

    // Output row r, column c comes from input row c, column (w-1-r)
    for r in 0..width {
        for c in 0..height {
            out[r * height + c] = buffer[c * width + (width - 1 - r)];
        }
    }

    let chroma_width = width / 2;
    let chroma_height = height / 2;
    let src = &buffer[luma_size..];
    let dst = &mut out[luma_size..];
    for r in 0..chroma_width {
        for c in 0..chroma_height {
            let from = c * width + (chroma_width - 1 - r) * 2;
            let to = r * height + c * 2;
            dst[to] = src[from];
            dst[to + 1] = src[from + 1];
        }
    }

    out
}

/// Swap NV21 <-> NV12 chroma order, returning a new buffer
pub fn convert_chroma_order(buffer: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = buffer.to_vec();
    swap_chroma_order_in_place(&mut out, width, height);
    out
}

/// Swap NV21 <-> NV12 chroma order in place; luma is untouched
pub fn swap_chroma_order_in_place(buffer: &mut [u8], width: usize, height: usize) {
    assert_semi_planar_len(buffer, width, height);

    for pair in buffer[width * height..].chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
