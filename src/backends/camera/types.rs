// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera sources

use crate::errors::CaptureError;
use crate::media::yuv::PlaneView;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Which physical camera is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    #[default]
    Back,
}

impl LensFacing {
    pub fn flipped(&self) -> Self {
        match self {
            LensFacing::Front => LensFacing::Back,
            LensFacing::Back => LensFacing::Front,
        }
    }

    /// Rotation applied to frames from this lens before encoding
    pub fn capture_rotation(&self) -> SensorRotation {
        match self {
            LensFacing::Front => SensorRotation::Rotate270,
            LensFacing::Back => SensorRotation::Rotate90,
        }
    }
}

impl std::fmt::Display for LensFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensFacing::Front => write!(f, "front"),
            LensFacing::Back => write!(f, "back"),
        }
    }
}

/// Clockwise rotation of the sensor relative to the natural orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// One plane of a captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    pub fn view(&self) -> PlaneView<'_> {
        PlaneView::new(&self.data, self.row_stride, self.pixel_stride)
    }
}

/// Three-plane YUV 4:2:0 frame as delivered by a camera source
///
/// Planes are Y, U, V. Each carries its own row and pixel stride, so both
/// fully planar (I420) and interleaved-chroma hardware layouts fit. Frames
/// are in sensor orientation; the rotation applied before encoding follows
/// the bound lens ([`LensFacing::capture_rotation`]).
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    pub width: u32,
    pub height: u32,
    pub planes: [Plane; 3],
    pub captured_at: Instant,
}

impl RawVideoFrame {
    /// Build a frame from a tightly packed I420 buffer
    pub fn from_i420(width: u32, height: u32, data: &[u8]) -> Option<Self> {
        let (w, h) = (width as usize, height as usize);
        let luma = w * h;
        let chroma = (w / 2) * (h / 2);
        if data.len() < luma + 2 * chroma {
            return None;
        }

        Some(Self {
            width,
            height,
            planes: [
                Plane::new(data[..luma].to_vec(), w, 1),
                Plane::new(data[luma..luma + chroma].to_vec(), w / 2, 1),
                Plane::new(data[luma + chroma..luma + 2 * chroma].to_vec(), w / 2, 1),
            ],
            captured_at: Instant::now(),
        })
    }

    pub fn plane_views(&self) -> [PlaneView<'_>; 3] {
        [
            self.planes[0].view(),
            self.planes[1].view(),
            self.planes[2].view(),
        ]
    }
}

/// Called once per captured frame on the source's delivery thread
///
/// The frame is released back to the source when the handler drops it.
pub type FrameHandler = Box<dyn FnMut(RawVideoFrame) + Send>;

/// A camera that delivers frames to one handler at a time
///
/// Sources deliver on a single dedicated thread and keep only the latest
/// frame when the handler falls behind.
pub trait CameraSource: Send {
    /// Start delivering frames from `lens` to `handler`
    fn bind(&mut self, lens: LensFacing, handler: FrameHandler) -> Result<(), CaptureError>;

    /// Stop delivering frames. Idempotent.
    fn unbind(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lens_flip_and_rotation() {
        assert_eq!(LensFacing::Back.flipped(), LensFacing::Front);
        assert_eq!(LensFacing::Front.capture_rotation(), SensorRotation::Rotate270);
        assert_eq!(LensFacing::Back.capture_rotation(), SensorRotation::Rotate90);
        assert!(LensFacing::Front.capture_rotation().swaps_dimensions());
    }

    #[test]
    fn test_rotation_degrees() {
        assert_eq!(SensorRotation::Rotate270.degrees(), 270);
        assert_eq!(SensorRotation::Rotate90.to_string(), "90°");
        assert!(!SensorRotation::Rotate180.swaps_dimensions());
    }

    #[test]
    fn test_frame_from_i420() {
        let data: Vec<u8> = (0..24).collect();
        let frame = RawVideoFrame::from_i420(4, 4, &data).unwrap();
        assert_eq!(frame.planes[0].data.len(), 16);
        assert_eq!(frame.planes[1].data, vec![16, 17, 18, 19]);
        assert_eq!(frame.planes[2].data, vec![20, 21, 22, 23]);
        assert!(RawVideoFrame::from_i420(4, 4, &data[..10]).is_none());
    }
}
