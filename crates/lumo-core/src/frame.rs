//! Frame value types shared between capture and delivery.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Returns true if the payload begins with the JPEG start-of-image marker.
pub fn is_jpeg(data: &[u8]) -> bool {
    data.starts_with(&JPEG_SOI)
}

// ============================================================================
// Pixel Format
// ============================================================================

/// Layout of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Packed 8-bit RGB, row-major
    Rgb8,
    /// 8-bit luminance, row-major
    Gray8,
    /// Already JPEG-encoded by the hardware pipeline
    Jpeg,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats, `None` for encoded payloads.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Rgb8 => Some(3),
            Self::Gray8 => Some(1),
            Self::Jpeg => None,
        }
    }

    /// Expected payload length for a raw frame of the given geometry.
    pub fn expected_len(self, width: u32, height: u32) -> Option<usize> {
        self.bytes_per_pixel()
            .map(|bpp| (width as usize) * (height as usize) * bpp)
    }
}

// ============================================================================
// Captured Image
// ============================================================================

/// An image as produced by a hardware source, before it is stamped and
/// published into the frame buffer.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl CapturedImage {
    /// Creates a captured image, validating the payload length for raw formats.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Bytes) -> DomainResult<Self> {
        if data.is_empty() {
            return Err(DomainError::EmptyFrame);
        }
        if let Some(expected) = format.expected_len(width, height) {
            if data.len() != expected {
                return Err(DomainError::FrameSizeMismatch {
                    width,
                    height,
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A complete frame as held by the frame buffer.
///
/// Frames are immutable once constructed. Readers share them through
/// `Arc<Frame>`; the payload is a reference-counted `Bytes`, so the producer's
/// working buffer is never exposed.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    captured_at: DateTime<Utc>,
    data: Bytes,
}

impl Frame {
    /// Stamps a captured image with its sequence number and arrival time.
    pub fn from_captured(image: CapturedImage, sequence: u64, captured_at: DateTime<Utc>) -> Self {
        Self {
            sequence,
            width: image.width,
            height: image.height,
            format: image.format,
            captured_at,
            data: image.data,
        }
    }

    /// Monotonically increasing sequence number assigned by the frame buffer.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// The frame payload. Cloning the returned `Bytes` is O(1).
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

// ============================================================================
// Camera Mode
// ============================================================================

/// Rendering mode applied when a frame is encoded for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    /// Colour output as captured
    #[default]
    Rgb,
    /// Grayscale with contrast enhancement, approximating an IR-sensitive view
    Ir,
}

impl CameraMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rgb => "rgb",
            Self::Ir => "ir",
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb" => Ok(Self::Rgb),
            "ir" => Ok(Self::Ir),
            other => Err(DomainError::InvalidMode {
                mode: other.to_string(),
            }),
        }
    }
}
