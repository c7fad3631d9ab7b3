//! JPEG encoding and camera mode post-processing.
//!
//! Frames are stored raw and encoded on demand, once per (sequence, mode,
//! quality). IR mode renders a grayscale, histogram-equalized image.

use std::sync::Mutex;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageBuffer, ImageFormat, RgbImage};

use lumo_core::{is_jpeg, CameraMode, Frame, PixelFormat};

use super::source::CaptureError;
use super::lock;

/// Encoded cache entries retained. Covers the snapshot and stream
/// qualities in both modes.
const CACHE_CAPACITY: usize = 4;

/// A JPEG-encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Bytes,
}

/// Encodes `frame` as JPEG in the given mode.
pub fn encode_frame(frame: &Frame, mode: CameraMode, quality: u8) -> Result<Bytes, CaptureError> {
    let (width, height) = (frame.width(), frame.height());
    let data = frame.data();

    match (frame.format(), mode) {
        (PixelFormat::Jpeg, CameraMode::Rgb) if is_jpeg(data) => Ok(data.clone()),
        (PixelFormat::Jpeg, _) => {
            let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;
            match mode {
                CameraMode::Rgb => encode_rgb(decoded.to_rgb8(), quality),
                CameraMode::Ir => {
                    let mut gray = decoded.to_luma8();
                    equalize(&mut gray);
                    encode_gray(gray, quality)
                }
            }
        }
        (PixelFormat::Rgb8, CameraMode::Rgb) => {
            let img: RgbImage = ImageBuffer::from_raw(width, height, data.to_vec())
                .ok_or_else(|| CaptureError::Encode("RGB buffer size mismatch".to_string()))?;
            encode_rgb(img, quality)
        }
        (PixelFormat::Rgb8, CameraMode::Ir) => {
            let luma = rgb_to_luma(data);
            let mut gray: GrayImage = ImageBuffer::from_raw(width, height, luma)
                .ok_or_else(|| CaptureError::Encode("RGB buffer size mismatch".to_string()))?;
            equalize(&mut gray);
            encode_gray(gray, quality)
        }
        (PixelFormat::Gray8, mode) => {
            let mut gray: GrayImage = ImageBuffer::from_raw(width, height, data.to_vec())
                .ok_or_else(|| CaptureError::Encode("gray buffer size mismatch".to_string()))?;
            if mode == CameraMode::Ir {
                equalize(&mut gray);
            }
            encode_gray(gray, quality)
        }
    }
}

fn encode_rgb(img: RgbImage, quality: u8) -> Result<Bytes, CaptureError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&img)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(Bytes::from(out))
}

fn encode_gray(img: GrayImage, quality: u8) -> Result<Bytes, CaptureError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&img)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// ITU-R BT.601 luma, integer arithmetic.
fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            let y = 299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
            (y / 1000) as u8
        })
        .collect()
}

/// In-place histogram equalization.
pub fn equalize(img: &mut GrayImage) {
    let total = u64::from(img.width()) * u64::from(img.height());
    if total == 0 {
        return;
    }

    let mut histogram = [0u64; 256];
    for px in img.pixels() {
        histogram[usize::from(px.0[0])] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut running = 0;
    for (slot, count) in cdf.iter_mut().zip(histogram.iter()) {
        running += count;
        *slot = running;
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let range = total - cdf_min;
    if range == 0 {
        // single intensity
        return;
    }

    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        let scaled = (cdf[value].saturating_sub(cdf_min) * 255 + range / 2) / range;
        *slot = scaled.min(255) as u8;
    }

    for px in img.pixels_mut() {
        px.0[0] = lut[usize::from(px.0[0])];
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    sequence: u64,
    mode: CameraMode,
    quality: u8,
}

/// Small cache of encoded JPEGs for the newest frames.
///
/// Concurrent viewers asking for the same frame share one encode.
#[derive(Debug, Default)]
pub struct JpegCache {
    entries: Mutex<Vec<(CacheKey, Bytes)>>,
}

impl JpegCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sequence: u64, mode: CameraMode, quality: u8) -> Option<Bytes> {
        let key = CacheKey {
            sequence,
            mode,
            quality,
        };
        lock(&self.entries)
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, jpeg)| jpeg.clone())
    }

    pub fn insert(&self, sequence: u64, mode: CameraMode, quality: u8, jpeg: Bytes) {
        let key = CacheKey {
            sequence,
            mode,
            quality,
        };
        let mut entries = lock(&self.entries);
        // A late encode of an older frame must not evict a newer one
        if entries.iter().any(|(k, _)| k.sequence > sequence) {
            return;
        }
        // Entries for older frames are never requested again
        entries.retain(|(k, _)| k.sequence >= sequence && *k != key);
        if entries.len() >= CACHE_CAPACITY {
            entries.remove(0);
        }
        entries.push((key, jpeg));
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}
