//! Synthetic frame source.
//!
//! Renders an animated disc over a gradient so the whole delivery path can
//! run without camera hardware. Frames are paced at the configured rate.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lumo_core::{CapturedImage, PixelFormat};

use super::source::{CaptureError, FrameSource};

pub struct TestPatternSource {
    width: u32,
    height: u32,
    interval: Duration,
    tick: u64,
    next_due: Option<Instant>,
    open: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 10.0 };
        Self {
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps),
            tick: 0,
            next_due: None,
            open: false,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![0u8; w * h * 3];

        let phase = self.tick as f64 * 0.08;
        let radius = (w.min(h) as f64 * 0.15).max(1.0);
        let cx = (w as f64 / 2.0) + (w as f64 * 0.3) * phase.cos();
        let cy = (h as f64 / 2.0) + (h as f64 * 0.3) * phase.sin();

        for (y, row) in data.chunks_exact_mut(w * 3).enumerate() {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                if dx * dx + dy * dy <= radius * radius {
                    px.copy_from_slice(&[240, 200, 40]);
                } else {
                    px[0] = (x * 255 / w.max(1)) as u8;
                    px[1] = (y * 255 / h.max(1)) as u8;
                    px[2] = 60;
                }
            }
        }
        data
    }
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> &str {
        "test_pattern"
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Unavailable("zero-sized test pattern".to_string()));
        }
        self.open = true;
        self.next_due = None;
        Ok(())
    }

    fn acquire_next_frame(&mut self) -> Result<CapturedImage, CaptureError> {
        if !self.open {
            return Err(CaptureError::Unavailable("source not open".to_string()));
        }

        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval);

        let data = self.render();
        self.tick = self.tick.wrapping_add(1);
        Ok(CapturedImage::new(
            self.width,
            self.height,
            PixelFormat::Rgb8,
            Bytes::from(data),
        )?)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
