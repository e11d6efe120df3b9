//! Software JPEG encoder
//!
//! Converts the worker's YUV 4:2:0 buffer to RGB and compresses it with the
//! `image` crate, writing straight into the worker's scratch output buffer.

use super::buffer::{yuv420_to_rgb, ColorFormat, HardwareBuffer};
use super::{ColorSpace, EncoderFactory, EncoderStats, FrameEncoder};
use crate::utils::{CaptureError, CaptureResult};
use image::ExtendedColorType;
use std::io::Cursor;
use std::time::Instant;

/// Default JPEG quality
pub const DEFAULT_QUALITY: u8 = 85;

/// JPEG encoder backed by `image::codecs::jpeg`
pub struct JpegEncoder {
    name: String,
    quality: u8,
    rgb: Vec<u8>,
    profiling: Option<EncoderStats>,
}

impl JpegEncoder {
    pub fn new(name: &str, quality: u8) -> Self {
        Self {
            name: name.to_string(),
            quality: quality.clamp(1, 100),
            rgb: Vec::new(),
            profiling: None,
        }
    }
}

impl FrameEncoder for JpegEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(
        &mut self,
        buffer: &HardwareBuffer,
        color_space: ColorSpace,
        out: &mut [u8],
    ) -> CaptureResult<usize> {
        let started = Instant::now();
        let resolution = buffer.resolution();

        let pixels: &[u8] = match (color_space, buffer.format()) {
            (ColorSpace::YCbCr, ColorFormat::Yuv420) => {
                self.rgb.resize(resolution.pixels() * 3, 0);
                yuv420_to_rgb(buffer.as_bytes(), resolution, &mut self.rgb);
                &self.rgb
            }
            (ColorSpace::Rgb, ColorFormat::Rgb24) => buffer.as_bytes(),
            (space, format) => {
                return Err(CaptureError::Encode(format!(
                    "{} cannot encode a {:?} buffer as {:?}",
                    self.name, format, space
                )));
            }
        };

        let mut cursor = Cursor::new(out);
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, self.quality)
            .encode(
                pixels,
                resolution.width,
                resolution.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| CaptureError::Encode(format!("{}: {}", self.name, e)))?;
        let written = cursor.position() as usize;

        if let Some(stats) = self.profiling.as_mut() {
            stats.record(started.elapsed());
        }

        Ok(written)
    }

    fn enable_profiling(&mut self) {
        self.profiling.get_or_insert_with(EncoderStats::default);
    }

    fn profiling_stats(&self) -> Option<&EncoderStats> {
        self.profiling.as_ref()
    }
}

/// Hands out `JpegEncoder`s with a shared quality setting
#[derive(Debug, Clone)]
pub struct JpegEncoderFactory {
    quality: u8,
}

impl JpegEncoderFactory {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl Default for JpegEncoderFactory {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl EncoderFactory for JpegEncoderFactory {
    fn create(&self, name: &str) -> CaptureResult<Box<dyn FrameEncoder>> {
        Ok(Box::new(JpegEncoder::new(name, self.quality)))
    }
}
