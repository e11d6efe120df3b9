//! Frame encoding
//!
//! Buffers that carry sampled frames to the encoder, and the encoder
//! interface workers use to turn them into JPEG stills.

pub mod buffer;
pub mod jpeg;

use crate::utils::CaptureResult;
use buffer::HardwareBuffer;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use buffer::{BufferLayout, ColorFormat, NativeImage, PlanarImage};
pub use jpeg::{JpegEncoder, JpegEncoderFactory};

/// Color space the encoder should interpret the buffer in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    YCbCr,
    Rgb,
}

/// Aggregated encoder timings collected while profiling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderStats {
    pub frames: u64,
    pub total_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl EncoderStats {
    pub fn record(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.min_us = if self.frames == 0 { us } else { self.min_us.min(us) };
        self.max_us = self.max_us.max(us);
        self.total_us += us;
        self.frames += 1;
    }

    pub fn average_us(&self) -> u64 {
        self.total_us.checked_div(self.frames).unwrap_or(0)
    }
}

/// Encodes a hardware buffer into a caller-provided output slice
pub trait FrameEncoder: Send {
    fn name(&self) -> &str;

    /// Encode `buffer` into `out`, returning the number of bytes written
    ///
    /// Fails rather than growing when `out` is too small.
    fn encode(
        &mut self,
        buffer: &HardwareBuffer,
        color_space: ColorSpace,
        out: &mut [u8],
    ) -> CaptureResult<usize>;

    fn enable_profiling(&mut self);

    /// Stats gathered since profiling was enabled
    fn profiling_stats(&self) -> Option<&EncoderStats>;
}

/// Creates encoder instances, one per worker
pub trait EncoderFactory: Send + Sync {
    fn create(&self, name: &str) -> CaptureResult<Box<dyn FrameEncoder>>;
}
