//! Test doubles shared by the recorder tests

use crate::encoder::buffer::HardwareBuffer;
use crate::encoder::{ColorSpace, EncoderFactory, EncoderStats, FrameEncoder, JpegEncoder};
use crate::utils::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// JPEG encoders that track how many are alive and can be told to fail
#[derive(Default)]
pub struct CountingEncoderFactory {
    live: Arc<AtomicUsize>,
    created: AtomicUsize,
    fail_create_at: Option<usize>,
    fail_encode: Option<(usize, u64)>,
}

impl CountingEncoderFactory {
    /// The `nth` create call (zero-based) fails
    pub fn fail_create_at(mut self, nth: usize) -> Self {
        self.fail_create_at = Some(nth);
        self
    }

    /// The `nth` encoder fails every encode after `successes` good ones
    pub fn fail_encode_after(mut self, nth: usize, successes: u64) -> Self {
        self.fail_encode = Some((nth, successes));
        self
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EncoderFactory for CountingEncoderFactory {
    fn create(&self, name: &str) -> CaptureResult<Box<dyn FrameEncoder>> {
        let nth = self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_at == Some(nth) {
            return Err(CaptureError::resource("encoder", "simulated failure"));
        }

        let budget = match self.fail_encode {
            Some((target, successes)) if target == nth => Some(successes),
            _ => None,
        };
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingEncoder {
            inner: JpegEncoder::new(name, 75),
            live: self.live.clone(),
            budget,
        }))
    }
}

struct CountingEncoder {
    inner: JpegEncoder,
    live: Arc<AtomicUsize>,
    budget: Option<u64>,
}

impl FrameEncoder for CountingEncoder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn encode(
        &mut self,
        buffer: &HardwareBuffer,
        color_space: ColorSpace,
        out: &mut [u8],
    ) -> CaptureResult<usize> {
        match self.budget.as_mut() {
            Some(0) => Err(CaptureError::Write("No space left on device".into())),
            Some(left) => {
                *left -= 1;
                self.inner.encode(buffer, color_space, out)
            }
            None => self.inner.encode(buffer, color_space, out),
        }
    }

    fn enable_profiling(&mut self) {
        self.inner.enable_profiling();
    }

    fn profiling_stats(&self) -> Option<&EncoderStats> {
        self.inner.profiling_stats()
    }
}

impl Drop for CountingEncoder {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
