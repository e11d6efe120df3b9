//! Per-camera consumer worker
//!
//! Pumps frames from one output stream into a reusable hardware buffer,
//! samples every Nth frame, encodes it to JPEG and writes it to
//! `<root>/cam<id>/`.

use super::cancel::CancellationToken;
use super::state::{CaptureConfiguration, WorkerReport};
use super::worker::{CaptureWorker, WorkerContext};
use crate::capture::traits::{Acquired, Frame, FrameConsumer, OutputStream};
use crate::encoder::buffer::{BufferLayout, ColorFormat, HardwareBuffer};
use crate::encoder::{ColorSpace, EncoderFactory, FrameEncoder};
use crate::output::layout;
use crate::utils::{CaptureError, CaptureResult};
use std::fs;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Name passed to the encoder factory
pub const ENCODER_NAME: &str = "jpegenc";

/// Default bound on waiting for the stream's producer to connect
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Saves sampled frames from one camera
pub struct ConsumerWorker {
    id: usize,
    name: String,
    stream: Weak<dyn OutputStream>,
    config: Arc<CaptureConfiguration>,
    encoders: Arc<dyn EncoderFactory>,
    cancel: CancellationToken,
    connect_timeout: Duration,

    consumer: Option<Box<dyn FrameConsumer>>,
    encoder: Option<Box<dyn FrameEncoder>>,
    buffer: Option<HardwareBuffer>,
    scratch: Vec<u8>,

    /// Local index of the next saved image, distinct from frame numbers
    save_index: u64,
    frames_acquired: u64,
    images_saved: u64,
    buffer_allocations: u32,
    stopped_early: bool,
    elapsed: Duration,
}

impl ConsumerWorker {
    pub fn new(
        id: usize,
        stream: Weak<dyn OutputStream>,
        config: Arc<CaptureConfiguration>,
        encoders: Arc<dyn EncoderFactory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: format!("cam{id}"),
            stream,
            config,
            encoders,
            cancel,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            consumer: None,
            encoder: None,
            buffer: None,
            scratch: Vec::new(),
            save_index: 0,
            frames_acquired: 0,
            images_saved: 0,
            buffer_allocations: 0,
            stopped_early: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn missing(&self, what: &str) -> CaptureError {
        CaptureError::Platform(format!("{} has no {}", self.name, what))
    }

    /// Copy, encode and write one sampled frame
    fn save(&mut self, frame: &Frame) -> CaptureResult<()> {
        match self.buffer.as_mut() {
            Some(buffer) => frame.image.copy_to_buffer(buffer)?,
            None => {
                let buffer = frame.image.create_buffer(
                    frame.image.resolution(),
                    ColorFormat::Yuv420,
                    BufferLayout::BlockLinear,
                )?;
                self.buffer = Some(buffer);
                self.buffer_allocations += 1;
            }
        }

        let (Some(buffer), Some(encoder)) = (self.buffer.as_ref(), self.encoder.as_mut()) else {
            return Err(CaptureError::Platform(format!("{} has no encoder", self.name)));
        };
        let len = encoder.encode(buffer, ColorSpace::YCbCr, &mut self.scratch)?;

        self.save_index += 1;
        let path = layout::image_path(&self.config.output_root, self.id, self.save_index);
        fs::write(&path, &self.scratch[..len])
            .map_err(|e| CaptureError::Write(format!("{}: {}", path.display(), e)))?;
        self.images_saved += 1;

        if self.images_saved == 1 {
            tracing::info!("Wrote first image to {:?}", path);
        }
        Ok(())
    }

    fn pump(&mut self, consumer: &mut dyn FrameConsumer, ctx: &WorkerContext) {
        let save_every = u64::from(self.config.save_every.max(1));

        while !ctx.stop_requested() && !self.cancel.is_cancelled() {
            let frame = match consumer.acquire_frame() {
                Acquired::Frame(frame) => frame,
                Acquired::EndOfStream => {
                    tracing::info!("Stream ended");
                    break;
                }
            };
            self.frames_acquired += 1;

            if frame.number % save_every != 0 {
                continue;
            }

            if let Err(e) = self.save(&frame) {
                match e {
                    CaptureError::Write(_) | CaptureError::Encode(_) => {
                        tracing::warn!("Failed to save frame {}, is the device full? {}", frame.number, e)
                    }
                    _ => tracing::error!("Failed to process frame {}: {}", frame.number, e),
                }
                break;
            }
        }

        self.stopped_early = !(ctx.stop_requested() || self.cancel.is_cancelled());
    }
}

impl CaptureWorker for ConsumerWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> CaptureResult<()> {
        let _span = tracing::info_span!("consumer", cam = self.id).entered();

        layout::create_camera_dir(&self.config.output_root, self.id)?;

        let stream = self.stream.upgrade().ok_or_else(|| {
            CaptureError::resource("frame consumer", format!("stream {} was released", self.id))
        })?;
        self.consumer = Some(stream.create_consumer()?);

        let resolution = stream.resolution();
        self.scratch = vec![0; resolution.pixels() * 3 / 2];

        let mut encoder = self.encoders.create(ENCODER_NAME)?;
        if self.config.profile {
            encoder.enable_profiling();
        }
        self.encoder = Some(encoder);

        tracing::debug!("Initialized for {} frames", resolution);
        Ok(())
    }

    fn execute(&mut self, ctx: &WorkerContext) -> CaptureResult<()> {
        let _span = tracing::info_span!("consumer", cam = self.id).entered();

        let mut consumer = self.consumer.take().ok_or_else(|| self.missing("frame consumer"))?;
        if let Err(e) = consumer.wait_until_connected(self.connect_timeout) {
            self.consumer = Some(consumer);
            return Err(e);
        }

        ctx.mark_running();
        tracing::info!("Consumer running");

        let started = Instant::now();
        self.pump(consumer.as_mut(), ctx);
        self.elapsed = started.elapsed();
        self.consumer = Some(consumer);

        tracing::info!("Consumer stopped after {} frames", self.frames_acquired);
        Ok(())
    }

    fn shutdown(&mut self) -> CaptureResult<()> {
        let _span = tracing::info_span!("consumer", cam = self.id).entered();

        if self.config.profile {
            let secs = self.elapsed.as_secs_f64();
            let fps = if secs > 0.0 {
                self.images_saved as f64 / secs
            } else {
                0.0
            };
            tracing::info!(
                "Profiling: {} images processed in {:.2}s ({:.1} fps)",
                self.images_saved,
                secs,
                fps
            );
            if let Some(stats) = self.encoder.as_ref().and_then(|e| e.profiling_stats()) {
                tracing::info!(
                    "Encoder {}: {} frames, avg {}us, min {}us, max {}us",
                    ENCODER_NAME,
                    stats.frames,
                    stats.average_us(),
                    stats.min_us,
                    stats.max_us
                );
            }
        }

        self.encoder = None;
        self.buffer = None;
        self.scratch = Vec::new();
        self.consumer = None;
        Ok(())
    }

    fn report(&self) -> WorkerReport {
        WorkerReport {
            name: self.name.clone(),
            frames_acquired: self.frames_acquired,
            images_saved: self.images_saved,
            buffer_allocations: self.buffer_allocations,
            stopped_early: self.stopped_early,
        }
    }
}
