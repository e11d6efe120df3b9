//! Channel-backed streams shared by the in-process providers
//!
//! A producer thread pushes frames into a bounded channel; the stream hands
//! out consumers reading from it. The stream also owns the only sender of a
//! "closed" channel, so dropping the stream wakes every blocked consumer.

use super::traits::{Acquired, Frame, FrameConsumer, OutputStream, Resolution};
use crate::utils::{CaptureError, CaptureResult};
use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Frames buffered between a producer and its consumer
const FRAME_QUEUE_DEPTH: usize = 4;

/// How often a blocked producer re-checks its stop flag
const SEND_POLL: Duration = Duration::from_millis(20);

/// Consecutive capture errors a producer tolerates before ending its stream
pub(crate) const CAPTURE_RETRY_LIMIT: u32 = 10;

/// Pause between capture retries
const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Live resource counts, for leak checks
#[derive(Debug, Default)]
pub struct ResourceCounts {
    pub(crate) sessions: AtomicUsize,
    pub(crate) streams: AtomicUsize,
    pub(crate) consumers: AtomicUsize,
    pub(crate) producers: AtomicUsize,
}

impl ResourceCounts {
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn consumers(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    pub fn producers(&self) -> usize {
        self.producers.load(Ordering::SeqCst)
    }
}

/// Create a stream for camera `index`, returning the producer's sender
pub(crate) fn open_stream(
    index: usize,
    resolution: Resolution,
    connect_fails: bool,
    counts: Arc<ResourceCounts>,
) -> (Sender<Frame>, Arc<dyn OutputStream>) {
    let (frames_tx, frames_rx) = bounded(FRAME_QUEUE_DEPTH);
    let (closed_tx, closed_rx) = bounded(0);
    counts.streams.fetch_add(1, Ordering::SeqCst);

    let stream = ChannelStream {
        index,
        resolution,
        frames: frames_rx,
        closed: closed_rx,
        _closed_tx: closed_tx,
        connect_fails,
        counts,
    };
    (frames_tx, Arc::new(stream))
}

/// Push one frame, polling the stop flag while the queue is full
///
/// Returns `false` once the producer should exit.
pub(crate) fn deliver(frames: &Sender<Frame>, mut frame: Frame, stop: &AtomicBool) -> bool {
    loop {
        match frames.send_timeout(frame, SEND_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(pending)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                frame = pending;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Consecutive capture failures seen by a producer loop
///
/// Once the limit is hit the producer returns, dropping its sender, and the
/// consumer sees end-of-stream.
pub(crate) struct CaptureRetries {
    limit: u32,
    backoff: Duration,
    failures: u32,
}

impl CaptureRetries {
    pub(crate) fn new(limit: u32, backoff: Duration) -> Self {
        Self {
            limit,
            backoff,
            failures: 0,
        }
    }

    /// Record a failed capture
    ///
    /// Returns `false` when the producer should give up: the limit was
    /// reached or the stop flag was set during the backoff.
    pub(crate) fn failed(&mut self, stop: &AtomicBool) -> bool {
        self.failures += 1;
        if self.failures >= self.limit {
            return false;
        }
        thread::sleep(self.backoff);
        !stop.load(Ordering::SeqCst)
    }

    pub(crate) fn succeeded(&mut self) {
        self.failures = 0;
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for CaptureRetries {
    fn default() -> Self {
        Self::new(CAPTURE_RETRY_LIMIT, CAPTURE_RETRY_BACKOFF)
    }
}

/// Producer thread driven by a repeating request
pub(crate) struct Producer {
    camera: usize,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    pub(crate) fn spawn<F>(camera: usize, counts: Arc<ResourceCounts>, body: F) -> CaptureResult<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread_counts = counts.clone();

        counts.producers.fetch_add(1, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name(format!("producer-{camera}"))
            .spawn(move || {
                body(&thread_stop);
                thread_counts.producers.fetch_sub(1, Ordering::SeqCst);
            })
            .map_err(|e| {
                counts.producers.fetch_sub(1, Ordering::SeqCst);
                CaptureError::resource("capture request", e)
            })?;

        Ok(Self {
            camera,
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Block until the thread has exited or `timeout` passes
    pub(crate) fn wait_idle(&mut self, timeout: Duration) -> CaptureResult<()> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return Err(CaptureError::Platform(format!(
                    "camera {} still busy after {:?}",
                    self.camera, timeout
                )));
            }
            thread::sleep(Duration::from_millis(5));
        }

        match self.handle.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(CaptureError::Platform(format!(
                "camera {} producer panicked",
                self.camera
            ))),
            _ => Ok(()),
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // Detached threads still see the flag and exit on their own
        self.stop();
    }
}

struct ChannelStream {
    index: usize,
    resolution: Resolution,
    frames: Receiver<Frame>,
    closed: Receiver<()>,
    _closed_tx: Sender<()>,
    connect_fails: bool,
    counts: Arc<ResourceCounts>,
}

impl OutputStream for ChannelStream {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn create_consumer(&self) -> CaptureResult<Box<dyn FrameConsumer>> {
        self.counts.consumers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChannelConsumer {
            index: self.index,
            frames: self.frames.clone(),
            closed: self.closed.clone(),
            connect_fails: self.connect_fails,
            counts: self.counts.clone(),
        }))
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        self.counts.streams.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ChannelConsumer {
    index: usize,
    frames: Receiver<Frame>,
    closed: Receiver<()>,
    connect_fails: bool,
    counts: Arc<ResourceCounts>,
}

impl FrameConsumer for ChannelConsumer {
    fn wait_until_connected(&mut self, timeout: Duration) -> CaptureResult<()> {
        if self.connect_fails {
            thread::sleep(timeout);
            return Err(CaptureError::ConnectTimeout {
                worker: format!("camera {}", self.index),
                timeout,
            });
        }
        match self.closed.try_recv() {
            Err(TryRecvError::Disconnected) => Err(CaptureError::resource(
                "frame consumer",
                format!("stream {} was released", self.index),
            )),
            _ => Ok(()),
        }
    }

    fn acquire_frame(&mut self) -> Acquired {
        select! {
            recv(self.frames) -> frame => match frame {
                Ok(frame) => Acquired::Frame(frame),
                Err(_) => Acquired::EndOfStream,
            },
            recv(self.closed) -> _ => Acquired::EndOfStream,
        }
    }
}

impl Drop for ChannelConsumer {
    fn drop(&mut self) {
        self.counts.consumers.fetch_sub(1, Ordering::SeqCst);
    }
}
