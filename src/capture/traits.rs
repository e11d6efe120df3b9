//! Capture trait definitions
//!
//! Platform-agnostic interfaces the recorder consumes: a camera provider that
//! opens sessions, sessions that own output streams and repeating requests,
//! and per-stream frame consumers.

use crate::encoder::buffer::{ColorFormat, NativeImage};
use crate::utils::CaptureResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one frame
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Dimensions of one chroma plane in 4:2:0 subsampling
    pub fn chroma(&self) -> (usize, usize) {
        (
            (self.width as usize + 1) / 2,
            (self.height as usize + 1) / 2,
        )
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Information about a camera device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Position in the provider's enumeration order
    pub index: usize,

    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,
}

/// A sensor mode reported by a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorMode {
    pub index: usize,
    pub resolution: Resolution,
    pub fps: u32,
}

impl SensorMode {
    /// Time between frames at this mode's rate
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps.max(1)))
    }
}

/// Settings for a new output stream
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub resolution: Resolution,
    pub pixel_format: ColorFormat,
}

/// A repeating capture request
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    pub sensor_mode: SensorMode,
    pub frame_duration: Duration,
}

impl CaptureRequest {
    pub fn for_mode(sensor_mode: SensorMode) -> Self {
        Self {
            sensor_mode,
            frame_duration: sensor_mode.frame_duration(),
        }
    }
}

/// A frame delivered by a stream
pub struct Frame {
    /// Monotonic sequence number assigned by the producer
    pub number: u64,

    /// Image backing this frame
    pub image: Box<dyn NativeImage>,
}

/// Result of a blocking frame acquire
pub enum Acquired {
    Frame(Frame),
    /// The upstream stream has been released
    EndOfStream,
}

/// Opens capture sessions on camera devices
pub trait CameraProvider: Send {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Enumerate attached devices
    fn devices(&mut self) -> CaptureResult<Vec<CameraInfo>>;

    /// Sensor modes supported by a device
    fn sensor_modes(&mut self, device: &CameraInfo) -> CaptureResult<Vec<SensorMode>>;

    /// Open a capture session on a device
    ///
    /// Returns `CaptureError::DeviceUnavailable` when the hardware is present
    /// but cannot be claimed, and `CaptureError::ResourceCreation` otherwise.
    fn open_session(&mut self, device: &CameraInfo) -> CaptureResult<Box<dyn CaptureSession>>;
}

/// A capture session bound to one device
pub trait CaptureSession: Send {
    /// Create the session's output stream
    ///
    /// The caller holds the only strong reference; dropping it releases the
    /// stream and ends any pending acquire on its consumers.
    fn create_stream(&mut self, settings: &StreamSettings) -> CaptureResult<Arc<dyn OutputStream>>;

    /// Submit a repeating request feeding the session's stream
    fn repeat(&mut self, request: &CaptureRequest) -> CaptureResult<()>;

    /// Stop the repeating request
    fn stop_repeat(&mut self);

    /// Block until in-flight requests have completed
    fn wait_for_idle(&mut self, timeout: Duration) -> CaptureResult<()>;
}

/// Producer side of a stream, shared with consumers by weak reference
pub trait OutputStream: Send + Sync {
    fn resolution(&self) -> Resolution;

    /// Attach a frame consumer to this stream
    fn create_consumer(&self) -> CaptureResult<Box<dyn FrameConsumer>>;
}

/// Consumer side of a stream
pub trait FrameConsumer: Send {
    /// Block until the producer is connected
    fn wait_until_connected(&mut self, timeout: Duration) -> CaptureResult<()>;

    /// Block until the next frame arrives or the stream goes away
    fn acquire_frame(&mut self) -> Acquired;
}
