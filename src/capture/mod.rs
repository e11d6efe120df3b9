//! Camera capture backends
//!
//! The recorder only sees the traits in `traits`; providers implement them
//! for synthetic test patterns and, with the `webcam` feature, real devices.

pub mod stream;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use stream::ResourceCounts;
pub use synthetic::SyntheticProvider;
pub use traits::{
    Acquired, CameraInfo, CameraProvider, CaptureRequest, CaptureSession, Frame, FrameConsumer,
    OutputStream, Resolution, SensorMode, StreamSettings,
};

#[cfg(feature = "webcam")]
pub use webcam::WebcamProvider;
