//! Shared utilities

pub mod error;
pub mod logging;
pub mod volume;

pub use error::{CaptureError, CaptureResult};
