//! Capture session recorder
//!
//! - `SessionOrchestrator` brings cameras up, waits, and tears them down
//! - `ConsumerWorker` saves sampled frames from one camera
//! - `WorkerDriver` runs any `CaptureWorker` through its lifecycle
//! - `CancellationToken` is the shared stop flag

pub mod cancel;
pub mod consumer;
pub mod coordinator;
pub mod state;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::{install_signal_handlers, CancellationToken};
pub use consumer::ConsumerWorker;
pub use coordinator::{resolve_sensor_mode, OrchestratorOptions, SessionOrchestrator};
pub use state::{CaptureConfiguration, RunSummary, StopReason, WorkerReport, WorkerState};
pub use worker::{CaptureWorker, WorkerContext, WorkerDriver};
