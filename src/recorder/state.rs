//! Recorder state
//!
//! Worker state machine, the immutable capture configuration and the summary
//! returned when a session ends.

use crate::capture::traits::{Resolution, SensorMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle state of a capture worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Constructed, nothing acquired yet
    Created,
    /// Resources acquired, thread launched
    Initialized,
    /// Attached to its stream and pumping frames
    Running,
    /// Told to stop, thread may still be draining
    Stopping,
    /// Thread joined and resources released
    ShutDown,
    /// Execute ended before the worker ever ran
    Failed,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Created
    }
}

/// Configuration for one capture session
///
/// Built once at startup and shared read-only with every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfiguration {
    /// Requested sensor mode index
    pub sensor_mode: usize,

    /// Stream resolution, unknown until the sensor mode is resolved
    pub resolution: Option<Resolution>,

    /// Directory holding the manifest, log and per-camera folders
    pub output_root: PathBuf,

    /// How long to capture; zero runs until cancelled
    pub capture_time: Duration,

    /// Only frames whose sequence number is a multiple of this are saved
    pub save_every: u32,

    /// Collect and report encoder timings
    pub profile: bool,
}

impl CaptureConfiguration {
    pub fn new(output_root: impl Into<PathBuf>, sensor_mode: usize) -> Self {
        Self {
            sensor_mode,
            resolution: None,
            output_root: output_root.into(),
            capture_time: Duration::ZERO,
            save_every: 1,
            profile: false,
        }
    }

    /// Commit the sensor mode actually used for streams
    pub fn with_sensor_mode(mut self, mode: SensorMode) -> Self {
        self.sensor_mode = mode.index;
        self.resolution = Some(mode.resolution);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.capture_time.is_zero()
    }
}

/// Why the wait loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum StopReason {
    /// The configured capture time elapsed
    DurationElapsed,
    /// A termination signal arrived
    Cancelled,
    /// A worker exited on its own, cancelling the session
    WorkerStopped { worker: String },
}

/// Per-worker results collected at shutdown
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub name: String,
    pub frames_acquired: u64,
    pub images_saved: u64,
    pub buffer_allocations: u32,
    pub stopped_early: bool,
}

/// Result of a completed capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub output_root: PathBuf,
    pub cameras: usize,
    pub sensor_mode: SensorMode,
    pub stop_reason: StopReason,
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    pub fn images_saved(&self) -> u64 {
        self.workers.iter().map(|w| w.images_saved).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE: SensorMode = SensorMode {
        index: 1,
        resolution: Resolution::new(1936, 1106),
        fps: 30,
    };

    #[test]
    fn test_configuration_defaults() {
        let config = CaptureConfiguration::new("/tmp/run", MODE.index);
        assert_eq!(config.sensor_mode, 1);
        assert_eq!(config.resolution, None);
        assert_eq!(config.save_every, 1);
        assert!(config.is_unbounded());
        assert!(!config.profile);
    }

    #[test]
    fn test_with_sensor_mode_commits_resolution() {
        let fallback = SensorMode {
            index: 0,
            resolution: Resolution::new(2048, 1554),
            fps: 38,
        };
        let config = CaptureConfiguration::new("/tmp/run", MODE.index).with_sensor_mode(fallback);
        assert_eq!(config.sensor_mode, 0);
        assert_eq!(config.resolution, Some(Resolution::new(2048, 1554)));
    }

    #[test]
    fn test_stop_reason_serialization() {
        let json = serde_json::to_string(&StopReason::WorkerStopped {
            worker: "cam1".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"reason":"workerStopped","worker":"cam1"}"#);
        assert_eq!(
            serde_json::to_string(&WorkerState::ShutDown).unwrap(),
            r#""shutdown""#
        );
    }
}
