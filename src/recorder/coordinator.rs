//! Session orchestrator
//!
//! Brings up one capture pipeline per camera, waits for the capture time or
//! cancellation, then tears everything down in dependency order. Teardown
//! always runs, covering exactly the resources that were acquired.

use super::cancel::CancellationToken;
use super::consumer::{ConsumerWorker, DEFAULT_CONNECT_TIMEOUT};
use super::state::{CaptureConfiguration, RunSummary, StopReason, WorkerReport};
use super::worker::WorkerDriver;
use crate::capture::traits::{
    CameraProvider, CaptureRequest, CaptureSession, OutputStream, SensorMode, StreamSettings,
};
use crate::encoder::buffer::ColorFormat;
use crate::encoder::EncoderFactory;
use crate::output::{layout, manifest};
use crate::utils::logging::SessionLog;
use crate::utils::{CaptureError, CaptureResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Timing knobs for a capture session
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    /// Wait-loop granularity
    pub tick: Duration,

    /// How long a worker waits for its stream's producer
    pub connect_timeout: Duration,

    /// How long to wait for every worker to report running
    pub running_timeout: Duration,

    /// How long to wait for in-flight requests during teardown
    pub drain_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            running_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Resources acquired so far, in creation order
#[derive(Default)]
struct Resources {
    sessions: Vec<Box<dyn CaptureSession>>,
    streams: Vec<Arc<dyn OutputStream>>,
    workers: Vec<WorkerDriver>,
    /// Workers whose Initialize succeeded
    initialized: usize,
    /// Sessions with a repeating request submitted
    started: usize,
}

struct Capture {
    cameras: usize,
    sensor_mode: SensorMode,
    stop_reason: StopReason,
}

/// Runs one multi-camera capture session
pub struct SessionOrchestrator {
    config: CaptureConfiguration,
    provider: Box<dyn CameraProvider>,
    encoders: Arc<dyn EncoderFactory>,
    cancel: CancellationToken,
    options: OrchestratorOptions,
    session_log: Option<SessionLog>,
}

impl SessionOrchestrator {
    pub fn new(
        config: CaptureConfiguration,
        provider: Box<dyn CameraProvider>,
        encoders: Arc<dyn EncoderFactory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            provider,
            encoders,
            cancel,
            options: OrchestratorOptions::default(),
            session_log: None,
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach `log` to `<root>/log.txt` once the root exists
    pub fn with_session_log(mut self, log: SessionLog) -> Self {
        self.session_log = Some(log);
        self
    }

    /// Run the session to completion
    ///
    /// A worker that stops on its own cancels the session but is not an
    /// error; the summary's stop reason records it.
    pub fn run(mut self) -> CaptureResult<RunSummary> {
        let root = self.config.output_root.clone();
        tracing::info!("Creating output directory {:?}", root);
        layout::create_root(&root).map_err(|e| {
            tracing::error!("{}", e);
            e
        })?;

        if let Some(log) = &self.session_log {
            if let Err(e) = log.attach(&root) {
                tracing::warn!("Failed to open session log: {}", e);
            }
        }
        let started_at = Utc::now();
        manifest::write_manifest(&self.config, started_at)?;

        let mut resources = Resources::default();
        let outcome = self.start_and_wait(&mut resources, started_at);
        if let Err(e) = &outcome {
            tracing::error!("Capture failed: {}", e);
        }
        let workers = self.teardown(&mut resources);
        drop(resources);

        let capture = outcome?;
        tracing::info!("Capture complete: {:?}", capture.stop_reason);
        Ok(RunSummary {
            output_root: root,
            cameras: capture.cameras,
            sensor_mode: capture.sensor_mode,
            stop_reason: capture.stop_reason,
            workers,
        })
    }

    fn start_and_wait(
        &mut self,
        res: &mut Resources,
        started_at: DateTime<Utc>,
    ) -> CaptureResult<Capture> {
        let provider = self.provider.as_mut();
        tracing::info!("Using {} camera provider", provider.name());

        let devices = provider.devices()?;
        if devices.is_empty() {
            return Err(CaptureError::NoCameras);
        }
        tracing::info!("Found {} cameras", devices.len());

        for device in &devices {
            let session = provider.open_session(device).map_err(|e| {
                tracing::error!("Failed to open capture session for {}", device.name);
                e
            })?;
            res.sessions.push(session);
        }
        tracing::info!("Created {} capture sessions", res.sessions.len());

        let modes = provider.sensor_modes(&devices[0])?;
        let mode = resolve_sensor_mode(&modes, self.config.sensor_mode)?;
        self.config = self.config.clone().with_sensor_mode(mode);
        tracing::info!(
            "Using sensor mode {}: {} @ {} fps",
            mode.index,
            mode.resolution,
            mode.fps
        );
        manifest::write_manifest(&self.config, started_at)?;

        let settings = StreamSettings {
            resolution: mode.resolution,
            pixel_format: ColorFormat::Yuv420,
        };
        for (id, session) in res.sessions.iter_mut().enumerate() {
            let stream = session.create_stream(&settings).map_err(|e| {
                tracing::error!("Failed to create output stream for cam{}", id);
                e
            })?;
            res.streams.push(stream);
        }

        let config = Arc::new(self.config.clone());
        for (id, stream) in res.streams.iter().enumerate() {
            let worker = ConsumerWorker::new(
                id,
                Arc::downgrade(stream),
                config.clone(),
                self.encoders.clone(),
                self.cancel.clone(),
            )
            .with_connect_timeout(self.options.connect_timeout);

            let mut driver = WorkerDriver::new(Box::new(worker));
            let initialized = driver.initialize();
            res.workers.push(driver);
            initialized.map_err(|e| {
                tracing::error!("Failed to initialize consumer cam{}", id);
                e
            })?;
            res.initialized += 1;
        }

        for driver in &res.workers {
            driver.wait_running(self.options.running_timeout)?;
        }
        tracing::info!("All {} consumers running", res.workers.len());

        let request = CaptureRequest::for_mode(mode);
        for (id, session) in res.sessions.iter_mut().enumerate() {
            session.repeat(&request).map_err(|e| {
                tracing::error!("Failed to start repeating request on cam{}", id);
                e
            })?;
            res.started += 1;
        }

        if self.config.is_unbounded() {
            tracing::info!("Capturing until interrupted");
        } else {
            tracing::info!("Capturing for {:?}", self.config.capture_time);
        }
        let stop_reason = self.wait(&res.workers);

        Ok(Capture {
            cameras: devices.len(),
            sensor_mode: mode,
            stop_reason,
        })
    }

    /// Tick until the capture time passes, the token is set, or a worker dies
    fn wait(&self, workers: &[WorkerDriver]) -> StopReason {
        let started = Instant::now();
        loop {
            thread::sleep(self.options.tick);

            // A set token outranks workers that exited because of it
            let dead = workers.iter().find(|w| !w.is_executing());
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested");
                return StopReason::Cancelled;
            }
            if let Some(dead) = dead {
                tracing::warn!("{} stopped unexpectedly, cancelling capture", dead.name());
                self.cancel.cancel();
                return StopReason::WorkerStopped {
                    worker: dead.name().to_string(),
                };
            }
            if !self.config.is_unbounded() && started.elapsed() >= self.config.capture_time {
                return StopReason::DurationElapsed;
            }
        }
    }

    fn teardown(&self, res: &mut Resources) -> Vec<WorkerReport> {
        tracing::info!("Stopping capture");

        let initialized = res.initialized;
        for driver in &res.workers[..initialized] {
            driver.request_shutdown();
        }

        let started = res.started;
        for session in &mut res.sessions[..started] {
            session.stop_repeat();
        }
        for (id, session) in res.sessions[..started].iter_mut().enumerate() {
            if let Err(e) = session.wait_for_idle(self.options.drain_timeout) {
                tracing::warn!("cam{} did not drain: {}", id, e);
            }
        }

        // Releasing streams unblocks consumers still waiting on a frame
        res.streams.clear();

        let mut reports = Vec::with_capacity(initialized);
        for driver in &mut res.workers[..initialized] {
            match driver.shutdown() {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("Failed to shut down {}: {}", driver.name(), e),
            }
        }
        res.workers.clear();
        res.sessions.clear();

        tracing::info!("Released {} consumers", reports.len());
        reports
    }
}

/// Pick the sensor mode for `requested`, falling back to the first mode
///
/// Indices above the mode count are rejected with a warning. An index equal
/// to the count passes that check and then finds no mode, which also falls
/// back.
pub fn resolve_sensor_mode(modes: &[SensorMode], requested: usize) -> CaptureResult<SensorMode> {
    let default = *modes
        .first()
        .ok_or_else(|| CaptureError::resource("sensor modes", "camera reported none"))?;

    if requested > modes.len() {
        let err = CaptureError::SensorModeInvalid {
            requested,
            available: modes.len(),
        };
        tracing::warn!("{}, using mode {}", err, default.index);
        return Ok(default);
    }

    match modes.get(requested) {
        Some(mode) => Ok(*mode),
        None => {
            tracing::warn!(
                "Sensor mode {} is one past the last mode, using mode {}",
                requested,
                default.index
            );
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::stream::ResourceCounts;
    use crate::capture::synthetic::SyntheticProvider;
    use crate::capture::traits::Resolution;
    use crate::recorder::testing::CountingEncoderFactory;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const SMALL: SensorMode = SensorMode {
        index: 0,
        resolution: Resolution::new(64, 48),
        fps: 500,
    };
    const SMALLER: SensorMode = SensorMode {
        index: 1,
        resolution: Resolution::new(32, 32),
        fps: 500,
    };

    fn options() -> OrchestratorOptions {
        OrchestratorOptions {
            tick: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(100),
            running_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
        }
    }

    fn provider(cameras: usize) -> SyntheticProvider {
        SyntheticProvider::new(cameras)
            .with_sensor_modes(vec![SMALL, SMALLER])
            .with_frame_interval(Duration::from_millis(2))
    }

    fn config(root: &Path) -> CaptureConfiguration {
        let mut config = CaptureConfiguration::new(root.join("session"), SMALL.index);
        config.capture_time = Duration::from_millis(50);
        config
    }

    struct Outcome {
        result: CaptureResult<RunSummary>,
        counts: Arc<ResourceCounts>,
        encoders: Arc<CountingEncoderFactory>,
    }

    fn run(
        config: CaptureConfiguration,
        provider: SyntheticProvider,
        encoders: CountingEncoderFactory,
        cancel: CancellationToken,
    ) -> Outcome {
        run_with(options(), config, provider, encoders, cancel)
    }

    fn run_with(
        options: OrchestratorOptions,
        config: CaptureConfiguration,
        provider: SyntheticProvider,
        encoders: CountingEncoderFactory,
        cancel: CancellationToken,
    ) -> Outcome {
        let counts = provider.counts();
        let encoders = Arc::new(encoders);
        let result = SessionOrchestrator::new(config, Box::new(provider), encoders.clone(), cancel)
            .with_options(options)
            .run();
        Outcome {
            result,
            counts,
            encoders,
        }
    }

    fn assert_released(outcome: &Outcome) {
        assert_eq!(outcome.counts.sessions(), 0, "sessions leaked");
        assert_eq!(outcome.counts.streams(), 0, "streams leaked");
        assert_eq!(outcome.counts.consumers(), 0, "consumers leaked");
        assert_eq!(outcome.counts.producers(), 0, "producers leaked");
        assert_eq!(outcome.encoders.live(), 0, "encoders leaked");
    }

    fn image_names(root: &Path, camera: usize) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(layout::camera_dir(root, camera))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn subdirectories(root: &Path) -> usize {
        fs::read_dir(root)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_dir())
            .count()
    }

    #[test]
    fn test_two_healthy_cameras() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let root = config.output_root.clone();

        let outcome = run(
            config,
            provider(2),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );
        let summary = outcome.result.as_ref().unwrap();

        assert_eq!(summary.stop_reason, StopReason::DurationElapsed);
        assert_eq!(summary.cameras, 2);
        assert_eq!(summary.workers.len(), 2);
        for (camera, report) in summary.workers.iter().enumerate() {
            assert!(report.images_saved > 0);
            assert_eq!(report.buffer_allocations, 1);
            assert!(!report.stopped_early);

            let names = image_names(&root, camera);
            assert_eq!(names.len() as u64, report.images_saved);
            for (i, name) in names.iter().enumerate() {
                assert_eq!(*name, layout::image_file_name(i as u64 + 1));
            }
        }

        let manifest = fs::read_to_string(root.join(manifest::MANIFEST_FILE_NAME)).unwrap();
        assert!(manifest.contains("Capture mode: 0\n"));
        assert!(manifest.contains("Resolution: 64x48\n"));
        assert!(manifest.contains("Save every: 1\n"));
        assert_released(&outcome);
    }

    #[test]
    fn test_no_cameras() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let root = config.output_root.clone();

        let outcome = run(
            config,
            provider(0),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );

        assert!(matches!(outcome.result, Err(CaptureError::NoCameras)));
        let manifest = fs::read_to_string(root.join(manifest::MANIFEST_FILE_NAME)).unwrap();
        assert!(manifest.contains("Capture mode: 0\n"));
        assert!(!manifest.contains("Resolution"));
        assert_eq!(subdirectories(&root), 0);
        assert_released(&outcome);
    }

    #[test]
    fn test_out_of_range_mode_falls_back() {
        for requested in [2, 7] {
            let dir = tempdir().unwrap();
            let mut config = config(dir.path());
            config.sensor_mode = requested;
            let root = config.output_root.clone();

            let outcome = run(
                config,
                provider(1),
                CountingEncoderFactory::default(),
                CancellationToken::new(),
            );
            let summary = outcome.result.as_ref().unwrap();
            assert_eq!(summary.sensor_mode, SMALL);

            let manifest = fs::read_to_string(root.join(manifest::MANIFEST_FILE_NAME)).unwrap();
            assert!(manifest.contains("Capture mode: 0\n"));
            assert!(manifest.contains("Resolution: 64x48\n"));
            assert_released(&outcome);
        }
    }

    #[test]
    fn test_valid_mode_sets_resolution() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.sensor_mode = 1;
        let root = config.output_root.clone();

        let outcome = run(
            config,
            provider(1),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );
        assert_eq!(outcome.result.as_ref().unwrap().sensor_mode, SMALLER);

        let manifest = fs::read_to_string(root.join(manifest::MANIFEST_FILE_NAME)).unwrap();
        assert!(manifest.contains("Capture mode: 1\n"));
        assert!(manifest.contains("Resolution: 32x32\n"));
    }

    #[test]
    fn test_worker_write_failure_cancels_session() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.capture_time = Duration::ZERO;
        let root = config.output_root.clone();
        let cancel = CancellationToken::new();

        let outcome = run(
            config,
            provider(2),
            CountingEncoderFactory::default().fail_encode_after(1, 3),
            cancel.clone(),
        );
        let summary = outcome.result.as_ref().unwrap();

        assert_eq!(
            summary.stop_reason,
            StopReason::WorkerStopped {
                worker: "cam1".to_string()
            }
        );
        assert!(cancel.is_cancelled());
        assert_eq!(summary.workers[1].images_saved, 3);
        assert!(summary.workers[1].stopped_early);
        assert!(!summary.workers[0].stopped_early);
        assert_eq!(image_names(&root, 1).len(), 3);
        assert_released(&outcome);
    }

    #[test]
    fn test_signal_cancels_unbounded_run() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.capture_time = Duration::ZERO;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            trigger.cancel();
        });
        let outcome = run(
            config,
            provider(1),
            CountingEncoderFactory::default(),
            cancel,
        );
        canceller.join().unwrap();

        assert_eq!(
            outcome.result.as_ref().unwrap().stop_reason,
            StopReason::Cancelled
        );
        assert_released(&outcome);
    }

    #[test]
    fn test_signal_between_ticks_is_not_a_worker_stop() {
        // Workers exit on the token well before the next tick
        let options = OrchestratorOptions {
            tick: Duration::from_millis(200),
            ..options()
        };

        for _ in 0..3 {
            let dir = tempdir().unwrap();
            let mut config = config(dir.path());
            config.capture_time = Duration::ZERO;
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            let canceller = thread::spawn(move || {
                thread::sleep(Duration::from_millis(60));
                trigger.cancel();
            });
            let outcome = run_with(
                options,
                config,
                provider(2),
                CountingEncoderFactory::default(),
                cancel,
            );
            canceller.join().unwrap();

            let summary = outcome.result.as_ref().unwrap();
            assert_eq!(summary.stop_reason, StopReason::Cancelled);
            assert!(summary.workers.iter().all(|w| !w.stopped_early));
            assert_released(&outcome);
        }
    }

    #[test]
    fn test_failing_camera_ends_session() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.capture_time = Duration::ZERO;
        let root = config.output_root.clone();
        let cancel = CancellationToken::new();

        let outcome = run(
            config,
            provider(2).fail_capture_at(1, 5),
            CountingEncoderFactory::default(),
            cancel.clone(),
        );
        let summary = outcome.result.as_ref().unwrap();

        assert_eq!(
            summary.stop_reason,
            StopReason::WorkerStopped {
                worker: "cam1".to_string()
            }
        );
        assert!(cancel.is_cancelled());
        assert_eq!(summary.workers[1].frames_acquired, 5);
        assert!(summary.workers[1].stopped_early);
        assert_eq!(image_names(&root, 1).len(), 5);
        assert_released(&outcome);
    }

    #[test]
    fn test_session_failure_releases_earlier_sessions() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let root = config.output_root.clone();

        let outcome = run(
            config,
            provider(3).fail_session_at(1),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );

        assert!(matches!(
            outcome.result,
            Err(CaptureError::ResourceCreation { .. })
        ));
        assert_eq!(subdirectories(&root), 0);
        assert_eq!(outcome.encoders.created(), 0);
        assert_released(&outcome);
    }

    #[test]
    fn test_unavailable_device_is_reported() {
        let dir = tempdir().unwrap();
        let outcome = run(
            config(dir.path()),
            provider(2).fail_unavailable_at(1),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );

        let err = outcome.result.as_ref().unwrap_err();
        assert_eq!(err.code(), "DEVICE_UNAVAILABLE");
        assert!(err.to_string().contains("try rebooting"));
        assert_released(&outcome);
    }

    #[test]
    fn test_stream_failure_releases_earlier_streams() {
        let dir = tempdir().unwrap();
        let outcome = run(
            config(dir.path()),
            provider(3).fail_stream_at(2),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );

        assert!(outcome.result.is_err());
        assert_released(&outcome);
    }

    #[test]
    fn test_initialize_failure_releases_earlier_workers() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let root = config.output_root.clone();

        let outcome = run(
            config,
            provider(3),
            CountingEncoderFactory::default().fail_create_at(1),
            CancellationToken::new(),
        );

        assert!(outcome.result.is_err());
        assert_eq!(outcome.encoders.created(), 2);
        assert!(layout::camera_dir(&root, 0).is_dir());
        assert!(!layout::camera_dir(&root, 2).exists());
        assert_released(&outcome);
    }

    #[test]
    fn test_connect_timeout_is_fatal() {
        let dir = tempdir().unwrap();
        let outcome = run(
            config(dir.path()),
            provider(2).fail_connect_at(1),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );

        let err = outcome.result.as_ref().unwrap_err();
        assert_eq!(err.code(), "CONNECT_TIMEOUT");
        assert_released(&outcome);
    }

    #[test]
    fn test_existing_root_is_fatal() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir(&config.output_root).unwrap();

        let outcome = run(
            config,
            provider(1),
            CountingEncoderFactory::default(),
            CancellationToken::new(),
        );
        assert!(outcome.result.is_err());
        assert_released(&outcome);
    }

    #[test]
    fn test_resolve_sensor_mode_boundaries() {
        let modes = [SMALL, SMALLER];
        assert_eq!(resolve_sensor_mode(&modes, 0).unwrap(), SMALL);
        assert_eq!(resolve_sensor_mode(&modes, 1).unwrap(), SMALLER);
        assert_eq!(resolve_sensor_mode(&modes, 2).unwrap(), SMALL);
        assert_eq!(resolve_sensor_mode(&modes, 3).unwrap(), SMALL);
        assert!(resolve_sensor_mode(&[], 0).is_err());
    }

    #[test]
    fn test_default_options() {
        let options = OrchestratorOptions::default();
        assert_eq!(options.tick, Duration::from_secs(1));
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
