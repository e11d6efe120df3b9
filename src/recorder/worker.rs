//! Worker lifecycle
//!
//! Every capture worker goes through Initialize → WaitRunning → Execute →
//! RequestShutdown → Shutdown. `CaptureWorker` is the per-type capability;
//! `WorkerDriver` owns the thread and the state machine the orchestrator
//! drives.

use super::state::{WorkerReport, WorkerState};
use crate::utils::{CaptureError, CaptureResult};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A unit of work run on its own thread by a `WorkerDriver`
pub trait CaptureWorker: Send + 'static {
    fn name(&self) -> &str;

    /// Acquire resources; runs on the orchestrator thread
    fn initialize(&mut self) -> CaptureResult<()>;

    /// Main loop; runs on the worker thread
    ///
    /// Must call `WorkerContext::mark_running` once attached and return
    /// promptly after `WorkerContext::stop_requested` turns true.
    fn execute(&mut self, ctx: &WorkerContext) -> CaptureResult<()>;

    /// Release resources; runs on the orchestrator thread after join
    fn shutdown(&mut self) -> CaptureResult<()>;

    fn report(&self) -> WorkerReport;
}

#[derive(Default)]
struct Inner {
    state: WorkerState,
    failure: Option<CaptureError>,
}

#[derive(Default)]
struct StateCell {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl StateCell {
    fn get(&self) -> WorkerState {
        self.inner.lock().state
    }

    fn set(&self, state: WorkerState) {
        self.inner.lock().state = state;
        self.changed.notify_all();
    }
}

/// Handle passed to `CaptureWorker::execute`
pub struct WorkerContext {
    stop: Arc<AtomicBool>,
    state: Arc<StateCell>,
}

impl WorkerContext {
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Report that the worker is attached and pumping frames
    pub fn mark_running(&self) {
        let mut inner = self.state.inner.lock();
        if inner.state == WorkerState::Initialized {
            inner.state = WorkerState::Running;
        }
        drop(inner);
        self.state.changed.notify_all();
    }
}

/// Drives one worker through its lifecycle
pub struct WorkerDriver {
    name: String,
    worker: Option<Box<dyn CaptureWorker>>,
    state: Arc<StateCell>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<Box<dyn CaptureWorker>>>,
}

impl WorkerDriver {
    pub fn new(worker: Box<dyn CaptureWorker>) -> Self {
        Self {
            name: worker.name().to_string(),
            worker: Some(worker),
            state: Arc::new(StateCell::default()),
            stop: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Initialize the worker, then launch its Execute phase on a new thread
    pub fn initialize(&mut self) -> CaptureResult<()> {
        if self.state() != WorkerState::Created {
            return Err(CaptureError::Platform(format!(
                "{} initialized twice",
                self.name
            )));
        }
        let mut worker = self.worker.take().ok_or_else(|| {
            CaptureError::Platform(format!("{} has no worker to initialize", self.name))
        })?;

        if let Err(e) = worker.initialize() {
            self.worker = Some(worker);
            self.state.set(WorkerState::Failed);
            return Err(e);
        }
        self.state.set(WorkerState::Initialized);
        self.alive.store(true, Ordering::SeqCst);

        let ctx = WorkerContext {
            stop: self.stop.clone(),
            state: self.state.clone(),
        };
        let alive = self.alive.clone();
        let name = self.name.clone();

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let result = worker.execute(&ctx);
                alive.store(false, Ordering::SeqCst);

                let mut inner = ctx.state.inner.lock();
                match result {
                    Ok(()) => tracing::debug!("{} finished executing", name),
                    Err(e) => {
                        tracing::error!("{} failed: {}", name, e);
                        inner.failure = Some(e);
                    }
                }
                if inner.state == WorkerState::Initialized {
                    inner.state = WorkerState::Failed;
                }
                drop(inner);
                ctx.state.changed.notify_all();
                worker
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.alive.store(false, Ordering::SeqCst);
                self.state.set(WorkerState::Failed);
                Err(CaptureError::resource("worker thread", e))
            }
        }
    }

    /// Block until the worker reports running, fails, or `timeout` passes
    pub fn wait_running(&self, timeout: Duration) -> CaptureResult<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.state.inner.lock();

        while inner.state == WorkerState::Initialized {
            if self.state.changed.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }

        match inner.state {
            WorkerState::Running | WorkerState::Stopping => Ok(()),
            WorkerState::Initialized => Err(CaptureError::ConnectTimeout {
                worker: self.name.clone(),
                timeout,
            }),
            _ => Err(inner.failure.take().unwrap_or_else(|| {
                CaptureError::resource("worker", format!("{} exited before running", self.name))
            })),
        }
    }

    /// Tell the worker to leave its Execute loop; does not wait
    pub fn request_shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let mut inner = self.state.inner.lock();
        if matches!(inner.state, WorkerState::Initialized | WorkerState::Running) {
            inner.state = WorkerState::Stopping;
        }
    }

    /// Whether the Execute phase is still running
    pub fn is_executing(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Join the thread, run the worker's Shutdown phase and report
    pub fn shutdown(&mut self) -> CaptureResult<WorkerReport> {
        self.request_shutdown();

        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(worker) => self.worker = Some(worker),
                Err(_) => {
                    self.state.set(WorkerState::Failed);
                    return Err(CaptureError::Platform(format!("{} panicked", self.name)));
                }
            }
        }

        let worker = self.worker.as_mut().ok_or_else(|| {
            CaptureError::Platform(format!("{} has no worker to shut down", self.name))
        })?;
        let result = worker.shutdown();
        let report = worker.report();
        self.state.set(WorkerState::ShutDown);
        result.map(|()| report)
    }
}

impl Drop for WorkerDriver {
    fn drop(&mut self) {
        // A thread still blocked on acquire is detached, not joined
        self.stop.store(true, Ordering::SeqCst);
    }
}
