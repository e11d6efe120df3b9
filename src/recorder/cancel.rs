//! Session cancellation
//!
//! A write-once flag shared by the orchestrator, its workers and the process
//! signal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

/// Cooperative cancellation flag; once set it stays set
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

static SIGNAL_HANDLER: Once = Once::new();

/// Route SIGINT, SIGTERM and SIGHUP to `token`
///
/// Installed at most once per process; later calls are ignored.
pub fn install_signal_handlers(token: &CancellationToken) {
    SIGNAL_HANDLER.call_once(|| {
        let flag = token.flag.clone();
        let installed = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst));
        match installed {
            Ok(()) => tracing::debug!("Termination signal handlers installed"),
            Err(e) => tracing::warn!("Failed to install signal handlers: {}", e),
        }
    });
}
