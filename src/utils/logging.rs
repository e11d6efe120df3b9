//! Logging setup
//!
//! Events go to stdout and, once the session's output root exists, are also
//! appended to `<root>/log.txt`.

use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the session log inside the output root
pub const LOG_FILE_NAME: &str = "log.txt";

/// Log file sink that can be attached after the subscriber is installed
#[derive(Clone, Default)]
pub struct SessionLog {
    file: Arc<Mutex<Option<File>>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start appending to `<root>/log.txt`
    pub fn attach(&self, root: &Path) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(root.join(LOG_FILE_NAME))?;
        *self.file.lock() = Some(file);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.file.lock().is_some()
    }
}

/// Writer handed out per event; drops output until a file is attached
pub struct SessionLogWriter<'a> {
    file: MutexGuard<'a, Option<File>>,
}

impl Write for SessionLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SessionLog {
    type Writer = SessionLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SessionLogWriter {
            file: self.file.lock(),
        }
    }
}

/// Install the global subscriber
pub fn init(log: &SessionLog) {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_capture=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log.clone()),
        )
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}
