//! Configuration manifest
//!
//! `options.txt` records the settings a session was started with, one
//! `Key: value` pair per line. It is written as soon as the root exists and
//! rewritten once the sensor mode is resolved, adding the resolution.

use crate::recorder::state::CaptureConfiguration;
use crate::utils::CaptureResult;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

pub const MANIFEST_FILE_NAME: &str = "options.txt";

pub fn render_manifest(config: &CaptureConfiguration, started_at: DateTime<Utc>) -> String {
    let capture_time = if config.is_unbounded() {
        "inf".to_string()
    } else {
        config.capture_time.as_secs().to_string()
    };

    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "Root directory: {}", config.output_root.display());
    let _ = writeln!(out, "Capture mode: {}", config.sensor_mode);
    if let Some(resolution) = config.resolution {
        let _ = writeln!(out, "Resolution: {}", resolution);
    }
    let _ = writeln!(out, "Capture time: {}", capture_time);
    let _ = writeln!(out, "Profile: {}", u8::from(config.profile));
    let _ = writeln!(out, "Save every: {}", config.save_every);
    let _ = writeln!(
        out,
        "Started at: {}",
        started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    out
}

/// Write `<root>/options.txt`
pub fn write_manifest(
    config: &CaptureConfiguration,
    started_at: DateTime<Utc>,
) -> CaptureResult<PathBuf> {
    let path = config.output_root.join(MANIFEST_FILE_NAME);
    fs::write(&path, render_manifest(config, started_at))?;
    tracing::debug!("Wrote manifest to {:?}", path);
    Ok(path)
}
