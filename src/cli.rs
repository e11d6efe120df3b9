//! Command-line interface

use crate::capture::synthetic::SyntheticProvider;
use crate::capture::traits::CameraProvider;
use crate::output::layout;
use crate::recorder::state::CaptureConfiguration;
use crate::utils::CaptureResult;
use clap::{Parser, ValueEnum};
use std::path::Path;
use std::time::Duration;

/// Capture still images from one or more cameras
#[derive(Parser, Debug)]
#[command(name = "stream-capture", version, about, long_about = None)]
pub struct Cli {
    /// Session directory name (defaults to the current Unix time)
    #[arg(short = 'd', long, value_parser = parse_root_name)]
    pub root_directory: Option<String>,

    /// Sensor mode index
    #[arg(short = 'm', long, default_value_t = 0)]
    pub capture_mode: usize,

    /// Save every Nth frame
    #[arg(short = 's', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub save_every: u32,

    /// Capture time in seconds, 0 runs until interrupted
    #[arg(short = 't', long, default_value_t = 0)]
    pub capture_time: u64,

    /// Report encoder timings at shutdown
    #[arg(short = 'p', long)]
    pub profile: bool,

    /// Where frames come from
    #[arg(long, value_enum, default_value_t = Source::Synthetic)]
    pub source: Source,

    /// Number of synthetic cameras
    #[arg(long, default_value_t = 2)]
    pub cameras: usize,

    /// Print the available cameras and their sensor modes as JSON, then exit
    #[arg(long)]
    pub list_cameras: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Generated test patterns
    Synthetic,
    /// Attached cameras (requires the `webcam` feature)
    Webcam,
}

fn parse_root_name(name: &str) -> Result<String, String> {
    match name.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() => Ok(name.to_string()),
        _ => Err("must start with a letter or digit".to_string()),
    }
}

impl Cli {
    /// Build the session configuration, rooted on `volume` when one was found
    pub fn configuration(&self, volume: Option<&Path>) -> CaptureConfiguration {
        let name = self
            .root_directory
            .clone()
            .unwrap_or_else(layout::default_root_name);
        let root = layout::resolve_root(volume, &name);

        // The resolution comes from the provider once the session starts
        let mut config = CaptureConfiguration::new(root, self.capture_mode);
        config.capture_time = Duration::from_secs(self.capture_time);
        config.save_every = self.save_every;
        config.profile = self.profile;
        config
    }

    pub fn provider(&self) -> CaptureResult<Box<dyn CameraProvider>> {
        match self.source {
            Source::Synthetic => Ok(Box::new(SyntheticProvider::new(self.cameras))),
            #[cfg(feature = "webcam")]
            Source::Webcam => Ok(Box::new(crate::capture::webcam::WebcamProvider::new())),
            #[cfg(not(feature = "webcam"))]
            Source::Webcam => Err(crate::utils::CaptureError::Configuration(
                "built without webcam support; rebuild with --features webcam".to_string(),
            )),
        }
    }
}
