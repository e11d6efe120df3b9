//! stream-capture - multi-camera still capture.
//!
//! Streams frames from every attached camera, saves every Nth frame as a JPEG
//! under a per-session directory, and shuts down cleanly on a timer, a
//! termination signal, or the first camera that stops.

pub mod capture;
pub mod cli;
pub mod encoder;
pub mod output;
pub mod recorder;
pub mod utils;

use anyhow::Context;
use capture::traits::{CameraInfo, CameraProvider, SensorMode};
use clap::Parser;
use cli::Cli;
use encoder::JpegEncoderFactory;
use recorder::{install_signal_handlers, CancellationToken, SessionOrchestrator};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use utils::error::ErrorResponse;
use utils::logging::{self, SessionLog};
use utils::{volume, CaptureError};

/// Run the command-line application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let log = SessionLog::new();
    logging::init(&log);
    tracing::info!("Starting stream-capture v{}", env!("CARGO_PKG_VERSION"));

    match execute(cli, log) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<CaptureError>().map(ErrorResponse::from) {
                Some(response) => tracing::error!(code = %response.code, "{}", response.message),
                None => tracing::error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli, log: SessionLog) -> anyhow::Result<()> {
    if cli.list_cameras {
        return list_cameras(cli.provider()?.as_mut());
    }

    let cancel = CancellationToken::new();
    install_signal_handlers(&cancel);

    let provider = cli.provider()?;
    let volume = volume::find_removable_volume();
    match &volume {
        Some(path) => tracing::info!("Using removable volume {:?}", path),
        None => tracing::info!("No removable volume found, writing to the working directory"),
    }
    let config = cli.configuration(volume.as_deref());

    let summary = SessionOrchestrator::new(
        config,
        provider,
        Arc::new(JpegEncoderFactory::default()),
        cancel,
    )
    .with_session_log(log)
    .run()?;

    tracing::info!(
        "Saved {} images from {} cameras to {:?}",
        summary.images_saved(),
        summary.cameras,
        summary.output_root
    );
    tracing::debug!(
        "Run summary: {}",
        serde_json::to_string(&summary).context("Failed to serialize run summary")?
    );
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CameraListing {
    #[serde(flatten)]
    info: CameraInfo,
    sensor_modes: Vec<SensorMode>,
}

fn list_cameras(provider: &mut dyn CameraProvider) -> anyhow::Result<()> {
    let mut listings = Vec::new();
    for info in provider.devices()? {
        let sensor_modes = provider.sensor_modes(&info).unwrap_or_else(|e| {
            tracing::warn!("Failed to query sensor modes for {}: {}", info.name, e);
            Vec::new()
        });
        listings.push(CameraListing { info, sensor_modes });
    }

    println!("{}", serde_json::to_string_pretty(&listings)?);
    Ok(())
}
