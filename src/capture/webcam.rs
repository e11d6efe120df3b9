//! Webcam capture using nokhwa
//!
//! nokhwa cameras are not `Send`, so each repeating request opens the device
//! on its own producer thread and decodes frames to RGB there. Enumeration and
//! session probing open the device briefly on the caller's thread.

use super::stream::{self, CaptureRetries, Producer, ResourceCounts};
use super::traits::{
    CameraInfo, CameraProvider, CaptureRequest, CaptureSession, Frame, OutputStream, Resolution,
    SensorMode, StreamSettings,
};
use crate::encoder::buffer::{ColorFormat, PlanarImage};
use crate::utils::{CaptureError, CaptureResult};
use crossbeam_channel::Sender;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cameras attached through the platform's native backend
#[derive(Default)]
pub struct WebcamProvider {
    indices: Vec<CameraIndex>,
    counts: Arc<ResourceCounts>,
}

impl WebcamProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn camera_index(&self, device: &CameraInfo) -> CameraIndex {
        self.indices
            .get(device.index)
            .cloned()
            .unwrap_or(CameraIndex::Index(device.index as u32))
    }
}

fn probe(index: &CameraIndex) -> Result<Camera, nokhwa::NokhwaError> {
    Camera::new(
        index.clone(),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    )
}

impl CameraProvider for WebcamProvider {
    fn name(&self) -> &str {
        "webcam"
    }

    fn devices(&mut self) -> CaptureResult<Vec<CameraInfo>> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| CaptureError::Platform(format!("Failed to enumerate cameras: {e}")))?;

        self.indices = cameras.iter().map(|info| info.index().clone()).collect();
        Ok(cameras
            .into_iter()
            .enumerate()
            .map(|(index, info)| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    index,
                    id,
                    name: info.human_name(),
                }
            })
            .collect())
    }

    fn sensor_modes(&mut self, device: &CameraInfo) -> CaptureResult<Vec<SensorMode>> {
        let mut camera = probe(&self.camera_index(device)).map_err(|e| {
            tracing::warn!("Failed to open camera {}: {}", device.id, e);
            CaptureError::DeviceUnavailable(device.index)
        })?;
        let formats = camera
            .compatible_camera_formats()
            .map_err(|e| CaptureError::Platform(format!("Failed to query formats: {e}")))?;

        let mut modes: Vec<(Resolution, u32)> = formats
            .iter()
            .map(|f| {
                let res = f.resolution();
                (Resolution::new(res.width(), res.height()), f.frame_rate())
            })
            .collect();
        modes.sort_by(|a, b| b.0.pixels().cmp(&a.0.pixels()).then(b.1.cmp(&a.1)));
        modes.dedup();

        Ok(modes
            .into_iter()
            .enumerate()
            .map(|(index, (resolution, fps))| SensorMode {
                index,
                resolution,
                fps,
            })
            .collect())
    }

    fn open_session(&mut self, device: &CameraInfo) -> CaptureResult<Box<dyn CaptureSession>> {
        let camera_index = self.camera_index(device);
        drop(probe(&camera_index).map_err(|e| {
            tracing::warn!("Failed to open camera {}: {}", device.id, e);
            CaptureError::DeviceUnavailable(device.index)
        })?);

        self.counts.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(WebcamSession {
            index: device.index,
            camera_index,
            counts: self.counts.clone(),
            endpoint: None,
            producer: None,
        }))
    }
}

struct WebcamSession {
    index: usize,
    camera_index: CameraIndex,
    counts: Arc<ResourceCounts>,
    endpoint: Option<(Sender<Frame>, Resolution)>,
    producer: Option<Producer>,
}

impl CaptureSession for WebcamSession {
    fn create_stream(&mut self, settings: &StreamSettings) -> CaptureResult<Arc<dyn OutputStream>> {
        if self.endpoint.is_some() || self.producer.is_some() {
            return Err(CaptureError::resource(
                "output stream",
                "session already has a stream",
            ));
        }

        let (frames, stream) =
            stream::open_stream(self.index, settings.resolution, false, self.counts.clone());
        self.endpoint = Some((frames, settings.resolution));
        Ok(stream)
    }

    fn repeat(&mut self, request: &CaptureRequest) -> CaptureResult<()> {
        let (frames, resolution) = self.endpoint.take().ok_or_else(|| {
            CaptureError::resource("capture request", "session has no idle stream")
        })?;

        let camera_index = self.camera_index.clone();
        let fps = request.sensor_mode.fps;
        let producer = Producer::spawn(self.index, self.counts.clone(), move |stop| {
            capture_loop(&camera_index, &frames, resolution, fps, stop)
        })?;
        self.producer = Some(producer);
        Ok(())
    }

    fn stop_repeat(&mut self) {
        if let Some(producer) = &self.producer {
            producer.stop();
        }
    }

    fn wait_for_idle(&mut self, timeout: Duration) -> CaptureResult<()> {
        match self.producer.as_mut() {
            Some(producer) => producer.wait_idle(timeout),
            None => Ok(()),
        }
    }
}

impl Drop for WebcamSession {
    fn drop(&mut self) {
        self.counts.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

fn capture_loop(
    camera_index: &CameraIndex,
    frames: &Sender<Frame>,
    resolution: Resolution,
    fps: u32,
    stop: &AtomicBool,
) {
    let wanted = CameraFormat::new(
        nokhwa::utils::Resolution::new(resolution.width, resolution.height),
        FrameFormat::MJPEG,
        fps,
    );
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

    let mut camera = match Camera::new(camera_index.clone(), format) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to open camera {:?}: {:?}", camera_index, e);
            return;
        }
    };
    if let Err(e) = camera.open_stream() {
        tracing::error!("Failed to open camera stream: {:?}", e);
        return;
    }

    let actual = camera.camera_format();
    tracing::info!(
        "Webcam opened: {}x{} @ {}fps, format={:?} (requested {} @ {}fps)",
        actual.resolution().width(),
        actual.resolution().height(),
        actual.frame_rate(),
        actual.format(),
        resolution,
        fps
    );

    let mut number = 0u64;
    let mut retries = CaptureRetries::default();
    let started = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        // Blocks until the camera delivers; the device controls the timing
        let captured = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>());
        let decoded = match captured {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("Failed to capture frame: {:?}", e);
                if !retries.failed(stop) {
                    tracing::error!(
                        "Giving up on camera {:?} after {} capture errors",
                        camera_index,
                        retries.failures()
                    );
                    break;
                }
                continue;
            }
        };
        retries.succeeded();

        let delivered = Resolution::new(decoded.width(), decoded.height());
        if delivered != resolution {
            tracing::error!(
                "Webcam delivered {} but the stream expects {}",
                delivered,
                resolution
            );
            break;
        }

        let image = match PlanarImage::new(resolution, ColorFormat::Rgb24, decoded.into_raw()) {
            Ok(image) => image,
            Err(e) => {
                tracing::error!("Unusable webcam frame: {}", e);
                break;
            }
        };

        number += 1;
        let frame = Frame {
            number,
            image: Box::new(image),
        };
        if !stream::deliver(frames, frame, stop) {
            break;
        }
    }

    let elapsed = started.elapsed();
    tracing::info!(
        "Webcam captured {} frames in {:.2}s",
        number,
        elapsed.as_secs_f64()
    );

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }
}
