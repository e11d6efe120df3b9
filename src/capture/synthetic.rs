//! Synthetic camera provider
//!
//! Generates moving test-pattern frames in-process. Failures can be injected
//! per camera index so the recorder's startup and teardown paths can be
//! exercised without hardware.

use super::stream::{self, CaptureRetries, Producer, ResourceCounts, CAPTURE_RETRY_LIMIT};
use super::traits::{
    CameraInfo, CameraProvider, CaptureRequest, CaptureSession, Frame, OutputStream, Resolution,
    SensorMode, StreamSettings,
};
use crate::encoder::buffer::{ColorFormat, PlanarImage};
use crate::utils::{CaptureError, CaptureResult};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sensor modes reported by default
pub const DEFAULT_SENSOR_MODES: [SensorMode; 2] = [
    SensorMode {
        index: 0,
        resolution: Resolution::new(2048, 1554),
        fps: 38,
    },
    SensorMode {
        index: 1,
        resolution: Resolution::new(1936, 1106),
        fps: 30,
    },
];

#[derive(Debug, Clone)]
struct SyntheticConfig {
    cameras: usize,
    sensor_modes: Vec<SensorMode>,
    frame_interval: Option<Duration>,
    frame_limit: Option<u64>,
    unavailable_at: Option<usize>,
    session_failure_at: Option<usize>,
    stream_failure_at: Option<usize>,
    connect_failure_at: Option<usize>,
    capture_failure: Option<(usize, u64)>,
}

/// In-process camera provider producing test patterns
pub struct SyntheticProvider {
    config: Arc<SyntheticConfig>,
    counts: Arc<ResourceCounts>,
}

impl SyntheticProvider {
    /// Create a provider exposing `cameras` devices
    pub fn new(cameras: usize) -> Self {
        Self {
            config: Arc::new(SyntheticConfig {
                cameras,
                sensor_modes: DEFAULT_SENSOR_MODES.to_vec(),
                frame_interval: None,
                frame_limit: None,
                unavailable_at: None,
                session_failure_at: None,
                stream_failure_at: None,
                connect_failure_at: None,
                capture_failure: None,
            }),
            counts: Arc::new(ResourceCounts::default()),
        }
    }

    fn config_mut(&mut self) -> &mut SyntheticConfig {
        Arc::make_mut(&mut self.config)
    }

    pub fn with_sensor_modes(mut self, modes: Vec<SensorMode>) -> Self {
        self.config_mut().sensor_modes = modes;
        self
    }

    /// Deliver frames at a fixed interval instead of the sensor mode's rate
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.config_mut().frame_interval = Some(interval);
        self
    }

    /// End each stream after `limit` frames
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.config_mut().frame_limit = Some(limit);
        self
    }

    /// Report the device at `index` as unavailable
    pub fn fail_unavailable_at(mut self, index: usize) -> Self {
        self.config_mut().unavailable_at = Some(index);
        self
    }

    pub fn fail_session_at(mut self, index: usize) -> Self {
        self.config_mut().session_failure_at = Some(index);
        self
    }

    pub fn fail_stream_at(mut self, index: usize) -> Self {
        self.config_mut().stream_failure_at = Some(index);
        self
    }

    /// Consumers of the stream at `index` never see the producer connect
    pub fn fail_connect_at(mut self, index: usize) -> Self {
        self.config_mut().connect_failure_at = Some(index);
        self
    }

    /// Camera `index` fails every capture after `frames` good ones
    pub fn fail_capture_at(mut self, index: usize, frames: u64) -> Self {
        self.config_mut().capture_failure = Some((index, frames));
        self
    }

    pub fn counts(&self) -> Arc<ResourceCounts> {
        self.counts.clone()
    }
}

impl CameraProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn devices(&mut self) -> CaptureResult<Vec<CameraInfo>> {
        Ok((0..self.config.cameras)
            .map(|index| CameraInfo {
                index,
                id: format!("synthetic{index}"),
                name: format!("Synthetic Camera {index}"),
            })
            .collect())
    }

    fn sensor_modes(&mut self, _device: &CameraInfo) -> CaptureResult<Vec<SensorMode>> {
        Ok(self.config.sensor_modes.clone())
    }

    fn open_session(&mut self, device: &CameraInfo) -> CaptureResult<Box<dyn CaptureSession>> {
        if self.config.unavailable_at == Some(device.index) {
            return Err(CaptureError::DeviceUnavailable(device.index));
        }
        if self.config.session_failure_at == Some(device.index) {
            return Err(CaptureError::resource(
                "capture session",
                format!("injected failure on {}", device.id),
            ));
        }

        self.counts.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSession {
            index: device.index,
            config: self.config.clone(),
            counts: self.counts.clone(),
            endpoint: None,
            producer: None,
        }))
    }
}

struct SyntheticSession {
    index: usize,
    config: Arc<SyntheticConfig>,
    counts: Arc<ResourceCounts>,
    endpoint: Option<(Sender<Frame>, Resolution)>,
    producer: Option<Producer>,
}

impl CaptureSession for SyntheticSession {
    fn create_stream(&mut self, settings: &StreamSettings) -> CaptureResult<Arc<dyn OutputStream>> {
        if self.config.stream_failure_at == Some(self.index) {
            return Err(CaptureError::resource(
                "output stream",
                format!("injected failure on camera {}", self.index),
            ));
        }
        if settings.pixel_format != ColorFormat::Yuv420 {
            return Err(CaptureError::resource(
                "output stream",
                format!("unsupported pixel format {:?}", settings.pixel_format),
            ));
        }
        if self.endpoint.is_some() || self.producer.is_some() {
            return Err(CaptureError::resource(
                "output stream",
                "session already has a stream",
            ));
        }

        let (frames, stream) = stream::open_stream(
            self.index,
            settings.resolution,
            self.config.connect_failure_at == Some(self.index),
            self.counts.clone(),
        );
        self.endpoint = Some((frames, settings.resolution));
        Ok(stream)
    }

    fn repeat(&mut self, request: &CaptureRequest) -> CaptureResult<()> {
        let (frames, resolution) = self.endpoint.take().ok_or_else(|| {
            CaptureError::resource("capture request", "session has no idle stream")
        })?;

        let camera = self.index;
        let pacing = Pacing {
            interval: self.config.frame_interval.unwrap_or(request.frame_duration),
            limit: self.config.frame_limit,
            fail_after: self
                .config
                .capture_failure
                .filter(|(index, _)| *index == camera)
                .map(|(_, frames)| frames),
        };

        let producer = Producer::spawn(camera, self.counts.clone(), move |stop| {
            produce(&frames, resolution, camera, pacing, stop)
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

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.counts.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
struct Pacing {
    interval: Duration,
    limit: Option<u64>,
    /// Captures start failing after this many frames
    fail_after: Option<u64>,
}

/// One frame per interval until stopped, the limit is hit or captures keep failing
fn produce(
    frames: &Sender<Frame>,
    resolution: Resolution,
    camera: usize,
    pacing: Pacing,
    stop: &AtomicBool,
) {
    let mut retries = CaptureRetries::new(CAPTURE_RETRY_LIMIT, Duration::ZERO);
    let mut number = 0u64;
    while !stop.load(Ordering::SeqCst) {
        if pacing.limit.is_some_and(|limit| number >= limit) {
            break;
        }
        thread::sleep(pacing.interval);

        if pacing.fail_after.is_some_and(|after| number >= after) {
            tracing::debug!("Synthetic camera {} failed to capture", camera);
            if !retries.failed(stop) {
                tracing::error!(
                    "Synthetic camera {} gave up after {} capture errors",
                    camera,
                    retries.failures()
                );
                return;
            }
            continue;
        }
        retries.succeeded();

        number += 1;
        let image = match test_pattern(resolution, camera, number) {
            Ok(image) => image,
            Err(e) => {
                tracing::error!("Synthetic camera {} failed to build a frame: {}", camera, e);
                return;
            }
        };

        let frame = Frame {
            number,
            image: Box::new(image),
        };
        if !stream::deliver(frames, frame, stop) {
            return;
        }
    }
}

/// Diagonal gradient that drifts with the frame number
fn test_pattern(resolution: Resolution, camera: usize, number: u64) -> CaptureResult<PlanarImage> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let (cw, ch) = resolution.chroma();
    let shift = (number as usize).wrapping_mul(3);
    let tint = camera as u8;

    let mut data = Vec::with_capacity(ColorFormat::Yuv420.frame_len(resolution));
    for row in 0..height {
        data.extend((0..width).map(|col| (col + row + shift) as u8));
    }
    data.extend(std::iter::repeat(96u8.wrapping_add(tint.wrapping_mul(40))).take(cw * ch));
    data.extend(std::iter::repeat(160u8.wrapping_sub(tint.wrapping_mul(24))).take(cw * ch));

    PlanarImage::new(resolution, ColorFormat::Yuv420, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::Acquired;

    const SMALL: SensorMode = SensorMode {
        index: 0,
        resolution: Resolution::new(16, 8),
        fps: 200,
    };

    fn open(
        provider: &mut SyntheticProvider,
        index: usize,
    ) -> CaptureResult<Box<dyn CaptureSession>> {
        let devices = provider.devices()?;
        provider.open_session(&devices[index])
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            resolution: SMALL.resolution,
            pixel_format: ColorFormat::Yuv420,
        }
    }

    #[test]
    fn test_enumerates_requested_cameras() {
        let mut provider = SyntheticProvider::new(3);
        let devices = provider.devices().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[2].id, "synthetic2");
        assert_eq!(
            provider.sensor_modes(&devices[0]).unwrap(),
            DEFAULT_SENSOR_MODES.to_vec()
        );
    }

    #[test]
    fn test_injected_session_failures() {
        let mut provider = SyntheticProvider::new(3)
            .fail_unavailable_at(1)
            .fail_session_at(2);

        assert!(open(&mut provider, 0).is_ok());
        assert!(matches!(
            open(&mut provider, 1),
            Err(CaptureError::DeviceUnavailable(1))
        ));
        assert!(matches!(
            open(&mut provider, 2),
            Err(CaptureError::ResourceCreation { .. })
        ));
        assert_eq!(provider.counts().sessions(), 0);
    }

    #[test]
    fn test_frames_are_numbered_from_one_until_limit() {
        let mut provider = SyntheticProvider::new(1)
            .with_frame_interval(Duration::from_millis(1))
            .with_frame_limit(5);
        let mut session = open(&mut provider, 0).unwrap();
        let stream = session.create_stream(&settings()).unwrap();
        let mut consumer = stream.create_consumer().unwrap();
        consumer
            .wait_until_connected(Duration::from_secs(1))
            .unwrap();

        session.repeat(&CaptureRequest::for_mode(SMALL)).unwrap();

        let mut numbers = Vec::new();
        while let Acquired::Frame(frame) = consumer.acquire_frame() {
            assert_eq!(frame.image.resolution(), SMALL.resolution);
            numbers.push(frame.number);
        }
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        session.wait_for_idle(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_repeated_capture_errors_end_stream() {
        let mut provider = SyntheticProvider::new(1)
            .with_frame_interval(Duration::from_millis(1))
            .fail_capture_at(0, 3);
        let counts = provider.counts();
        let mut session = open(&mut provider, 0).unwrap();
        let stream = session.create_stream(&settings()).unwrap();
        let mut consumer = stream.create_consumer().unwrap();

        session.repeat(&CaptureRequest::for_mode(SMALL)).unwrap();

        let mut numbers = Vec::new();
        while let Acquired::Frame(frame) = consumer.acquire_frame() {
            numbers.push(frame.number);
        }
        assert_eq!(numbers, vec![1, 2, 3]);
        session.wait_for_idle(Duration::from_secs(1)).unwrap();
        assert_eq!(counts.producers(), 0);
    }

    #[test]
    fn test_stop_and_drain() {
        let mut provider =
            SyntheticProvider::new(1).with_frame_interval(Duration::from_millis(2));
        let counts = provider.counts();
        let mut session = open(&mut provider, 0).unwrap();
        let stream = session.create_stream(&settings()).unwrap();

        session.repeat(&CaptureRequest::for_mode(SMALL)).unwrap();
        thread::sleep(Duration::from_millis(30));
        session.stop_repeat();
        session.wait_for_idle(Duration::from_secs(2)).unwrap();
        assert_eq!(counts.producers(), 0);

        drop(stream);
        drop(session);
        assert_eq!(counts.sessions(), 0);
        assert_eq!(counts.streams(), 0);
    }

    #[test]
    fn test_stream_rules() {
        let mut provider = SyntheticProvider::new(2).fail_stream_at(1);

        let mut session = open(&mut provider, 0).unwrap();
        assert!(session.repeat(&CaptureRequest::for_mode(SMALL)).is_err());
        let rgb = StreamSettings {
            pixel_format: ColorFormat::Rgb24,
            ..settings()
        };
        assert!(session.create_stream(&rgb).is_err());
        let _stream = session.create_stream(&settings()).unwrap();
        assert!(session.create_stream(&settings()).is_err());

        let mut failing = open(&mut provider, 1).unwrap();
        assert!(failing.create_stream(&settings()).is_err());
    }
}
