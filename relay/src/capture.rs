use cam_relay_common::config::CaptureSettings;
use cam_relay_common::frame::CapturedFrame;
use chrono::Utc;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tracing::{info, warn};

/// Result of one read attempt against a capture source.
pub enum ReadOutcome {
    Frame(CapturedFrame),
    /// Transient failure: the device produced nothing usable this iteration.
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to open capture device {index}: {reason}")]
    Open { index: u32, reason: String },
    #[error("failed to read from capture device: {0}")]
    Read(String),
}

/// Narrow seam over the camera backend so the capture loop can be driven by
/// a fake source in tests.
///
/// `Err` is a fatal device failure and ends the loop; `Empty` is skipped.
pub trait CaptureSource {
    fn read(&mut self) -> Result<ReadOutcome, CaptureError>;
}

/// Camera-backed capture source.
///
/// The device is opened with the fixed format request (MJPEG at the
/// configured resolution and frame rate) and every frame is decoded to
/// packed RGB before it leaves this module.
pub struct NokhwaSource {
    camera: Camera,
    seq: u64,
}

impl NokhwaSource {
    pub fn open(index: u32, settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let format = CameraFormat::new(
            Resolution::new(settings.width, settings.height),
            FrameFormat::MJPEG,
            settings.fps,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
        let mut camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
            CaptureError::Open {
                index,
                reason: e.to_string(),
            }
        })?;
        camera.open_stream().map_err(|e| CaptureError::Open {
            index,
            reason: e.to_string(),
        })?;
        info!(index, format = ?camera.camera_format(), "capture device opened");
        Ok(Self { camera, seq: 0 })
    }
}

impl CaptureSource for NokhwaSource {
    fn read(&mut self) -> Result<ReadOutcome, CaptureError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        if buffer.buffer().is_empty() {
            return Ok(ReadOutcome::Empty);
        }
        let decoded = match buffer.decode_image::<RgbFormat>() {
            Ok(img) => img,
            Err(e) => {
                warn!(error = %e, "failed to decode camera frame, skipping");
                return Ok(ReadOutcome::Empty);
            }
        };
        self.seq += 1;
        let (width, height) = (decoded.width(), decoded.height());
        Ok(ReadOutcome::Frame(CapturedFrame::new(
            width,
            height,
            decoded.into_raw(),
            self.seq,
            Utc::now().timestamp_millis(),
        )))
    }
}
