use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

use cam_relay_common::config::RecorderSettings;
use cam_relay_common::frame::CapturedFrame;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("frame could not be encoded for the video file: {0}")]
    Frame(#[from] cam_relay_common::frame::FrameError),
}

/// Narrow seam over the video encoder so the capture loop can be driven by
/// a fake sink in tests.
///
/// Frames are appended in capture order; the sink is opened with fixed
/// fps/codec parameters every appended frame is assumed to match.
pub trait VideoSink {
    fn append(&mut self, frame: &CapturedFrame) -> Result<(), RecorderError>;

    /// Flush and close the output file, returning the total frames written.
    fn finish(self) -> Result<u64, RecorderError>
    where
        Self: Sized;
}

/// Continuous video recorder backed by an ffmpeg subprocess.
///
/// Frames go in as JPEG over stdin (`image2pipe`) and come out as an
/// MJPEG-in-AVI file at the declared frame rate.
pub struct FfmpegRecorder {
    child: Child,
    stdin: ChildStdin,
    output_path: PathBuf,
    jpeg_quality: u8,
    frame_count: u64,
}

impl FfmpegRecorder {
    /// Spawn the ffmpeg subprocess ready to receive JPEG frames on stdin.
    pub fn start(settings: &RecorderSettings) -> Result<Self, RecorderError> {
        let fps = settings.fps.to_string();

        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-loglevel", "error",
            "-nostats",
            "-f", "image2pipe",
            "-vcodec", "mjpeg",
            "-r", &fps,
            "-i", "pipe:0",
            "-c:v", "mjpeg",
            "-q:v", "3",
            "-r", &fps,
            "-y",
        ])
        .arg(&settings.output)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| RecorderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Spawn("could not get stdin handle".into()))?;

        debug!(
            fps = settings.fps,
            output = settings.output.display().to_string(),
            "ffmpeg recorder started"
        );

        Ok(Self {
            child,
            stdin,
            output_path: settings.output.clone(),
            jpeg_quality: settings.jpeg_quality,
            frame_count: 0,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl VideoSink for FfmpegRecorder {
    /// Re-materialize the frame from its raw buffer and pipe it to ffmpeg.
    fn append(&mut self, frame: &CapturedFrame) -> Result<(), RecorderError> {
        let jpeg = frame.encode_jpeg(self.jpeg_quality)?;
        self.stdin
            .write_all(&jpeg)
            .map_err(|e| RecorderError::Write(e.to_string()))?;
        self.frame_count += 1;
        debug!(
            frame_count = self.frame_count,
            seq = frame.seq,
            "appended frame to video file"
        );
        Ok(())
    }

    /// Close stdin so ffmpeg flushes the container, then reap the child.
    fn finish(self) -> Result<u64, RecorderError> {
        let FfmpegRecorder {
            child,
            stdin,
            output_path,
            frame_count,
            ..
        } = self;
        drop(stdin);

        let output = child
            .wait_with_output()
            .map_err(|e| RecorderError::Wait(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "ffmpeg exited with error");
            return Err(RecorderError::FfmpegFailed(stderr.into_owned()));
        }

        info!(
            frames = frame_count,
            path = output_path.display().to_string(),
            "video file finalized"
        );
        Ok(frame_count)
    }
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub fn check_ffmpeg_available() {
    match Command::new("ffmpeg").arg("-version").output() {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; recording may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; video recording will fail at startup"
            );
        }
    }
}
