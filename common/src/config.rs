use std::path::PathBuf;

/// Fixed runtime settings.
///
/// Everything here is applied at open time and never changes for the life of
/// the process. The CLI only takes the device index and the listen address;
/// none of these values are exposed as options.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub recorder: RecorderSettings,
    pub stream: StreamSettings,
    pub motion: MotionSettings,
}

/// Device configuration applied when the camera is opened.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 15,
        }
    }
}

/// Output video file parameters. The codec and frame rate are declared once
/// at open time; every appended frame must match them.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub output: PathBuf,
    pub fps: u32,
    /// JPEG quality used when feeding frames to the encoder.
    pub jpeg_quality: u8,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            output: PathBuf::from("out.avi"),
            fps: 15,
            jpeg_quality: 90,
        }
    }
}

/// MJPEG publishing parameters.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// JPEG quality of the frames pushed to viewers.
    pub jpeg_quality: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

/// Motion-diagnostic parameters.
#[derive(Debug, Clone)]
pub struct MotionSettings {
    /// Directory the one-shot diagnostic images are written to.
    pub out_dir: PathBuf,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_defaults_match_device_contract() {
        let s = CaptureSettings::default();
        assert_eq!((s.width, s.height, s.fps), (1280, 720, 15));
    }

    #[test]
    fn recorder_defaults() {
        let s = RecorderSettings::default();
        assert_eq!(s.output, PathBuf::from("out.avi"));
        assert_eq!(s.fps, 15);
    }
}
