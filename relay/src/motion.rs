use std::path::{Path, PathBuf};

use image::imageops;
use image::{GrayImage, Luma, RgbImage};
use tracing::{info, warn};

/// Iteration at which the one-shot diagnostic fires. Inherited from the
/// program this replaces; the value is a debug artifact, not meaningful.
pub const SNAPSHOT_ITERATION: u64 = 25;
/// Binary threshold applied to the absolute-difference image.
pub const DIFF_THRESHOLD: u8 = 100;
/// Gaussian blur sigma applied to grayscale frames before differencing.
pub const BLUR_SIGMA: f32 = 40.0;
/// Number of 3x3 dilation passes applied to the thresholded image.
pub const DILATE_PASSES: u32 = 2;

/// Grayscale + Gaussian blur, the fixed per-frame transform. The blurred
/// output is what the motion diagnostic compares against.
pub fn stabilize(rgb: &RgbImage) -> GrayImage {
    imageops::blur(&imageops::grayscale(rgb), BLUR_SIGMA)
}

/// Per-pixel absolute difference. Both images must share dimensions.
pub fn absolute_difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let (w, h) = a.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        Luma([a.get_pixel(x, y).0[0].abs_diff(b.get_pixel(x, y).0[0])])
    })
}

/// Pixels strictly above `threshold` become 255, everything else 0.
pub fn threshold_binary(src: &GrayImage, threshold: u8) -> GrayImage {
    let (w, h) = src.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        Luma([if src.get_pixel(x, y).0[0] > threshold {
            255
        } else {
            0
        }])
    })
}

/// One pass of morphological dilation over a 3x3 neighborhood.
pub fn dilate3x3(src: &GrayImage) -> GrayImage {
    let (w, h) = src.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let mut max = 0u8;
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if nx >= 0 && ny >= 0 && (nx as u32) < w && (ny as u32) < h {
                    max = max.max(src.get_pixel(nx as u32, ny as u32).0[0]);
                }
            }
        }
        Luma([max])
    })
}

#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("failed to write diagnostic image {path}: {source}")]
    Write {
        path: String,
        source: image::ImageError,
    },
}

/// Holds the reference frame and runs the one-shot motion diagnostic.
///
/// The reference is the blurred grayscale of the first frame fed in, stored
/// exactly once and never overwritten. The diagnostic (diff, threshold, two
/// dilation passes, five image files) runs on the first frame at or past
/// `SNAPSHOT_ITERATION`, exactly once per process lifetime.
pub struct MotionDetector {
    reference: Option<GrayImage>,
    snapshot_done: bool,
    out_dir: PathBuf,
}

impl MotionDetector {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            reference: None,
            snapshot_done: false,
            out_dir,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn snapshot_done(&self) -> bool {
        self.snapshot_done
    }

    #[cfg(test)]
    pub(crate) fn reference(&self) -> Option<&GrayImage> {
        self.reference.as_ref()
    }

    /// Feed one blurred grayscale frame.
    pub fn observe(&mut self, iteration: u64, blurred: &GrayImage) -> Result<(), MotionError> {
        if self.reference.is_none() {
            self.reference = Some(blurred.clone());
            info!(iteration, "reference frame captured");
            return Ok(());
        }
        if self.snapshot_done || iteration < SNAPSHOT_ITERATION {
            return Ok(());
        }
        // Marked done up front: the diagnostic runs once, a failed write does
        // not re-arm it.
        self.snapshot_done = true;

        let Some(reference) = self.reference.as_ref() else {
            return Ok(());
        };
        if reference.dimensions() != blurred.dimensions() {
            warn!(
                iteration,
                "frame dimensions changed since the reference was captured, skipping diagnostic"
            );
            return Ok(());
        }

        let diff = absolute_difference(reference, blurred);
        let thresh = threshold_binary(&diff, DIFF_THRESHOLD);
        let mut dilated = thresh.clone();
        for _ in 0..DILATE_PASSES {
            dilated = dilate3x3(&dilated);
        }

        info!(iteration, out_dir = %self.out_dir.display(), "writing motion diagnostic images");
        save(&self.out_dir, "first.jpg", reference)?;
        save(&self.out_dir, "next.jpg", blurred)?;
        save(&self.out_dir, "diff.jpg", &diff)?;
        save(&self.out_dir, "thresh.jpg", &thresh)?;
        save(&self.out_dir, "dilated.jpg", &dilated)?;
        Ok(())
    }
}

fn save(dir: &Path, name: &str, img: &GrayImage) -> Result<(), MotionError> {
    let path = dir.join(name);
    img.save(&path).map_err(|source| MotionError::Write {
        path: path.display().to_string(),
        source,
    })
}
