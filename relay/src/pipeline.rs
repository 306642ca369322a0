use bytes::Bytes;
use cam_relay_common::frame::CapturedFrame;
use tracing::{error, info, warn};

use crate::capture::{CaptureSource, ReadOutcome};
use crate::motion::{self, MotionDetector};
use crate::recorder::VideoSink;
use crate::stream::MjpegPublisher;

/// What the loop did before the device went away, for the final log line.
pub struct PipelineSummary {
    pub iterations: u64,
    pub frames_recorded: u64,
}

/// The single-producer capture loop: pull, transform, record, publish.
///
/// Generic over the capture source and the video sink so the loop itself can
/// be exercised with fakes. Runs on a blocking task; everything it touches
/// per iteration is synchronous.
pub struct CapturePipeline<S, V> {
    source: S,
    sink: V,
    detector: MotionDetector,
    publisher: MjpegPublisher,
    jpeg_quality: u8,
    iteration: u64,
}

impl<S: CaptureSource, V: VideoSink> CapturePipeline<S, V> {
    pub fn new(
        source: S,
        sink: V,
        detector: MotionDetector,
        publisher: MjpegPublisher,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            source,
            sink,
            detector,
            publisher,
            jpeg_quality,
            iteration: 0,
        }
    }

    /// Run until the device reports a fatal failure.
    ///
    /// A read error ends this loop only: the sink is finalized and the
    /// degraded state logged, while the HTTP server and any connected viewers
    /// stay up without further frame updates.
    pub fn run(mut self) -> PipelineSummary {
        loop {
            self.iteration += 1;
            match self.source.read() {
                Err(e) => {
                    error!(
                        error = %e,
                        iteration = self.iteration,
                        "cannot read from capture device, stopping capture"
                    );
                    break;
                }
                Ok(ReadOutcome::Empty) => continue,
                Ok(ReadOutcome::Frame(frame)) => self.process(&frame),
            }
        }

        let iterations = self.iteration;
        let frames_recorded = match self.sink.finish() {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to finalize video file");
                0
            }
        };
        info!(
            iterations,
            frames_recorded,
            "capture stopped; open viewer connections remain but receive no further frames"
        );
        PipelineSummary {
            iterations,
            frames_recorded,
        }
    }

    fn process(&mut self, frame: &CapturedFrame) {
        let rgb = match frame.to_rgb_image() {
            Ok(img) => img,
            Err(e) => {
                warn!(error = %e, seq = frame.seq, "skipping frame with inconsistent buffer");
                return;
            }
        };

        let blurred = motion::stabilize(&rgb);
        if let Err(e) = self.detector.observe(self.iteration, &blurred) {
            error!(error = %e, "motion diagnostic failed");
        }

        if let Err(e) = self.sink.append(frame) {
            error!(error = %e, seq = frame.seq, "failed to append frame to video file");
        }

        match frame.encode_jpeg(self.jpeg_quality) {
            Ok(jpeg) => self.publisher.publish(Bytes::from(jpeg)),
            Err(e) => {
                warn!(error = %e, seq = frame.seq, "failed to encode frame for streaming");
            }
        }
    }
}
