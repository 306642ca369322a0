mod capture;
mod motion;
mod pipeline;
mod recorder;
mod server;
mod stream;

use std::sync::Arc;

use cam_relay_common::config::Settings;
use tracing::{error, info};

use capture::NokhwaSource;
use motion::MotionDetector;
use pipeline::CapturePipeline;
use recorder::FfmpegRecorder;
use server::AppState;
use stream::MjpegPublisher;

const USAGE: &str = "How to run:\n\tcam-relay [camera ID] [host:port]";

enum ParsedArgs {
    Run {
        device_index: u32,
        listen_addr: String,
    },
    Usage,
}

/// Two required positional arguments: camera device index and listen address.
/// Missing arguments are a usage request, not an error.
fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<ParsedArgs, String> {
    let (Some(device), Some(listen_addr)) = (argv.next(), argv.next()) else {
        return Ok(ParsedArgs::Usage);
    };
    let device_index: u32 = device
        .parse()
        .map_err(|_| format!("camera ID must be an integer, got {device:?}"))?;
    Ok(ParsedArgs::Run {
        device_index,
        listen_addr,
    })
}

#[tokio::main]
async fn main() {
    let (device_index, listen_addr) = match parse_args(std::env::args().skip(1)) {
        Ok(ParsedArgs::Run {
            device_index,
            listen_addr,
        }) => (device_index, listen_addr),
        Ok(ParsedArgs::Usage) => {
            println!("{USAGE}");
            return;
        }
        Err(msg) => {
            eprintln!("{msg}\n{USAGE}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::default();
    info!(
        device = device_index,
        addr = listen_addr,
        width = settings.capture.width,
        height = settings.capture.height,
        fps = settings.capture.fps,
        "starting cam-relay"
    );

    recorder::check_ffmpeg_available();

    let publisher = MjpegPublisher::new();

    // The camera handle is not portable across threads, so the device and
    // the recorder are both opened inside the blocking capture task; startup
    // failures are reported back before the server binds.
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<(), String>>();
    let capture_settings = settings.capture.clone();
    let recorder_settings = settings.recorder.clone();
    let motion_out_dir = settings.motion.out_dir.clone();
    let jpeg_quality = settings.stream.jpeg_quality;
    let loop_publisher = publisher.clone();

    let capture_task = tokio::task::spawn_blocking(move || {
        let source = match NokhwaSource::open(device_index, &capture_settings) {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("failed to open capture device: {e}")));
                return None;
            }
        };
        let sink = match FfmpegRecorder::start(&recorder_settings) {
            Ok(r) => r,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("failed to open video output file: {e}")));
                return None;
            }
        };
        let _ = ready_tx.send(Ok(()));

        let detector = MotionDetector::new(motion_out_dir);
        let pipeline =
            CapturePipeline::new(source, sink, detector, loop_publisher, jpeg_quality);
        Some(pipeline.run())
    });

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(msg)) => {
            error!(error = %msg, "startup failed");
            std::process::exit(1);
        }
        Err(_) => {
            error!("capture task exited before startup completed");
            std::process::exit(1);
        }
    }

    tokio::spawn(async move {
        match capture_task.await {
            Ok(Some(summary)) => info!(
                iterations = summary.iterations,
                frames = summary.frames_recorded,
                "capture task finished; the HTTP server keeps serving without new frames"
            ),
            Ok(None) => {}
            Err(e) => error!(error = %e, "capture task panicked"),
        }
    });

    let state = Arc::new(AppState { publisher });
    let app = server::router(state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = listen_addr, "failed to bind listen address");
            std::process::exit(1);
        }
    };

    info!("capturing; point your browser at http://{listen_addr}");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server failed");
        std::process::exit(1);
    }
}
