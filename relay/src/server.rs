use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::stream::MjpegPublisher;

pub struct AppState {
    pub publisher: MjpegPublisher,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(stream_feed)).with_state(state)
}

/// GET / attaches the connection to the live MJPEG feed until the client
/// disconnects.
async fn stream_feed(State(state): State<Arc<AppState>>) -> Response {
    info!(
        viewers = state.publisher.viewer_count() + 1,
        "viewer connected to MJPEG feed"
    );
    state.publisher.subscribe().into_response()
}
