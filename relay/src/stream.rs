use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use tokio::sync::watch;

/// Boundary separating MJPEG parts. Fixed for the life of the process and
/// unlikely to collide with JPEG data.
const BOUNDARY: &str = "cam_relay_frame_9a4f71c2";

/// Fan-out point between the capture loop and viewer connections.
///
/// Holds exactly the most recent encoded frame: publishing overwrites it,
/// subscribing starts from it. Nothing is ever queued, so a slow viewer
/// skips frames instead of lagging behind, and a dead viewer costs nothing
/// beyond its dropped receiver.
#[derive(Clone)]
pub struct MjpegPublisher {
    tx: Arc<watch::Sender<Option<Bytes>>>,
}

impl MjpegPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the latest frame. Never blocks on viewers.
    pub fn publish(&self, jpeg: Bytes) {
        self.tx.send_replace(Some(jpeg));
    }

    pub fn subscribe(&self) -> MjpegSubscriber {
        MjpegSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MjpegPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// One viewer's connection to the frame feed.
pub struct MjpegSubscriber {
    rx: watch::Receiver<Option<Bytes>>,
}

impl MjpegSubscriber {
    /// Multipart-delimited chunks, one per delivered frame: the latest
    /// published frame immediately on connect, then each newest frame as it
    /// changes, until the publisher goes away.
    pub fn into_chunk_stream(self) -> impl Stream<Item = Bytes> {
        stream::unfold((self.rx, true), |(mut rx, first)| async move {
            if first {
                let latest = rx.borrow_and_update().clone();
                if let Some(jpeg) = latest {
                    return Some((multipart_chunk(&jpeg), (rx, false)));
                }
            }
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let latest = rx.borrow_and_update().clone();
                if let Some(jpeg) = latest {
                    return Some((multipart_chunk(&jpeg), (rx, false)));
                }
            }
        })
    }

    /// Build the streaming HTTP response browsers render as live video.
    pub fn into_response(self) -> Response {
        let body = Body::from_stream(self.into_chunk_stream().map(Ok::<_, Infallible>));

        Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            )
            .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(header::PRAGMA, "no-cache")
            .body(body)
            .expect("static MJPEG response headers are valid")
    }
}

/// Frame a JPEG payload as one multipart part: boundary, part headers, data.
fn multipart_chunk(jpeg: &Bytes) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n",
        len = jpeg.len()
    );
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_chunk(stream: &mut (impl Stream<Item = Bytes> + Unpin)) -> Option<Bytes> {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out waiting for a chunk")
    }

    fn carries(chunk: &Bytes, payload: &[u8]) -> bool {
        chunk.ends_with(&[payload, b"\r\n"].concat())
    }

    #[test]
    fn multipart_chunk_layout_is_exact() {
        let chunk = multipart_chunk(&Bytes::from_static(b"JPEG"));
        let expected = format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
        assert_eq!(&chunk[..], expected.as_bytes());
    }

    #[tokio::test]
    async fn new_subscriber_receives_latest_frame_first() {
        let publisher = MjpegPublisher::new();
        publisher.publish(Bytes::from_static(b"frame-A"));
        publisher.publish(Bytes::from_static(b"frame-B"));

        let mut stream = Box::pin(publisher.subscribe().into_chunk_stream());
        let first = next_chunk(&mut stream).await.unwrap();
        assert!(carries(&first, b"frame-B"), "got an older frame than the latest");
    }

    #[tokio::test]
    async fn slow_viewer_skips_frames_but_keeps_order() {
        let publisher = MjpegPublisher::new();
        publisher.publish(Bytes::from_static(b"frame-1"));

        let mut stream = Box::pin(publisher.subscribe().into_chunk_stream());
        assert!(carries(&next_chunk(&mut stream).await.unwrap(), b"frame-1"));

        // Two publishes before the viewer polls again: only the newest is seen.
        publisher.publish(Bytes::from_static(b"frame-2"));
        publisher.publish(Bytes::from_static(b"frame-3"));
        assert!(carries(&next_chunk(&mut stream).await.unwrap(), b"frame-3"));
    }

    #[tokio::test]
    async fn subscriber_connected_before_first_frame_gets_it_on_publish() {
        let publisher = MjpegPublisher::new();
        let mut stream = Box::pin(publisher.subscribe().into_chunk_stream());

        publisher.publish(Bytes::from_static(b"frame-1"));
        assert!(carries(&next_chunk(&mut stream).await.unwrap(), b"frame-1"));
    }

    #[tokio::test]
    async fn publish_without_viewers_is_a_no_op() {
        let publisher = MjpegPublisher::new();
        assert_eq!(publisher.viewer_count(), 0);
        publisher.publish(Bytes::from_static(b"frame-1"));
    }

    #[tokio::test]
    async fn viewer_count_tracks_subscriptions() {
        let publisher = MjpegPublisher::new();
        let sub1 = publisher.subscribe();
        let sub2 = publisher.subscribe();
        assert_eq!(publisher.viewer_count(), 2);
        drop(sub1);
        drop(sub2);
        assert_eq!(publisher.viewer_count(), 0);
    }

    #[tokio::test]
    async fn viewer_receives_distinct_frames_in_publish_order() {
        let publisher = MjpegPublisher::new();
        let mut stream = Box::pin(publisher.subscribe().into_chunk_stream());

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Ok(Some(chunk)) = timeout(Duration::from_millis(200), stream.next()).await {
                seen.push(chunk);
            }
            seen
        });

        for i in 1..=10u8 {
            publisher.publish(Bytes::from(vec![i; 4]));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(publisher);

        let seen = consumer.await.unwrap();
        assert!(!seen.is_empty() && seen.len() <= 10);
        // Payloads are [i; 4] followed by CRLF, so the frame id sits at len-3.
        let ids: Vec<u8> = seen.iter().map(|c| c[c.len() - 3]).collect();
        assert!(
            ids.windows(2).all(|w| w[0] < w[1]),
            "frames repeated or out of order: {ids:?}"
        );
    }

    #[tokio::test]
    async fn response_declares_the_multipart_content_type() {
        let publisher = MjpegPublisher::new();
        let resp = publisher.subscribe().into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(
            content_type,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
        );
    }

    #[tokio::test]
    async fn stream_ends_when_publisher_is_dropped() {
        let publisher = MjpegPublisher::new();
        publisher.publish(Bytes::from_static(b"frame-1"));

        let mut stream = Box::pin(publisher.subscribe().into_chunk_stream());
        assert!(next_chunk(&mut stream).await.is_some());

        drop(publisher);
        assert!(next_chunk(&mut stream).await.is_none());
    }
}
