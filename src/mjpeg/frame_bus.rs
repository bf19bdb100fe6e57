//! Per-camera frame fan-out
//!
//! ## Responsibilities
//!
//! - Decouple the single capture loop from N HTTP stream connections
//! - Bounded per-subscriber buffering with drop-oldest semantics: a
//!   slow consumer skips to the newest frames and never stalls the
//!   producer or its siblings
//! - Multipart chunk framing and the shared placeholder frame

use bytes::{BufMut, Bytes, BytesMut};
use opencv::core::{Mat, Point, Scalar, Vector};
use opencv::prelude::VectorToVec;
use opencv::{imgcodecs, imgproc};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::Result;

/// Frames buffered per subscriber before the oldest is dropped.
pub const FRAME_QUEUE_DEPTH: usize = 2;

/// How long a consumer waits for a fresh frame before substituting the
/// placeholder.
pub const FRAME_WAIT: Duration = Duration::from_secs(1);

pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Single-producer multi-consumer frame channel for one camera.
///
/// Each subscriber owns an independent cursor over a ring of
/// [`FRAME_QUEUE_DEPTH`] frames; overflow discards the subscriber's
/// oldest pending frame, not the producer's new one.
pub struct FrameBus {
    tx: broadcast::Sender<Bytes>,
}

impl FrameBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FRAME_QUEUE_DEPTH);
        Self { tx }
    }

    /// Non-blocking publish. Returns the number of live subscribers the
    /// frame was offered to.
    pub fn publish(&self, frame: Bytes) -> usize {
        // send only fails when no receiver exists, which is fine: the
        // capture loop keeps running for future subscribers.
        self.tx.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame one JPEG as a multipart part with boundary `frame`.
pub fn format_mjpeg_chunk(frame: &[u8]) -> Bytes {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut chunk = BytesMut::with_capacity(header.len() + frame.len() + 2);
    chunk.put_slice(header.as_bytes());
    chunk.put_slice(frame);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// Render the shared "no signal" placeholder JPEG shown to subscribers
/// while no live frame is available.
pub fn render_placeholder(width: i32, height: i32, text: &str) -> Result<Bytes> {
    let mut frame = Mat::new_rows_cols_with_default(
        height,
        width,
        opencv::core::CV_8UC3,
        Scalar::new(24.0, 24.0, 24.0, 0.0),
    )?;

    let font = imgproc::FONT_HERSHEY_SIMPLEX;
    let scale = 1.0;
    let thickness = 2;
    let mut baseline = 0;
    let size = imgproc::get_text_size(text, font, scale, thickness, &mut baseline)?;
    let origin = Point::new((width - size.width) / 2, (height + size.height) / 2);
    imgproc::put_text(
        &mut frame,
        text,
        origin,
        font,
        scale,
        Scalar::new(200.0, 200.0, 200.0, 0.0),
        thickness,
        imgproc::LINE_AA,
        false,
    )?;

    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".jpg", &frame, &mut buf, &Vector::<i32>::new())?;
    Ok(Bytes::from(buf.to_vec()))
}

/// Lazy multipart chunk sequence for one subscription.
///
/// Waits up to [`FRAME_WAIT`] per frame; on timeout the placeholder is
/// substituted so the connection stays alive and visibly signals "no
/// data". A lagged cursor skips straight to the newest frame. The
/// sequence ends only if the bus itself is torn down.
pub fn frame_generator(
    rx: broadcast::Receiver<Bytes>,
    placeholder: Bytes,
) -> impl futures::Stream<Item = std::result::Result<Bytes, Infallible>> {
    futures::stream::unfold(
        (rx, placeholder, false),
        |(mut rx, placeholder, ended)| async move {
            if ended {
                return None;
            }
            loop {
                match tokio::time::timeout(FRAME_WAIT, rx.recv()).await {
                    Ok(Ok(frame)) => {
                        return Some((Ok(format_mjpeg_chunk(&frame)), (rx, placeholder, false)));
                    }
                    Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                    Ok(Err(broadcast::error::RecvError::Closed)) => {
                        let chunk = format_mjpeg_chunk(&placeholder);
                        return Some((Ok(chunk), (rx, placeholder, true)));
                    }
                    Err(_) => {
                        let chunk = format_mjpeg_chunk(&placeholder);
                        return Some((Ok(chunk), (rx, placeholder, false)));
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_chunk_framing() {
        let chunk = format_mjpeg_chunk(b"\xff\xd8jpeg\xff\xd9");
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\n"));
        assert!(chunk.ends_with(b"\r\n"));
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest_frames() {
        let bus = FrameBus::new();
        let mut rx = bus.subscribe();
        for i in 1u8..=5 {
            bus.publish(Bytes::from(vec![i]));
        }
        // Cursor lagged past frames 1-3; recv reports the skip, then
        // yields the two newest.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from(vec![4u8]));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from(vec![5u8]));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = FrameBus::new();
        for _ in 0..100 {
            assert_eq!(bus.publish(Bytes::from_static(b"frame")), 0);
        }
    }

    #[tokio::test]
    async fn test_generator_yields_live_frames_in_order() {
        let bus = FrameBus::new();
        let rx = bus.subscribe();
        bus.publish(Bytes::from_static(b"one"));
        bus.publish(Bytes::from_static(b"two"));
        let mut stream = Box::pin(frame_generator(rx, Bytes::from_static(b"ph")));
        let first = stream.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains("Content-Length: 3"));
        assert!(first.ends_with(b"one\r\n"));
        let second = stream.next().await.unwrap().unwrap();
        assert!(second.ends_with(b"two\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_substitutes_placeholder_on_timeout() {
        let bus = FrameBus::new();
        let rx = bus.subscribe();
        let mut stream = Box::pin(frame_generator(rx, Bytes::from_static(b"placeholder")));
        let chunk = stream.next().await.unwrap().unwrap();
        assert!(chunk.ends_with(b"placeholder\r\n"));
    }

    #[test]
    fn test_placeholder_is_jpeg() {
        let jpeg = render_placeholder(640, 480, "NO SIGNAL").unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }
}
