//! Per-viewer MJPEG broadcast
//!
//! Each viewer gets its own [`StreamBroadcaster`] polling the feed's frame
//! cache. Viewers are independent: no shared queue, no missed-frame
//! tracking, a slow viewer simply sees fewer frames.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use tokio::sync::watch;

use crate::pipeline::{ClientGuard, Feed, FeedState};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Wrap one encoded frame as a multipart part.
pub fn multipart_part(frame: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: {PART_CONTENT_TYPE}\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(frame);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// One viewer's sequence of frames.
///
/// Holds the viewer's [`ClientGuard`]: when the transport drops the stream
/// (the viewer went away or a write failed) the client count goes back down.
/// The sequence ends by itself once the feed is stopped; a degraded feed
/// keeps repeating its placeholder.
pub struct StreamBroadcaster {
    client: ClientGuard,
    state: watch::Receiver<FeedState>,
    poll_interval: Duration,
    emitted: u64,
}

impl StreamBroadcaster {
    pub fn connect(feed: &Arc<Feed>, poll_interval: Duration) -> Self {
        Self {
            client: feed.connect_client(),
            state: feed.watch_state(),
            poll_interval,
            emitted: 0,
        }
    }

    pub fn feed(&self) -> &Arc<Feed> {
        self.client.feed()
    }

    /// Parts emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Wait for and return the next part, `None` once the feed has stopped.
    ///
    /// After the first part, waits one interval at the feed's current rate,
    /// read fresh on every call.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        let feed = self.client.feed().clone();

        if self.emitted > 0 && self.pause(feed.governor().interval()).await {
            return None;
        }

        loop {
            if self.state.borrow().is_stopped() {
                return None;
            }
            if let Some(frame) = feed.cache().read() {
                self.emitted += 1;
                return Some(multipart_part(&frame.data));
            }
            if self.pause(self.poll_interval).await {
                return None;
            }
        }
    }

    /// Body stream for the HTTP layer.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures::stream::unfold(self, |mut broadcaster| async move {
            let part = broadcaster.next_part().await?;
            Some((Ok(part), broadcaster))
        })
    }

    /// Returns true if the feed stopped while waiting.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.state.borrow().is_stopped(),
            _ = async { let _ = self.state.wait_for(FeedState::is_stopped).await; } => true,
        }
    }
}
