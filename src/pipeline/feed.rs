//! Shared per-feed context

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use super::cache::FrameCache;
use super::governor::RateGovernor;
use crate::capture::Resolution;
use crate::{FeedConfig, StreamConfig};

/// Capture loop lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Initializing,
    Streaming,
    Degraded,
    Stopped,
}

impl FeedState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, FeedState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedState::Initializing => "initializing",
            FeedState::Streaming => "streaming",
            FeedState::Degraded => "degraded",
            FeedState::Stopped => "stopped",
        }
    }
}

/// Everything one feed shares between its capture loop, its viewers and
/// stats requests. The capture loop is the only writer of the cache, the
/// governor and the frame counter.
pub struct Feed {
    name: String,
    sensor_index: u32,
    resolution: Resolution,
    quality: u8,
    placeholder_quality: u8,
    pub(crate) cache: FrameCache,
    pub(crate) governor: RateGovernor,
    /// Last rate pushed to the rate gauge, 0 before the first report
    reported_rate: AtomicU32,
    clients: AtomicUsize,
    frames: AtomicU64,
    running: AtomicBool,
    has_capability: AtomicBool,
    started_at: Instant,
    state: watch::Sender<FeedState>,
    stop: watch::Sender<bool>,
}

impl Feed {
    pub fn new(feed: &FeedConfig, resolution: Resolution, stream: &StreamConfig) -> Self {
        let governor = RateGovernor::new(stream.target_fps, stream.min_fps)
            .with_recovery(stream.rate_recovery_cycles);

        Self {
            name: feed.name.clone(),
            sensor_index: feed.sensor_index,
            resolution,
            quality: stream.quality,
            placeholder_quality: stream.placeholder_quality,
            cache: FrameCache::new(),
            governor,
            reported_rate: AtomicU32::new(0),
            clients: AtomicUsize::new(0),
            frames: AtomicU64::new(0),
            running: AtomicBool::new(false),
            has_capability: AtomicBool::new(false),
            started_at: Instant::now(),
            state: watch::channel(FeedState::Initializing).0,
            stop: watch::channel(false).0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sensor_index(&self) -> u32 {
        self.sensor_index
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn placeholder_quality(&self) -> u8 {
        self.placeholder_quality
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn current_rate(&self) -> u32 {
        self.governor.current_rate()
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn has_capability(&self) -> bool {
        self.has_capability.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.cache.last_published_at()
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Ask the capture loop to stop. Idempotent.
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Register a viewer; the count drops again when the guard is dropped.
    pub fn connect_client(self: &Arc<Self>) -> ClientGuard {
        let total = self.clients.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("tricam_viewers", "feed" => self.name.clone()).set(total as f64);
        info!(feed = %self.name, total, "Client connected");
        ClientGuard { feed: self.clone() }
    }

    pub(crate) fn set_state(&self, state: FeedState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(feed = %self.name, from = previous.as_str(), to = state.as_str(), "Feed state changed");
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn set_has_capability(&self, present: bool) {
        self.has_capability.store(present, Ordering::Release);
    }

    /// Update the rate gauge if the governor moved since the last report.
    /// Returns the new rate when it did.
    pub(crate) fn report_rate(&self) -> Option<u32> {
        let rate = self.governor.current_rate();
        if self.reported_rate.swap(rate, Ordering::AcqRel) == rate {
            return None;
        }
        metrics::gauge!("tricam_capture_rate", "feed" => self.name.clone()).set(rate as f64);
        Some(rate)
    }

    pub(crate) fn record_frame(&self) -> u64 {
        metrics::counter!("tricam_frames_total", "feed" => self.name.clone()).increment(1);
        self.frames.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// One connected viewer. Dropping it is the only way to decrement the
/// client count, so the count can't go below zero.
pub struct ClientGuard {
    feed: Arc<Feed>,
}

impl ClientGuard {
    pub fn feed(&self) -> &Arc<Feed> {
        &self.feed
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let remaining = self.feed.clients.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::gauge!("tricam_viewers", "feed" => self.feed.name.clone()).set(remaining as f64);
        info!(feed = %self.feed.name, remaining, "Client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_feed() -> Arc<Feed> {
        Arc::new(Feed::new(
            &FeedConfig::new("left", 0, 8081),
            Resolution::new(16, 16),
            &StreamConfig::default(),
        ))
    }

    #[test]
    fn test_new_feed_is_initializing_and_idle() {
        let feed = test_feed();
        assert_eq!(feed.state(), FeedState::Initializing);
        assert_eq!(feed.current_rate(), 10);
        assert_eq!(feed.client_count(), 0);
        assert_eq!(feed.frame_count(), 0);
        assert!(!feed.is_running());
        assert!(!feed.has_capability());
        assert!(feed.last_frame_at().is_none());
    }

    #[test]
    fn test_client_count_tracks_guards() {
        let feed = test_feed();
        let guards: Vec<_> = (0..5).map(|_| feed.connect_client()).collect();
        assert_eq!(feed.client_count(), 5);

        let mut guards = guards.into_iter();
        drop(guards.next());
        drop(guards.next());
        assert_eq!(feed.client_count(), 3);

        drop(guards);
        assert_eq!(feed.client_count(), 0);
    }

    #[test]
    fn test_concurrent_connects_and_disconnects() {
        let feed = test_feed();
        let workers: Vec<_> = (0..16)
            .map(|i| {
                let feed = feed.clone();
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    for n in 0..200 {
                        held.push(feed.connect_client());
                        if n % 3 == 0 {
                            held.pop();
                        }
                    }
                    // Odd workers keep their viewers connected
                    if i % 2 == 1 {
                        std::mem::forget(held);
                        0
                    } else {
                        let kept = held.len();
                        drop(held);
                        kept
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        // 8 odd workers each leave 200 - 67 viewers connected
        assert_eq!(feed.client_count(), 8 * (200 - 67));
    }

    #[test]
    fn test_rate_reported_on_start_and_every_change() {
        let stream = StreamConfig {
            rate_recovery_cycles: Some(2),
            ..StreamConfig::default()
        };
        let feed = Feed::new(&FeedConfig::new("left", 0, 8081), Resolution::new(16, 16), &stream);

        assert_eq!(feed.report_rate(), Some(10));
        assert_eq!(feed.report_rate(), None);

        // Overrun drops the rate
        feed.governor.after_cycle(Duration::from_millis(150));
        assert_eq!(feed.report_rate(), Some(9));

        // Two fast cycles step it back up
        feed.governor.after_cycle(Duration::from_millis(10));
        assert_eq!(feed.report_rate(), None);
        feed.governor.after_cycle(Duration::from_millis(10));
        assert_eq!(feed.report_rate(), Some(10));
        assert_eq!(feed.report_rate(), None);
    }

    #[test]
    fn test_stop_request_is_observable() {
        let feed = test_feed();
        let signal = feed.stop_signal();
        assert!(!*signal.borrow());
        feed.request_stop();
        feed.request_stop();
        assert!(*signal.borrow());
    }
}
