//! Point-in-time feed statistics

use std::time::Instant;

use serde::Serialize;

use crate::pipeline::{Feed, FeedState};

/// Snapshot served by the stats endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStats {
    pub name: String,
    pub client_count: usize,
    pub current_rate: u32,
    pub target_fps: u32,
    pub actual_fps: f64,
    pub frame_count: u64,
    pub running: bool,
    pub has_capability: bool,
    pub state: FeedState,
    /// Seconds since the feed was created
    pub uptime_secs: f64,
}

impl FeedStats {
    pub fn snapshot(feed: &Feed) -> Self {
        Self::at(feed, Instant::now())
    }

    /// Stats as of `now`. Reads counters only, no side effects.
    pub fn at(feed: &Feed, now: Instant) -> Self {
        let elapsed = now.saturating_duration_since(feed.started_at()).as_secs_f64();
        let frame_count = feed.frame_count();

        Self {
            name: feed.name().to_string(),
            client_count: feed.client_count(),
            current_rate: feed.current_rate(),
            target_fps: feed.governor().target_fps(),
            actual_fps: actual_fps(frame_count, elapsed),
            frame_count,
            running: feed.is_running(),
            has_capability: feed.has_capability(),
            state: feed.state(),
            uptime_secs: elapsed,
        }
    }
}

fn actual_fps(frames: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    (frames as f64 / elapsed_secs * 100.0).round() / 100.0
}
