//! Owns every feed and its capture task

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::capture::{CaptureBackend, FrameEncoder, JpegEncoder};
use crate::pipeline::{CaptureLoop, Feed, FeedState};
use crate::stats::FeedStats;
use crate::stream::StreamBroadcaster;
use crate::{Config, SupervisorError};

/// Response of the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub feed: String,
}

/// What the HTTP layer needs for one feed
#[derive(Clone)]
pub struct FeedHandle {
    feed: Arc<Feed>,
    poll_interval: Duration,
}

impl FeedHandle {
    pub fn name(&self) -> &str {
        self.feed.name()
    }

    pub fn feed(&self) -> &Arc<Feed> {
        &self.feed
    }

    /// A fresh broadcast sequence for a new viewer.
    pub fn viewer(&self) -> StreamBroadcaster {
        StreamBroadcaster::connect(&self.feed, self.poll_interval)
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats::snapshot(&self.feed)
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            feed: self.feed.name().to_string(),
        }
    }
}

/// One independent capture pipeline per configured feed.
///
/// Feeds share nothing: a sensor that fails to open degrades only its own
/// feed. Build it once at startup and hand it to whatever serves the
/// endpoints.
pub struct FeedSupervisor {
    order: Vec<String>,
    feeds: HashMap<String, FeedHandle>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl FeedSupervisor {
    /// Start every feed with the JPEG encoder. Must be called inside a
    /// tokio runtime.
    pub fn start(config: &Config, backend: Arc<dyn CaptureBackend>) -> Self {
        Self::start_with_encoder(config, backend, Arc::new(JpegEncoder))
    }

    pub fn start_with_encoder(
        config: &Config,
        backend: Arc<dyn CaptureBackend>,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Self {
        let resolution = config.capture.resolution();
        let mut order = Vec::with_capacity(config.feeds.len());
        let mut feeds = HashMap::with_capacity(config.feeds.len());
        let mut tasks = HashMap::with_capacity(config.feeds.len());

        for feed_config in &config.feeds {
            let feed = Arc::new(Feed::new(feed_config, resolution, &config.stream));
            let task = CaptureLoop::new(
                feed.clone(),
                backend.clone(),
                encoder.clone(),
                config.stream.error_backoff(),
            )
            .spawn();
            info!(
                "Feed '{}' starting on sensor {} via {} backend",
                feed.name(),
                feed.sensor_index(),
                backend.name()
            );

            order.push(feed_config.name.clone());
            tasks.insert(feed_config.name.clone(), task);
            feeds.insert(
                feed_config.name.clone(),
                FeedHandle {
                    feed,
                    poll_interval: config.stream.poll_interval(),
                },
            );
        }

        Self {
            order,
            feeds,
            tasks: Mutex::new(tasks),
        }
    }

    /// Feed names in configuration order
    pub fn feed_names(&self) -> &[String] {
        &self.order
    }

    pub fn feed(&self, name: &str) -> Result<&FeedHandle, SupervisorError> {
        self.feeds
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownFeed(name.to_string()))
    }

    pub fn handles(&self) -> impl Iterator<Item = &FeedHandle> {
        self.order.iter().filter_map(|name| self.feeds.get(name))
    }

    pub fn viewer(&self, name: &str) -> Result<StreamBroadcaster, SupervisorError> {
        Ok(self.feed(name)?.viewer())
    }

    pub fn stats(&self, name: &str) -> Result<FeedStats, SupervisorError> {
        Ok(self.feed(name)?.stats())
    }

    pub fn health(&self, name: &str) -> Result<Health, SupervisorError> {
        Ok(self.feed(name)?.health())
    }

    pub fn all_stats(&self) -> Vec<FeedStats> {
        self.handles().map(FeedHandle::stats).collect()
    }

    /// Stop one feed and wait for its sensor to be released.
    pub async fn stop_feed(&self, name: &str) -> Result<(), SupervisorError> {
        let handle = self.feed(name)?;
        handle.feed.request_stop();

        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!("Capture task for '{}' ended abnormally: {}", name, err);
                handle.feed.set_running(false);
                handle.feed.set_has_capability(false);
                handle.feed.set_state(FeedState::Stopped);
            }
        }
        Ok(())
    }

    /// Stop every feed. Open viewer streams end once their feed is stopped.
    pub async fn shutdown(&self) {
        info!("Shutting down {} feeds", self.order.len());
        for handle in self.handles() {
            handle.feed.request_stop();
        }
        for name in &self.order {
            // Only unknown names error, and every name here is known
            let _ = self.stop_feed(name).await;
        }
        info!("Shutdown complete");
    }
}

impl Drop for FeedSupervisor {
    fn drop(&mut self) {
        for handle in self.feeds.values() {
            handle.feed.request_stop();
        }
    }
}
