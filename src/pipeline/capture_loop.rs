//! Per-feed capture/encode/publish loop

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::feed::{Feed, FeedState};
use super::governor::Pace;
use crate::capture::placeholder::placeholder_frame;
use crate::capture::{Capability, CapabilityGuard, CaptureBackend, Frame, FrameEncoder};
use crate::CaptureError;

/// Drives one feed through `Initializing -> Streaming | Degraded -> Stopped`.
///
/// Sensor reads and encoding block, so each cycle runs on the blocking pool
/// with the capability moved in and handed back. The capability lives in a
/// [`CapabilityGuard`] the whole time, so it is closed however the loop ends.
pub struct CaptureLoop {
    feed: Arc<Feed>,
    backend: Arc<dyn CaptureBackend>,
    encoder: Arc<dyn FrameEncoder>,
    error_backoff: Duration,
}

impl CaptureLoop {
    pub fn new(
        feed: Arc<Feed>,
        backend: Arc<dyn CaptureBackend>,
        encoder: Arc<dyn FrameEncoder>,
        error_backoff: Duration,
    ) -> Self {
        Self {
            feed,
            backend,
            encoder,
            error_backoff,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(skip(self), fields(feed = %self.feed.name()))]
    pub async fn run(self) {
        let mut stop = self.feed.stop_signal();

        if !*stop.borrow() {
            match self.initialize().await {
                Ok(guard) => self.stream(guard, &mut stop).await,
                Err(err) => self.degrade(err, &mut stop).await,
            }
        }

        self.feed.set_running(false);
        self.feed.set_state(FeedState::Stopped);
        info!("Feed '{}' stopped", self.feed.name());
    }

    async fn initialize(&self) -> Result<CapabilityGuard, CaptureError> {
        let backend = self.backend.clone();
        let name = self.feed.name().to_string();
        let index = self.feed.sensor_index();
        let resolution = self.feed.resolution();

        let opened = tokio::task::spawn_blocking(move || {
            let mut guard = CapabilityGuard::new(name, backend.open(index)?);
            if let Some(capability) = guard.get_mut() {
                capability.configure(resolution)?;
            }
            Ok::<_, CaptureError>(guard)
        })
        .await;

        match opened {
            Ok(result) => result,
            Err(join_err) => Err(CaptureError::configuration(index, join_err)),
        }
    }

    async fn stream(&self, guard: CapabilityGuard, stop: &mut watch::Receiver<bool>) {
        let feed = &self.feed;
        feed.set_has_capability(true);
        feed.set_running(true);
        feed.set_state(FeedState::Streaming);
        feed.report_rate();
        info!(
            "Sensor {} for '{}' initialized at {}",
            feed.sensor_index(),
            feed.name(),
            feed.resolution()
        );

        let mut guard = Some(guard);
        loop {
            if *stop.borrow() {
                break;
            }
            let Some(capability) = guard.take() else {
                break;
            };

            let cycle_start = Instant::now();
            let encoder = self.encoder.clone();
            let quality = feed.quality();
            let cycle = tokio::task::spawn_blocking(move || {
                let mut capability = capability;
                let result = capture_and_encode(&mut capability, encoder.as_ref(), quality);
                (capability, result)
            })
            .await;

            let result = match cycle {
                Ok((capability, result)) => {
                    guard = Some(capability);
                    result
                }
                Err(join_err) => {
                    // The guard unwound with the blocking task, sensor already closed
                    error!("Capture cycle for '{}' aborted: {}", feed.name(), join_err);
                    break;
                }
            };

            match result {
                Ok(frame) => {
                    feed.cache.publish(frame);
                    feed.record_frame();
                }
                Err(err) => {
                    error!("Error capturing from '{}': {}", feed.name(), err);
                    metrics::counter!("tricam_capture_errors_total", "feed" => feed.name().to_string())
                        .increment(1);
                    if pause(self.error_backoff, stop).await {
                        break;
                    }
                    continue;
                }
            }

            let pace = feed.governor.after_cycle(cycle_start.elapsed());
            let changed = feed.report_rate();
            match pace {
                Pace::Sleep(remaining) => {
                    if let Some(rate) = changed {
                        info!("'{}' keeping up again, capture rate now {} fps", feed.name(), rate);
                    }
                    if pause(remaining, stop).await {
                        break;
                    }
                }
                Pace::Behind { rate } => {
                    warn!("'{}' running behind, capture rate now {} fps", feed.name(), rate);
                }
            }
        }

        if let Some(mut guard) = guard {
            guard.release();
        }
        feed.set_has_capability(false);
    }

    async fn degrade(&self, err: CaptureError, stop: &mut watch::Receiver<bool>) {
        let feed = &self.feed;
        warn!("Sensor for '{}' unavailable: {}", feed.name(), err);
        feed.set_has_capability(false);

        let resolution = feed.resolution();
        let quality = feed.placeholder_quality();
        match tokio::task::spawn_blocking(move || placeholder_frame(resolution, quality)).await {
            Ok(Ok(frame)) => {
                feed.cache.publish(frame);
                feed.record_frame();
                info!("Using placeholder for '{}'", feed.name());
            }
            Ok(Err(err)) => error!("Placeholder for '{}' failed: {}", feed.name(), err),
            Err(join_err) => error!("Placeholder for '{}' failed: {}", feed.name(), join_err),
        }

        feed.set_running(false);
        feed.set_state(FeedState::Degraded);

        // Nothing left to do until shutdown
        let _ = stop.wait_for(|stop| *stop).await;
    }
}

fn capture_and_encode(
    guard: &mut CapabilityGuard,
    encoder: &dyn FrameEncoder,
    quality: u8,
) -> Result<Frame, CaptureError> {
    let capability: &mut dyn Capability = guard
        .get_mut()
        .ok_or_else(|| CaptureError::Capture("capability already released".into()))?;
    let raw = capability.capture_frame()?;
    let data = encoder.encode(&raw, quality)?;
    Ok(Frame::encoded_from(&raw, data))
}

/// Sleep for `duration` unless a stop arrives first. Returns true on stop.
async fn pause(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop.borrow(),
        _ = async { let _ = stop.wait_for(|stop| *stop).await; } => true,
    }
}
