//! Sensor access: the capability seam, its backends, and JPEG encoding

pub mod encoder;
pub mod frame;
pub mod placeholder;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::sync::Arc;

use tracing::debug;

pub use encoder::{FrameEncoder, JpegEncoder};
pub use frame::{Frame, PixelFormat, RawFrame, Resolution};
pub use synthetic::SyntheticBackend;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Backend;

use crate::{BackendKind, CaptureConfig, CaptureError};

/// An opened sensor
///
/// Owned by exactly one capture loop. Calls are blocking and run on the
/// blocking pool.
pub trait Capability: Send {
    /// Apply the target resolution and start streaming.
    fn configure(&mut self, resolution: Resolution) -> Result<(), CaptureError>;

    /// Read the next raw frame.
    fn capture_frame(&mut self) -> Result<RawFrame, CaptureError>;

    /// Stop streaming and release the device. Must be safe to call twice.
    fn close(&mut self);
}

/// Driver entry point: opens sensors by index
pub trait CaptureBackend: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn Capability>, CaptureError>;

    fn name(&self) -> &'static str;
}

/// Closes the held capability when dropped, on every exit path of the
/// capture loop including unwinding out of a blocking cycle.
pub struct CapabilityGuard {
    inner: Option<Box<dyn Capability>>,
    feed: String,
}

impl CapabilityGuard {
    pub fn new(feed: impl Into<String>, capability: Box<dyn Capability>) -> Self {
        Self {
            inner: Some(capability),
            feed: feed.into(),
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut (dyn Capability + 'static)> {
        self.inner.as_deref_mut()
    }

    /// Close now instead of at drop.
    pub fn release(&mut self) {
        if let Some(mut capability) = self.inner.take() {
            capability.close();
            debug!(feed = %self.feed, "capability released");
        }
    }
}

impl Drop for CapabilityGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build the backend selected in configuration.
pub fn backend_from_config(config: &CaptureConfig) -> Result<Arc<dyn CaptureBackend>, CaptureError> {
    match config.backend {
        BackendKind::Synthetic => Ok(Arc::new(SyntheticBackend::from_config(config))),
        #[cfg(feature = "v4l2")]
        BackendKind::V4l2 => Ok(Arc::new(V4l2Backend::new())),
        #[cfg(not(feature = "v4l2"))]
        BackendKind::V4l2 => Err(CaptureError::Configuration {
            index: 0,
            reason: "built without the `v4l2` feature".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCapability(Arc<AtomicUsize>);

    impl Capability for CountingCapability {
        fn configure(&mut self, _resolution: Resolution) -> Result<(), CaptureError> {
            Ok(())
        }

        fn capture_frame(&mut self) -> Result<RawFrame, CaptureError> {
            Err(CaptureError::Capture("unused".into()))
        }

        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_guard_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut guard = CapabilityGuard::new("left", Box::new(CountingCapability(closes.clone())));
        guard.release();
        drop(guard);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_closes_on_unwind() {
        let closes = Arc::new(AtomicUsize::new(0));
        let guard = CapabilityGuard::new("left", Box::new(CountingCapability(closes.clone())));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("sensor blew up");
        }));
        assert!(result.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[cfg(not(feature = "v4l2"))]
    #[test]
    fn test_v4l2_requires_feature() {
        let config = CaptureConfig {
            backend: BackendKind::V4l2,
            ..CaptureConfig::default()
        };
        assert!(backend_from_config(&config).is_err());
    }
}
