#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tricam::capture::{Capability, CaptureBackend, PixelFormat, RawFrame, Resolution};
use tricam::{CaptureError, Config, FeedConfig};

/// How a scripted sensor behaves
#[derive(Debug, Clone, Default)]
pub struct SensorScript {
    pub fail_open: bool,
    pub fail_configure: bool,
    /// Blocking time per capture
    pub latency: Duration,
    /// Fail every nth capture (1-based); 0 never fails
    pub fail_every: u32,
}

/// Backend whose sensors follow a per-index script and count closes
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<u32, SensorScript>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub capture_errors: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, index: u32, script: SensorScript) -> Self {
        self.scripts.insert(index, script);
        self
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(&self, index: u32) -> Result<Box<dyn Capability>, CaptureError> {
        let script = self.scripts.get(&index).cloned().unwrap_or_default();
        if script.fail_open {
            return Err(CaptureError::configuration(index, "scripted open failure"));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSensor {
            index,
            script,
            resolution: None,
            captures: AtomicU32::new(0),
            closes: self.closes.clone(),
            capture_errors: self.capture_errors.clone(),
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedSensor {
    index: u32,
    script: SensorScript,
    resolution: Option<Resolution>,
    captures: AtomicU32,
    closes: Arc<AtomicUsize>,
    capture_errors: Arc<AtomicUsize>,
    closed: bool,
}

impl Capability for ScriptedSensor {
    fn configure(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        if self.script.fail_configure {
            return Err(CaptureError::configuration(self.index, "scripted configure failure"));
        }
        self.resolution = Some(resolution);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let resolution = self.resolution.expect("configured");
        if !self.script.latency.is_zero() {
            std::thread::sleep(self.script.latency);
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.script.fail_every > 0 && n % self.script.fail_every == 0 {
            self.capture_errors.fetch_add(1, Ordering::SeqCst);
            return Err(CaptureError::Capture(format!("scripted failure #{n}")));
        }
        let pixels = vec![(n % 256) as u8; (resolution.width * resolution.height * 3) as usize];
        Ok(RawFrame::new(
            Bytes::from(pixels),
            resolution,
            PixelFormat::Rgb24,
            n as u64,
        ))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Small, fast feeds so tests don't spend their time encoding
pub fn test_config(feeds: &[(&str, u32)]) -> Config {
    let mut config = Config::default();
    config.capture.width = 16;
    config.capture.height = 16;
    config.stream.target_fps = 50;
    config.stream.min_fps = 5;
    config.stream.poll_interval_ms = 2;
    config.stream.error_backoff_ms = 5;
    config.feeds = feeds
        .iter()
        .enumerate()
        .map(|(i, (name, index))| FeedConfig::new(*name, *index, 9000 + i as u16))
        .collect();
    config
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
