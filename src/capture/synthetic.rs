//! Test-pattern sensors for running without camera hardware

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use super::{Capability, CaptureBackend, PixelFormat, RawFrame, Resolution};
use crate::{CaptureConfig, CaptureError};

/// Backend producing a moving RGB gradient per sensor index
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    unavailable: HashSet<u32>,
    latency: Duration,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            unavailable: config.synthetic_unavailable.iter().copied().collect(),
            latency: Duration::from_millis(config.synthetic_latency_ms),
        }
    }

    /// Report `index` as missing, as if the ribbon cable were unplugged.
    pub fn with_unavailable(mut self, index: u32) -> Self {
        self.unavailable.insert(index);
        self
    }

    /// Block each capture for `latency` to mimic sensor readout time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(&self, index: u32) -> Result<Box<dyn Capability>, CaptureError> {
        if self.unavailable.contains(&index) {
            return Err(CaptureError::configuration(index, "no sensor detected"));
        }
        info!(index, "synthetic sensor opened");
        Ok(Box::new(SyntheticSensor {
            index,
            latency: self.latency,
            resolution: None,
            sequence: 0,
        }))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

struct SyntheticSensor {
    index: u32,
    latency: Duration,
    resolution: Option<Resolution>,
    sequence: u64,
}

impl SyntheticSensor {
    fn render(&self, resolution: Resolution) -> Vec<u8> {
        let width = resolution.width as usize;
        let shift = (self.sequence * 4) as usize;
        let tint = (self.index as u8).wrapping_mul(60);

        let mut pixels = Vec::with_capacity(width * resolution.height as usize * 3);
        for y in 0..resolution.height as usize {
            for x in 0..width {
                pixels.push(((x + shift) % 256) as u8);
                pixels.push((y % 256) as u8);
                pixels.push(tint);
            }
        }
        pixels
    }
}

impl Capability for SyntheticSensor {
    fn configure(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CaptureError::configuration(
                self.index,
                format!("unsupported resolution {resolution}"),
            ));
        }
        self.resolution = Some(resolution);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let resolution = self
            .resolution
            .ok_or_else(|| CaptureError::Capture("sensor not configured".into()))?;

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        self.sequence += 1;
        let pixels = self.render(resolution);
        Ok(RawFrame::new(
            Bytes::from(pixels),
            resolution,
            PixelFormat::Rgb24,
            self.sequence,
        ))
    }

    fn close(&mut self) {
        if self.resolution.take().is_some() {
            info!(index = self.index, "synthetic sensor closed");
        }
    }
}
