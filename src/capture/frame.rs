use bytes::Bytes;
use std::time::{Instant, SystemTime};

/// Encoded frame as served to viewers
///
/// Immutable once built. Cloning shares the payload, `Bytes` is
/// reference counted.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Compressed image (JPEG)
    pub data: Bytes,

    /// Monotonic capture timestamp
    pub timestamp: Instant,

    /// Wall-clock capture time
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            captured_at: SystemTime::now(),
        }
    }

    /// Keep the capture timestamps of the raw frame this was encoded from.
    pub fn encoded_from(raw: &RawFrame, data: Bytes) -> Self {
        Self {
            data,
            timestamp: raw.timestamp,
            captured_at: raw.captured_at,
        }
    }
}

/// Unencoded sensor output
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: Instant,
    pub captured_at: SystemTime,
}

impl RawFrame {
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            width: resolution.width,
            height: resolution.height,
            format,
            timestamp: Instant::now(),
            captured_at: SystemTime::now(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per frame for uncompressed formats.
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        let pixels = resolution.width as usize * resolution.height as usize;
        match self {
            PixelFormat::Rgb24 => Some(pixels * 3),
            PixelFormat::Yuyv4 => Some(pixels * 2),
            PixelFormat::Mjpeg => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
