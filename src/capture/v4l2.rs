//! V4L2 sensors, `/dev/video<index>`

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{Capability, CaptureBackend, PixelFormat, RawFrame, Resolution};
use crate::CaptureError;

const BUFFER_COUNT: u32 = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for V4l2Backend {
    fn open(&self, index: u32) -> Result<Box<dyn Capability>, CaptureError> {
        let path = format!("/dev/video{index}");
        info!("Opening V4L2 sensor: {}", path);

        let device =
            Device::with_path(&path).map_err(|e| CaptureError::configuration(index, e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::configuration(index, e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::configuration(
                index,
                "device doesn't support video capture",
            ));
        }

        Ok(Box::new(V4l2Sensor {
            index,
            device,
            stream: None,
            resolution: Resolution::new(0, 0),
            format: PixelFormat::Mjpeg,
            sequence: 0,
        }))
    }

    fn name(&self) -> &'static str {
        "v4l2"
    }
}

struct V4l2Sensor {
    index: u32,
    device: Device,
    stream: Option<MmapStream<'static>>,
    resolution: Resolution,
    format: PixelFormat,
    sequence: u64,
}

impl Capability for V4l2Sensor {
    /// Prefer MJPEG (cheap readout at 1080p), fall back to YUYV.
    fn configure(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        let index = self.index;
        let mut fmt = self
            .device
            .format()
            .map_err(|e| CaptureError::configuration(index, e))?;
        fmt.width = resolution.width;
        fmt.height = resolution.height;

        let mut applied = None;
        for (fourcc, format) in [
            (FourCC::new(b"MJPG"), PixelFormat::Mjpeg),
            (FourCC::new(b"YUYV"), PixelFormat::Yuyv4),
        ] {
            fmt.fourcc = fourcc;
            match self.device.set_format(&fmt) {
                Ok(actual) if actual.fourcc == fourcc => {
                    applied = Some((actual, format));
                    break;
                }
                Ok(_) => continue,
                Err(e) => warn!(index, "set_format {} failed: {}", fourcc, e),
            }
        }
        let (actual, format) = applied
            .ok_or_else(|| CaptureError::configuration(index, "no MJPG or YUYV support"))?;

        if (actual.width, actual.height) != (resolution.width, resolution.height) {
            warn!(
                index,
                "driver adjusted resolution to {}x{}", actual.width, actual.height
            );
        }

        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CaptureError::configuration(index, e))?;

        self.resolution = Resolution::new(actual.width, actual.height);
        self.format = format;
        self.stream = Some(stream);
        info!(
            "Sensor {} streaming {} {:?} with {} buffers",
            index, self.resolution, format, BUFFER_COUNT
        );
        Ok(())
    }

    #[instrument(skip(self), fields(index = self.index))]
    fn capture_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::Capture("stream not started".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::Capture(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;
        Ok(RawFrame::new(data, self.resolution, self.format, self.sequence))
    }

    fn close(&mut self) {
        // Dropping the stream issues STREAMOFF and unmaps the buffers
        if self.stream.take().is_some() {
            info!("Sensor {} stopped", self.index);
        }
    }
}
