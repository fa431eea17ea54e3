use bytes::Bytes;
use image::codecs::jpeg;
use image::ExtendedColorType;
use jpeg_decoder::Decoder;

use super::frame::{PixelFormat, RawFrame, Resolution};
use crate::CaptureError;

/// Raw pixels + quality -> compressed image
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Bytes, CaptureError>;
}

/// Baseline JPEG encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegEncoder;

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Bytes, CaptureError> {
        let rgb = decode_frame(&frame.data, frame.format, frame.resolution())?;
        encode_rgb(&rgb, frame.resolution(), quality)
    }
}

/// Compress packed RGB24 pixels.
pub fn encode_rgb(rgb: &[u8], resolution: Resolution, quality: u8) -> Result<Bytes, CaptureError> {
    let expected = PixelFormat::Rgb24.frame_size(resolution).unwrap_or(0);
    if rgb.len() != expected {
        return Err(CaptureError::Encode(format!(
            "expected {expected} bytes for {resolution} RGB, got {}",
            rgb.len()
        )));
    }

    let mut out = Vec::with_capacity(rgb.len() / 8);
    jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        rgb,
        resolution.width,
        resolution.height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(Bytes::from(out))
}

/// Convert sensor output to packed RGB24.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    resolution: Resolution,
) -> Result<Vec<u8>, CaptureError> {
    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder.decode()?;
            let info = decoder
                .info()
                .ok_or_else(|| CaptureError::Encode("mjpeg frame without header".into()))?;
            match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => Ok(pixels),
                jpeg_decoder::PixelFormat::L8 => {
                    Ok(pixels.iter().flat_map(|&l| [l, l, l]).collect())
                }
                other => Err(CaptureError::Encode(format!(
                    "unsupported mjpeg pixel format {other:?}"
                ))),
            }
        }
        // Already in RGB format
        PixelFormat::Rgb24 => Ok(data.to_vec()),
        PixelFormat::Yuyv4 => yuyv_to_rgb(data, resolution),
    }
}

fn yuyv_to_rgb(data: &[u8], resolution: Resolution) -> Result<Vec<u8>, CaptureError> {
    let expected = PixelFormat::Yuyv4.frame_size(resolution).unwrap_or(0);
    if data.len() < expected {
        return Err(CaptureError::Encode(format!(
            "short YUYV frame: {} of {expected} bytes",
            data.len()
        )));
    }

    // BT.601, limited range
    let convert = |y: u8, u: u8, v: u8| -> [u8; 3] {
        let c = y as i32 - 16;
        let d = u as i32 - 128;
        let e = v as i32 - 128;
        let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
        [
            clamp(298 * c + 409 * e),
            clamp(298 * c - 100 * d - 208 * e),
            clamp(298 * c + 516 * d),
        ]
    };

    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&convert(y0, u, v));
        rgb.extend_from_slice(&convert(y1, u, v));
    }
    Ok(rgb)
}
