//! Static frame served by feeds whose sensor is unavailable

use super::encoder::encode_rgb;
use super::frame::{Frame, Resolution};
use crate::CaptureError;

/// Dark grey, visibly "no signal" without looking like a black frame
pub const PLACEHOLDER_RGB: [u8; 3] = [50, 50, 50];

pub fn placeholder_frame(resolution: Resolution, quality: u8) -> Result<Frame, CaptureError> {
    let pixels = resolution.width as usize * resolution.height as usize;
    let rgb: Vec<u8> = PLACEHOLDER_RGB.iter().copied().cycle().take(pixels * 3).collect();
    Ok(Frame::new(encode_rgb(&rgb, resolution, quality)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jpeg_decoder::Decoder;

    #[test]
    fn test_placeholder_is_grey_at_resolution() {
        let frame = placeholder_frame(Resolution::new(24, 12), 50).unwrap();
        let mut decoder = Decoder::new(&frame.data[..]);
        let pixels = decoder.decode().unwrap();
        let info = decoder.info().unwrap();

        assert_eq!((info.width, info.height), (24, 12));
        assert!(pixels.iter().all(|&c| c.abs_diff(50) <= 2));
    }
}
