use image::codecs::jpeg::JpegDecoder as ImageJpegDecoder;
use image::{DynamicImage, ImageDecoder};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("jpeg header could not be parsed: {0}")]
    Header(String),

    #[error("jpeg data could not be decoded: {0}")]
    Data(String),
}

/// Decoded RGB8 image, read one row at a time
#[derive(Debug, Clone)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

impl DecodedImage {
    /// `rgb` holds `width * height` RGB triples, rows top to bottom
    pub fn from_rgb(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(DecodeError::Data(format!(
                "expected {} bytes of RGB for {}x{}, got {}",
                expected,
                width,
                height,
                rgb.len()
            )));
        }
        Ok(Self { width, height, rgb })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Rows of packed RGB triples, top to bottom
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        // chunks_exact panics on a zero chunk size
        let row_len = (self.width as usize * 3).max(1);
        self.rgb.chunks_exact(row_len).take(self.height as usize)
    }
}

/// Turns one compressed frame into RGB rows
pub trait FrameDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Baseline/progressive JPEG (MJPEG frames) through the `image` crate
#[derive(Debug, Default)]
pub struct JpegDecoder;

impl FrameDecoder for JpegDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedImage, DecodeError> {
        let decoder = ImageJpegDecoder::new(Cursor::new(data))
            .map_err(|e| DecodeError::Header(e.to_string()))?;
        let (width, height) = decoder.dimensions();

        let rgb = DynamicImage::from_decoder(decoder)
            .map_err(|e| DecodeError::Data(e.to_string()))?
            .into_rgb8()
            .into_raw();

        DecodedImage::from_rgb(width, height, rgb)
    }
}
