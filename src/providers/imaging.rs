//! Decoded 8-bit images.
//!
//! Files are decoded with the `image` crate and normalised to 8-bit grey or
//! RGB samples, so noise and metrics always work on pixels rather than on
//! container bytes. Saving picks the encoder from the output extension.

use crate::core::error::OperationError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageEncoder};
use std::path::Path;

/// Pixels of a decoded image, row major, interleaved channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image8 {
    width: u32,
    height: u32,
    channels: u8,
    samples: Vec<u8>,
}

impl Image8 {
    /// Greyscale sources stay single channel; anything with colour becomes
    /// RGB. Alpha and sample depths above 8 bits are dropped.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        if image.color().has_color() {
            Self {
                width,
                height,
                channels: 3,
                samples: image.to_rgb8().into_raw(),
            }
        } else {
            Self {
                width,
                height,
                channels: 1,
                samples: image.to_luma8().into_raw(),
            }
        }
    }

    pub fn from_raw(width: u32, height: u32, channels: u8, samples: Vec<u8>) -> Result<Self, OperationError> {
        let expected = width as usize * height as usize * channels as usize;
        if !matches!(channels, 1 | 3) || samples.len() != expected {
            return Err(OperationError::Failed(format!(
                "{} samples do not make a {}x{} image with {} channel(s)",
                samples.len(),
                width,
                height,
                channels
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            samples,
        })
    }

    pub fn open(path: &Path) -> Result<Self, OperationError> {
        Ok(Self::from_dynamic(image::open(path)?))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [u8] {
        &mut self.samples
    }

    fn color_type(&self) -> ColorType {
        if self.channels == 1 {
            ColorType::L8
        } else {
            ColorType::Rgb8
        }
    }

    /// Write in the format implied by the extension of `path`
    pub fn save(&self, path: &Path) -> Result<(), OperationError> {
        image::save_buffer(path, &self.samples, self.width, self.height, self.color_type())?;
        Ok(())
    }

    pub fn encode(&self, codec: Codec) -> Result<Vec<u8>, OperationError> {
        let mut out = Vec::new();
        let color = self.color_type().into();
        match codec {
            Codec::Png { effort } => PngEncoder::new_with_quality(&mut out, effort, FilterType::Adaptive)
                .write_image(&self.samples, self.width, self.height, color)?,
            Codec::Jpeg { quality } => JpegEncoder::new_with_quality(&mut out, quality)
                .write_image(&self.samples, self.width, self.height, color)?,
        }
        Ok(out)
    }
}

/// Output encoding of the compressor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Codec {
    /// Lossless; only the compression effort varies
    Png { effort: CompressionType },
    /// Lossy, quality 1 to 100
    Jpeg { quality: u8 },
}

impl Codec {
    /// PNG effort from a 0 to 100 quality setting
    pub fn png(quality: i64) -> Result<Self, OperationError> {
        let effort = match check_quality(quality, 0)? {
            0..=33 => CompressionType::Fast,
            34..=66 => CompressionType::Default,
            _ => CompressionType::Best,
        };
        Ok(Codec::Png { effort })
    }

    pub fn jpeg(quality: i64) -> Result<Self, OperationError> {
        Ok(Codec::Jpeg {
            quality: check_quality(quality, 1)?,
        })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Png { .. } => "png",
            Codec::Jpeg { .. } => "jpg",
        }
    }
}

fn check_quality(quality: i64, min: i64) -> Result<u8, OperationError> {
    if !(min..=100).contains(&quality) {
        return Err(OperationError::InvalidParameter {
            name: "quality".to_string(),
            reason: format!("{} is outside {}..=100", quality, min),
        });
    }
    Ok(quality as u8)
}
