//! Image preprocessing into the fixed-size buffer inference backends consume.
//!
//! # Buffer layout
//!
//! Buffers are 8 bits per channel, 4 channels per pixel, rows stored top to
//! bottom with no padding (`bytes_per_row = width * 4`). The byte order within
//! a pixel depends on [`PixelFormat`]:
//!
//! | Format | Bytes in memory | Alpha | Opaque red |
//! |--------|-----------------|-------|------------|
//! | `Bgra8Premultiplied` | B, G, R, A | premultiplied | `[0, 0, 255, 255]` |
//! | `Rgba8` | R, G, B, A | straight | `[255, 0, 0, 255]` |
//!
//! Premultiplication rounds to nearest: `c' = (c * a + 127) / 255`.
//!
//! The source is stretched to the target size without preserving its aspect
//! ratio, so normalized backend coordinates map straight back onto the source.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, Rgba, RgbaImage};
use serde::Serialize;
use tracing::debug;
use vdet_models::ImageSize;

use crate::error::PreprocessError;

const BYTES_PER_PIXEL: usize = 4;

/// Channel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// B, G, R, A bytes with premultiplied alpha.
    #[default]
    Bgra8Premultiplied,
    /// R, G, B, A bytes with straight alpha.
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(&self) -> usize {
        BYTES_PER_PIXEL
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Bgra8Premultiplied => "bgra8_premultiplied",
            PixelFormat::Rgba8 => "rgba8",
        }
    }

    fn encode(&self, [r, g, b, a]: [u8; 4]) -> [u8; 4] {
        match self {
            PixelFormat::Bgra8Premultiplied => {
                [premultiply(b, a), premultiply(g, a), premultiply(r, a), a]
            }
            PixelFormat::Rgba8 => [r, g, b, a],
        }
    }

    fn decode_rgb(&self, px: [u8; 4]) -> [u8; 3] {
        match self {
            PixelFormat::Bgra8Premultiplied => {
                let a = px[3];
                [unpremultiply(px[2], a), unpremultiply(px[1], a), unpremultiply(px[0], a)]
            }
            PixelFormat::Rgba8 => [px[0], px[1], px[2]],
        }
    }
}

fn premultiply(c: u8, a: u8) -> u8 {
    ((c as u16 * a as u16 + 127) / 255) as u8
}

fn unpremultiply(c: u8, a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8
}

/// Fixed-size interleaved pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    size: ImageSize,
    format: PixelFormat,
    bytes_per_row: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw bytes of one pixel in the buffer's byte order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_row + x as usize * BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Straight-alpha RGB of one pixel regardless of format.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.pixel(x, y).map(|px| self.format.decode_rgb(px))
    }
}

/// Resizes and reformats images into [`PixelBuffer`]s.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    target_size: ImageSize,
    format: PixelFormat,
    filter: FilterType,
}

impl ImagePreprocessor {
    pub fn new(target_size: ImageSize, format: PixelFormat) -> Self {
        Self {
            target_size,
            format,
            filter: FilterType::Triangle,
        }
    }

    /// Override the resampling filter (Triangle by default).
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn target_size(&self) -> ImageSize {
        self.target_size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Convert an image into a buffer of `target_size` in the configured format.
    pub fn process(&self, image: &DynamicImage) -> Result<PixelBuffer, PreprocessError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PreprocessError::InvalidImageData(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }

        let mut data = self.allocate()?;
        let drawn = self.draw(image)?;

        {
            let ImageSize { width: tw, height: th } = self.target_size;
            let mut view: ImageBuffer<Rgba<u8>, &mut [u8]> =
                ImageBuffer::from_raw(tw, th, data.as_mut_slice())
                    .ok_or(PreprocessError::BufferLockFailed)?;

            for (dst, src) in view.pixels_mut().zip(drawn.pixels()) {
                dst.0 = self.format.encode(src.0);
            }
        }

        debug!(
            source = %ImageSize::new(width, height),
            target = %self.target_size,
            format = self.format.as_str(),
            "Preprocessed image"
        );

        Ok(PixelBuffer {
            size: self.target_size,
            format: self.format,
            bytes_per_row: self.target_size.width as usize * BYTES_PER_PIXEL,
            data,
        })
    }

    /// Convert raw RGB24 bytes (`width * height * 3`) into a buffer.
    pub fn process_raw_rgb(
        &self,
        image_data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer, PreprocessError> {
        let expected_len = width as usize * height as usize * 3;
        if image_data.len() != expected_len {
            return Err(PreprocessError::InvalidImageData(format!(
                "expected {} RGB bytes, got {}",
                expected_len,
                image_data.len()
            )));
        }

        let img_buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(width, height, image_data.to_vec()).ok_or_else(|| {
                PreprocessError::InvalidImageData("failed to wrap RGB bytes".to_string())
            })?;

        self.process(&DynamicImage::ImageRgb8(img_buffer))
    }

    fn allocate(&self) -> Result<Vec<u8>, PreprocessError> {
        let ImageSize { width, height } = self.target_size;
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| {
                PreprocessError::BufferAllocationFailed(format!(
                    "{}x{} buffer size overflows",
                    width, height
                ))
            })?;
        if len == 0 {
            return Err(PreprocessError::BufferAllocationFailed(format!(
                "target size {} is empty",
                self.target_size
            )));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| PreprocessError::BufferAllocationFailed(e.to_string()))?;
        data.resize(len, 0);
        Ok(data)
    }

    /// Resample the source onto a target-sized RGBA canvas.
    fn draw(&self, image: &DynamicImage) -> Result<RgbaImage, PreprocessError> {
        let ImageSize { width, height } = self.target_size;
        let canvas = image.resize_exact(width, height, self.filter).to_rgba8();
        if canvas.dimensions() != (width, height) {
            return Err(PreprocessError::ContextCreationFailed(format!(
                "resampler produced {}x{}, expected {}",
                canvas.width(),
                canvas.height(),
                self.target_size
            )));
        }
        Ok(canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, px: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(px)))
    }

    #[test]
    fn test_red_pixel_bgra_layout() {
        let pre = ImagePreprocessor::new(ImageSize::new(4, 4), PixelFormat::Bgra8Premultiplied);
        let buffer = pre.process(&solid(8, 6, [255, 0, 0, 255])).unwrap();

        assert_eq!(buffer.size(), ImageSize::new(4, 4));
        assert_eq!(buffer.bytes_per_row(), 16);
        assert_eq!(buffer.as_bytes().len(), 64);
        assert_eq!(buffer.pixel(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(buffer.pixel(3, 3), Some([0, 0, 255, 255]));
        assert_eq!(buffer.rgb_at(2, 1), Some([255, 0, 0]));
    }

    #[test]
    fn test_red_pixel_rgba_layout() {
        let pre = ImagePreprocessor::new(ImageSize::new(2, 2), PixelFormat::Rgba8);
        let buffer = pre.process(&solid(2, 2, [255, 0, 0, 255])).unwrap();
        assert_eq!(buffer.pixel(1, 1), Some([255, 0, 0, 255]));
        assert_eq!(buffer.rgb_at(1, 1), Some([255, 0, 0]));
    }

    #[test]
    fn test_formats_agree_on_channel_values() {
        let source = solid(3, 3, [200, 100, 50, 255]);
        let size = ImageSize::new(3, 3);
        let bgra = ImagePreprocessor::new(size, PixelFormat::Bgra8Premultiplied)
            .process(&source)
            .unwrap();
        let rgba = ImagePreprocessor::new(size, PixelFormat::Rgba8)
            .process(&source)
            .unwrap();
        assert_eq!(bgra.rgb_at(1, 1), rgba.rgb_at(1, 1));
        assert_eq!(bgra.pixel(1, 1), Some([50, 100, 200, 255]));
    }

    #[test]
    fn test_premultiplied_alpha() {
        let pre = ImagePreprocessor::new(ImageSize::new(1, 1), PixelFormat::Bgra8Premultiplied);
        let buffer = pre.process(&solid(1, 1, [255, 0, 0, 128])).unwrap();
        assert_eq!(buffer.pixel(0, 0), Some([0, 0, 128, 128]));
        assert_eq!(buffer.rgb_at(0, 0), Some([255, 0, 0]));
    }

    #[test]
    fn test_stretch_is_not_aspect_preserving() {
        let pre = ImagePreprocessor::new(ImageSize::new(10, 10), PixelFormat::Rgba8);
        let buffer = pre.process(&solid(100, 20, [0, 255, 0, 255])).unwrap();
        // Every target pixel is covered by the stretched source.
        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(buffer.rgb_at(x, y), Some([0, 255, 0]));
            }
        }
    }

    #[test]
    fn test_empty_image_is_invalid() {
        let pre = ImagePreprocessor::new(ImageSize::new(4, 4), PixelFormat::default());
        let err = pre.process(&DynamicImage::new_rgba8(0, 5)).unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidImageData(_)));
    }

    #[test]
    fn test_empty_target_fails_allocation() {
        let pre = ImagePreprocessor::new(ImageSize::new(0, 4), PixelFormat::default());
        let err = pre.process(&solid(2, 2, [1, 2, 3, 255])).unwrap_err();
        assert!(matches!(err, PreprocessError::BufferAllocationFailed(_)));
    }

    #[test]
    fn test_raw_rgb_length_checked() {
        let pre = ImagePreprocessor::new(ImageSize::new(2, 2), PixelFormat::Rgba8);
        let err = pre.process_raw_rgb(&[0u8; 11], 2, 2).unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidImageData(_)));

        let buffer = pre.process_raw_rgb(&[255, 0, 0].repeat(4), 2, 2).unwrap();
        assert_eq!(buffer.pixel(0, 1), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_pixel_out_of_bounds() {
        let pre = ImagePreprocessor::new(ImageSize::new(2, 2), PixelFormat::Rgba8);
        let buffer = pre.process(&solid(2, 2, [1, 2, 3, 255])).unwrap();
        assert_eq!(buffer.pixel(2, 0), None);
        assert_eq!(buffer.pixel(0, 2), None);
    }
}
