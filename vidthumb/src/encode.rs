use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ImageEncoder, RgbImage};

use crate::error::{Result, ThumbnailError};
use crate::request::OutputFormat;

/// Whether this build can produce WebP output.
pub const WEBP_SUPPORTED: bool = cfg!(feature = "webp");

/// Compress `image` to `format`. `quality` (0-100) is used by the lossy
/// encodings only.
pub fn encode_image(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let quality = quality.min(100);
    let data = match format {
        OutputFormat::Jpeg => encode_jpeg(image, quality)?,
        OutputFormat::Png => encode_png(image)?,
        OutputFormat::WebP => encode_webp(image, quality)?,
    };

    if data.is_empty() {
        return Err(ThumbnailError::EncodeFailed(format!(
            "{:?} encoder produced no data",
            format
        )));
    }
    Ok(data)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = flatten_alpha(image);
    let mut buf = Vec::new();
    // The JPEG encoder's scale starts at 1.
    JpegEncoder::new_with_quality(&mut buf, quality.max(1))
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| ThumbnailError::EncodeFailed(format!("JPEG: {}", e)))?;
    Ok(buf)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new(&mut buf);
    let result = match image {
        DynamicImage::ImageRgb8(rgb) => {
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        }
        other => {
            let rgba = other.to_rgba8();
            encoder.write_image(rgba.as_raw(), rgba.width(), rgba.height(), ColorType::Rgba8)
        }
    };
    result.map_err(|e| ThumbnailError::EncodeFailed(format!("PNG: {}", e)))?;
    Ok(buf)
}

#[cfg(feature = "webp")]
fn encode_webp(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let memory = match image {
        DynamicImage::ImageRgb8(rgb) => {
            webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
                .encode_simple(false, f32::from(quality))
        }
        other => {
            let rgba = other.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode_simple(false, f32::from(quality))
        }
    }
    .map_err(|e| ThumbnailError::EncodeFailed(format!("WebP: {:?}", e)))?;

    Ok(memory.to_vec())
}

#[cfg(not(feature = "webp"))]
fn encode_webp(_image: &DynamicImage, _quality: u8) -> Result<Vec<u8>> {
    Err(ThumbnailError::FormatUnsupported(
        "WebP encoding is not available in this build (enable the `webp` feature)".to_string(),
    ))
}

/// Drop any alpha channel by compositing onto opaque black.
fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let a = u16::from(src[3]);
        for c in 0..3 {
            dst[c] = ((u16::from(src[c]) * a + 127) / 255) as u8;
        }
    }
    rgb
}
