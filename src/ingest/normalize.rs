use anyhow::{anyhow, Result};
use image::{imageops::FilterType, Rgb, RgbImage};

use super::CaptureSettings;

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
}

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<RgbImage> {
    if format == PixelFormat::Nv12 && (width % 2 != 0 || height % 2 != 0) {
        return Err(anyhow!("NV12 frame needs even dimensions, got {}x{}", width, height));
    }
    let luma_len = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    let expected = match format {
        PixelFormat::Rgb24 => luma_len.checked_mul(3),
        PixelFormat::Nv12 => luma_len.checked_add(luma_len / 2),
    }
    .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }

    match format {
        PixelFormat::Rgb24 => RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height)),
        PixelFormat::Nv12 => Ok(nv12_to_rgb(pixels, width, height)),
    }
}

/// Resize to the capture resolution; frames already at that size pass through.
pub(crate) fn fit_to_capture(image: RgbImage, capture: &CaptureSettings) -> RgbImage {
    if image.dimensions() == (capture.width, capture.height) {
        return image;
    }
    image::imageops::resize(&image, capture.width, capture.height, FilterType::Triangle)
}

/// BT.601 full-range conversion. `pixels` must already hold a full Y plane followed by
/// the interleaved half-resolution UV plane.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> RgbImage {
    let stride = width as usize;
    let (luma, chroma) = pixels.split_at(stride * height as usize);
    RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = luma[y * stride + x] as f32;
        let pair = (y / 2) * stride + (x / 2) * 2;
        let u = chroma[pair] as f32 - 128.0;
        let v = chroma[pair + 1] as f32 - 128.0;
        Rgb([
            clamp_to_u8(luma + 1.402 * v),
            clamp_to_u8(luma - 0.344_136 * u - 0.714_136 * v),
            clamp_to_u8(luma + 1.772 * u),
        ])
    })
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
