//! Alternate-modality view and optical fusion.
//!
//! There is no thermal sensor: the alternate view is the frame's luma pushed through a
//! JET false-color ramp. Fusion blends it with the optical frame using the operator's
//! current weight.

use image::{Rgb, RgbImage};

/// Operator blend presets bound to the number keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendPreset {
    /// Mostly optical.
    Optical,
    /// Mostly alternate modality.
    Thermal,
    Balanced,
}

impl BlendPreset {
    pub fn alpha(&self) -> f32 {
        match self {
            BlendPreset::Optical => 0.9,
            BlendPreset::Thermal => 0.2,
            BlendPreset::Balanced => 0.5,
        }
    }

    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '1' => Some(BlendPreset::Optical),
            '2' => Some(BlendPreset::Thermal),
            '3' => Some(BlendPreset::Balanced),
            _ => None,
        }
    }
}

/// False-color rendering of the frame's luma.
pub fn thermal_view(frame: &RgbImage) -> RgbImage {
    let luma = image::imageops::grayscale(frame);
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        Rgb(jet(luma.get_pixel(x, y).0[0]))
    })
}

/// `alpha * optical + (1 - alpha) * alternate`, per channel.
///
/// Both inputs must share dimensions; the alternate view is cropped or zero-padded
/// to the optical frame otherwise.
pub fn fuse(optical: &RgbImage, alternate: &RgbImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let beta = 1.0 - alpha;
    RgbImage::from_fn(optical.width(), optical.height(), |x, y| {
        let a = optical.get_pixel(x, y).0;
        let b = if x < alternate.width() && y < alternate.height() {
            alternate.get_pixel(x, y).0
        } else {
            [0, 0, 0]
        };
        Rgb([
            blend(a[0], b[0], alpha, beta),
            blend(a[1], b[1], alpha, beta),
            blend(a[2], b[2], alpha, beta),
        ])
    })
}

fn blend(a: u8, b: u8, alpha: f32, beta: f32) -> u8 {
    (a as f32 * alpha + b as f32 * beta).round().clamp(0.0, 255.0) as u8
}

/// JET colormap: dark blue -> blue -> cyan -> yellow -> red -> dark red.
fn jet(value: u8) -> [u8; 3] {
    let v = value as f32 / 255.0;
    let channel = |offset: f32| -> u8 {
        let c = 1.5 - (4.0 * v - offset).abs();
        (c.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}
