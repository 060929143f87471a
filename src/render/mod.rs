//! Operator cockpit composition.
//!
//! The primary view is the fused frame with per-track overlays. The raw feed and the
//! alternate-modality view are scaled to fixed insets and stacked in a column on its
//! right. Only the primary view is recorded.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::pipeline::TrackAnnotation;

mod glyphs;

pub const INSET_WIDTH: u32 = 320;
pub const INSET_HEIGHT: u32 = 240;
pub const ADVISORY: &str = "ADVISORY: Monitor & alert patrol";

const FENCE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const THREAT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const FPS_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ADVISORY_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Everything one cockpit frame is drawn from. All borrowed read-only.
pub struct RenderInput<'a> {
    pub raw: &'a RgbImage,
    pub alternate: &'a RgbImage,
    pub fused: &'a RgbImage,
    pub annotations: &'a [TrackAnnotation],
    pub fence_y: u32,
    pub show_fence: bool,
    pub fps: f32,
}

pub struct Composite {
    /// Primary view plus inset column.
    pub display: RgbImage,
    /// Primary view only, at capture resolution.
    pub record: RgbImage,
}

#[derive(Default)]
pub struct CompositeRenderer {
    font: Option<FontVec>,
}

impl CompositeRenderer {
    /// Renderer drawing overlay text with the built-in bitmap font.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("parse font {}: {}", path.display(), e))?;
        Ok(Self { font: Some(font) })
    }

    pub fn from_font(font: Option<&Path>) -> Result<Self> {
        match font {
            Some(path) => Self::with_font_file(path),
            None => {
                log::info!("render: no font configured, using the built-in bitmap font");
                Ok(Self::new())
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn render(&self, input: &RenderInput<'_>) -> Composite {
        let mut primary = input.fused.clone();
        let (width, height) = primary.dimensions();

        for annotation in input.annotations {
            self.draw_track(&mut primary, annotation);
        }

        if input.show_fence && input.fence_y < height {
            let y = input.fence_y as f32;
            draw_line_segment_mut(&mut primary, (0.0, y), (width as f32, y), FENCE_COLOR);
            if input.fence_y + 1 < height {
                draw_line_segment_mut(
                    &mut primary,
                    (0.0, y + 1.0),
                    (width as f32, y + 1.0),
                    FENCE_COLOR,
                );
            }
        }

        self.text(&mut primary, &format!("FPS: {}", input.fps as u32), 10, 6, 20.0, FPS_COLOR);
        self.text(
            &mut primary,
            ADVISORY,
            10,
            height as i32 - 24,
            16.0,
            ADVISORY_COLOR,
        );

        let display = compose(&primary, input.raw, input.alternate);
        Composite {
            display,
            record: primary,
        }
    }

    fn draw_track(&self, canvas: &mut RgbImage, annotation: &TrackAnnotation) {
        let color = Rgb(annotation.color);
        let bbox = annotation.bbox;
        if bbox.width > 0 && bbox.height > 0 {
            let (x, y) = (bbox.x as i32, bbox.y as i32);
            draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(bbox.width, bbox.height), color);
            if bbox.width > 2 && bbox.height > 2 {
                draw_hollow_rect_mut(
                    canvas,
                    Rect::at(x + 1, y + 1).of_size(bbox.width - 2, bbox.height - 2),
                    color,
                );
            }
        }

        for pair in annotation.trail.windows(2) {
            draw_line_segment_mut(
                canvas,
                (pair[0].x as f32, pair[0].y as f32),
                (pair[1].x as f32, pair[1].y as f32),
                color,
            );
        }

        let label = format!(
            "ID-{} {} {}%",
            annotation.track_id,
            annotation.category,
            (annotation.confidence * 100.0) as u32
        );
        self.text(canvas, &label, bbox.x as i32, bbox.y as i32 - 16, 15.0, color);

        let mut threat = format!("THREAT: {}", annotation.threat);
        if annotation.loitering {
            threat.push_str(" LOITERING");
        }
        let below = (bbox.y + bbox.height) as i32 + 4;
        self.text(canvas, &threat, bbox.x as i32, below, 15.0, THREAT_COLOR);
    }

    /// Draw `text` roughly `size` pixels tall with its top-left corner at (`x`, `y`).
    fn text(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        match &self.font {
            Some(font) => draw_text_mut(canvas, color, x, y, PxScale::from(size), font, text),
            None => {
                let scale = (size / glyphs::GLYPH_HEIGHT as f32).floor().max(1.0) as u32;
                glyphs::draw_text(canvas, text, x, y, scale, color);
            }
        }
    }
}

/// Primary view with the raw and alternate insets stacked on its right.
fn compose(primary: &RgbImage, raw: &RgbImage, alternate: &RgbImage) -> RgbImage {
    let (width, height) = primary.dimensions();
    let mut display = RgbImage::new(width + INSET_WIDTH, height.max(2 * INSET_HEIGHT));
    image::imageops::replace(&mut display, primary, 0, 0);

    let raw_inset = image::imageops::resize(raw, INSET_WIDTH, INSET_HEIGHT, FilterType::Triangle);
    let alt_inset =
        image::imageops::resize(alternate, INSET_WIDTH, INSET_HEIGHT, FilterType::Triangle);
    image::imageops::replace(&mut display, &raw_inset, width as i64, 0);
    image::imageops::replace(&mut display, &alt_inset, width as i64, INSET_HEIGHT as i64);
    display
}
