//! Detection overlays: a box outline plus a filled label tab with
//! "class confidence" text.

use crate::record::BoundingBox;
use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::sync::LazyLock;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const BOX_THICKNESS: u32 = 2;

const LABEL_SCALE: PxScale = PxScale { x: 16.0, y: 16.0 };
const LABEL_PADDING: u32 = 3;

static LABEL_FONT: LazyLock<Option<FontRef<'static>>> = LazyLock::new(|| {
    match FontRef::try_from_slice(include_bytes!("../assets/DejaVuSans.ttf")) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "Label font unreadable, overlays will have no text");
            None
        }
    }
});

pub fn label_text(class_name: &str, confidence: f32) -> String {
    format!("{} {:.2}", class_name, confidence)
}

/// Pixel size of the label tab for `text`. The height covers ascenders and
/// descenders so the tab does not depend on which letters the label holds.
pub fn label_size(text: &str) -> (u32, u32) {
    let (text_w, text_h) = match LABEL_FONT.as_ref() {
        Some(font) => {
            let scaled = font.as_scaled(LABEL_SCALE);
            let (w, _) = text_size(LABEL_SCALE, font, text);
            (w, (scaled.ascent() - scaled.descent()).ceil() as u32)
        }
        None => (0, LABEL_SCALE.y as u32),
    };
    (text_w + 2 * LABEL_PADDING, text_h + 2 * LABEL_PADDING)
}

/// Draw every `(box, label)` pair onto `frame`.
pub fn annotate(frame: &mut RgbImage, detections: &[(BoundingBox, String)]) {
    for (bbox, label) in detections {
        draw_box(frame, bbox);
        draw_label(frame, bbox, label);
    }
}

fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox) {
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width().saturating_sub(2 * inset);
        let height = bbox.height().saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at(bbox.x1 + inset as i32, bbox.y1 + inset as i32).of_size(width, height);
        draw_hollow_rect_mut(frame, rect, BOX_COLOR);
    }
}

/// The tab sits above the box; when there is no room it moves inside the top edge.
fn draw_label(frame: &mut RgbImage, bbox: &BoundingBox, text: &str) {
    let (tab_w, tab_h) = label_size(text);
    let top = if bbox.y1 >= tab_h as i32 { bbox.y1 - tab_h as i32 } else { bbox.y1 };

    draw_filled_rect_mut(frame, Rect::at(bbox.x1, top).of_size(tab_w, tab_h), BOX_COLOR);
    if let Some(font) = LABEL_FONT.as_ref() {
        draw_text_mut(
            frame,
            TEXT_COLOR,
            bbox.x1 + LABEL_PADDING as i32,
            top + LABEL_PADDING as i32,
            LABEL_SCALE,
            font,
            text,
        );
    }
}

/// Copy the region under `bbox`; the box must already be clamped to the frame.
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    image::imageops::crop_imm(
        frame,
        bbox.x1.max(0) as u32,
        bbox.y1.max(0) as u32,
        bbox.width(),
        bbox.height(),
    )
    .to_image()
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}
