//! Draw detections onto a copy of a frame.
//!
//! Each detection gets a hollow box and a filled centre dot in its category
//! colour. With a font, the category name is written in white above the dot on
//! a darkened band. The source frame is never touched; a fresh `RgbImage` is
//! returned.

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::frame::Frame;
use crate::pipeline::EnrichedDetection;

const BOX_THICKNESS: u32 = 3;
const DOT_RADIUS: i32 = 6;
const JPEG_QUALITY: u8 = 90;
const LABEL_PX: f32 = 18.0;
const LABEL_MARGIN: i32 = 5;
const LABEL_LIFT: i32 = 15;
/// Fraction of each pixel value kept under a label band.
const LABEL_SHADE: f32 = 0.4;

/// TrueType/OpenType font for label text.
#[derive(Clone)]
pub struct LabelFont {
    font: FontArc,
    scale: PxScale,
}

impl LabelFont {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(data)
            .map_err(|_| anyhow!("{} is not a usable font", path.display()))?;
        Ok(Self {
            font,
            scale: PxScale::from(LABEL_PX),
        })
    }
}

pub fn draw_detections(
    frame: &Frame,
    detections: &[EnrichedDetection],
    font: Option<&LabelFont>,
) -> RgbImage {
    let mut image = frame.to_rgb_image();
    for det in detections {
        let color = Rgb(det.category().color());
        let x = det.bbox.x1.max(0.0) as i32;
        let y = det.bbox.y1.max(0.0) as i32;
        let width = det.bbox.width().round() as u32;
        let height = det.bbox.height().round() as u32;

        for inset in 0..BOX_THICKNESS {
            let w = width.saturating_sub(2 * inset);
            let h = height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut image, rect, color);
        }

        let center = det.bbox.center();
        draw_filled_circle_mut(
            &mut image,
            (center.x.round() as i32, center.y.round() as i32),
            DOT_RADIUS,
            color,
        );

        if let Some(font) = font {
            draw_label(
                &mut image,
                font,
                det.category().display_name(),
                (center.x.round() as i32, center.y.round() as i32),
            );
        }
    }
    image
}

fn draw_label(image: &mut RgbImage, font: &LabelFont, text: &str, center: (i32, i32)) {
    let (text_w, text_h) = text_size(font.scale, &font.font, text);
    let (x, baseline) = label_anchor(center, (text_w, text_h), image.dimensions());
    let top = baseline - text_h as i32;
    darken(
        image,
        (x - LABEL_MARGIN, top - LABEL_MARGIN),
        (x + text_w as i32 + LABEL_MARGIN, baseline + LABEL_MARGIN),
    );
    draw_text_mut(image, Rgb([255, 255, 255]), x, top, font.scale, &font.font, text);
}

/// Left edge and baseline of a label centred just above `center`, kept inside
/// the image with a small margin.
fn label_anchor(center: (i32, i32), text: (u32, u32), image: (u32, u32)) -> (i32, i32) {
    let (text_w, text_h) = (text.0 as i32, text.1 as i32);
    let (width, height) = (image.0 as i32, image.1 as i32);
    let x = (center.0 - text_w / 2)
        .min(width - text_w - LABEL_MARGIN)
        .max(LABEL_MARGIN);
    let y = (center.1 - LABEL_LIFT)
        .min(height - 2 * LABEL_MARGIN)
        .max(text_h + LABEL_MARGIN);
    (x, y)
}

/// Scale every pixel in `[from, to]` (clipped to the image) towards black.
fn darken(image: &mut RgbImage, from: (i32, i32), to: (i32, i32)) {
    let (width, height) = image.dimensions();
    let x0 = from.0.max(0) as u32;
    let y0 = from.1.max(0) as u32;
    let x1 = (to.0.max(0) as u32).min(width.saturating_sub(1));
    let y1 = (to.1.max(0) as u32).min(height.saturating_sub(1));
    if width == 0 || height == 0 || x0 > x1 || y0 > y1 {
        return;
    }
    for y in y0..=y1 {
        for x in x0..=x1 {
            let pixel = image.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut() {
                *channel = (f32::from(*channel) * LABEL_SHADE).round() as u8;
            }
        }
    }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(image)
        .context("failed to encode annotated image")?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{CategoryRecord, WasteCategory};
    use crate::detect::BoundingBox;

    fn det(category: WasteCategory, bbox: [f64; 4]) -> EnrichedDetection {
        EnrichedDetection {
            bbox: BoundingBox::from(bbox),
            label: "thing".to_string(),
            confidence: 0.9,
            record: CategoryRecord {
                category,
                object_name: "thing".to_string(),
                disposal_info: String::new(),
            },
        }
    }

    #[test]
    fn draws_box_edge_and_centre_in_category_colour() {
        let frame = Frame::from_rgb(vec![0u8; 40 * 40 * 3], 40, 40).unwrap();
        let image = draw_detections(
            &frame,
            &[det(WasteCategory::Hazardous, [5.0, 5.0, 35.0, 35.0])],
            None,
        );
        assert_eq!(image.get_pixel(5, 20), &Rgb([255, 0, 0]));
        assert_eq!(image.get_pixel(20, 20), &Rgb([255, 0, 0]));
        // between the box edge and the dot
        assert_eq!(image.get_pixel(12, 20), &Rgb([0, 0, 0]));
    }

    #[test]
    fn source_frame_is_unchanged() {
        let frame = Frame::from_rgb(vec![0u8; 20 * 20 * 3], 20, 20).unwrap();
        let _ = draw_detections(&frame, &[det(WasteCategory::Dry, [0.0, 0.0, 20.0, 20.0])], None);
        assert!(frame.to_rgb_image().pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn label_sits_above_the_dot_and_inside_the_image() {
        // room to spare: centred, lifted above the dot
        assert_eq!(label_anchor((100, 100), (40, 12), (400, 300)), (80, 85));
        // near the top-left corner: pushed right and down
        assert_eq!(label_anchor((4, 6), (40, 12), (400, 300)), (5, 17));
        // near the bottom-right corner: pulled left and up
        assert_eq!(label_anchor((398, 299), (40, 12), (400, 300)), (355, 284));
    }

    #[test]
    fn darken_is_clipped_to_the_image() {
        let mut image = RgbImage::from_pixel(10, 10, Rgb([200, 100, 50]));
        darken(&mut image, (-5, -5), (3, 20));
        assert_eq!(image.get_pixel(0, 0), &Rgb([80, 40, 20]));
        assert_eq!(image.get_pixel(3, 9), &Rgb([80, 40, 20]));
        assert_eq!(image.get_pixel(4, 0), &Rgb([200, 100, 50]));
    }

    #[test]
    fn missing_font_is_an_error() {
        assert!(LabelFont::load("/nonexistent/font.ttf").is_err());
        let mut junk = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut junk, b"not a font").unwrap();
        assert!(LabelFont::load(junk.path()).is_err());
    }

    #[test]
    fn encodes_jpeg() {
        let image = RgbImage::new(16, 16);
        let bytes = encode_jpeg(&image).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
