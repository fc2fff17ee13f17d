//! Ground truth and predictions drawn over the specimen photograph.

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::analysis::normalize_identifier;
use crate::correspondence::CorrespondenceTable;
use crate::error::{Error, Result};
use crate::types::{ImageLandmarks, LandmarkSet};

#[derive(Debug, Clone, Copy)]
pub struct OverlayStyle {
    pub truth: Rgba<u8>,
    pub predicted: Rgba<u8>,
    /// Line joining each ground-truth point to its prediction, if any.
    pub link: Option<Rgba<u8>>,
    /// Marker radius in pixels; 0 picks one from the image size.
    pub radius: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            truth: Rgba([124, 252, 0, 255]),
            predicted: Rgba([255, 20, 147, 255]),
            link: Some(Rgba([255, 255, 0, 255])),
            radius: 0,
        }
    }
}

/// The landmarks of one image from both sets.
#[derive(Debug, Clone, Copy)]
pub struct ImagePair<'a> {
    /// Identifier as written in the ground-truth file.
    pub image: &'a str,
    pub truth: &'a ImageLandmarks,
    /// `None` when the predicted set has no entry for the image.
    pub predicted: Option<&'a ImageLandmarks>,
}

/// Pick the image at position `index` of the ground-truth set and find its
/// predictions by normalized identifier.
pub fn select_image<'a>(
    ground_truth: &'a LandmarkSet,
    predicted: &'a LandmarkSet,
    index: usize,
) -> Result<ImagePair<'a>> {
    let (image, truth) = ground_truth
        .nth(index)
        .ok_or(Error::ImageIndexOutOfRange {
            index,
            count: ground_truth.len(),
        })?;
    let wanted = normalize_identifier(image);
    let predicted = predicted
        .iter()
        .find(|(id, _)| normalize_identifier(id) == wanted)
        .map(|(_, lm)| lm);
    Ok(ImagePair {
        image,
        truth,
        predicted,
    })
}

/// Draw one image's landmarks onto `img`.
pub fn draw_overlay(
    img: &mut RgbaImage,
    pair: &ImagePair,
    correspondence: &CorrespondenceTable,
    style: &OverlayStyle,
) {
    let (w, h) = img.dimensions();
    let radius = if style.radius > 0 {
        style.radius
    } else {
        (w.min(h) as i32 / 300).max(2)
    };

    if let (Some(link), Some(predicted)) = (style.link, pair.predicted) {
        for (truth_idx, predicted_idx) in correspondence.iter() {
            if let (Some(t), Some(p)) = (pair.truth.get(&truth_idx), predicted.get(&predicted_idx)) {
                draw_line(
                    img,
                    t.x.round() as i32,
                    t.y.round() as i32,
                    p.x.round() as i32,
                    p.y.round() as i32,
                    link,
                );
            }
        }
    }

    for p in pair.truth.values() {
        draw_circle(img, p.x.round() as i32, p.y.round() as i32, radius, style.truth);
    }
    if let Some(predicted) = pair.predicted {
        for p in predicted.values() {
            draw_circle(img, p.x.round() as i32, p.y.round() as i32, radius, style.predicted);
        }
    }
}

/// Load `photo`, draw the pair on it and save the result to `output`.
pub fn render_overlay<P: AsRef<Path>, Q: AsRef<Path>>(
    photo: P,
    pair: &ImagePair,
    correspondence: &CorrespondenceTable,
    style: &OverlayStyle,
    output: Q,
) -> Result<()> {
    let mut rgba = image::open(photo)?.to_rgba8();
    if pair.predicted.is_none() {
        tracing::warn!(image = pair.image, "no predictions for image, drawing ground truth only");
    }
    draw_overlay(&mut rgba, pair, correspondence, style);
    rgba.save(output)?;
    Ok(())
}

fn put(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    if x >= 0 && x < w as i32 && y >= 0 && y < h as i32 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_circle(img: &mut RgbaImage, cx: i32, cy: i32, radius: i32, color: Rgba<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(img, cx + dx, cy + dy, color);
            }
        }
    }
}

// Bresenham
fn draw_line(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;

    let mut x = x0;
    let mut y = y0;

    loop {
        put(img, x, y, color);

        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }
}
