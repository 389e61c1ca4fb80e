//! Frame annotation: face outline and score text.
//!
//! Text uses a small built-in stroke font covering what the score overlay
//! needs (digits, `/`, `-`, `.`), so no font file has to ship with the binary.

use crate::types::FaceRegion;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

pub const OUTLINE_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);

/// Stroke half-width in pixels (3 px lines).
const STROKE_RADIUS: i32 = 1;
/// Text sits this far up and left of the face's top-left corner.
const TEXT_OFFSET: u32 = 10;
/// Pixels per glyph grid unit; glyphs are 4×6 units, so caps are ~31 px tall.
const GLYPH_UNIT: f32 = 5.25;
const GLYPH_HEIGHT: f32 = 6.0;
const GLYPH_ADVANCE: f32 = 6.0;

type Stroke = &'static [(f32, f32)];

fn glyph(c: char) -> &'static [Stroke] {
    match c {
        '0' => &[&[(0.0, 0.0), (4.0, 0.0), (4.0, 6.0), (0.0, 6.0), (0.0, 0.0)]],
        '1' => &[&[(1.0, 1.0), (2.0, 0.0), (2.0, 6.0)], &[(1.0, 6.0), (3.0, 6.0)]],
        '2' => &[&[(0.0, 0.0), (4.0, 0.0), (4.0, 3.0), (0.0, 3.0), (0.0, 6.0), (4.0, 6.0)]],
        '3' => &[&[(0.0, 0.0), (4.0, 0.0), (4.0, 6.0), (0.0, 6.0)], &[(1.0, 3.0), (4.0, 3.0)]],
        '4' => &[&[(0.0, 0.0), (0.0, 3.0), (4.0, 3.0)], &[(4.0, 0.0), (4.0, 6.0)]],
        '5' => &[&[(4.0, 0.0), (0.0, 0.0), (0.0, 3.0), (4.0, 3.0), (4.0, 6.0), (0.0, 6.0)]],
        '6' => &[&[(4.0, 0.0), (0.0, 0.0), (0.0, 6.0), (4.0, 6.0), (4.0, 3.0), (0.0, 3.0)]],
        '7' => &[&[(0.0, 0.0), (4.0, 0.0), (1.0, 6.0)]],
        '8' => &[&[(0.0, 0.0), (4.0, 0.0), (4.0, 6.0), (0.0, 6.0), (0.0, 0.0)], &[(0.0, 3.0), (4.0, 3.0)]],
        '9' => &[&[(4.0, 3.0), (0.0, 3.0), (0.0, 0.0), (4.0, 0.0), (4.0, 6.0), (0.0, 6.0)]],
        '/' => &[&[(0.0, 6.0), (4.0, 0.0)]],
        '-' => &[&[(0.5, 3.0), (3.5, 3.0)]],
        '.' => &[&[(1.5, 6.0), (2.5, 6.0)]],
        _ => &[],
    }
}

/// Outline `region` on the colour frame. Parts outside the frame are clipped.
pub fn draw_face_outline(image: &mut RgbaImage, region: &FaceRegion) {
    for t in -STROKE_RADIUS..=STROKE_RADIUS {
        let w = region.width as i64 + 2 * t as i64;
        let h = region.height as i64 + 2 * t as i64;
        if w <= 0 || h <= 0 {
            continue;
        }
        let rect = Rect::at(region.x as i32 - t, region.y as i32 - t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, OUTLINE_COLOR);
    }
}

/// Baseline-left text position for a face: 10 px up and left, never negative.
pub fn text_anchor(region: &FaceRegion) -> (u32, u32) {
    (region.x.saturating_sub(TEXT_OFFSET), region.y.saturating_sub(TEXT_OFFSET))
}

/// Draw `text` with its baseline-left corner at `anchor`.
pub fn draw_text(image: &mut RgbaImage, text: &str, anchor: (u32, u32)) {
    let (ax, ay) = (anchor.0 as f32, anchor.1 as f32);
    for (i, c) in text.chars().enumerate() {
        let origin_x = ax + i as f32 * GLYPH_ADVANCE * GLYPH_UNIT;
        for stroke in glyph(c) {
            for pair in stroke.windows(2) {
                let to_px = |(gx, gy): (f32, f32)| {
                    (origin_x + gx * GLYPH_UNIT, ay - (GLYPH_HEIGHT - gy) * GLYPH_UNIT)
                };
                let (start, end) = (to_px(pair[0]), to_px(pair[1]));
                for dy in -STROKE_RADIUS..=STROKE_RADIUS {
                    for dx in -STROKE_RADIUS..=STROKE_RADIUS {
                        let (ox, oy) = (dx as f32, dy as f32);
                        draw_line_segment_mut(
                            image,
                            (start.0 + ox, start.1 + oy),
                            (end.0 + ox, end.1 + oy),
                            TEXT_COLOR,
                        );
                    }
                }
            }
        }
    }
}

/// Score overlay text: `"<score>/<average>"`.
pub fn score_text(score: i32, average: i32) -> String {
    format!("{score}/{average}")
}
