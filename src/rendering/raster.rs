/// Rasterizer: paint commands into an RGBA buffer, encoded as PNG.
///
/// Glyphs are drawn as solid cells; legibility of captured text is not a goal.

use super::layout::{CHAR_WIDTH, LINE_HEIGHT};
use super::paint::{PaintCommand, Rgba};
use crate::{Error, Result, Viewport};
use image::{DynamicImage, ImageOutputFormat, Rgba as Pixel, RgbaImage};
use std::io::Cursor;

fn fill(img: &mut RgbaImage, x: i32, y: i32, width: u32, height: u32, rgba: Rgba) {
    let (w, h) = img.dimensions();
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = (x.saturating_add(width as i32)).clamp(0, w as i32) as u32;
    let y1 = (y.saturating_add(height as i32)).clamp(0, h as i32) as u32;
    let px = Pixel([rgba.0, rgba.1, rgba.2, rgba.3]);
    for yy in y0..y1 {
        for xx in x0..x1 {
            img.put_pixel(xx, yy, px);
        }
    }
}

/// Execute paint commands onto a canvas of the viewport's size.
pub fn rasterize(cmds: &[PaintCommand], viewport: Viewport) -> RgbaImage {
    let mut img = RgbaImage::new(viewport.width, viewport.height);
    for cmd in cmds {
        match cmd {
            PaintCommand::SolidRect {
                x,
                y,
                width,
                height,
                rgba,
            } => fill(&mut img, *x, *y, *width, *height, *rgba),
            PaintCommand::Text {
                x,
                y,
                text,
                scale,
                rgba,
            } => {
                let cell = (CHAR_WIDTH * scale) as i32;
                let glyph_w = (CHAR_WIDTH - 2) * scale;
                let glyph_h = LINE_HEIGHT * scale;
                let mut gx = *x;
                for ch in text.chars() {
                    if gx >= viewport.width as i32 {
                        break;
                    }
                    if !ch.is_whitespace() {
                        fill(&mut img, gx, *y, glyph_w, glyph_h, *rgba);
                    }
                    gx = gx.saturating_add(cell);
                }
            }
        }
    }
    img
}

/// Encode a canvas as PNG bytes.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut out, ImageOutputFormat::Png)
        .map_err(|e| Error::Render(format!("PNG encoding failed: {}", e)))?;
    Ok(out.into_inner())
}
