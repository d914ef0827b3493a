use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::core::error::{ComicError, Result};
use crate::core::io::Storage;
use crate::utils::text_layout::FontMetrics;

pub type Color = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn inflate(&self, by: u32) -> Self {
        Self {
            x: self.x - by as i32,
            y: self.y - by as i32,
            width: self.width + 2 * by,
            height: self.height + 2 * by,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shadow {
    pub color: Color,
    pub blur: u32,
    pub offset_y: i32,
}

/// A rasterized glyph; `ymin` is the offset of the bitmap's bottom edge from the baseline, y up.
pub struct Glyph {
    pub width: usize,
    pub height: usize,
    pub xmin: i32,
    pub ymin: i32,
    pub advance: f32,
    pub coverage: Vec<u8>,
}

pub trait GlyphSource: FontMetrics {
    fn rasterize(&self, ch: char, font_size: f32) -> Glyph;

    /// The same face, seen only for layout.
    fn metrics(&self) -> &dyn FontMetrics;
}

/// The drawing primitives a render plan is executed against.
pub trait Canvas {
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn fill_rounded_rect(&mut self, rect: Rect, radius: u32, color: Color, shadow: Option<Shadow>);
    fn fill_polygon(&mut self, points: &[(f32, f32)], color: Color);
    fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), color: Color);
    /// Draws `image` scaled to `rect`.
    fn blit(&mut self, image: &RgbaImage, rect: Rect);
    fn draw_text(&mut self, text: &str, x: f32, baseline: f32, font_size: f32, color: Color);
}

/// TrueType/OpenType face backed by fontdue.
pub struct Typeface {
    font: fontdue::Font,
}

impl Typeface {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| ComicError::configuration(format!("invalid font: {}", e)))?;
        Ok(Self { font })
    }

    pub async fn load(storage: &dyn Storage, path: Option<&str>) -> Result<Self> {
        let path = path.ok_or_else(|| {
            ComicError::configuration("render.font_path is not set; speech text needs a font")
        })?;
        if !storage.exists(path).await? {
            return Err(ComicError::configuration(format!("font not found: {}", path)));
        }
        Self::from_bytes(storage.read(path).await?)
    }
}

impl FontMetrics for Typeface {
    fn advance(&self, ch: char, font_size: f32) -> f32 {
        self.font.metrics(ch, font_size).advance_width
    }
}

impl GlyphSource for Typeface {
    fn rasterize(&self, ch: char, font_size: f32) -> Glyph {
        let (metrics, coverage) = self.font.rasterize(ch, font_size);
        Glyph {
            width: metrics.width,
            height: metrics.height,
            xmin: metrics.xmin,
            ymin: metrics.ymin,
            advance: metrics.advance_width,
            coverage,
        }
    }

    fn metrics(&self) -> &dyn FontMetrics {
        self
    }
}

/// CPU canvas over an RGBA buffer. No anti-aliasing on shapes, so output is reproducible.
pub struct RgbaCanvas<'a> {
    image: RgbaImage,
    glyphs: &'a dyn GlyphSource,
}

impl<'a> RgbaCanvas<'a> {
    pub fn new(width: u32, height: u32, glyphs: &'a dyn GlyphSource) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            glyphs,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        Ok(out)
    }

    fn blend(&mut self, x: i32, y: i32, color: Color, coverage: u8) {
        if x < 0 || y < 0 || x >= self.image.width() as i32 || y >= self.image.height() as i32 {
            return;
        }
        let alpha = color[3] as u32 * coverage as u32 / 255;
        if alpha == 0 {
            return;
        }
        let inv = 255 - alpha;
        let px = self.image.get_pixel_mut(x as u32, y as u32);
        for c in 0..3 {
            px[c] = ((color[c] as u32 * alpha + px[c] as u32 * inv + 127) / 255) as u8;
        }
        px[3] = (alpha + px[3] as u32 * inv / 255) as u8;
    }

    fn clipped(&self, rect: Rect) -> Option<(i32, i32, i32, i32)> {
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = (rect.x + rect.width as i32).min(self.image.width() as i32);
        let y1 = (rect.y + rect.height as i32).min(self.image.height() as i32);
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }

    fn rounded_rect_pass(&mut self, rect: Rect, radius: u32, color: Color) {
        let Some((x0, y0, x1, y1)) = self.clipped(rect) else {
            return;
        };
        let r = radius.min(rect.width / 2).min(rect.height / 2) as f32;
        let left = rect.x as f32 + r;
        let right = (rect.x + rect.width as i32) as f32 - r;
        let top = rect.y as f32 + r;
        let bottom = (rect.y + rect.height as i32) as f32 - r;

        for y in y0..y1 {
            for x in x0..x1 {
                let cx = x as f32 + 0.5;
                let cy = y as f32 + 0.5;
                let dx = if cx < left { left - cx } else if cx > right { cx - right } else { 0.0 };
                let dy = if cy < top { top - cy } else if cy > bottom { cy - bottom } else { 0.0 };
                if dx * dx + dy * dy <= r * r {
                    self.blend(x, y, color, 255);
                }
            }
        }
    }
}

impl Canvas for RgbaCanvas<'_> {
    fn fill_rect(&mut self, rect: Rect, color: Color) {
        let Some((x0, y0, x1, y1)) = self.clipped(rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                if color[3] == 255 {
                    self.image.put_pixel(x as u32, y as u32, image::Rgba(color));
                } else {
                    self.blend(x, y, color, 255);
                }
            }
        }
    }

    fn fill_rounded_rect(&mut self, rect: Rect, radius: u32, color: Color, shadow: Option<Shadow>) {
        if let Some(shadow) = shadow {
            // Stacked translucent rings approximate a blur: darkest under the box, fading outward.
            let steps = (shadow.blur / 2).max(1);
            let layer = [
                shadow.color[0],
                shadow.color[1],
                shadow.color[2],
                (shadow.color[3] as u32 / steps).max(1) as u8,
            ];
            let mut base = rect;
            base.y += shadow.offset_y;
            for spread in (1..=steps).rev() {
                self.rounded_rect_pass(base.inflate(spread), radius + spread, layer);
            }
        }
        self.rounded_rect_pass(rect, radius, color);
    }

    fn fill_polygon(&mut self, points: &[(f32, f32)], color: Color) {
        if points.len() < 3 {
            return;
        }
        let min_x = points.iter().map(|p| p.0).fold(f32::MAX, f32::min).floor() as i32;
        let max_x = points.iter().map(|p| p.0).fold(f32::MIN, f32::max).ceil() as i32;
        let min_y = points.iter().map(|p| p.1).fold(f32::MAX, f32::min).floor() as i32;
        let max_y = points.iter().map(|p| p.1).fold(f32::MIN, f32::max).ceil() as i32;

        for y in min_y..max_y {
            for x in min_x..max_x {
                if point_in_polygon(points, x as f32 + 0.5, y as f32 + 0.5) {
                    self.blend(x, y, color, 255);
                }
            }
        }
    }

    fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), color: Color) {
        let dx = to.0 - from.0;
        let dy = to.1 - from.1;
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as i32;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let x = (from.0 + dx * t).floor() as i32;
            let y = (from.1 + dy * t).floor() as i32;
            self.blend(x, y, color, 255);
        }
    }

    fn blit(&mut self, image: &RgbaImage, rect: Rect) {
        if image.width() == rect.width && image.height() == rect.height {
            imageops::overlay(&mut self.image, image, rect.x as i64, rect.y as i64);
        } else {
            let scaled = imageops::resize(image, rect.width, rect.height, FilterType::Triangle);
            imageops::overlay(&mut self.image, &scaled, rect.x as i64, rect.y as i64);
        }
    }

    fn draw_text(&mut self, text: &str, x: f32, baseline: f32, font_size: f32, color: Color) {
        let mut pen = x;
        for ch in text.chars() {
            let glyph = self.glyphs.rasterize(ch, font_size);
            let gx = pen.round() as i32 + glyph.xmin;
            let gy = baseline.round() as i32 - (glyph.height as i32 + glyph.ymin);
            for row in 0..glyph.height {
                for col in 0..glyph.width {
                    let coverage = glyph.coverage[row * glyph.width + col];
                    if coverage > 0 {
                        self.blend(gx + col as i32, gy + row as i32, color, coverage);
                    }
                }
            }
            pen += glyph.advance;
        }
    }
}

fn point_in_polygon(points: &[(f32, f32)], x: f32, y: f32) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::FixedAdvance;

    #[test]
    fn test_fill_rect_is_clipped() {
        let glyphs = FixedAdvance::new(0.5);
        let mut canvas = RgbaCanvas::new(10, 10, &glyphs);
        canvas.fill_rect(Rect::new(-5, 8, 30, 30), [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(0, 9).0, [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(9, 8).0, [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(0, 7).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_rounded_rect_leaves_corners_open() {
        let glyphs = FixedAdvance::new(0.5);
        let mut canvas = RgbaCanvas::new(40, 40, &glyphs);
        canvas.fill_rect(Rect::new(0, 0, 40, 40), [0, 0, 0, 255]);
        canvas.fill_rounded_rect(Rect::new(0, 0, 40, 40), 12, [255, 255, 255, 255], None);
        assert_eq!(canvas.image().get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(20, 20).0, [255, 255, 255, 255]);
        assert_eq!(canvas.image().get_pixel(20, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_translucent_fill_blends() {
        let glyphs = FixedAdvance::new(0.5);
        let mut canvas = RgbaCanvas::new(4, 4, &glyphs);
        canvas.fill_rect(Rect::new(0, 0, 4, 4), [0, 0, 0, 255]);
        canvas.fill_rect(Rect::new(0, 0, 4, 4), [255, 255, 255, 128]);
        let px = canvas.image().get_pixel(1, 1).0;
        assert_eq!(px[3], 255);
        assert!(px[0] > 120 && px[0] < 135);
    }

    #[test]
    fn test_polygon_fill() {
        let glyphs = FixedAdvance::new(0.5);
        let mut canvas = RgbaCanvas::new(20, 20, &glyphs);
        canvas.fill_polygon(&[(0.0, 0.0), (20.0, 0.0), (0.0, 20.0)], [9, 9, 9, 255]);
        assert_eq!(canvas.image().get_pixel(2, 2).0, [9, 9, 9, 255]);
        assert_eq!(canvas.image().get_pixel(18, 18).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_blit_scales_source() {
        let glyphs = FixedAdvance::new(0.5);
        let mut canvas = RgbaCanvas::new(8, 8, &glyphs);
        let source = RgbaImage::from_pixel(2, 2, image::Rgba([200, 10, 10, 255]));
        canvas.blit(&source, Rect::new(0, 0, 8, 8));
        let px = canvas.image().get_pixel(7, 7).0;
        assert!((px[0] as i32 - 200).abs() <= 1);
        assert!((px[1] as i32 - 10).abs() <= 1);
        assert_eq!(canvas.image().get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn test_text_lands_above_baseline() {
        let glyphs = FixedAdvance::new(0.5);
        let mut canvas = RgbaCanvas::new(60, 40, &glyphs);
        canvas.draw_text("ab", 5.0, 30.0, 20.0, [17, 17, 17, 255]);
        assert_eq!(canvas.image().get_pixel(6, 29).0, [17, 17, 17, 255]);
        assert_eq!(canvas.image().get_pixel(6, 31).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_png_is_stable() {
        let glyphs = FixedAdvance::new(0.5);
        let mut canvas = RgbaCanvas::new(16, 16, &glyphs);
        canvas.fill_rect(Rect::new(2, 2, 8, 8), [10, 20, 30, 255]);
        let first = canvas.encode_png().unwrap();
        assert_eq!(first, canvas.encode_png().unwrap());
        assert_eq!(&first[1..4], b"PNG");
    }

    #[test]
    fn test_invalid_font_bytes_are_a_configuration_error() {
        let err = Typeface::from_bytes(vec![1, 2, 3]).err().unwrap();
        assert!(matches!(err, ComicError::Configuration(_)));
    }
}
