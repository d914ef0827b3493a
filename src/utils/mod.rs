pub mod compose;
pub mod data_url;
pub mod raster;
pub mod text_layout;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::utils::raster::{Glyph, GlyphSource};
    use crate::utils::text_layout::FontMetrics;

    /// Monospace stand-in for a real face: ASCII advances `ratio * size`, everything else a full em.
    /// Glyphs rasterize as solid boxes sitting on the baseline.
    pub struct FixedAdvance {
        ratio: f32,
    }

    impl FixedAdvance {
        pub fn new(ratio: f32) -> Self {
            Self { ratio }
        }
    }

    impl FontMetrics for FixedAdvance {
        fn advance(&self, ch: char, font_size: f32) -> f32 {
            if ch.is_ascii() {
                font_size * self.ratio
            } else {
                font_size
            }
        }
    }

    impl GlyphSource for FixedAdvance {
        fn rasterize(&self, ch: char, font_size: f32) -> Glyph {
            let advance = self.advance(ch, font_size);
            let width = (advance * 0.8).max(1.0) as usize;
            let height = (font_size * 0.7).max(1.0) as usize;
            Glyph {
                width,
                height,
                xmin: 0,
                ymin: 0,
                advance,
                coverage: vec![255; width * height],
            }
        }

        fn metrics(&self) -> &dyn FontMetrics {
            self
        }
    }
}
