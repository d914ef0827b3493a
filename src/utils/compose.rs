//! Strip and single-panel composition.
//!
//! Composition is split in two: a pure planning pass turns panel sizes, text and image
//! availability into a [`RenderPlan`], and a single draw pass executes that plan on a [`Canvas`].
//! Planning never touches pixels, so geometry is testable on its own and the same plan drives any
//! canvas.

use image::RgbaImage;

use crate::core::error::{ComicError, Result};
use crate::core::state::{PanelSize, PanelText, PANEL_COUNT};
use crate::utils::data_url::InlineImage;
use crate::utils::raster::{Canvas, Color, GlyphSource, Rect, RgbaCanvas, Shadow};
use crate::utils::text_layout::{layout_bubble, BubbleLayout, FontMetrics};

pub const SEPARATOR: u32 = 4;
pub const MARGIN: u32 = 16;
pub const BUBBLE_INSET: u32 = 12;
const BUBBLE_RADIUS: u32 = 12;
const HATCH_SPACING: i32 = 24;
const LABEL_SIZE: f32 = 20.0;

const WHITE: Color = [255, 255, 255, 255];
const BLACK: Color = [0, 0, 0, 255];
const INK: Color = [0x11, 0x11, 0x11, 255];
const BUBBLE_FILL: Color = [255, 255, 255, 217];
const BUBBLE_SHADOW: Shadow = Shadow {
    color: [0, 0, 0, 38],
    blur: 8,
    offset_y: 1,
};
const PLACEHOLDER_BG: Color = [0xf6, 0xf6, 0xf7, 255];
const PLACEHOLDER_HATCH: Color = [0xe2, 0xe2, 0xe6, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    FillRect {
        rect: Rect,
        color: Color,
    },
    RoundedRect {
        rect: Rect,
        radius: u32,
        color: Color,
        shadow: Option<Shadow>,
    },
    Polygon {
        points: Vec<(f32, f32)>,
        color: Color,
    },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        color: Color,
    },
    /// Draws `images[slot]` scaled into `rect`.
    Image {
        slot: usize,
        rect: Rect,
    },
    Text {
        text: String,
        x: f32,
        baseline: f32,
        font_size: f32,
        color: Color,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub width: u32,
    pub height: u32,
    pub ops: Vec<DrawOp>,
}

impl RenderPlan {
    pub fn execute(&self, canvas: &mut dyn Canvas, images: &[Option<RgbaImage>]) {
        for op in &self.ops {
            match op {
                DrawOp::FillRect { rect, color } => canvas.fill_rect(*rect, *color),
                DrawOp::RoundedRect {
                    rect,
                    radius,
                    color,
                    shadow,
                } => canvas.fill_rounded_rect(*rect, *radius, *color, *shadow),
                DrawOp::Polygon { points, color } => canvas.fill_polygon(points, *color),
                DrawOp::Line { from, to, color } => canvas.stroke_line(*from, *to, *color),
                DrawOp::Image { slot, rect } => {
                    if let Some(Some(image)) = images.get(*slot) {
                        canvas.blit(image, *rect);
                    }
                }
                DrawOp::Text {
                    text,
                    x,
                    baseline,
                    font_size,
                    color,
                } => canvas.draw_text(text, *x, *baseline, *font_size, *color),
            }
        }
    }

    /// Rectangles of every bubble body, in draw order.
    pub fn bubbles(&self) -> Vec<Rect> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::RoundedRect { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }
}

/// Total strip height: panels, one margin between neighbours, a separator above each panel and
/// one closing separator.
pub fn strip_height(panel_count: usize, panel_height: u32) -> u32 {
    let n = panel_count as u32;
    n * panel_height + n.saturating_sub(1) * MARGIN + (n + 1) * SEPARATOR
}

pub fn plan_strip(
    available: &[bool],
    texts: &[PanelText],
    size: PanelSize,
    font: &dyn FontMetrics,
) -> Result<RenderPlan> {
    if available.len() != texts.len() {
        return Err(ComicError::validation(format!(
            "{} panel images but {} panel texts",
            available.len(),
            texts.len()
        )));
    }

    let height = strip_height(available.len(), size.height);
    let mut ops = vec![DrawOp::FillRect {
        rect: Rect::new(0, 0, size.width, height),
        color: WHITE,
    }];

    let mut y = 0i32;
    for (i, (&has_image, text)) in available.iter().zip(texts).enumerate() {
        ops.push(DrawOp::FillRect {
            rect: Rect::new(0, y, size.width, SEPARATOR),
            color: BLACK,
        });
        y += SEPARATOR as i32;

        plan_panel(&mut ops, i, i, y, size, has_image, text, font);
        y += size.height as i32;

        if i + 1 < available.len() {
            ops.push(DrawOp::FillRect {
                rect: Rect::new(0, y, size.width, MARGIN),
                color: WHITE,
            });
            y += MARGIN as i32;
        }
    }
    ops.push(DrawOp::FillRect {
        rect: Rect::new(0, y, size.width, SEPARATOR),
        color: BLACK,
    });

    Ok(RenderPlan {
        width: size.width,
        height,
        ops,
    })
}

/// One panel with its bubbles at the panel's own size, without separators. The image, if any,
/// is slot 0; `index` only names the placeholder.
pub fn plan_single_panel(
    index: usize,
    has_image: bool,
    text: &PanelText,
    size: PanelSize,
    font: &dyn FontMetrics,
) -> Result<RenderPlan> {
    if index >= PANEL_COUNT {
        return Err(ComicError::validation(format!("panel index {} out of range", index)));
    }
    let mut ops = vec![DrawOp::FillRect {
        rect: Rect::new(0, 0, size.width, size.height),
        color: WHITE,
    }];
    plan_panel(&mut ops, 0, index, 0, size, has_image, text, font);
    Ok(RenderPlan {
        width: size.width,
        height: size.height,
        ops,
    })
}

#[allow(clippy::too_many_arguments)]
fn plan_panel(
    ops: &mut Vec<DrawOp>,
    slot: usize,
    index: usize,
    top: i32,
    size: PanelSize,
    has_image: bool,
    text: &PanelText,
    font: &dyn FontMetrics,
) {
    let rect = Rect::new(0, top, size.width, size.height);
    if has_image {
        ops.push(DrawOp::Image { slot, rect });
    } else {
        plan_placeholder(ops, index, rect, font);
    }

    if let Some(layout) = layout_bubble(&text.left, size.width, font) {
        plan_bubble(ops, &layout, Side::Left, top, size);
    }
    if let Some(layout) = layout_bubble(&text.right, size.width, font) {
        plan_bubble(ops, &layout, Side::Right, top, size);
    }
}

/// Light tile with diagonal hatching and a centered "Panel N" label.
fn plan_placeholder(ops: &mut Vec<DrawOp>, index: usize, rect: Rect, font: &dyn FontMetrics) {
    ops.push(DrawOp::FillRect {
        rect,
        color: PLACEHOLDER_BG,
    });

    let w = rect.width as i32;
    let h = rect.height as i32;
    let mut i = -h;
    while i < w + h {
        // Slope-1 line from (i, 0) to (i + h, h), clipped to the tile.
        let t0 = (-i).max(0);
        let t1 = (w - i).min(h);
        if t0 < t1 {
            ops.push(DrawOp::Line {
                from: ((i + t0) as f32, (rect.y + t0) as f32),
                to: ((i + t1 - 1) as f32, (rect.y + t1 - 1) as f32),
                color: PLACEHOLDER_HATCH,
            });
        }
        i += HATCH_SPACING;
    }

    let label = format!("Panel {}", index + 1);
    let label_width = font.measure(&label, LABEL_SIZE);
    ops.push(DrawOp::Text {
        x: (w as f32 - label_width) / 2.0,
        baseline: rect.y as f32 + h as f32 / 2.0,
        text: label,
        font_size: LABEL_SIZE,
        color: INK,
    });
}

fn plan_bubble(ops: &mut Vec<DrawOp>, layout: &BubbleLayout, side: Side, top: i32, size: PanelSize) {
    let metrics = &layout.metrics;
    let bw = layout.size.width as i32;
    let bh = layout.size.height as i32;
    let x = match side {
        Side::Left => BUBBLE_INSET as i32,
        Side::Right => size.width as i32 - bw - BUBBLE_INSET as i32,
    };
    let offset = (size.height as f64 * 0.04).max(24.0).round() as i32;
    let y = top + offset;

    ops.push(DrawOp::RoundedRect {
        rect: Rect::new(x, y, layout.size.width, layout.size.height),
        radius: BUBBLE_RADIUS,
        color: BUBBLE_FILL,
        shadow: Some(BUBBLE_SHADOW),
    });

    let base = (y + bh) as f32;
    let tip = base + metrics.tail_height() as f32;
    let points = match side {
        Side::Left => {
            let x = x as f32;
            vec![(x + 24.0, base), (x + 40.0, tip), (x + 48.0, base)]
        }
        Side::Right => {
            let right = (x + bw) as f32;
            vec![(right - 24.0, base), (right - 40.0, tip), (right - 48.0, base)]
        }
    };
    ops.push(DrawOp::Polygon {
        points,
        color: BUBBLE_FILL,
    });

    let pad = metrics.padding as i32;
    let lift = metrics.baseline_lift() as i32;
    for (i, line) in layout.lines.iter().enumerate() {
        let line_no = i as i32 + 1;
        ops.push(DrawOp::Text {
            text: line.clone(),
            x: (x + pad) as f32,
            baseline: (y + pad + line_no * metrics.line_height as i32 - lift) as f32,
            font_size: metrics.font_size as f32,
            color: INK,
        });
    }
}

/// Decodes a `data:` URL into pixels.
pub fn decode_image(data_url: &str) -> Result<RgbaImage> {
    let bytes = InlineImage::parse(data_url)?.decode()?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

/// Stacks the panels vertically, burns speech text in, and encodes a PNG.
pub fn compose_strip(
    images: &[Option<RgbaImage>],
    texts: &[PanelText],
    size: PanelSize,
    glyphs: &dyn GlyphSource,
) -> Result<Vec<u8>> {
    let available: Vec<bool> = images.iter().map(Option::is_some).collect();
    let plan = plan_strip(&available, texts, size, glyphs.metrics())?;
    let mut canvas = RgbaCanvas::new(plan.width, plan.height, glyphs);
    plan.execute(&mut canvas, images);
    canvas.encode_png()
}

pub fn compose_single_panel(
    index: usize,
    image: Option<RgbaImage>,
    text: &PanelText,
    size: PanelSize,
    glyphs: &dyn GlyphSource,
) -> Result<Vec<u8>> {
    let plan = plan_single_panel(index, image.is_some(), text, size, glyphs.metrics())?;
    let mut canvas = RgbaCanvas::new(plan.width, plan.height, glyphs);
    plan.execute(&mut canvas, &[image]);
    canvas.encode_png()
}
