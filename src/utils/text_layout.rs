//! Speech-bubble text layout.
//!
//! Everything here is a pure function of the text, the container width and the font metrics, so
//! an on-screen preview and the burned-in export produce the same geometry.

pub const MAX_LINES: usize = 3;
pub const MAX_FONT_SIZE: u32 = 36;
const MIN_FONT_SIZE: u32 = 16;
const MIN_BOX_WIDTH: u32 = 120;

/// Horizontal advance of glyphs at a given pixel size.
pub trait FontMetrics {
    fn advance(&self, ch: char, font_size: f32) -> f32;

    fn measure(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(|ch| self.advance(ch, font_size)).sum()
    }
}

/// Font size, line height and padding for a container, linear in its width: 1024px gives 22px.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechMetrics {
    pub font_size: u32,
    pub line_height: u32,
    pub padding: u32,
}

impl SpeechMetrics {
    pub fn for_container(width: u32) -> Self {
        let base = ((width as f64 * 22.0 / 1024.0).round() as u32).max(MIN_FONT_SIZE);
        let font_size = base.min(MAX_FONT_SIZE);
        Self {
            font_size,
            line_height: (font_size as f64 * 1.25).round() as u32,
            padding: (font_size as f64 * 0.9).round() as u32,
        }
    }

    pub fn min_box_width(&self) -> u32 {
        MIN_BOX_WIDTH.max((self.font_size as f64 * 6.0).round() as u32)
    }

    /// Distance from the bottom of a line box up to its baseline.
    pub fn baseline_lift(&self) -> u32 {
        (self.font_size as f64 * 0.25).round() as u32
    }

    pub fn tail_height(&self) -> u32 {
        12u32.max((self.font_size as f64 * 0.6).round() as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BubbleSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BubbleLayout {
    pub lines: Vec<String>,
    pub size: BubbleSize,
    pub metrics: SpeechMetrics,
}

/// Greedy per-character wrap. Scripts without reliable word boundaries make word wrapping useless,
/// so a line closes as soon as the next character would overflow it. Output is clipped to
/// [`MAX_LINES`] without an ellipsis.
pub fn wrap(text: &str, max_width: f32, font: &dyn FontMetrics, font_size: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_width = 0.0f32;

    for ch in text.chars() {
        let advance = font.advance(ch, font_size);
        if line_width + advance > max_width && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line_width = 0.0;
        }
        line.push(ch);
        line_width += advance;
    }
    if !line.is_empty() {
        lines.push(line);
    }

    lines.truncate(MAX_LINES);
    lines
}

pub fn bubble_geometry(
    lines: &[String],
    font: &dyn FontMetrics,
    metrics: &SpeechMetrics,
    max_width: u32,
) -> BubbleSize {
    let size = metrics.font_size as f32;
    let widest = lines
        .iter()
        .map(|l| font.measure(l, size))
        .fold(0.0f32, f32::max);
    let padded = (widest + 2.0 * metrics.padding as f32).round() as u32;

    BubbleSize {
        width: padded.max(metrics.min_box_width()).min(max_width),
        height: lines.len() as u32 * metrics.line_height + 2 * metrics.padding,
    }
}

/// Bubbles may take up to half of the container width.
pub fn max_bubble_width(container_width: u32) -> u32 {
    container_width / 2
}

/// Full layout for one line of speech inside a container, or `None` for empty text.
pub fn layout_bubble(text: &str, container_width: u32, font: &dyn FontMetrics) -> Option<BubbleLayout> {
    if text.is_empty() {
        return None;
    }
    let metrics = SpeechMetrics::for_container(container_width);
    let max_width = max_bubble_width(container_width);
    let wrap_width = max_width.saturating_sub(2 * metrics.padding) as f32;

    let lines = wrap(text, wrap_width, font, metrics.font_size as f32);
    let size = bubble_geometry(&lines, font, &metrics, max_width);
    Some(BubbleLayout {
        lines,
        size,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::FixedAdvance;

    #[test]
    fn test_metrics_scale_with_container() {
        let m = SpeechMetrics::for_container(1024);
        assert_eq!(m.font_size, 22);
        assert_eq!(SpeechMetrics::for_container(2048).font_size, 36);
        assert_eq!(SpeechMetrics::for_container(1000).font_size, 21);
        assert_eq!(SpeechMetrics::for_container(300).font_size, 16);
        assert_eq!(SpeechMetrics::for_container(4096).font_size, MAX_FONT_SIZE);
        assert_eq!(m.line_height, 28);
        assert_eq!(m.padding, 20);
        assert_eq!(m.min_box_width(), 132);
        assert_eq!(m.baseline_lift(), 6);
        assert_eq!(m.tail_height(), 13);
    }

    #[test]
    fn test_wrap_breaks_per_character() {
        let font = FixedAdvance::new(0.5);
        // 10px per char at size 20, so 4 chars fit in 45px.
        let lines = wrap("abcdefghij", 45.0, &font, 20.0);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_wrap_clips_to_three_lines() {
        let font = FixedAdvance::new(0.5);
        let lines = wrap("aaaabbbbccccdddd", 40.0, &font, 20.0);
        assert_eq!(lines, vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn test_wrap_never_exceeds_width_except_single_wide_char() {
        let font = FixedAdvance::new(0.5);
        let text = "雨の屋上でふたりは空を見上げた。Rain again?";
        for max_width in [15.0f32, 33.0, 60.0, 97.0, 500.0] {
            let lines = wrap(text, max_width, &font, 20.0);
            assert!(lines.len() <= MAX_LINES);
            for line in &lines {
                let w = font.measure(line, 20.0);
                assert!(w <= max_width || line.chars().count() == 1, "{:?} at {}", line, max_width);
            }
        }
        // A single full-width glyph wider than the box still gets its own line.
        assert_eq!(wrap("雨雨", 5.0, &font, 20.0), vec!["雨", "雨"]);
    }

    #[test]
    fn test_wrap_empty_text() {
        let font = FixedAdvance::new(0.5);
        assert!(wrap("", 100.0, &font, 20.0).is_empty());
    }

    #[test]
    fn test_bubble_geometry_clamps_and_is_deterministic() {
        let font = FixedAdvance::new(0.5);
        let metrics = SpeechMetrics::for_container(1024);

        let short = vec!["Hi".to_string()];
        let first = bubble_geometry(&short, &font, &metrics, 512);
        assert_eq!(first, bubble_geometry(&short, &font, &metrics, 512));
        assert_eq!(first.width, metrics.min_box_width());
        assert_eq!(first.height, metrics.line_height + 2 * metrics.padding);

        let long = vec!["x".repeat(80)];
        let wide = bubble_geometry(&long, &font, &metrics, 512);
        assert_eq!(wide.width, 512);
    }

    #[test]
    fn test_layout_bubble_respects_half_width() {
        let font = FixedAdvance::new(0.5);
        assert!(layout_bubble("", 1024, &font).is_none());

        let layout = layout_bubble(&"word ".repeat(40), 1024, &font).unwrap();
        assert_eq!(layout.lines.len(), MAX_LINES);
        assert!(layout.size.width <= 512);
        assert_eq!(
            layout.size.height,
            3 * layout.metrics.line_height + 2 * layout.metrics.padding
        );
    }
}
