//! Text instructions sent alongside panel and portrait requests.
//!
//! Fragment order matters to the image model, so [`build_panel_prompt`] always emits the same
//! sections in the same sequence and simply skips the empty ones.

use crate::core::error::Result;
use crate::core::state::{CharacterId, PanelSize, Session};
use crate::services::gemini::PortraitSpec;

pub const TASK_FRAMING: &str = "Task: Generate a manga-style panel image. If a rough sketch is provided, use it only as a loose composition hint; otherwise compose naturally. Maintain character/style consistency from reference images. Do not draw any text.";

pub const DEFAULT_NEGATIVES: [&str; 2] = [
    "Do not render any text or speech balloons",
    "Ignore and remove any existing text in the input",
];

const SKETCH_NEGATIVE: &str = "clean background; remove any canvas scribble artifacts";

const SHOTS: [(&str, &str); 9] = [
    ("wide", "wide establishing shot, show setting and positions"),
    ("waist", "medium waist-up framing"),
    ("two_shot", "two-shot with both characters A and B in frame"),
    ("closeup_A", "close-up framing on character A"),
    ("closeup_B", "close-up framing on character B"),
    ("reaction_A", "reaction shot focusing on character A"),
    ("reaction_B", "reaction shot focusing on character B"),
    ("ots_A", "over-the-shoulder shot from A's viewpoint"),
    ("ots_B", "over-the-shoulder shot from B's viewpoint"),
];

const STYLE_TONES: [(&str, &str); 15] = [
    ("mono-screen", "manga monochrome with screentone (halftone dots), clean ink lines, no color"),
    ("line-bold", "bold black-and-white line art, high contrast, minimal shading, no color"),
    ("soft-mono", "soft grayscale manga tones, smooth shading, gentle contrast, no color"),
    ("shonen-ink", "shonen manga style: dynamic action, speed lines and impact frames, strong blacks, crisp inking, no color"),
    ("shojo-mono", "shojo manga style: delicate thin lines, large expressive eyes, sparkles/flowers motifs, light screentones, no color"),
    ("seinen-real", "seinen manga style: realistic proportions, detailed backgrounds, fine cross-hatching, heavy shadows, no color"),
    ("gekiga", "gekiga style: gritty realistic storytelling, dense hatching and heavy shadows, serious tone, no color"),
    ("retro-90s", "1990s manga style: retro halftone textures, hair shine shapes, clean ink lines, screentone gradients, no color"),
    ("horror-ink", "horror manga style: scratchy ink textures, heavy blacks, high contrast, eerie atmosphere, no color"),
    ("sumi-brush", "sumi-e brush pen look: expressive brush strokes, ink wash textures, rough paper feel, no color"),
    ("hatch", "pen cross-hatching shading, fine linework, monochrome, no color"),
    ("chibi-gag", "super-deformed chibi comedic style: round proportions, simple shapes, bold clean lines, minimal shading, no color"),
    ("flat-color", "flat cel-shaded comic coloring, limited palette, crisp edges"),
    ("pastel-color", "soft pastel colors, light tones, gentle gradients"),
    ("webtoon-color", "color webtoon look, soft gradients and clean flat shading, modern vertical-comic aesthetic"),
];

const MONOCHROME_TONES: [&str; 12] = [
    "mono-screen",
    "line-bold",
    "soft-mono",
    "shonen-ink",
    "shojo-mono",
    "seinen-real",
    "gekiga",
    "retro-90s",
    "horror-ink",
    "sumi-brush",
    "hatch",
    "chibi-gag",
];

const CHARACTER_PRESETS: [(&str, &str); 14] = [
    ("line-bold", "bold line art, clean manga ink, minimal shading, no color"),
    ("soft-mono", "soft grayscale manga tones, gentle contrast, no color"),
    ("shonen-ink", "shonen manga style: dynamic, strong blacks, crisp inking, speed lines, no color"),
    ("shojo-mono", "shojo manga style: delicate thin lines, large expressive eyes, sparkles/flowers motifs, no color"),
    ("seinen-real", "seinen manga style: realistic, fine cross-hatching, heavy shadows, no color"),
    ("gekiga", "gekiga style: gritty realistic, dense hatching, hard shadows, no color"),
    ("retro-90s", "1990s manga style: retro halftone textures, hair shine shapes, clean ink, no color"),
    ("horror-ink", "horror manga style: scratchy ink, heavy blacks, eerie mood, no color"),
    ("sumi-brush", "sumi-e brush look: expressive brush strokes, ink wash, no color"),
    ("hatch", "pen cross-hatching shading, monochrome, no color"),
    ("chibi-gag", "super-deformed chibi comedic style: round proportions, simple shapes, bold clean lines, no color"),
    ("flat-color", "flat cel-shaded comic coloring, limited palette"),
    ("pastel-color", "soft pastel colors, gentle gradients"),
    ("webtoon-color", "color webtoon look, soft gradients and clean edges"),
];

const PORTRAIT_PRESETS: [(&str, &str); 14] = [
    ("line-bold", "bold line art, clean manga ink, minimal shading, no color"),
    ("soft-mono", "soft grayscale manga tones, gentle contrast, no color"),
    ("shonen-ink", "shonen manga portrait: dynamic, strong blacks, crisp inking, speed-line feel, no color"),
    ("shojo-mono", "shojo manga portrait: delicate thin lines, large expressive eyes, sparkles/flowers motifs, no color"),
    ("seinen-real", "seinen manga portrait: realistic features, fine hatching, heavy shadows, no color"),
    ("gekiga", "gekiga portrait: gritty realistic, dense hatching, hard shadows, no color"),
    ("retro-90s", "1990s manga portrait: retro halftone textures, hair shine shapes, clean ink, no color"),
    ("horror-ink", "horror manga portrait: scratchy ink, heavy blacks, eerie mood, no color"),
    ("sumi-brush", "sumi-e brush style portrait: expressive brush strokes, ink wash texture, no color"),
    ("hatch", "pen cross-hatching shading portrait, monochrome, no color"),
    ("chibi-gag", "super-deformed chibi portrait: round proportions, simple shapes, bold clean lines, minimal shading, no color"),
    ("flat-color", "flat cel shading, limited palette, comic style"),
    ("pastel-color", "soft pastel coloring, gentle gradients"),
    ("webtoon-color", "color webtoon portrait: soft gradients, clean flat shading"),
];

/// Table lookup; unknown keys pass through as written.
fn lookup<'a>(table: &[(&str, &'a str)], key: &'a str) -> &'a str {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or(key)
}

/// Style keys the prompt tables know, monochrome ones first.
pub fn style_tone_keys() -> Vec<&'static str> {
    STYLE_TONES.iter().map(|(k, _)| *k).collect()
}

fn is_monochrome(style_tone: &str) -> bool {
    MONOCHROME_TONES.contains(&style_tone) || style_tone.contains("mono") || style_tone.contains("screen")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterStyle {
    pub style_preset: String,
    pub prompt: String,
}

/// Everything the prompt builder reads for one panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelGuidance {
    pub description: String,
    pub layout_hint: String,
    /// Shot key; keys outside the table are passed through.
    pub shot: String,
    pub style_tone: String,
    pub character_a: Option<CharacterStyle>,
    /// Set only while character B is active.
    pub character_b: Option<CharacterStyle>,
    pub output_size: PanelSize,
    /// Empty means the defaults.
    pub negatives: Vec<String>,
    pub has_sketch: bool,
}

impl PanelGuidance {
    pub fn new(output_size: PanelSize) -> Self {
        Self {
            description: String::new(),
            layout_hint: String::new(),
            shot: String::new(),
            style_tone: String::new(),
            character_a: None,
            character_b: None,
            output_size,
            negatives: Vec::new(),
            has_sketch: false,
        }
    }

    pub fn from_session(session: &Session, index: usize) -> Result<Self> {
        let panel = session.panel(index)?;
        let style = |id| {
            let c = session.character(id);
            CharacterStyle {
                style_preset: c.style_preset.clone(),
                prompt: c.prompt.clone(),
            }
        };

        Ok(Self {
            description: panel.description.clone(),
            layout_hint: panel.layout_hint.clone(),
            shot: panel.shot.map(|s| s.key().to_string()).unwrap_or_default(),
            style_tone: session.style_tone.clone(),
            character_a: Some(style(CharacterId::A)),
            character_b: session.use_character_b().then(|| style(CharacterId::B)),
            output_size: session.panel_size,
            negatives: Vec::new(),
            has_sketch: panel.rough_sketch.is_some(),
        })
    }
}

fn character_fragment(label: &str, style: Option<&CharacterStyle>) -> Option<String> {
    let style = style?;
    let mut parts = Vec::new();
    if !style.style_preset.is_empty() {
        parts.push(format!("preset: {}", lookup(&CHARACTER_PRESETS, &style.style_preset)));
    }
    if !style.prompt.is_empty() {
        parts.push(format!("traits: {}", style.prompt));
    }
    (!parts.is_empty()).then(|| format!("Character {} style: {}", label, parts.join("; ")))
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}

fn size_fragment(size: PanelSize) -> String {
    let g = gcd(size.width, size.height);
    format!(
        "Output size: {}x{} ({}:{})",
        size.width,
        size.height,
        size.width / g,
        size.height / g
    )
}

pub fn build_panel_prompt(guidance: &PanelGuidance) -> Vec<String> {
    let mut fragments = vec![TASK_FRAMING.to_string()];

    if !guidance.description.is_empty() {
        fragments.push(format!("Scene: {}", guidance.description));
    }
    if !guidance.layout_hint.is_empty() {
        fragments.push(format!("Layout hint: {}", guidance.layout_hint));
    }
    if !guidance.shot.is_empty() {
        fragments.push(format!("Shot: {}", lookup(&SHOTS, &guidance.shot)));
    }
    if !guidance.style_tone.is_empty() {
        fragments.push(format!("Style tone: {}", lookup(&STYLE_TONES, &guidance.style_tone)));
        if is_monochrome(&guidance.style_tone) {
            fragments.push("Color: monochrome only".to_string());
        }
    }
    fragments.extend(character_fragment("A", guidance.character_a.as_ref()));
    fragments.extend(character_fragment("B", guidance.character_b.as_ref()));
    fragments.push(size_fragment(guidance.output_size));

    if guidance.negatives.is_empty() {
        fragments.extend(DEFAULT_NEGATIVES.iter().map(|n| format!("Negative: {}", n)));
    } else {
        fragments.extend(guidance.negatives.iter().map(|n| format!("Negative: {}", n)));
    }
    if guidance.has_sketch {
        fragments.push(format!("Negative: {}", SKETCH_NEGATIVE));
    }
    fragments
}

pub fn portrait_fragments(spec: &PortraitSpec) -> Vec<String> {
    let mut fragments = vec![format!(
        "Create a square character reference portrait for manga production. {}x{}, neutral background, no text.",
        spec.size.width, spec.size.height
    )];
    if !spec.name.is_empty() {
        fragments.push(format!("Character: {}", spec.name));
    }
    if !spec.style_preset.is_empty() {
        fragments.push(format!("Style preset: {}", lookup(&PORTRAIT_PRESETS, &spec.style_preset)));
    }
    if !spec.prompt.is_empty() {
        fragments.push(format!("Additional style/traits: {}", spec.prompt));
    }
    fragments.push("Do not render any captions, speech balloons, or UI text.".to_string());
    fragments
}
