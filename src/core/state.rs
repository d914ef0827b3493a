use crate::core::error::{ComicError, Result};
use crate::core::io::Storage;
use crate::utils::data_url::{mime_for_path, InlineImage};

pub const PANEL_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterId {
    A,
    B,
}

impl CharacterId {
    pub const ALL: [CharacterId; 2] = [CharacterId::A, CharacterId::B];

    fn slot(self) -> usize {
        match self {
            CharacterId::A => 0,
            CharacterId::B => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CharacterId::A => "A",
            CharacterId::B => "B",
        }
    }
}

/// One of the two recurring figures. Image blobs are kept as `data:` URLs.
#[derive(Clone, Debug)]
pub struct Character {
    id: CharacterId,
    pub name: String,
    /// Free-text traits.
    pub prompt: String,
    pub style_preset: String,
    pub references: Vec<String>,
    pub generated_portrait: Option<String>,
}

impl Character {
    pub fn new(id: CharacterId, style_preset: &str) -> Self {
        Self {
            id,
            name: String::new(),
            prompt: String::new(),
            style_preset: style_preset.to_string(),
            references: Vec::new(),
            generated_portrait: None,
        }
    }

    pub fn id(&self) -> CharacterId {
        self.id
    }
}

/// Camera framing directive. `two_shot` and every `_B` key need character B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shot {
    Wide,
    Waist,
    TwoShot,
    CloseupA,
    CloseupB,
    ReactionA,
    ReactionB,
    OtsA,
    OtsB,
}

impl Shot {
    pub const ALL: [Shot; 9] = [
        Shot::Wide,
        Shot::Waist,
        Shot::CloseupA,
        Shot::CloseupB,
        Shot::TwoShot,
        Shot::ReactionA,
        Shot::ReactionB,
        Shot::OtsA,
        Shot::OtsB,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Shot::Wide => "wide",
            Shot::Waist => "waist",
            Shot::TwoShot => "two_shot",
            Shot::CloseupA => "closeup_A",
            Shot::CloseupB => "closeup_B",
            Shot::ReactionA => "reaction_A",
            Shot::ReactionB => "reaction_B",
            Shot::OtsA => "ots_A",
            Shot::OtsB => "ots_B",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key)
    }

    pub fn requires_character_b(self) -> bool {
        matches!(
            self,
            Shot::TwoShot | Shot::CloseupB | Shot::ReactionB | Shot::OtsB
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelStatus {
    Draft,
    Generating,
    Done,
    Failed,
}

#[derive(Clone, Debug)]
pub struct Panel {
    index: usize,
    pub description: String,
    pub line_a: String,
    /// Only meaningful while character B is active.
    pub line_b: String,
    pub layout_hint: String,
    pub shot: Option<Shot>,
    pub rough_sketch: Option<String>,
    pub generated_image: Option<String>,
    status: PanelStatus,
}

impl Panel {
    fn new(index: usize) -> Self {
        Self {
            index,
            description: String::new(),
            line_a: String::new(),
            line_b: String::new(),
            layout_hint: String::new(),
            shot: None,
            rough_sketch: None,
            generated_image: None,
            status: PanelStatus::Draft,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> PanelStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: PanelStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelSize {
    pub width: u32,
    pub height: u32,
}

impl PanelSize {
    pub fn square(width: u32) -> Self {
        Self {
            width,
            height: width,
        }
    }
}

/// Speech text burned into one panel: A on the left, B on the right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelText {
    pub left: String,
    pub right: String,
}

/// Everything one strip-making session works on. Lives only in memory.
#[derive(Clone, Debug)]
pub struct Session {
    characters: [Character; 2],
    panels: [Panel; PANEL_COUNT],
    use_character_b: bool,
    pub style_tone: String,
    pub panel_size: PanelSize,
}

impl Session {
    pub fn new(style_tone: &str, panel_width: u32) -> Self {
        Self {
            characters: [
                Character::new(CharacterId::A, style_tone),
                Character::new(CharacterId::B, style_tone),
            ],
            panels: std::array::from_fn(Panel::new),
            use_character_b: false,
            style_tone: style_tone.to_string(),
            panel_size: PanelSize::square(panel_width),
        }
    }

    pub fn character(&self, id: CharacterId) -> &Character {
        &self.characters[id.slot()]
    }

    pub fn character_mut(&mut self, id: CharacterId) -> &mut Character {
        &mut self.characters[id.slot()]
    }

    pub fn panels(&self) -> &[Panel; PANEL_COUNT] {
        &self.panels
    }

    pub fn panel(&self, index: usize) -> Result<&Panel> {
        self.panels
            .get(index)
            .ok_or_else(|| ComicError::validation(format!("no panel at index {}", index)))
    }

    pub fn panel_mut(&mut self, index: usize) -> Result<&mut Panel> {
        self.panels
            .get_mut(index)
            .ok_or_else(|| ComicError::validation(format!("no panel at index {}", index)))
    }

    pub fn use_character_b(&self) -> bool {
        self.use_character_b
    }

    /// The user's own toggle. The pipeline only ever turns it on.
    pub fn set_use_character_b(&mut self, enabled: bool) {
        self.use_character_b = enabled;
    }

    pub(crate) fn mark_character_b_used(&mut self) {
        self.use_character_b = true;
    }

    /// Replaces a character's uploads with a single image; the old portrait no longer matches it.
    pub fn replace_references(&mut self, id: CharacterId, data_url: String) {
        let character = self.character_mut(id);
        character.references = vec![data_url];
        character.generated_portrait = None;
    }

    /// Reads an image file and makes it the character's only reference.
    pub async fn upload_reference(
        &mut self,
        storage: &dyn Storage,
        id: CharacterId,
        path: &str,
    ) -> Result<()> {
        let data_url = read_image(storage, path).await?;
        self.replace_references(id, data_url);
        Ok(())
    }

    pub fn set_rough_sketch(&mut self, index: usize, data_url: Option<String>) -> Result<()> {
        self.panel_mut(index)?.rough_sketch = data_url;
        Ok(())
    }

    pub async fn load_rough_sketch(
        &mut self,
        storage: &dyn Storage,
        index: usize,
        path: &str,
    ) -> Result<()> {
        self.panel(index)?;
        let data_url = read_image(storage, path).await?;
        self.set_rough_sketch(index, Some(data_url))
    }

    pub fn clear_rough_sketch(&mut self, index: usize) -> Result<()> {
        self.set_rough_sketch(index, None)
    }

    pub fn set_panel_text(&mut self, index: usize, line_a: &str, line_b: &str) -> Result<()> {
        let panel = self.panel_mut(index)?;
        panel.line_a = line_a.to_string();
        panel.line_b = line_b.to_string();
        Ok(())
    }

    pub fn generating_panels(&self) -> Vec<usize> {
        self.panels
            .iter()
            .filter(|p| p.status == PanelStatus::Generating)
            .map(|p| p.index)
            .collect()
    }

    pub fn panel_text(&self, index: usize) -> Result<PanelText> {
        let panel = self.panel(index)?;
        Ok(PanelText {
            left: panel.line_a.clone(),
            right: if self.use_character_b {
                panel.line_b.clone()
            } else {
                String::new()
            },
        })
    }

    pub fn panel_texts(&self) -> [PanelText; PANEL_COUNT] {
        std::array::from_fn(|i| PanelText {
            left: self.panels[i].line_a.clone(),
            right: if self.use_character_b {
                self.panels[i].line_b.clone()
            } else {
                String::new()
            },
        })
    }

    pub fn reset(&mut self) {
        *self = Self::new(&self.style_tone, self.panel_size.width);
    }
}

async fn read_image(storage: &dyn Storage, path: &str) -> Result<String> {
    let bytes = storage.read(path).await?;
    if bytes.is_empty() {
        return Err(ComicError::validation(format!("{} is empty", path)));
    }
    let mime = mime_for_path(std::path::Path::new(path));
    Ok(InlineImage::from_bytes(&bytes, mime).to_data_url())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    #[test]
    fn test_new_session_has_four_contiguous_draft_panels() {
        let session = Session::new("chibi-gag", 1024);
        assert_eq!(session.panels().len(), PANEL_COUNT);
        for (i, panel) in session.panels().iter().enumerate() {
            assert_eq!(panel.index(), i);
            assert_eq!(panel.status(), PanelStatus::Draft);
        }
        assert!(session.panel(4).is_err());
        assert_eq!(session.character(CharacterId::B).id(), CharacterId::B);
        assert_eq!(session.character(CharacterId::A).style_preset, "chibi-gag");
    }

    #[test]
    fn test_shot_keys_round_trip_and_b_only_set() {
        for shot in Shot::ALL {
            assert_eq!(Shot::from_key(shot.key()), Some(shot));
        }
        assert_eq!(Shot::from_key("dutch_angle"), None);
        let b_only: Vec<_> = Shot::ALL
            .into_iter()
            .filter(|s| s.requires_character_b())
            .map(|s| s.key())
            .collect();
        assert_eq!(b_only, vec!["closeup_B", "two_shot", "reaction_B", "ots_B"]);
    }

    #[test]
    fn test_replace_references_drops_portrait() {
        let mut session = Session::new("chibi-gag", 1024);
        let a = session.character_mut(CharacterId::A);
        a.references = vec!["data:image/png;base64,AAA".into(), "data:image/png;base64,BBB".into()];
        a.generated_portrait = Some("data:image/png;base64,PORTRAIT".into());

        session.replace_references(CharacterId::A, "data:image/png;base64,NEW".into());

        let a = session.character(CharacterId::A);
        assert_eq!(a.references, vec!["data:image/png;base64,NEW".to_string()]);
        assert!(a.generated_portrait.is_none());
    }

    #[test]
    fn test_line_b_hidden_without_character_b() {
        let mut session = Session::new("chibi-gag", 1024);
        session.panel_mut(1).unwrap().line_a = "Hi".into();
        session.panel_mut(1).unwrap().line_b = "Yo".into();

        assert_eq!(session.panel_text(1).unwrap().right, "");
        session.set_use_character_b(true);
        assert_eq!(session.panel_texts()[1].right, "Yo");
        assert_eq!(session.panel_texts()[1].left, "Hi");
    }

    #[test]
    fn test_reset_keeps_style_and_size() {
        let mut session = Session::new("gekiga", 768);
        session.mark_character_b_used();
        session.panel_mut(0).unwrap().description = "rooftop".into();
        session.reset();
        assert!(!session.use_character_b());
        assert_eq!(session.panel(0).unwrap().description, "");
        assert_eq!(session.style_tone, "gekiga");
        assert_eq!(session.panel_size, PanelSize::square(768));
        let indices: Vec<usize> = session.panels().iter().map(Panel::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_upload_reference_and_sketch_from_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ref_path = dir.path().join("mio.jpg").to_string_lossy().to_string();
        let sketch_path = dir.path().join("p2.png").to_string_lossy().to_string();
        let storage = NativeStorage::new();
        storage.write(&ref_path, &[1, 2, 3]).await?;
        storage.write(&sketch_path, &[4, 5]).await?;

        let mut session = Session::new("chibi-gag", 1024);
        session.character_mut(CharacterId::A).generated_portrait = Some("data:image/png;base64,OLD".into());
        session.upload_reference(&storage, CharacterId::A, &ref_path).await?;
        session.load_rough_sketch(&storage, 2, &sketch_path).await?;

        let a = session.character(CharacterId::A);
        assert_eq!(a.references, vec!["data:image/jpeg;base64,AQID".to_string()]);
        assert!(a.generated_portrait.is_none());
        assert_eq!(
            session.panel(2).unwrap().rough_sketch.as_deref(),
            Some("data:image/png;base64,BAU=")
        );

        session.clear_rough_sketch(2)?;
        assert!(session.panel(2).unwrap().rough_sketch.is_none());
        assert!(session.load_rough_sketch(&storage, 7, &sketch_path).await.is_err());
        Ok(())
    }

    #[test]
    fn test_set_panel_text() {
        let mut session = Session::new("chibi-gag", 1024);
        session.set_panel_text(0, "Morning", "Late again").unwrap();
        assert_eq!(session.panel(0).unwrap().line_a, "Morning");
        assert!(session.set_panel_text(4, "", "").is_err());
    }
}
