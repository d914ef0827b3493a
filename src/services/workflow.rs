use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::config::Config;
use crate::core::error::{ComicError, Result};
use crate::core::state::{CharacterId, PanelStatus, Session, PANEL_COUNT};
use crate::services::gemini::{GenerationBackend, GenerationRequest, PortraitSpec, ScriptBrief};
use crate::services::prompt::{build_panel_prompt, PanelGuidance};
use crate::services::references::assemble_for_panel;
use crate::services::script::{apply_script, guess_character_b};
use crate::utils::compose::{compose_single_panel, compose_strip, decode_image};
use crate::utils::data_url::InlineImage;
use crate::utils::raster::GlyphSource;

/// How far `run` goes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Plan {
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "script+characters")]
    ScriptAndCharacters,
    #[default]
    #[serde(rename = "full")]
    Full,
}

impl Plan {
    fn includes_characters(self) -> bool {
        self != Plan::Script
    }

    fn includes_panels(self) -> bool {
        self == Plan::Full
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "script" => Ok(Plan::Script),
            "script+characters" => Ok(Plan::ScriptAndCharacters),
            "full" => Ok(Plan::Full),
            other => Err(format!(
                "unknown plan {:?} (expected script, script+characters or full)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ScriptGenerating,
    CharacterGenerating(CharacterId),
    PanelGenerating,
    Composing,
    Ready,
    /// The run was abandoned; whatever it produced stays in the session.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryBrief {
    pub overall_desc: String,
    pub tone: String,
}

#[derive(Debug)]
pub struct RunReport {
    pub plan: Plan,
    pub use_character_b: bool,
    /// Portraits that failed; panels fell back to that character's uploads.
    pub portrait_fallbacks: Vec<(CharacterId, String)>,
    /// PNG of the composed strip, for `Plan::Full`.
    pub strip: Option<Vec<u8>>,
}

pub struct WorkflowManager {
    config: Config,
    backend: Arc<dyn GenerationBackend>,
    glyphs: Option<Arc<dyn GlyphSource + Send + Sync>>,
    session: Mutex<Session>,
    state: Mutex<RunState>,
}

impl WorkflowManager {
    pub fn new(config: Config, backend: Arc<dyn GenerationBackend>, session: Session) -> Self {
        Self {
            config,
            backend,
            glyphs: None,
            session: Mutex::new(session),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Font used to burn speech text into exports.
    pub fn with_glyphs(mut self, glyphs: Arc<dyn GlyphSource + Send + Sync>) -> Self {
        self.glyphs = Some(glyphs);
        self
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RunState) {
        info!("Run state: {:?}", state);
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn run_state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current session.
    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    /// Edits the session in place, e.g. text tweaks or a new sketch between runs.
    pub fn update_session<R>(&self, edit: impl FnOnce(&mut Session) -> R) -> R {
        edit(&mut self.lock_session())
    }

    /// Ends the session and hands its final state back.
    pub fn into_session(self) -> Session {
        self.session
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_idle_panels(&self, session: &Session) -> Result<()> {
        let busy = session.generating_panels();
        if busy.is_empty() {
            Ok(())
        } else {
            Err(ComicError::validation(format!(
                "panels {:?} are still generating",
                busy
            )))
        }
    }

    pub async fn run(&self, brief: &StoryBrief, plan: Plan) -> Result<RunReport> {
        {
            let session = self.lock_session();
            self.ensure_idle_panels(&session)?;
        }
        info!("Starting {:?} run", plan);

        let result = self.run_stages(brief, plan).await;
        match &result {
            Ok(_) => self.set_state(RunState::Ready),
            Err(e) => {
                warn!("Run failed: {}", e);
                self.set_state(RunState::Failed);
            }
        }
        result
    }

    async fn run_stages(&self, brief: &StoryBrief, plan: Plan) -> Result<RunReport> {
        self.set_state(RunState::ScriptGenerating);
        let use_character_b = self.generate_script(brief).await?;

        let mut report = RunReport {
            plan,
            use_character_b,
            portrait_fallbacks: Vec::new(),
            strip: None,
        };

        if plan.includes_characters() {
            let mut failures = self.generate_characters().await;
            if !failures.is_empty() {
                if !plan.includes_panels() {
                    return Err(failures.remove(0).1);
                }
                for (id, err) in failures {
                    warn!(
                        "Portrait for character {} failed ({}); panels will use its uploaded references",
                        id.label(),
                        err
                    );
                    report.portrait_fallbacks.push((id, err.to_string()));
                }
            }
        }

        if plan.includes_panels() {
            self.set_state(RunState::PanelGenerating);
            self.generate_panels().await?;

            self.set_state(RunState::Composing);
            report.strip = Some(self.compose_strip()?);
        }

        Ok(report)
    }

    /// Stage 1. Returns the effective character-B flag.
    pub async fn generate_script(&self, brief: &StoryBrief) -> Result<bool> {
        let wanted = {
            let session = self.lock_session();
            self.ensure_idle_panels(&session)?;
            session.use_character_b() || guess_character_b(&brief.overall_desc)
        };

        let script_brief = ScriptBrief {
            overall_desc: brief.overall_desc.clone(),
            tone: brief.tone.clone(),
            use_character_b: wanted,
        };
        info!("Generating script (character B requested: {})", wanted);
        let response = self.backend.generate_script(&script_brief).await?;

        let mut session = self.lock_session();
        Ok(apply_script(&mut session, &response, wanted))
    }

    /// Stage 2: A, then B when active, one after the other. Returns the failures.
    pub async fn generate_characters(&self) -> Vec<(CharacterId, ComicError)> {
        let mut ids = vec![CharacterId::A];
        if self.lock_session().use_character_b() {
            ids.push(CharacterId::B);
        }

        let mut failures = Vec::new();
        for id in ids {
            self.set_state(RunState::CharacterGenerating(id));
            if let Err(e) = self.generate_character(id).await {
                failures.push((id, e));
            }
        }
        failures
    }

    /// Generates (or regenerates) one portrait and replaces the stored one.
    pub async fn generate_character(&self, id: CharacterId) -> Result<()> {
        let spec = {
            let session = self.lock_session();
            let character = session.character(id);
            PortraitSpec {
                name: character.name.clone(),
                style_preset: character.style_preset.clone(),
                prompt: character.prompt.clone(),
                references: character.references.iter().take(1).cloned().collect(),
                size: session.panel_size,
            }
        };

        info!("Generating portrait for character {}", id.label());
        let image = self.backend.generate_character_portrait(&spec).await?;
        self.lock_session().character_mut(id).generated_portrait = Some(image.to_data_url());
        Ok(())
    }

    /// Builds requests from one consistent snapshot and marks those panels `Generating`.
    fn begin_panels(&self, indices: &[usize]) -> Result<Vec<(usize, GenerationRequest)>> {
        let mut session = self.lock_session();
        for &index in indices {
            if session.panel(index)?.status() == PanelStatus::Generating {
                return Err(ComicError::validation(format!(
                    "panel {} is already generating",
                    index
                )));
            }
        }

        let mut requests = Vec::with_capacity(indices.len());
        for &index in indices {
            let guidance = PanelGuidance::from_session(&session, index)?;
            requests.push((
                index,
                GenerationRequest {
                    references: assemble_for_panel(&session, index)?,
                    prompt_fragments: build_panel_prompt(&guidance),
                    output_size: session.panel_size,
                },
            ));
        }
        for &index in indices {
            session.panel_mut(index)?.set_status(PanelStatus::Generating);
        }
        Ok(requests)
    }

    fn finish_panel(&self, index: usize, outcome: &Result<InlineImage>) -> Result<()> {
        let mut session = self.lock_session();
        let panel = session.panel_mut(index)?;
        match outcome {
            Ok(image) => {
                panel.generated_image = Some(image.to_data_url());
                panel.set_status(PanelStatus::Done);
                info!("Panel {} done", index);
            }
            Err(e) => {
                panel.set_status(PanelStatus::Failed);
                warn!("Panel {} failed: {}", index, e);
            }
        }
        Ok(())
    }

    /// Stage 3: every panel at once, bounded by `concurrency`.
    ///
    /// Each result lands in the session as soon as it arrives. If every panel fails the first
    /// error comes back as is; if only some do, the error names them.
    pub async fn generate_panels(&self) -> Result<()> {
        let indices: Vec<usize> = (0..PANEL_COUNT).collect();
        // Nothing fallible may run between marking panels Generating and settling them.
        let pb = panel_progress(indices.len())?;
        let requests = self.begin_panels(&indices)?;
        let total = requests.len();

        let backend = &self.backend;
        let mut results = futures_util::stream::iter(requests)
            .map(|(index, request)| async move {
                let outcome = backend.generate_panel_image(&request).await;
                (index, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut failed = Vec::new();
        let mut first_error = None;
        while let Some((index, outcome)) = results.next().await {
            self.finish_panel(index, &outcome)?;
            pb.inc(1);
            if let Err(e) = outcome {
                failed.push(index);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        pb.finish_with_message("Panels complete");

        match first_error {
            None => Ok(()),
            Some(first) if failed.len() == total => Err(first),
            Some(first) => Err(ComicError::PartialStageFailure {
                failed,
                first: Box::new(first),
            }),
        }
    }

    /// Manual generate/regenerate of one panel. Other panels are left alone.
    pub async fn generate_panel(&self, index: usize) -> Result<()> {
        let mut requests = self.begin_panels(&[index])?;
        let (index, request) = requests.remove(0);

        let outcome = self.backend.generate_panel_image(&request).await;
        self.finish_panel(index, &outcome)?;
        outcome.map(|_| ())
    }

    fn glyphs(&self) -> Result<&(dyn GlyphSource + Send + Sync)> {
        self.glyphs.as_deref().ok_or_else(|| {
            ComicError::configuration("render.font_path is not set; speech text needs a font")
        })
    }

    pub fn compose_strip(&self) -> Result<Vec<u8>> {
        let glyphs = self.glyphs()?;
        let session = self.session();
        let images: Vec<_> = session
            .panels()
            .iter()
            .map(|p| panel_pixels(p.index(), p.generated_image.as_deref()))
            .collect();
        compose_strip(&images, &session.panel_texts(), session.panel_size, glyphs)
    }

    pub fn compose_panel(&self, index: usize) -> Result<Vec<u8>> {
        let glyphs = self.glyphs()?;
        let session = self.session();
        let panel = session.panel(index)?;
        let image = panel_pixels(index, panel.generated_image.as_deref());
        compose_single_panel(index, image, &session.panel_text(index)?, session.panel_size, glyphs)
    }
}

fn panel_progress(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} panels")
            .map_err(|e| ComicError::configuration(e.to_string()))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Undecodable images render as the placeholder so an export never fails on one bad panel.
fn panel_pixels(index: usize, data_url: Option<&str>) -> Option<image::RgbaImage> {
    match decode_image(data_url?) {
        Ok(image) => Some(image),
        Err(e) => {
            warn!("Panel {} image unreadable, using placeholder: {}", index, e);
            None
        }
    }
}
