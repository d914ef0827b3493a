use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::gemini::LlmConfig;
use crate::services::workflow::Plan;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub plan: Plan,

    /// Story tone handed to the script stage.
    #[serde(default = "default_story_tone")]
    pub story_tone: String,

    /// Global art style key applied to panels and character presets.
    #[serde(default = "default_style_tone")]
    pub style_tone: String,

    /// Panels are square, so this is also the panel height.
    #[serde(default = "default_panel_width")]
    pub panel_width: u32,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RenderConfig {
    /// TTF/OTF used for burned-in speech text and placeholder labels.
    pub font_path: Option<String>,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_story_tone() -> String {
    "slice of life".to_string()
}
fn default_style_tone() -> String {
    "chibi-gag".to_string()
}
fn default_panel_width() -> u32 {
    1024
}
fn default_concurrency() -> usize {
    crate::core::state::PANEL_COUNT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            unattended: false,
            plan: Plan::default(),
            story_tone: default_story_tone(),
            style_tone: default_style_tone(),
            panel_width: default_panel_width(),
            concurrency: default_concurrency(),
            llm: LlmConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let config: Config = serde_yaml_ng::from_str("plan: script\n").unwrap();
        assert_eq!(config.plan, Plan::Script);
        assert_eq!(config.panel_width, 1024);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.style_tone, "chibi-gag");
        assert_eq!(config.llm.retry_count, 3);
        assert!(config.render.font_path.is_none());
    }

    #[test]
    fn test_plan_names() {
        let config: Config = serde_yaml_ng::from_str("plan: script+characters\n").unwrap();
        assert_eq!(config.plan, Plan::ScriptAndCharacters);
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.style_tone = "gekiga".to_string();
        config.render.font_path = Some("fonts/NotoSansJP.ttf".to_string());
        config.save(&path)?;

        let loaded = Config::load(&path)?;
        assert_eq!(loaded.style_tone, "gekiga");
        assert_eq!(loaded.render.font_path.as_deref(), Some("fonts/NotoSansJP.ttf"));
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load(&dir.path().join("absent.yml"))?;
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.plan, Plan::Full);
        Ok(())
    }
}
