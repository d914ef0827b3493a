use anyhow::Result;
use inquire::{Select, Text};
use std::path::Path;

use crate::core::config::Config;
use crate::services::prompt::style_tone_keys;

/// First-run questions: art style and the font for speech text. Answers are saved to `config_path`.
pub fn run_setup(config: &mut Config, config_path: &Path) -> Result<()> {
    if config.unattended {
        return Ok(());
    }

    let mut needs_save = false;

    if !config_path.exists() {
        let keys = style_tone_keys();
        let start = keys
            .iter()
            .position(|k| *k == config.style_tone)
            .unwrap_or_default();
        let choice = Select::new("Select the art style:", keys)
            .with_starting_cursor(start)
            .prompt()?;
        config.style_tone = choice.to_string();
        needs_save = true;
    }

    if config.render.font_path.is_none() {
        let path = Text::new("Path to a TTF/OTF font for speech text (empty to skip):").prompt()?;
        let path = path.trim();
        if !path.is_empty() {
            config.render.font_path = Some(path.to_string());
            needs_save = true;
        }
    }

    if needs_save {
        config.save(config_path)?;
        println!("Configuration saved.");
    }

    Ok(())
}
