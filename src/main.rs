use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use manga_strip::core::config::{Config, DEFAULT_CONFIG_PATH};
use manga_strip::core::io::{NativeStorage, Storage};
use manga_strip::core::state::{CharacterId, PanelStatus, Session, PANEL_COUNT};
use manga_strip::services::gemini::create_backend;
use manga_strip::services::setup::run_setup;
use manga_strip::services::workflow::{Plan, StoryBrief, WorkflowManager};
use manga_strip::utils::raster::Typeface;

const OUTPUT_PREFIX: &str = "manga-strip";

#[derive(Parser, Debug)]
#[command(name = "manga-strip", version, about = "Turn a short story into a four-panel manga strip")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// One-paragraph story; asked for interactively when omitted
    story: Option<String>,

    /// Story tone handed to the script writer
    #[arg(long)]
    tone: Option<String>,

    /// Art style key, e.g. chibi-gag, gekiga, flat-color
    #[arg(long)]
    style: Option<String>,

    /// script, script+characters or full
    #[arg(long)]
    plan: Option<Plan>,

    /// Use a second character
    #[arg(long)]
    use_b: bool,

    /// Reference image for character A
    #[arg(long, value_name = "PATH")]
    ref_a: Option<String>,

    /// Reference image for character B
    #[arg(long, value_name = "PATH")]
    ref_b: Option<String>,

    /// Rough sketch for panel N (1-4); repeatable
    #[arg(long, value_name = "N=PATH")]
    sketch: Vec<String>,

    /// Output folder
    #[arg(long)]
    out: Option<String>,
}

fn parse_sketch(arg: &str) -> Result<(usize, &str)> {
    let (n, path) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("--sketch expects N=PATH, got {:?}", arg))?;
    let n: usize = n.trim().parse().with_context(|| format!("bad panel number in {:?}", arg))?;
    if n == 0 || n > PANEL_COUNT {
        bail!("panel number must be 1-{}, got {}", PANEL_COUNT, n);
    }
    Ok((n - 1, path))
}

/// Regenerated panels are only exported by a full run, so other plans refuse sketches.
fn parse_sketches(args: &[String], plan: Plan) -> Result<Vec<(usize, &str)>> {
    if !args.is_empty() && plan != Plan::Full {
        bail!("--sketch needs --plan full; other plans export no panels");
    }
    args.iter().map(|s| parse_sketch(s)).collect()
}

fn output_path(folder: &str, name: &str) -> String {
    Path::new(folder).join(name).to_string_lossy().to_string()
}

fn print_script(session: &Session) {
    for character in CharacterId::ALL {
        if character == CharacterId::B && !session.use_character_b() {
            continue;
        }
        let c = session.character(character);
        println!("Character {}: {} ({})", character.label(), c.name, c.prompt);
    }
    for panel in session.panels() {
        println!("Panel {} [{:?}]: {}", panel.index() + 1, panel.status(), panel.description);
        if !panel.line_a.is_empty() {
            println!("  A: {}", panel.line_a);
        }
        if session.use_character_b() && !panel.line_b.is_empty() {
            println!("  B: {}", panel.line_b);
        }
    }
}

async fn export_panels(manager: &WorkflowManager, storage: &dyn Storage, folder: &str) -> Result<()> {
    let session = manager.session();
    for panel in session.panels() {
        if panel.status() != PanelStatus::Done {
            continue;
        }
        let png = manager.compose_panel(panel.index())?;
        let path = output_path(folder, &format!("{}_panel_{}.png", OUTPUT_PREFIX, panel.index() + 1));
        storage.write(&path, &png).await?;
        println!("Saved {}", path);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(tone) = &cli.tone {
        config.story_tone = tone.clone();
    }
    if let Some(style) = &cli.style {
        config.style_tone = style.clone();
    }
    if let Some(plan) = cli.plan {
        config.plan = plan;
    }
    if let Some(out) = &cli.out {
        config.output_folder = out.clone();
    }

    run_setup(&mut config, &cli.config)?;
    config.ensure_directories()?;
    // Sketches are cleared by the script stage, so they only apply to manual regeneration.
    let sketches = parse_sketches(&cli.sketch, config.plan)?;

    let story = match &cli.story {
        Some(story) => story.clone(),
        None if !config.unattended => inquire::Text::new("Describe the story:").prompt()?,
        None => bail!("no story given and unattended mode is on"),
    };
    if story.trim().is_empty() {
        bail!("the story is empty");
    }

    let storage = NativeStorage::new();
    let mut session = Session::new(&config.style_tone, config.panel_width);
    if cli.use_b {
        session.set_use_character_b(true);
    }
    if let Some(path) = &cli.ref_a {
        session
            .upload_reference(&storage, CharacterId::A, path)
            .await
            .with_context(|| format!("Failed to load reference {}", path))?;
    }
    if let Some(path) = &cli.ref_b {
        session
            .upload_reference(&storage, CharacterId::B, path)
            .await
            .with_context(|| format!("Failed to load reference {}", path))?;
        session.set_use_character_b(true);
    }

    let backend = create_backend(&config)?;
    let mut manager = WorkflowManager::new(config.clone(), backend, session);

    let plan = config.plan;
    match Typeface::load(&storage, config.render.font_path.as_deref()).await {
        Ok(typeface) => manager = manager.with_glyphs(Arc::new(typeface)),
        Err(e) if plan == Plan::Full => return Err(e).context("A font is needed to export the strip"),
        Err(e) => warn!("{}", e),
    }

    let brief = StoryBrief {
        overall_desc: story,
        tone: config.story_tone.clone(),
    };
    info!("Running plan {:?}", plan);
    let result = manager.run(&brief, plan).await;

    print_script(&manager.session());

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if plan == Plan::Full {
                export_panels(&manager, &storage, &config.output_folder).await?;
            }
            return Err(e).context("Generation failed");
        }
    };

    for (id, message) in &report.portrait_fallbacks {
        println!(
            "Portrait for character {} failed ({}); its uploaded references were used instead.",
            id.label(),
            message
        );
    }

    for (index, path) in &sketches {
        let mut snapshot = manager.session();
        snapshot
            .load_rough_sketch(&storage, *index, path)
            .await
            .with_context(|| format!("Failed to read sketch {}", path))?;
        let sketch = snapshot.panel(*index)?.rough_sketch.clone();
        manager.update_session(|s| s.set_rough_sketch(*index, sketch))?;
        println!("Regenerating panel {} from sketch {}", index + 1, path);
        if let Err(e) = manager.generate_panel(*index).await {
            warn!("Panel {} failed: {}", index + 1, e);
        }
    }

    if let Some(strip) = report.strip {
        let strip = if sketches.is_empty() { strip } else { manager.compose_strip()? };
        let path = output_path(&config.output_folder, &format!("{}_vertical.png", OUTPUT_PREFIX));
        storage.write(&path, &strip).await?;
        println!("Saved {}", path);
        export_panels(&manager, &storage, &config.output_folder).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sketch() {
        assert_eq!(parse_sketch("2=rough.png").unwrap(), (1, "rough.png"));
        assert!(parse_sketch("0=rough.png").is_err());
        assert!(parse_sketch("5=rough.png").is_err());
        assert!(parse_sketch("rough.png").is_err());
    }

    #[test]
    fn test_sketches_need_full_plan() {
        let args = vec!["1=a.png".to_string(), "4=b.png".to_string()];
        assert_eq!(parse_sketches(&args, Plan::Full).unwrap(), vec![(0, "a.png"), (3, "b.png")]);
        assert!(parse_sketches(&args, Plan::Script).is_err());
        assert!(parse_sketches(&args, Plan::ScriptAndCharacters).is_err());
        assert!(parse_sketches(&[], Plan::Script).unwrap().is_empty());
    }
}
