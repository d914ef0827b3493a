use log::{debug, info};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::LazyLock;

use crate::core::error::{ComicError, Result};
use crate::core::state::{CharacterId, PanelStatus, Session, Shot, PANEL_COUNT};
use crate::services::gemini::ScriptBrief;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CharacterSuggestion {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, rename = "stylePreset")]
    pub style_preset: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CharacterSuggestions {
    #[serde(default, rename = "A")]
    pub a: Option<CharacterSuggestion>,
    #[serde(default, rename = "B")]
    pub b: Option<CharacterSuggestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScriptPanel {
    #[serde(default)]
    pub desc: String,
    #[serde(default, rename = "lineA")]
    pub line_a: String,
    #[serde(default, rename = "lineB")]
    pub line_b: Option<String>,
    #[serde(default)]
    pub shot: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScriptResponse {
    #[serde(default)]
    pub characters: Option<CharacterSuggestions>,
    pub panels: Vec<ScriptPanel>,
}

impl ScriptResponse {
    /// True when the script itself uses character B.
    pub fn mentions_character_b(&self) -> bool {
        self.panels
            .iter()
            .any(|p| p.line_b.as_deref().is_some_and(|l| !l.trim().is_empty()))
            || self.characters.as_ref().is_some_and(|c| c.b.is_some())
    }
}

static TWO_PEOPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"二人|２人|2人|ふたり|two\s+(girls|people|characters)|2\s*(girls|people|characters)|AとB")
        .expect("static pattern")
});

/// Best-effort guess that a story involves two people. A hint only: it misses plenty of phrasings.
pub fn guess_character_b(text: &str) -> bool {
    TWO_PEOPLE.is_match(text)
}

/// A shot from the script is kept only if it is a known key and, without character B, not a B-only one.
pub fn accept_shot(raw: Option<&str>, use_character_b: bool) -> Option<Shot> {
    let shot = Shot::from_key(raw?.trim())?;
    if shot.requires_character_b() && !use_character_b {
        return None;
    }
    Some(shot)
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if let Some(inner) = s.strip_prefix("```json") {
        inner.trim_end_matches("```").trim().to_string()
    } else if let Some(inner) = s.strip_prefix("```") {
        inner.trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

pub fn parse_script_response(text: &str) -> Result<ScriptResponse> {
    let clean = strip_code_blocks(text);
    if clean.is_empty() {
        return Err(ComicError::upstream("Invalid response (empty text)"));
    }
    let value: serde_json::Value = serde_json::from_str(&clean).map_err(|e| {
        debug!("Script JSON parse error: {}. Body: {}", e, clean);
        ComicError::upstream("Failed to parse script JSON")
    })?;
    if !value.get("panels").is_some_and(|p| p.is_array()) {
        return Err(ComicError::upstream("Invalid JSON (no panels)"));
    }
    serde_json::from_value(value).map_err(|e| {
        debug!("Script JSON shape error: {}", e);
        ComicError::upstream("Failed to parse script JSON")
    })
}

pub fn script_system_prompt() -> String {
    let shots = shot_keys().join(", ");
    [
        "You are a manga script assistant. Output exactly 4 panels.".to_string(),
        "Also include a \"characters\" object with suggested short name and prompt for character A, and for B when used.".to_string(),
        "Keep each field concise (<= specified limits).".to_string(),
        "If \"Use character B\" is true, include characters.B and include lineB for every panel; if false, omit both.".to_string(),
        format!("When helpful, include a \"shot\" using one of: {}.", shots),
        "If character B is not used, avoid closeup_B, reaction_B, two_shot, or ots_B. Two_shot is only valid when both A and B appear.".to_string(),
    ]
    .join(" ")
}

pub fn script_user_prompt(brief: &ScriptBrief) -> String {
    format!(
        "Overall: {}\nTone: {}\nUse character B: {}",
        brief.overall_desc, brief.tone, brief.use_character_b
    )
}

fn shot_keys() -> Vec<&'static str> {
    Shot::ALL.iter().map(|s| s.key()).collect()
}

/// Response schema for the script call. With character B, `lineB` and `characters.B` become required.
pub fn script_response_schema(use_character_b: bool) -> serde_json::Value {
    let character = |label: &str| {
        json!({
            "type": "OBJECT",
            "properties": {
                "name": { "type": "STRING", "description": format!("Short character {} name", label), "maxLength": "20" },
                "prompt": { "type": "STRING", "description": format!("Traits/style guidance for {}", label), "maxLength": "120" },
                "stylePreset": { "type": "STRING", "description": "Optional style preset key", "maxLength": "20" }
            }
        })
    };
    let panel_required: Vec<&str> = if use_character_b {
        vec!["desc", "lineA", "lineB"]
    } else {
        vec!["desc", "lineA"]
    };
    let characters_required: Vec<&str> = if use_character_b { vec!["A", "B"] } else { vec!["A"] };

    json!({
        "type": "OBJECT",
        "properties": {
            "characters": {
                "type": "OBJECT",
                "properties": { "A": character("A"), "B": character("B") },
                "required": characters_required
            },
            "panels": {
                "type": "ARRAY",
                "description": "Exactly 4 panel entries in order 0..3",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "desc": { "type": "STRING", "description": "Scene description", "maxLength": "120" },
                        "lineA": { "type": "STRING", "description": "Short line for character A", "maxLength": "80" },
                        "lineB": { "type": "STRING", "description": "Short line for character B", "maxLength": "80" },
                        "shot": {
                            "type": "STRING",
                            "description": format!("Shot key for composition. One of: {}", shot_keys().join(", ")),
                            "maxLength": "20"
                        }
                    },
                    "required": panel_required
                },
                "minItems": PANEL_COUNT.to_string(),
                "maxItems": PANEL_COUNT.to_string()
            }
        },
        "required": ["panels", "characters"]
    })
}

/// Writes a fresh script into the session and returns the effective character-B flag.
///
/// B becomes active if the session already had it, the brief asked for it, or the script uses it;
/// it is never switched off here. Every panel goes back to `Draft` with its sketch and image dropped.
pub fn apply_script(session: &mut Session, response: &ScriptResponse, requested_b: bool) -> bool {
    let use_b = session.use_character_b() || requested_b || response.mentions_character_b();
    if use_b {
        session.mark_character_b_used();
    }

    let empty = ScriptPanel::default();
    for index in 0..PANEL_COUNT {
        let source = response.panels.get(index).unwrap_or(&empty);
        let Ok(panel) = session.panel_mut(index) else {
            continue;
        };
        panel.description = source.desc.clone();
        panel.line_a = source.line_a.clone();
        panel.line_b = if use_b {
            source.line_b.clone().unwrap_or_default()
        } else {
            String::new()
        };
        match accept_shot(source.shot.as_deref(), use_b) {
            Some(shot) => panel.shot = Some(shot),
            None => {
                if let Some(raw) = source.shot.as_deref().filter(|s| !s.is_empty()) {
                    debug!("Panel {}: ignoring shot {:?}", index, raw);
                }
            }
        }
        panel.rough_sketch = None;
        panel.generated_image = None;
        panel.set_status(PanelStatus::Draft);
    }

    if let Some(characters) = &response.characters {
        apply_suggestion(session, CharacterId::A, characters.a.as_ref());
        if use_b {
            apply_suggestion(session, CharacterId::B, characters.b.as_ref());
        }
    }

    info!(
        "Script applied ({} panels from response, character B {})",
        response.panels.len(),
        if use_b { "on" } else { "off" }
    );
    use_b
}

fn apply_suggestion(session: &mut Session, id: CharacterId, suggestion: Option<&CharacterSuggestion>) {
    let Some(suggestion) = suggestion else {
        return;
    };
    let character = session.character_mut(id);
    if let Some(name) = suggestion.name.as_deref().filter(|s| !s.is_empty()) {
        character.name = name.to_string();
    }
    if let Some(prompt) = suggestion.prompt.as_deref().filter(|s| !s.is_empty()) {
        character.prompt = prompt.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> ScriptResponse {
        parse_script_response(json).unwrap()
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_guess_character_b_is_approximate() {
        assert!(guess_character_b("二人の女子高生が屋上で"));
        assert!(guess_character_b("ふたりは空を見る"));
        assert!(guess_character_b("two girls share an umbrella"));
        assert!(guess_character_b("2 people on a bench"));
        assert!(guess_character_b("AとBの朝"));
        assert!(!guess_character_b("A cat naps in the sun"));
        // Phrasings the pattern does not know about stay undetected.
        assert!(!guess_character_b("a couple argues over breakfast"));
        assert!(!guess_character_b("Two girls share an umbrella"));
    }

    #[test]
    fn test_accept_shot() {
        assert_eq!(accept_shot(Some("wide"), false), Some(Shot::Wide));
        assert_eq!(accept_shot(Some("two_shot"), false), None);
        assert_eq!(accept_shot(Some("ots_B"), false), None);
        assert_eq!(accept_shot(Some("ots_B"), true), Some(Shot::OtsB));
        assert_eq!(accept_shot(Some("dutch_angle"), true), None);
        assert_eq!(accept_shot(None, true), None);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_script_response("{\"characters\": {}}").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON (no panels)");
        let err = parse_script_response("{\"panels\": {}}").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON (no panels)");
        let err = parse_script_response("not json").unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse script JSON");
        assert!(parse_script_response("  ").is_err());
    }

    #[test]
    fn test_parse_tolerates_fences_and_missing_fields() {
        let parsed = response("```json\n{\"panels\": [{\"desc\": \"rooftop\"}, {}]}\n```");
        assert_eq!(parsed.panels.len(), 2);
        assert_eq!(parsed.panels[0].desc, "rooftop");
        assert_eq!(parsed.panels[1].line_a, "");
        assert!(parsed.characters.is_none());
    }

    #[test]
    fn test_line_b_in_response_turns_b_on() {
        let mut session = Session::new("chibi-gag", 1024);
        let parsed = response(
            r#"{"panels": [
                {"desc": "d0", "lineA": "a0", "lineB": "b0", "shot": "two_shot"},
                {"desc": "d1", "lineA": "a1"},
                {"desc": "d2", "lineA": "a2"},
                {"desc": "d3", "lineA": "a3"}
            ]}"#,
        );
        assert!(apply_script(&mut session, &parsed, false));
        assert!(session.use_character_b());
        assert_eq!(session.panel(0).unwrap().line_b, "b0");
        assert_eq!(session.panel(0).unwrap().shot, Some(Shot::TwoShot));
    }

    #[test]
    fn test_b_only_shots_rejected_without_b() {
        let mut session = Session::new("chibi-gag", 1024);
        session.panel_mut(1).unwrap().shot = Some(Shot::Waist);
        let parsed = response(
            r#"{"panels": [
                {"desc": "d0", "lineA": "a0", "shot": "closeup_B"},
                {"desc": "d1", "lineA": "a1", "shot": "dutch"},
                {"desc": "d2", "lineA": "a2", "shot": "wide"},
                {"desc": "d3", "lineA": "a3", "lineB": "  "}
            ]}"#,
        );
        assert!(!apply_script(&mut session, &parsed, false));
        assert_eq!(session.panel(0).unwrap().shot, None);
        assert_eq!(session.panel(1).unwrap().shot, Some(Shot::Waist));
        assert_eq!(session.panel(2).unwrap().shot, Some(Shot::Wide));
        assert_eq!(session.panel(3).unwrap().line_b, "");
    }

    #[test]
    fn test_character_b_is_sticky() {
        let mut session = Session::new("chibi-gag", 1024);
        session.set_use_character_b(true);
        let parsed = response(r#"{"panels": []}"#);
        assert!(apply_script(&mut session, &parsed, false));
        assert!(session.use_character_b());
    }

    #[test]
    fn test_apply_resets_panels_and_fills_missing() {
        let mut session = Session::new("chibi-gag", 1024);
        {
            let panel = session.panel_mut(3).unwrap();
            panel.description = "old".into();
            panel.rough_sketch = Some("data:image/png;base64,AAAA".into());
            panel.generated_image = Some("data:image/png;base64,BBBB".into());
            panel.set_status(PanelStatus::Failed);
        }
        let parsed = response(r#"{"panels": [{"desc": "only one", "lineA": "hi"}]}"#);
        apply_script(&mut session, &parsed, false);

        assert_eq!(session.panel(0).unwrap().description, "only one");
        let last = session.panel(3).unwrap();
        assert_eq!(last.description, "");
        assert!(last.rough_sketch.is_none());
        assert!(last.generated_image.is_none());
        assert_eq!(last.status(), PanelStatus::Draft);
    }

    #[test]
    fn test_suggestions_fill_characters_but_keep_references() {
        let mut session = Session::new("chibi-gag", 1024);
        session.replace_references(CharacterId::A, "data:image/png;base64,REF".into());
        let parsed = response(
            r#"{"characters": {"A": {"name": "Mio", "prompt": "short hair"}, "B": {"name": "Rin"}},
                "panels": []}"#,
        );
        assert!(apply_script(&mut session, &parsed, false));

        let a = session.character(CharacterId::A);
        assert_eq!(a.name, "Mio");
        assert_eq!(a.prompt, "short hair");
        assert_eq!(a.references.len(), 1);
        assert_eq!(session.character(CharacterId::B).name, "Rin");
    }

    #[test]
    fn test_schema_requires_line_b_only_with_b() {
        let with_b = script_response_schema(true);
        assert_eq!(
            with_b["properties"]["panels"]["items"]["required"],
            json!(["desc", "lineA", "lineB"])
        );
        assert_eq!(with_b["properties"]["characters"]["required"], json!(["A", "B"]));
        let without = script_response_schema(false);
        assert_eq!(without["properties"]["panels"]["items"]["required"], json!(["desc", "lineA"]));
        assert_eq!(without["properties"]["panels"]["minItems"], "4");
    }

    #[test]
    fn test_user_prompt_shape() {
        let brief = ScriptBrief {
            overall_desc: "rainy day".into(),
            tone: "comedy".into(),
            use_character_b: true,
        };
        assert_eq!(
            script_user_prompt(&brief),
            "Overall: rainy day\nTone: comedy\nUse character B: true"
        );
        assert!(script_system_prompt().contains("wide, waist, closeup_A"));
    }
}
