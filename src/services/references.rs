use log::debug;

use crate::core::error::Result;
use crate::core::state::{Character, CharacterId, Session};
use crate::utils::data_url::InlineImage;

/// Reference images for one panel, in the order the model should weigh them: the rough sketch,
/// then A (portrait before uploads), then B the same way when B is active.
///
/// Malformed entries are dropped; a missing reference costs quality, not the request.
pub fn assemble(
    character_a: &Character,
    character_b: Option<&Character>,
    sketch: Option<&str>,
) -> Vec<InlineImage> {
    let mut urls: Vec<&str> = Vec::new();
    urls.extend(sketch);
    for character in std::iter::once(character_a).chain(character_b) {
        urls.extend(character.generated_portrait.as_deref());
        urls.extend(character.references.iter().map(String::as_str));
    }

    urls.into_iter()
        .filter_map(|url| match InlineImage::parse(url) {
            Ok(image) => Some(image),
            Err(e) => {
                debug!("Dropping reference image: {}", e);
                None
            }
        })
        .collect()
}

pub fn assemble_for_panel(session: &Session, index: usize) -> Result<Vec<InlineImage>> {
    let panel = session.panel(index)?;
    let b = session
        .use_character_b()
        .then(|| session.character(CharacterId::B));
    Ok(assemble(
        session.character(CharacterId::A),
        b,
        panel.rough_sketch.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(tag: &str) -> String {
        format!("data:image/png;base64,{}", tag)
    }

    #[test]
    fn test_sketch_then_portrait_then_upload() {
        let mut session = Session::new("chibi-gag", 1024);
        {
            let a = session.character_mut(CharacterId::A);
            a.generated_portrait = Some(url("PORTRAIT"));
            a.references = vec![url("UPLOAD")];
        }
        session.character_mut(CharacterId::B).references = vec![url("BREF")];
        session.set_rough_sketch(0, Some(url("SKETCH"))).unwrap();

        let refs = assemble_for_panel(&session, 0).unwrap();
        let data: Vec<&str> = refs.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["SKETCH", "PORTRAIT", "UPLOAD"]);
    }

    #[test]
    fn test_b_follows_a_when_active() {
        let mut session = Session::new("chibi-gag", 1024);
        session.character_mut(CharacterId::A).references = vec![url("A1"), url("A2")];
        {
            let b = session.character_mut(CharacterId::B);
            b.generated_portrait = Some(url("BP"));
            b.references = vec![url("B1")];
        }
        session.set_use_character_b(true);

        let refs = assemble_for_panel(&session, 2).unwrap();
        let data: Vec<&str> = refs.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["A1", "A2", "BP", "B1"]);
    }

    #[test]
    fn test_malformed_references_are_dropped() {
        let mut session = Session::new("chibi-gag", 1024);
        session.character_mut(CharacterId::A).references = vec![
            "https://example.com/a.png".to_string(),
            url("GOOD"),
            "data:image/png;base64,".to_string(),
        ];
        session.set_rough_sketch(1, Some("not a data url".to_string())).unwrap();

        let refs = assemble_for_panel(&session, 1).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].data, "GOOD");
    }
}
