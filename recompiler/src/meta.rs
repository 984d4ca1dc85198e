// meta.rs - ROM metadata for batch compilation
//
// The batch catalog carries per-ROM display metadata. Defaults derive from
// the sanitized identifier; an optional JSON file supplies the rest.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Metadata for one catalog entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RomMetadata {
    /// Identifier this record applies to (the derived ROM name).
    pub name: String,
    /// Display title; derived from the identifier when absent.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    /// Recommended CPU frequency in Hz (0 = runtime default).
    #[serde(default)]
    pub cpu_hz: u32,
}

/// Load a metadata file: a JSON array of [`RomMetadata`] records, keyed by
/// derived identifier.
pub fn load_metadata_file(path: &Path) -> anyhow::Result<BTreeMap<String, RomMetadata>> {
    let text = fs::read_to_string(path)?;
    let records: Vec<RomMetadata> = serde_json::from_str(&text)?;
    Ok(records.into_iter().map(|r| (r.name.clone(), r)).collect())
}

/// Turn `space_invaders` into `Space Invaders`.
pub fn pretty_title(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_title_capitalizes_words() {
        assert_eq!(pretty_title("space_invaders"), "Space Invaders");
        assert_eq!(pretty_title("pong"), "Pong");
        assert_eq!(pretty_title("rom_15_puzzle"), "Rom 15 Puzzle");
    }

    #[test]
    fn metadata_file_round_trip() {
        let json = r#"[
            {"name": "pong", "title": "Pong", "authors": "Paul Vervalin", "cpu_hz": 500},
            {"name": "brix", "description": "Breakout clone"}
        ]"#;
        let path = std::env::temp_dir().join(format!("chip8recomp-{}-meta.json", std::process::id()));
        fs::write(&path, json).unwrap();

        let meta = load_metadata_file(&path).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["pong"].title.as_deref(), Some("Pong"));
        assert_eq!(meta["pong"].cpu_hz, 500);
        assert_eq!(meta["brix"].title, None);
        assert_eq!(meta["brix"].description.as_deref(), Some("Breakout clone"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        let path = std::env::temp_dir().join(format!("chip8recomp-{}-bad.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();
        assert!(load_metadata_file(&path).is_err());
        fs::remove_file(&path).ok();
    }
}
