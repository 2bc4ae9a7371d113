//! Help sidecar files
//!
//! A script's help lives next to it in `<script path>.help`: a JSON object
//! mapping declaration names and the algorithm-level keys below to text.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::builtin::{self, HELP_SUFFIX};
use super::parser::{ScriptDefinition, ScriptOrigin};

pub const ALG_DESC: &str = "ALG_DESC";
pub const ALG_CREATOR: &str = "ALG_CREATOR";
pub const ALG_HELP_CREATOR: &str = "ALG_HELP_CREATOR";
pub const ALG_VERSION: &str = "ALG_VERSION";

/// Help text keyed by declaration name or algorithm-level key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelpMap(BTreeMap<String, String>);

impl HelpMap {
    /// Parse sidecar JSON; non-string values are kept as their JSON text
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).context("Help file is not valid JSON")?;
        let serde_json::Value::Object(obj) = value else {
            anyhow::bail!("Help file must contain a JSON object");
        };

        Ok(HelpMap(
            obj.into_iter()
                .map(|(key, value)| {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, text)
                })
                .collect(),
        ))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Plain-text rendering for a script's declarations
    pub fn format(&self, definition: &ScriptDefinition) -> String {
        let mut out = String::new();

        if let Some(desc) = self.get(ALG_DESC) {
            out.push_str(desc);
            out.push_str("\n\n");
        }

        let params: Vec<(&str, &str)> = definition
            .parameters()
            .iter()
            .map(|p| p.name.as_str())
            .chain(definition.outputs().iter().map(|o| o.name.as_str()))
            .filter_map(|name| self.get(name).map(|text| (name, text)))
            .collect();
        if !params.is_empty() {
            out.push_str("Parameters:\n");
            for (name, text) in params {
                out.push_str(&format!("  {}: {}\n", name, text));
            }
            out.push('\n');
        }

        for (key, label) in [
            (ALG_CREATOR, "Algorithm author"),
            (ALG_HELP_CREATOR, "Help author"),
            (ALG_VERSION, "Algorithm version"),
        ] {
            if let Some(text) = self.get(key) {
                out.push_str(&format!("{}: {}\n", label, text));
            }
        }

        out.trim_end().to_string()
    }
}

/// Path of the sidecar for a script file
pub fn help_path(script_path: &std::path::Path) -> PathBuf {
    let mut path = script_path.as_os_str().to_owned();
    path.push(HELP_SUFFIX);
    PathBuf::from(path)
}

/// Load the help sidecar of a script, if it has one
pub fn load_help(definition: &ScriptDefinition) -> Result<Option<HelpMap>> {
    let text = match definition.origin() {
        ScriptOrigin::File(path) => {
            let path = help_path(path);
            if !path.is_file() {
                return Ok(None);
            }
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read help file: {}", path.display()))?
        }
        ScriptOrigin::Builtin(name) => match builtin::help_source(name) {
            Some(text) => text.to_string(),
            None => return Ok(None),
        },
        ScriptOrigin::Inline(_) => return Ok(None),
    };

    HelpMap::parse(&text).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_and_format() {
        let def = ScriptDefinition::from_source("--#new_road_name=string\n--#total=output number");
        let help = HelpMap::parse(
            r#"{
                "ALG_DESC": "Renames roads.",
                "ALG_CREATOR": "Jane",
                "ALG_VERSION": 2,
                "new_road_name": "The new name.",
                "total": "",
                "unknown": "ignored"
            }"#,
        )
        .unwrap();

        let text = help.format(&def);
        assert!(text.starts_with("Renames roads."));
        assert!(text.contains("  new_road_name: The new name."));
        assert!(!text.contains("total"));
        assert!(!text.contains("ignored"));
        assert!(text.contains("Algorithm author: Jane"));
        assert!(text.contains("Algorithm version: 2"));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(HelpMap::parse("[1, 2]").is_err());
        assert!(HelpMap::parse("not json").is_err());
    }

    #[test]
    fn test_load_sidecar_next_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tidy.lua");
        std::fs::write(&script, "function func(f) return f end\n").unwrap();

        let def = ScriptDefinition::from_file(&script).unwrap();
        assert!(load_help(&def).unwrap().is_none());

        let mut sidecar = std::fs::File::create(dir.path().join("tidy.lua.help")).unwrap();
        write!(sidecar, r#"{{"ALG_DESC": "Tidies things."}}"#).unwrap();

        let help = load_help(&def).unwrap().unwrap();
        assert_eq!(help.get(ALG_DESC), Some("Tidies things."));
    }

    #[test]
    fn test_load_builtin_help() {
        let def = ScriptDefinition::from_builtin("rename_roads.lua").unwrap();
        let help = load_help(&def).unwrap().unwrap();
        assert!(help.get("new_road_name").is_some());
    }

    #[test]
    fn test_help_path() {
        assert_eq!(
            help_path(std::path::Path::new("/a/b/script.lua")),
            PathBuf::from("/a/b/script.lua.help")
        );
    }
}
