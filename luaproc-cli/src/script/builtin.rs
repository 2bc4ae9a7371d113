//! Scripts shipped inside the binary
//!
//! Everything under `builtin_scripts/` is embedded at compile time, so the
//! sample scripts are available without any installed data directory.

use include_dir::{Dir, include_dir};

static BUILTIN_SCRIPTS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/builtin_scripts");

/// Extension identifying a script file
pub const SCRIPT_EXTENSION: &str = "lua";

/// Suffix appended to a script path to locate its help sidecar
pub const HELP_SUFFIX: &str = ".help";

/// File names of all embedded scripts, sorted
pub fn script_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BUILTIN_SCRIPTS
        .files()
        .filter_map(|f| f.path().to_str())
        .filter(|name| is_script_file(name))
        .collect();
    names.sort_unstable();
    names
}

/// Source of an embedded script
pub fn script_source(file_name: &str) -> Option<&'static str> {
    BUILTIN_SCRIPTS
        .get_file(file_name)
        .and_then(|f| f.contents_utf8())
}

/// Help sidecar of an embedded script
pub fn help_source(file_name: &str) -> Option<&'static str> {
    BUILTIN_SCRIPTS
        .get_file(format!("{}{}", file_name, HELP_SUFFIX))
        .and_then(|f| f.contents_utf8())
}

/// Whether a file name has the script extension (case-insensitive)
pub fn is_script_file(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SCRIPT_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scripts_are_embedded() {
        let names = script_names();
        assert!(names.contains(&"rename_roads.lua"));
        assert!(!names.iter().any(|n| n.ends_with(".help")));
    }

    #[test]
    fn test_help_sidecar_is_embedded() {
        assert!(help_source("rename_roads.lua").is_some());
        assert!(help_source("filter_by_population.lua").is_none());
    }

    #[test]
    fn test_is_script_file() {
        assert!(is_script_file("a.lua"));
        assert!(is_script_file("B.LUA"));
        assert!(!is_script_file("a.lua.help"));
        assert!(!is_script_file("lua"));
    }
}
