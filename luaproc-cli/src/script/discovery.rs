//! Script discovery
//!
//! Enumerates scripts from the built-in set and from a resolved list of
//! folders. Folders are walked recursively; scripts that fail to load or
//! have no usable id are skipped with a log message.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::builtin;
use super::parser::{ScriptDefinition, ScriptOrigin};

/// Every embedded script
pub fn builtin_scripts() -> Vec<ScriptDefinition> {
    builtin::script_names()
        .into_iter()
        .filter_map(|name| match ScriptDefinition::from_builtin(name) {
            Ok(def) => Some(def),
            Err(e) => {
                log::warn!("Could not load built-in script {}: {:#}", name, e);
                None
            }
        })
        .collect()
}

/// Scripts found under the given folders
pub fn discover_scripts(folders: &[PathBuf]) -> Vec<ScriptDefinition> {
    let mut scripts = Vec::new();
    for folder in folders {
        if !folder.is_dir() {
            log::debug!("Skipping missing script folder: {}", folder.display());
            continue;
        }
        collect_folder(folder, &mut scripts);
    }
    scripts
}

/// Built-in scripts followed by the scripts in `folders`, sorted by group
/// then display name
pub fn discover_all(folders: &[PathBuf]) -> Vec<ScriptDefinition> {
    let mut scripts = builtin_scripts();
    scripts.extend(discover_scripts(folders));
    scripts.sort_by(|a, b| {
        a.group()
            .cmp(b.group())
            .then_with(|| a.display_name().cmp(b.display_name()))
    });
    scripts
}

/// Find a script by file path, id or display name (case-insensitive)
pub fn find_script(query: &str, folders: &[PathBuf]) -> Result<ScriptDefinition> {
    let path = Path::new(query);
    if path.is_file() {
        return ScriptDefinition::from_file(path);
    }

    let wanted = query.to_lowercase();
    discover_all(folders)
        .into_iter()
        .find(|def| {
            def.id() == wanted
                || def.display_name().to_lowercase() == wanted
                || matches!(def.origin(), ScriptOrigin::Builtin(name) if name.to_lowercase() == wanted)
        })
        .ok_or_else(|| anyhow::anyhow!("No script found matching '{}'", query))
}

fn collect_folder(folder: &Path, scripts: &mut Vec<ScriptDefinition>) {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read script folder {}: {}", folder.display(), e);
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            collect_folder(&path, scripts);
            continue;
        }

        let is_script = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(builtin::is_script_file);
        if !is_script {
            continue;
        }

        match ScriptDefinition::from_file(&path) {
            Ok(def) if def.id().is_empty() => {
                log::warn!("Skipping script without a usable name: {}", path.display());
            }
            Ok(def) => {
                if let Some(error) = def.error() {
                    log::warn!("{}: {}", path.display(), error);
                }
                scripts.push(def);
            }
            Err(e) => log::warn!("Could not load script {}: {:#}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, text: &str) {
        if let Some(parent) = dir.join(name).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_discover_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.lua", "--#Alpha=name\nfunction func(f) return f end");
        write(dir.path(), "nested/b.LUA", "function func(f) return f end");
        write(dir.path(), "notes.txt", "not a script");
        write(dir.path(), "a.lua.help", "{}");

        let scripts = discover_scripts(&[dir.path().to_path_buf()]);
        let ids: Vec<&str> = scripts.iter().map(|s| s.id()).collect();

        assert_eq!(ids, vec!["alpha", "b"]);
    }

    #[test]
    fn test_skips_empty_ids_and_missing_folders() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.lua", "--#___=name\nfunction func(f) return f end");

        let scripts = discover_scripts(&[dir.path().to_path_buf(), dir.path().join("missing")]);
        assert!(scripts.is_empty());
    }

    #[test]
    fn test_keeps_scripts_with_header_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.lua", "--#oops\nfunction func(f) return f end");

        let scripts = discover_scripts(&[dir.path().to_path_buf()]);
        assert_eq!(scripts.len(), 1);
        assert!(!scripts[0].is_runnable());
    }

    #[test]
    fn test_find_script() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "tidy_up.lua", "function func(f) return f end");
        let folders = vec![dir.path().to_path_buf()];

        assert_eq!(find_script("tidyup", &folders).unwrap().id(), "tidyup");
        assert_eq!(find_script("Tidy up", &folders).unwrap().id(), "tidyup");
        assert_eq!(find_script("renameroads", &folders).unwrap().group(), "Sample scripts");
        assert_eq!(
            find_script("rename_roads.lua", &folders).unwrap().id(),
            "renameroads"
        );

        let path = dir.path().join("tidy_up.lua");
        assert!(find_script(path.to_str().unwrap(), &[]).is_ok());
        assert!(find_script("nothing here", &folders).is_err());
    }

    #[test]
    fn test_builtins_included() {
        let all = discover_all(&[]);
        assert!(all.iter().any(|s| s.id() == "renameroads"));
        assert!(all.iter().all(|s| !s.is_user_script()));
    }
}
