//! Folders command handler

use anyhow::{Context, Result};
use colored::*;

use luaproc_cli::config::{Settings, default_scripts_folder, settings_path};

use crate::cli::FoldersArgs;

pub fn handle_folders_command(args: FoldersArgs) -> Result<()> {
    let mut settings = Settings::load()?;
    let mut changed = false;

    if let Some(folder) = args.add {
        let folder = folder
            .canonicalize()
            .with_context(|| format!("Folder does not exist: {}", folder.display()))?;
        if settings.add_folder(folder.clone()) {
            println!("Added {}", folder.display().to_string().bright_green());
            changed = true;
        } else {
            println!("{} is already configured", folder.display());
        }
    }

    if let Some(folder) = args.remove {
        let target = folder.canonicalize().unwrap_or(folder);
        if settings.remove_folder(&target) {
            println!("Removed {}", target.display().to_string().yellow());
            changed = true;
        } else {
            println!("{} is not configured", target.display());
        }
    }

    if changed {
        settings.save()?;
    }

    if let Some(path) = settings_path() {
        println!("Settings: {}", path.display().to_string().dimmed());
    }

    if settings.script_folders.is_empty() {
        match default_scripts_folder() {
            Some(default) => println!(
                "Script folders: {} {}",
                default.display(),
                "(default)".dimmed()
            ),
            None => println!("{}", "No script folders configured.".dimmed()),
        }
    } else {
        println!("Script folders:");
        for folder in &settings.script_folders {
            let marker = if folder.is_dir() {
                "".normal()
            } else {
                " (missing)".bright_red()
            };
            println!("  {}{}", folder.display(), marker);
        }
    }

    Ok(())
}
