//! List command handler

use anyhow::Result;
use colored::*;
use std::path::PathBuf;

use luaproc_cli::script::discover_all;

use crate::cli::{ListArgs, resolve_folders};

pub fn handle_list_command(args: ListArgs, folder_overrides: &[PathBuf]) -> Result<()> {
    let folders = resolve_folders(folder_overrides)?;
    log::debug!("Scanning script folders: {:?}", folders);

    let scripts: Vec<_> = discover_all(&folders)
        .into_iter()
        .filter(|s| !args.user_only || s.is_user_script())
        .collect();

    if scripts.is_empty() {
        println!("{}", "No scripts found.".dimmed());
        return Ok(());
    }

    let mut current_group: Option<&str> = None;
    for script in &scripts {
        if current_group != Some(script.group()) {
            if current_group.is_some() {
                println!();
            }
            let group = if script.group().is_empty() {
                "(no group)"
            } else {
                script.group()
            };
            println!("{}", group.bold());
            current_group = Some(script.group());
        }

        let origin = match script.source_path() {
            Some(path) => path.display().to_string(),
            None => "built-in".to_string(),
        };

        if script.is_runnable() {
            println!(
                "  {} {:<32} {}",
                format!("{:<24}", script.id()).bright_green(),
                script.display_name(),
                origin.dimmed()
            );
        } else {
            println!(
                "  {} {:<32} {} {}",
                format!("{:<24}", script.id()).bright_red(),
                script.display_name(),
                "[syntax error]".bright_red(),
                origin.dimmed()
            );
        }
    }

    Ok(())
}
