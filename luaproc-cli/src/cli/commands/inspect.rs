//! Inspect command handler

use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;

use luaproc_cli::script::{ParameterKind, ScriptDefinition, find_script, load_help};

use crate::cli::{InspectArgs, resolve_folders};

pub fn handle_inspect_command(args: InspectArgs, folder_overrides: &[PathBuf]) -> Result<()> {
    let folders = resolve_folders(folder_overrides)?;
    let script = find_script(&args.script, &folders)?;

    if args.json {
        let doc = serde_json::json!({
            "id": script.id(),
            "name": script.display_name(),
            "group": script.group(),
            "error": script.error(),
            "parameters": script.parameters(),
            "outputs": script.outputs(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).context("Failed to format JSON output")?
        );
        return Ok(());
    }

    print_summary(&script);

    match load_help(&script) {
        Ok(Some(help)) if !help.is_empty() => {
            println!();
            println!("{}", "Help".bold());
            println!("{}", help.format(&script));
        }
        Ok(_) => {}
        Err(e) => log::warn!("Could not load help for '{}': {:#}", script.id(), e),
    }

    if args.source {
        println!();
        println!("{}", "Source".bold());
        println!("{}", script.script());
    }

    Ok(())
}

fn print_summary(script: &ScriptDefinition) {
    println!("{} {}", "Name:".bold(), script.display_name().bright_green());
    println!("{} {}", "Id:".bold(), script.id());
    if !script.group().is_empty() {
        println!("{} {}", "Group:".bold(), script.group());
    }
    match script.source_path() {
        Some(path) => println!("{} {}", "File:".bold(), path.display()),
        None => println!("{} {}", "File:".bold(), "built-in".dimmed()),
    }

    if let Some(error) = script.error() {
        println!();
        println!("{}", error.bright_red());
    }

    if !script.parameters().is_empty() {
        println!();
        println!("{}", "Parameters".bold());
        for param in script.parameters() {
            let optional = if param.optional { " (optional)" } else { "" };
            println!(
                "  {} {}{} {}",
                format!("{:<20}", param.name).cyan(),
                param.kind.keyword(),
                optional.dimmed(),
                describe_kind(&param.kind).dimmed()
            );
        }
    }

    if !script.outputs().is_empty() {
        println!();
        println!("{}", "Outputs".bold());
        for output in script.outputs() {
            println!(
                "  {} {}",
                format!("{:<20}", output.name).cyan(),
                output.kind.label()
            );
        }
    }
}

/// Constraint details of a parameter kind, empty when there are none
fn describe_kind(kind: &ParameterKind) -> String {
    fn opt(label: &str, value: &Option<String>) -> String {
        value
            .as_ref()
            .map(|v| format!("{}: {}", label, v))
            .unwrap_or_default()
    }

    match kind {
        ParameterKind::Vector { geometry } => format!("geometry: {}", geometry.label()),
        ParameterKind::Crs { default } => opt("default", default),
        ParameterKind::Field { parent } => opt("layer", parent),
        ParameterKind::String { default } => opt("default", default),
        ParameterKind::File { extension } | ParameterKind::FileDestination { extension } => {
            opt("extension", extension)
        }
        ParameterKind::Number { default, min, max } => {
            let parts: Vec<String> = [("default", default), ("min", min), ("max", max)]
                .into_iter()
                .filter_map(|(label, v)| v.map(|v| format!("{}: {}", label, v)))
                .collect();
            parts.join(", ")
        }
        ParameterKind::Enum { choices } => format!("choices: {}", choices.join(", ")),
        ParameterKind::Boolean { default } => format!("default: {}", default),
        ParameterKind::MultipleLayers { layer_type } => format!("layers: {}", layer_type.label()),
        ParameterKind::Raster
        | ParameterKind::Extent
        | ParameterKind::RasterDestination
        | ParameterKind::VectorDestination => String::new(),
    }
}
