//! Command-line interface definitions

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use luaproc_cli::config::Settings;

pub mod commands;

#[derive(Parser, Debug)]
#[command(name = "luaproc")]
#[command(author, version, about = "Run typed Lua transforms over GeoJSON features", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Script folder to scan instead of the configured ones (repeatable)
    #[arg(long = "folder", value_name = "DIR", global = true)]
    pub folders: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available scripts
    List(ListArgs),
    /// Show a script's declarations and help
    Inspect(InspectArgs),
    /// Run a script over a GeoJSON file
    Run(RunArgs),
    /// Show or edit the configured script folders
    Folders(FoldersArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show scripts from user folders
    #[arg(long)]
    pub user_only: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Script file path, id or display name
    pub script: String,

    /// Print the declarations as JSON
    #[arg(long)]
    pub json: bool,

    /// Also print the full script text
    #[arg(long)]
    pub source: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Script file path, id or display name
    pub script: String,

    /// Input GeoJSON file (Feature or FeatureCollection)
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Output GeoJSON file (stdout when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Parameter value as name=value (repeatable)
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Extra output field as name:type, for attributes the script adds
    /// (repeatable; types: string, integer, double, boolean)
    #[arg(short = 'f', long = "field", value_name = "NAME:TYPE")]
    pub fields: Vec<String>,

    /// Reference system of the input geometries
    #[arg(long, value_name = "AUTHID", default_value = "EPSG:4326")]
    pub source_crs: String,

    /// Reference system the script sees and the output is written in
    #[arg(long, value_name = "AUTHID", default_value = "EPSG:4326")]
    pub target_crs: String,

    /// Stop at the first failing record
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args, Debug)]
pub struct FoldersArgs {
    /// Add a script folder
    #[arg(long, value_name = "DIR")]
    pub add: Option<PathBuf>,

    /// Remove a script folder
    #[arg(long, value_name = "DIR")]
    pub remove: Option<PathBuf>,
}

/// Folders from `--folder`, or the resolved settings
pub fn resolve_folders(overrides: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !overrides.is_empty() {
        return Ok(overrides.to_vec());
    }
    Ok(Settings::load()?.resolve_folders())
}
