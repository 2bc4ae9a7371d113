//! CLI for luaproc
//!
//! # Examples
//!
//! ```bash
//! # List available scripts
//! luaproc list
//!
//! # Show a script's parameters and help
//! luaproc inspect "Rename roads"
//!
//! # Run a script over a GeoJSON file
//! luaproc run renameroads --input roads.geojson -p new_road_name="Main St"
//! ```

use clap::Parser;
use colored::*;

mod cli;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::List(args) => cli::commands::list::handle_list_command(args, &cli.folders),
        Commands::Inspect(args) => {
            cli::commands::inspect::handle_inspect_command(args, &cli.folders)
        }
        Commands::Run(args) => cli::commands::run::handle_run_command(args, &cli.folders),
        Commands::Folders(args) => cli::commands::folders::handle_folders_command(args),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
