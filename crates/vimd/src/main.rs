//! vimd CLI - live-reload markdown preview.
//!
//! Provides commands for:
//! - `dev`: Preview a markdown file with live reload
//! - `build`: Write a standalone HTML file, no server
//! - `kill`: Stop running preview sessions

mod commands;
mod convert;
mod error;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{BuildArgs, DevArgs, KillArgs};
use output::Output;

/// vimd - live-reload markdown preview.
#[derive(Parser)]
#[command(name = "vimd", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview a markdown file in the browser with live reload.
    Dev(DevArgs),
    /// Convert a markdown file to a standalone HTML file.
    Build(BuildArgs),
    /// Stop running preview sessions.
    Kill(KillArgs),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    let verbose = matches!(&cli.command, Commands::Dev(args) if args.verbose);

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Dev(args) => match tokio::runtime::Runtime::new() {
            Ok(rt) => rt.block_on(args.execute()),
            Err(e) => Err(e.into()),
        },
        Commands::Build(args) => args.execute(),
        Commands::Kill(args) => args.execute(),
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}
