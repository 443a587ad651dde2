//! `kiln`: the thinnest possible CLI front end over `kiln_engine`
//! (`SPEC_FULL.md` §6). Not a general build-language front end — see
//! `manifest` for the target-manifest format this accepts.

mod commands;
mod manifest;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kiln", about = "Hermetic, content-addressed build orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build every target declared in a manifest.
    Build {
        /// Path to a JSON or TOML target manifest.
        manifest: PathBuf,
        #[arg(long, default_value = ".kiln-cache")]
        cache_dir: PathBuf,
        /// Keep building unaffected targets after a failure instead of
        /// aborting the whole build.
        #[arg(long)]
        continue_on_failure: bool,
    },
    /// Inspect or maintain the action cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Print entry/blob counts and total size.
    Stats {
        #[arg(long, default_value = ".kiln-cache")]
        cache_dir: PathBuf,
    },
    /// Evict entries down to the configured size and age caps.
    Gc {
        #[arg(long, default_value = ".kiln-cache")]
        cache_dir: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Build {
            manifest,
            cache_dir,
            continue_on_failure,
        } => commands::build(&manifest, &cache_dir, continue_on_failure),
        Command::Cache { command } => match command {
            CacheCommand::Stats { cache_dir } => commands::cache_stats(&cache_dir),
            CacheCommand::Gc { cache_dir } => commands::cache_gc(&cache_dir),
        },
    };

    std::process::exit(exit_code);
}
