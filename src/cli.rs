// src/cli.rs
//! CLI definitions for relpack
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relpack")]
#[command(author = "Relpack Contributors")]
#[command(version)]
#[command(
    about = "Full and delta release packaging with channel promotion and leased publication",
    long_about = None
)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = relpack::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the full (and delta) package of a version and publish it
    Pack {
        /// Application id from the configuration
        app: String,

        /// Version being packed (semver)
        version: String,

        /// Directory of built application artifacts
        #[arg(short, long)]
        artifacts: PathBuf,

        /// Support files packed under the assets root (overrides the config)
        #[arg(long)]
        assets: Option<PathBuf>,

        /// Cut a new full baseline instead of a delta
        #[arg(long)]
        rebase: bool,

        /// Release notes stored with the release
        #[arg(long)]
        notes: Option<String>,

        /// Delta engine (zstd, block)
        #[arg(long, default_value = "zstd")]
        engine: String,
    },

    /// Promote a version to the next channel of the pipeline
    Promote {
        /// Application id from the configuration
        app: String,

        /// Channel the version is promoted out of
        #[arg(short, long)]
        channel: String,

        /// Version to promote (default: most recent in the channel)
        #[arg(long)]
        version: Option<String>,

        /// Promote to every remaining channel
        #[arg(long)]
        all: bool,
    },

    /// Remove releases from the catalog (rollback)
    Demote {
        /// Application id from the configuration
        app: String,

        /// Only releases of this runtime identifier
        #[arg(long)]
        rid: Option<String>,

        /// Only releases promoted into this channel
        #[arg(short, long)]
        channel: Option<String>,

        /// Remove this version and every later one
        #[arg(long)]
        from_version: Option<String>,

        /// Show what would be removed without changing the catalog
        #[arg(long)]
        dry_run: bool,
    },

    /// Download and verify every package of a channel
    Restore {
        /// Application id from the configuration
        app: String,

        /// Channel to restore
        #[arg(short, long)]
        channel: String,

        /// Destination directory
        #[arg(short, long)]
        dest: PathBuf,

        /// Fail instead of rebuilding full packages missing from the feed
        #[arg(long)]
        no_rebuild: bool,
    },

    /// Show the release catalog of an application
    List {
        /// Application id from the configuration
        app: String,

        /// Only releases in this channel
        #[arg(short, long)]
        channel: Option<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}
