// src/main.rs

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use relpack::config::RelpackConfig;
use relpack::logging::{self, Logger};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_subscriber(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "relpack", &mut std::io::stdout());
            Ok(())
        }
        command => run(command, &cli.config).await,
    }
}

async fn run(command: Commands, config_path: &Path) -> Result<()> {
    let config = RelpackConfig::load(config_path)
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;
    let log = Logger::root();
    let cancel = commands::cancel_on_ctrl_c();

    match command {
        Commands::Pack {
            app,
            version,
            artifacts,
            assets,
            rebase,
            notes,
            engine,
        } => {
            commands::cmd_pack(
                &config,
                &log,
                &app,
                &version,
                &artifacts,
                assets.as_deref(),
                rebase,
                notes,
                &engine,
                &cancel,
            )
            .await
        }
        Commands::Promote {
            app,
            channel,
            version,
            all,
        } => {
            commands::cmd_promote(&config, &log, &app, &channel, version.as_deref(), all, &cancel)
                .await
        }
        Commands::Demote {
            app,
            rid,
            channel,
            from_version,
            dry_run,
        } => {
            let filter = commands::demote_filter(rid, channel, from_version.as_deref())?;
            commands::cmd_demote(&config, &log, &app, filter, dry_run, &cancel).await
        }
        Commands::Restore {
            app,
            channel,
            dest,
            no_rebuild,
        } => commands::cmd_restore(&config, &log, &app, &channel, &dest, no_rebuild, &cancel).await,
        Commands::List { app, channel } => {
            commands::cmd_list(&config, &log, &app, channel.as_deref()).await
        }
        // Handled before the configuration is loaded
        Commands::Completions { .. } => Ok(()),
    }
}
