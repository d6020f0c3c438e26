// src/commands/restore.rs
//! Restore command - download and verify a channel's packages

use super::{catalog_publisher, format_bytes, restore_deps};
use anyhow::{Context, Result};
use relpack::config::RelpackConfig;
use relpack::logging::Logger;
use relpack::restore::{RestoreOptions, restore_channel};
use semver::Version;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn cmd_restore(
    config: &RelpackConfig,
    log: &Logger,
    app_id: &str,
    channel: &str,
    dest: &Path,
    no_rebuild: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let app = config.app(app_id, Version::new(0, 0, 0))?;
    let catalog = catalog_publisher(config, log)?
        .load_catalog(&app)
        .await
        .with_context(|| format!("Failed to load the catalog of {}", app.id))?;

    let options = RestoreOptions {
        rebuild_missing_full: !no_rebuild,
        ..config.restore_options()
    };
    println!(
        "Restoring {} {} '{}' into {} ({} downloads, {} checksums at a time)",
        app.id,
        app.target.rid,
        channel,
        dest.display(),
        options.download_concurrency,
        options.checksum_concurrency
    );

    let report = restore_channel(
        &restore_deps(config, log)?,
        &catalog,
        &app,
        channel,
        dest,
        &options,
        cancel,
    )
    .await
    .with_context(|| format!("Failed to restore {} '{}'", app.id, channel))?;

    println!("  Verified:   {}", report.verified.len());
    println!(
        "  Downloaded: {} ({})",
        report.downloaded.len(),
        format_bytes(report.bytes_downloaded)
    );
    println!("  Rebuilt:    {}", report.rebuilt.len());
    for filename in &report.rebuilt {
        println!("    {}", filename);
    }
    Ok(())
}
