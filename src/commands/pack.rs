// src/commands/pack.rs
//! Pack command - build and publish the packages of one version

use super::{format_bytes, parse_version, publisher};
use anyhow::{Context, Result};
use relpack::checksum::ArtifactSource;
use relpack::config::RelpackConfig;
use relpack::delta::engine_by_name;
use relpack::logging::Logger;
use relpack::publish::PackOptions;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[allow(clippy::too_many_arguments)]
pub async fn cmd_pack(
    config: &RelpackConfig,
    log: &Logger,
    app_id: &str,
    version: &str,
    artifacts: &Path,
    assets: Option<&Path>,
    rebase: bool,
    notes: Option<String>,
    engine: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let version = parse_version(version)?;
    let app = config.app(app_id, version)?;
    let engine = engine_by_name(engine)?;

    if !artifacts.is_dir() {
        anyhow::bail!("Artifacts directory {} does not exist", artifacts.display());
    }
    let mut sources = vec![ArtifactSource::app(artifacts)];
    let assets = assets.or(config.app_section(app_id)?.assets.as_deref());
    if let Some(assets) = assets {
        sources.push(ArtifactSource::assets(assets));
    }

    println!(
        "Packing {} {} ({}) with the {} engine{}",
        app.id,
        app.version,
        app.target.rid,
        engine.name(),
        if rebase { " as a new baseline" } else { "" }
    );

    let options = PackOptions {
        sources,
        never_diff: config.never_diff()?,
        rebase,
        release_notes: notes,
    };
    let summary = publisher(config, engine, log)?
        .pack(&app, options, cancel)
        .await
        .with_context(|| format!("Failed to pack {} {}", app.id, app.version))?;

    println!("\nChanges: {}", summary.counts);
    println!(
        "  Full:  {} ({}, sha256 {})",
        summary.full.filename,
        format_bytes(summary.full.package.length),
        summary.full.package.short()
    );
    if let Some(delta) = &summary.delta {
        println!(
            "  Delta: {} ({}, sha256 {})",
            delta.filename,
            format_bytes(delta.package.length),
            delta.package.short()
        );
        println!(
            "  Patched {} files, {} stored whole, {} saved",
            summary.totals.patched_files,
            summary.totals.raw_files,
            format_bytes(summary.totals.bytes_saved().max(0) as u64)
        );
    }
    println!("Catalog version: {}", summary.catalog_version);
    Ok(())
}
