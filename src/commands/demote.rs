// src/commands/demote.rs
//! Demote command - remove releases from the catalog

use super::{catalog_publisher, parse_version};
use anyhow::{Context, Result};
use relpack::config::RelpackConfig;
use relpack::logging::Logger;
use relpack::releases::{DemoteFilter, plan_demotion};
use semver::Version;
use tokio_util::sync::CancellationToken;

pub async fn cmd_demote(
    config: &RelpackConfig,
    log: &Logger,
    app_id: &str,
    filter: DemoteFilter,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let app = config.app(app_id, Version::new(0, 0, 0))?;
    let publisher = catalog_publisher(config, log)?;

    if dry_run {
        let catalog = publisher
            .load_catalog(&app)
            .await
            .with_context(|| format!("Failed to load the catalog of {}", app.id))?;
        let keys = plan_demotion(&catalog, &app.id, &filter);
        println!("Would remove {} releases (catalog version {}):", keys.len(), catalog.version());
        for key in &keys {
            println!("  {}", key);
        }
        return Ok(());
    }

    let summary = publisher
        .demote(&app, &filter, cancel)
        .await
        .with_context(|| format!("Failed to demote releases of {}", app.id))?;

    println!("Removed {} releases:", summary.removed.len());
    for key in &summary.removed {
        println!("  {}", key);
    }
    println!("Catalog version: {}", summary.catalog_version);
    Ok(())
}

/// Build the filter from command-line values
pub fn demote_filter(
    rid: Option<String>,
    channel: Option<String>,
    from_version: Option<&str>,
) -> Result<DemoteFilter> {
    Ok(DemoteFilter {
        rid: rid.map(|r| r.to_lowercase()),
        channel,
        from_version: from_version.map(parse_version).transpose()?,
    })
}
