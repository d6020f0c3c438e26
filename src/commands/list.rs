// src/commands/list.rs
//! List command - print the release catalog

use super::{catalog_publisher, format_bytes};
use anyhow::{Context, Result};
use relpack::config::RelpackConfig;
use relpack::logging::Logger;
use relpack::model::SnapRelease;
use relpack::releases::ReleaseQuery;
use semver::Version;
use std::collections::BTreeMap;

pub async fn cmd_list(
    config: &RelpackConfig,
    log: &Logger,
    app_id: &str,
    channel: Option<&str>,
) -> Result<()> {
    let app = config.app(app_id, Version::new(0, 0, 0))?;
    let catalog = catalog_publisher(config, log)?
        .load_catalog(&app)
        .await
        .with_context(|| format!("Failed to load the catalog of {}", app.id))?;

    let mut query = ReleaseQuery::for_app(&app.id);
    if let Some(channel) = channel {
        query = query.channel(channel);
    }
    let releases = catalog.releases(&query);

    println!(
        "{} catalog version {} (pack {})",
        app.id,
        catalog.version(),
        catalog.pack_id()
    );
    if let Some(written) = catalog.last_write_access_utc() {
        println!("Last written: {}", written.to_rfc3339());
    }
    if releases.is_empty() {
        println!("No releases.");
        return Ok(());
    }

    let mut by_rid: BTreeMap<&str, Vec<&SnapRelease>> = BTreeMap::new();
    for release in releases {
        by_rid.entry(release.target.rid.as_str()).or_default().push(release);
    }

    for (rid, releases) in by_rid {
        println!("\n{rid}:");
        for release in releases {
            println!(
                "  {:<12} {:<8} {:>10}  [{}]",
                release.version.to_string(),
                release.kind.to_string(),
                format_bytes(release.package.length),
                release.channels.join(", ")
            );
        }
    }
    Ok(())
}
