// src/commands/promote.rs
//! Promote command - advance a version along the channel pipeline

use super::{catalog_publisher, parse_version};
use anyhow::{Context, Result};
use relpack::config::RelpackConfig;
use relpack::logging::Logger;
use relpack::releases::PromotionMode;
use semver::Version;
use tokio_util::sync::CancellationToken;

pub async fn cmd_promote(
    config: &RelpackConfig,
    log: &Logger,
    app_id: &str,
    channel: &str,
    version: Option<&str>,
    all: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let version = version.map(parse_version).transpose()?;
    // The configured app's own version is irrelevant to promotion
    let app = config.app(app_id, Version::new(0, 0, 0))?;
    let mode = if all {
        PromotionMode::AllRemaining
    } else {
        PromotionMode::Next
    };

    let summary = catalog_publisher(config, log)?
        .promote(&app, channel, version.as_ref(), mode, cancel)
        .await
        .with_context(|| format!("Failed to promote {} from '{}'", app.id, channel))?;

    if !summary.changed {
        println!("{}", summary.plan);
        return Ok(());
    }
    println!(
        "Promoted {} {} to {} ({} releases)",
        app.id,
        summary.plan.version,
        summary.plan.to_channels.join(", "),
        summary.plan.releases.len()
    );
    for key in &summary.plan.releases {
        println!("  {}", key);
    }
    println!("Catalog version: {}", summary.catalog_version);
    Ok(())
}
