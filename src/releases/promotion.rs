// src/releases/promotion.rs

//! Channel pipeline promotion and demotion planning
//!
//! Channels form an ordered pipeline per application (for example
//! test -> staging -> production). Planning is pure: it reads the catalog and
//! returns the keys and channels to change; the publisher applies the plan
//! under the release lock.
//!
//! Promoting a version carries its whole chain: every release of the app and
//! rid in the source channel up to that version, so a client following the
//! target channel can always walk the delta chain back to a full baseline.

use super::{ReleaseQuery, SnapAppsReleases};
use crate::error::{Error, Result};
use crate::model::{ReleaseKey, SnapApp, SnapRelease};
use semver::Version;
use std::fmt;

/// How far down the pipeline a promotion goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromotionMode {
    /// Only the next eligible channel
    #[default]
    Next,
    /// Every eligible channel after the source
    AllRemaining,
}

/// Outcome of planning a promotion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionPlan {
    pub version: Version,
    pub releases: Vec<ReleaseKey>,
    pub to_channels: Vec<String>,
}

impl PromotionPlan {
    /// Nothing left to promote
    pub fn is_noop(&self) -> bool {
        self.to_channels.is_empty()
    }
}

impl fmt::Display for PromotionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "{} is already fully promoted", self.version);
        }
        write!(
            f,
            "{} ({} releases) -> {}",
            self.version,
            self.releases.len(),
            self.to_channels.join(", ")
        )
    }
}

/// Plan the promotion of `version` (default: latest) out of `from_channel`
pub fn plan_promotion(
    catalog: &SnapAppsReleases,
    app: &SnapApp,
    from_channel: &str,
    version: Option<&Version>,
    mode: PromotionMode,
) -> Result<PromotionPlan> {
    let from_index = app
        .channel_index(from_channel)
        .ok_or_else(|| Error::NotFound(format!("channel '{}' of '{}'", from_channel, app.id)))?;

    let query = ReleaseQuery::for_app(&app.id)
        .rid(&app.target.rid)
        .channel(from_channel);
    let in_channel = catalog.releases(&query);

    let version = match version {
        Some(version) => {
            if !in_channel.iter().any(|r| &r.version == version) {
                return Err(Error::NotFound(format!(
                    "{} {} {} in channel '{}'",
                    app.id, app.target.rid, version, from_channel
                )));
            }
            version.clone()
        }
        None => catalog
            .most_recent_release(&query)
            .map(|r| r.version.clone())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "releases of {} {} in channel '{}'",
                    app.id, app.target.rid, from_channel
                ))
            })?,
    };

    let chain: Vec<&SnapRelease> = in_channel
        .into_iter()
        .filter(|r| r.version <= version)
        .collect();

    let eligible = app.channels[from_index + 1..]
        .iter()
        .filter(|channel| chain.iter().any(|r| !r.has_channel(&channel.name)))
        .map(|channel| channel.name.clone());

    let to_channels: Vec<String> = match mode {
        PromotionMode::Next => eligible.take(1).collect(),
        PromotionMode::AllRemaining => eligible.collect(),
    };

    Ok(PromotionPlan {
        version,
        releases: chain.iter().map(|r| r.key()).collect(),
        to_channels,
    })
}

/// Which releases a demotion removes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoteFilter {
    pub rid: Option<String>,
    pub channel: Option<String>,
    /// Remove this version and every later one
    pub from_version: Option<Version>,
}

/// Keys of every release of `app_id` matching `filter`
///
/// The caller removes them in one catalog operation and treats a removed
/// count different from `keys.len()` as fatal.
pub fn plan_demotion(
    catalog: &SnapAppsReleases,
    app_id: &str,
    filter: &DemoteFilter,
) -> Vec<ReleaseKey> {
    let mut query = ReleaseQuery::for_app(app_id);
    if let Some(rid) = &filter.rid {
        query = query.rid(rid);
    }
    if let Some(channel) = &filter.channel {
        query = query.channel(channel);
    }

    catalog
        .releases(&query)
        .into_iter()
        .filter(|r| {
            filter
                .from_version
                .as_ref()
                .is_none_or(|from| &r.version >= from)
        })
        .map(|r| r.key())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Checksum;
    use crate::model::{
        ChangeEntry, ChangeKind, Channel, FileEntry, OsPlatform, ReleaseKind, Target,
    };
    use chrono::{DateTime, Utc};

    fn target() -> Target {
        Target::new(OsPlatform::Windows, "win-x64", "net8.0").unwrap()
    }

    fn app() -> SnapApp {
        SnapApp::new(
            "demoapp",
            Version::new(1, 0, 0),
            target(),
            vec![
                Channel::new("test", "main"),
                Channel::new("staging", "main"),
                Channel::new("production", "main"),
            ],
        )
        .unwrap()
    }

    fn release(version: Version, kind: ReleaseKind) -> SnapRelease {
        let changes = match kind {
            ReleaseKind::Genesis => Vec::new(),
            _ => vec![ChangeEntry {
                target_path: "app/demoapp.exe".into(),
                kind: ChangeKind::Modified,
            }],
        };
        SnapRelease {
            id: "demoapp".into(),
            target: target(),
            filename: format!("demoapp-{version}-{kind}"),
            version,
            kind,
            files: vec![FileEntry::new("app/demoapp.exe", &Checksum::of_bytes(b"x"))],
            changes,
            channels: vec!["test".into()],
            package: Checksum::of_bytes(b"pkg"),
            created_utc: DateTime::<Utc>::UNIX_EPOCH,
            release_notes: None,
        }
    }

    fn catalog() -> SnapAppsReleases {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let mut catalog = SnapAppsReleases::new();
        catalog
            .add_release(release(Version::new(1, 0, 0), ReleaseKind::Genesis), None, now)
            .unwrap();
        for minor in 1..=2 {
            let version = Version::new(1, minor, 0);
            catalog
                .add_release(
                    release(version.clone(), ReleaseKind::Full),
                    Some(release(version, ReleaseKind::Delta)),
                    now,
                )
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_promote_next_carries_chain() {
        let catalog = catalog();
        let plan = plan_promotion(
            &catalog,
            &app(),
            "test",
            Some(&Version::new(1, 1, 0)),
            PromotionMode::Next,
        )
        .unwrap();

        assert_eq!(plan.to_channels, vec!["staging"]);
        // genesis + full/delta of 1.1.0, not 1.2.0
        assert_eq!(plan.releases.len(), 3);
        assert!(plan.releases.iter().all(|k| k.version <= Version::new(1, 1, 0)));
    }

    #[test]
    fn test_promote_defaults_to_latest() {
        let plan =
            plan_promotion(&catalog(), &app(), "test", None, PromotionMode::AllRemaining).unwrap();
        assert_eq!(plan.version, Version::new(1, 2, 0));
        assert_eq!(plan.to_channels, vec!["staging", "production"]);
        assert_eq!(plan.releases.len(), 5);
    }

    #[test]
    fn test_fully_promoted_is_noop() {
        let mut catalog = catalog();
        let keys: Vec<_> = catalog.all().iter().map(|r| r.key()).collect();
        catalog
            .promote(
                &keys,
                &["staging".into(), "production".into()],
                DateTime::<Utc>::UNIX_EPOCH,
            )
            .unwrap();

        let plan = plan_promotion(&catalog, &app(), "test", None, PromotionMode::Next).unwrap();
        assert!(plan.is_noop());
    }

    #[test]
    fn test_promote_from_empty_channel() {
        let plan = plan_promotion(&catalog(), &app(), "production", None, PromotionMode::Next);
        assert!(matches!(plan, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_promote_unknown_channel_or_version() {
        let catalog = catalog();
        assert!(matches!(
            plan_promotion(&catalog, &app(), "nightly", None, PromotionMode::Next),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            plan_promotion(
                &catalog,
                &app(),
                "test",
                Some(&Version::new(3, 0, 0)),
                PromotionMode::Next
            ),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_demote_from_version() {
        let catalog = catalog();
        let filter = DemoteFilter {
            from_version: Some(Version::new(1, 1, 0)),
            ..DemoteFilter::default()
        };
        let keys = plan_demotion(&catalog, "demoapp", &filter);
        assert_eq!(keys.len(), 4);
        assert!(keys.iter().all(|k| k.version >= Version::new(1, 1, 0)));
    }

    #[test]
    fn test_demote_by_channel_and_rid() {
        let catalog = catalog();
        let filter = DemoteFilter {
            rid: Some("linux-x64".into()),
            ..DemoteFilter::default()
        };
        assert!(plan_demotion(&catalog, "demoapp", &filter).is_empty());

        let filter = DemoteFilter {
            channel: Some("test".into()),
            ..DemoteFilter::default()
        };
        assert_eq!(plan_demotion(&catalog, "demoapp", &filter).len(), 5);
    }
}
