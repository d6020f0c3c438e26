// src/model/app.rs

//! Application descriptors and their channel pipeline

use super::target::Target;
use crate::error::{Error, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A named pipeline stage with its feed configuration
///
/// The pipeline position is implicit: the channel's index in
/// [`SnapApp::channels`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    /// Feed releases are pushed to
    pub push_feed: String,
    /// Feed clients update from
    pub update_feed: String,
}

impl Channel {
    /// Channel whose push and update feeds are the same
    pub fn new(name: &str, feed: &str) -> Self {
        Self {
            name: name.to_string(),
            push_feed: feed.to_string(),
            update_feed: feed.to_string(),
        }
    }
}

/// Application being packed: id, version, target and promotion pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapApp {
    pub id: String,
    pub version: Version,
    pub target: Target,
    pub channels: Vec<Channel>,
}

impl SnapApp {
    pub fn new(id: &str, version: Version, target: Target, channels: Vec<Channel>) -> Result<Self> {
        let app = Self {
            id: id.to_lowercase(),
            version,
            target,
            channels,
        };
        app.validate()?;
        Ok(app)
    }

    /// Check id, target and channel pipeline
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(Error::Validation(format!(
                "invalid application id '{}'",
                self.id
            )));
        }
        self.target.validate()?;

        if self.channels.is_empty() {
            return Err(Error::Validation(format!(
                "application '{}' has no channels",
                self.id
            )));
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.name.is_empty() || !seen.insert(channel.name.as_str()) {
                return Err(Error::Validation(format!(
                    "application '{}' has an empty or duplicate channel '{}'",
                    self.id, channel.name
                )));
            }
        }
        Ok(())
    }

    /// Pipeline position of a channel
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn channel(&self, name: &str) -> Result<&Channel> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("channel '{}' of '{}'", name, self.id)))
    }

    /// First channel of the pipeline; packs land here
    pub fn first_channel(&self) -> Result<&Channel> {
        self.channels.first().ok_or_else(|| {
            Error::Validation(format!("application '{}' has no channels", self.id))
        })
    }

    /// Same app at another version
    pub fn with_version(&self, version: Version) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OsPlatform;

    fn target() -> Target {
        Target::new(OsPlatform::Linux, "linux-x64", "net8.0").unwrap()
    }

    fn pipeline() -> Vec<Channel> {
        vec![
            Channel::new("test", "feed"),
            Channel::new("staging", "feed"),
            Channel::new("production", "feed"),
        ]
    }

    #[test]
    fn test_channel_index() {
        let app = SnapApp::new("demoapp", Version::new(1, 0, 0), target(), pipeline()).unwrap();
        assert_eq!(app.channel_index("test"), Some(0));
        assert_eq!(app.channel_index("production"), Some(2));
        assert_eq!(app.channel_index("beta"), None);
        assert_eq!(app.first_channel().unwrap().name, "test");
        assert!(matches!(app.channel("beta"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let mut channels = pipeline();
        channels.push(Channel::new("test", "feed"));
        let err = SnapApp::new("demoapp", Version::new(1, 0, 0), target(), channels).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_no_channels_rejected() {
        let err = SnapApp::new("demoapp", Version::new(1, 0, 0), target(), vec![]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_first_channel_of_emptied_pipeline() {
        let mut app = SnapApp::new("demoapp", Version::new(1, 0, 0), target(), pipeline()).unwrap();
        app.channels.clear();
        assert!(matches!(app.first_channel(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_invalid_id_rejected() {
        let err =
            SnapApp::new("demo app", Version::new(1, 0, 0), target(), pipeline()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
