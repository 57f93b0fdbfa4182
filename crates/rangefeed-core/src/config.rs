//! rangefeed.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{MetadataStorageType, StartFrom};

/// Errors raised while loading or validating an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the engine needs, passed explicitly into every entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub containers: ContainersConfig,
    #[serde(default)]
    pub change_feed: ChangeFeedConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,
    pub database: String,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Prefix of the per-task payload keys.
    #[serde(default = "default_config_prefix")]
    pub config_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainersConfig {
    /// Container ids to read. Empty means every container in the database.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Container id → destination topic.
    #[serde(default)]
    pub topic_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeFeedConfig {
    #[serde(default)]
    pub start_from: StartFrom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub storage: MetadataStorageType,
    /// Offset namespace (framework) or table name (external).
    #[serde(default = "default_location")]
    pub location: String,
    /// redb file for the external backend; in-memory when absent.
    pub path: Option<PathBuf>,
    /// Topology poll delay, e.g. "30s", "5m".
    #[serde(default = "default_poll_delay")]
    pub poll_delay: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            storage: MetadataStorageType::default(),
            location: default_location(),
            path: None,
            poll_delay: default_poll_delay(),
        }
    }
}

fn default_max_tasks() -> usize {
    1
}

fn default_config_prefix() -> String {
    "rangefeed.source".to_string()
}

fn default_location() -> String {
    "_rangefeed_metadata".to_string()
}

fn default_poll_delay() -> String {
    "5m".to_string()
}

impl ContainersConfig {
    /// Whether a container id passes the include/exclude filters.
    pub fn selects(&self, container_id: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|c| c == container_id);
        included && !self.exclude.iter().any(|c| c == container_id)
    }

    /// Destination topic for a container, defaulting to its id.
    pub fn destination_for(&self, container_id: &str) -> String {
        self.topic_map
            .get(container_id)
            .cloned()
            .unwrap_or_else(|| container_id.to_string())
    }
}

impl MetadataConfig {
    pub fn poll_delay(&self) -> Result<Duration, ConfigError> {
        match parse_duration(&self.poll_delay) {
            Some(d) if !d.is_zero() => Ok(d),
            Some(_) => Err(ConfigError::Invalid("metadata.poll_delay must be non-zero".into())),
            None => Err(ConfigError::Invalid(format!(
                "metadata.poll_delay {:?} is not a duration",
                self.poll_delay
            ))),
        }
    }
}

impl EngineConfig {
    /// Minimal config for a connector reading every container of `database`.
    pub fn new(name: &str, database: &str) -> Self {
        EngineConfig {
            connector: ConnectorConfig {
                name: name.to_string(),
                database: database.to_string(),
                max_tasks: default_max_tasks(),
                config_prefix: default_config_prefix(),
            },
            containers: ContainersConfig::default(),
            change_feed: ChangeFeedConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connector.name.trim().is_empty() {
            return Err(ConfigError::Invalid("connector.name is empty".into()));
        }
        if self.connector.database.trim().is_empty() {
            return Err(ConfigError::Invalid("connector.database is empty".into()));
        }
        if self.connector.max_tasks == 0 {
            return Err(ConfigError::Invalid("connector.max_tasks must be at least 1".into()));
        }
        if let Some(both) = self
            .containers
            .include
            .iter()
            .find(|c| self.containers.exclude.contains(c))
        {
            return Err(ConfigError::Invalid(format!(
                "container {both:?} is both included and excluded"
            )));
        }
        self.metadata.poll_delay()?;
        Ok(())
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        let secs = mins.parse::<u64>().ok()?.checked_mul(60)?;
        Some(Duration::from_secs(secs))
    } else if let Some(hours) = s.strip_suffix('h') {
        let secs = hours.parse::<u64>().ok()?.checked_mul(3600)?;
        Some(Duration::from_secs(secs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
[connector]
name = "orders-feed"
database = "sales"
"#,
        )
        .unwrap();

        assert_eq!(config.connector.max_tasks, 1);
        assert_eq!(config.connector.config_prefix, "rangefeed.source");
        assert_eq!(config.change_feed.start_from, StartFrom::Beginning);
        assert_eq!(config.metadata.storage, MetadataStorageType::Framework);
        assert_eq!(config.metadata.poll_delay().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn parse_full() {
        let config = EngineConfig::from_toml_str(
            r#"
[connector]
name = "orders-feed"
database = "sales"
max_tasks = 4

[containers]
include = ["orders", "returns"]
topic_map = { orders = "orders-topic" }

[change_feed]
start_from = "now"

[metadata]
storage = "external"
location = "feed-metadata"
poll_delay = "30s"
"#,
        )
        .unwrap();

        assert_eq!(config.connector.max_tasks, 4);
        assert_eq!(config.change_feed.start_from, StartFrom::Now);
        assert_eq!(config.metadata.storage, MetadataStorageType::External);
        assert_eq!(config.containers.destination_for("orders"), "orders-topic");
        assert_eq!(config.containers.destination_for("returns"), "returns");
    }

    #[test]
    fn zero_max_tasks_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
[connector]
name = "feed"
database = "db"
max_tasks = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_tasks"));
    }

    #[test]
    fn include_and_exclude_conflict_rejected() {
        let mut config = EngineConfig::new("feed", "db");
        config.containers.include = vec!["orders".into()];
        config.containers.exclude = vec!["orders".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_poll_delay_rejected() {
        let mut config = EngineConfig::new("feed", "db");
        config.metadata.poll_delay = "soon".into();
        assert!(config.validate().is_err());

        config.metadata.poll_delay = "0s".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn selects_applies_filters() {
        let mut containers = ContainersConfig::default();
        assert!(containers.selects("anything"));

        containers.exclude = vec!["scratch".into()];
        assert!(!containers.selects("scratch"));

        containers.include = vec!["orders".into()];
        assert!(containers.selects("orders"));
        assert!(!containers.selects("users"));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("later"), None);
    }

    #[test]
    fn overflowing_durations_rejected() {
        assert_eq!(parse_duration("999999999999999999m"), None);
        assert_eq!(parse_duration("18446744073709551615h"), None);

        let mut config = EngineConfig::new("feed", "db");
        config.metadata.poll_delay = "999999999999999999m".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = EngineConfig::new("feed", "db");
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rangefeed.toml");
        std::fs::write(&path, "[connector]\nname = \"feed\"\ndatabase = \"db\"\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.connector.name, "feed");

        let missing = EngineConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
