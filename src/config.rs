//! Configuration loader and validator for the league watcher.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::Category;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_concurrent_leagues")]
    pub max_concurrent_leagues: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_watcher_retention_days")]
    pub watcher_retention_days: u32,
    /// How long a seen feed item is remembered. Must outlast an item's time
    /// on the site's feed, or it is announced again.
    #[serde(default = "default_feed_item_retention_days")]
    pub feed_item_retention_days: u32,
    #[serde(default = "default_delivery_interval_ms")]
    pub delivery_interval_ms: u64,
}

fn default_max_concurrent_leagues() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_cache_ttl_secs() -> u64 {
    15
}

fn default_watcher_retention_days() -> u32 {
    30
}

fn default_feed_item_retention_days() -> u32 {
    180
}

fn default_delivery_interval_ms() -> u64 {
    1000
}

/// One external league site served by the JSON feed adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub site_id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Feed categories offered by the site; empty means all of them.
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default)]
    pub leagues: Vec<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn delivery_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_interval_ms)
    }

    pub fn watcher_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.watcher_retention_days))
    }

    pub fn feed_item_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.feed_item_retention_days))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.max_concurrent_leagues == 0 {
        return Err(ConfigError::Invalid("app.max_concurrent_leagues must be > 0"));
    }
    if cfg.app.fetch_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.fetch_timeout_secs must be > 0"));
    }
    if cfg.app.feed_item_retention_days == 0 {
        return Err(ConfigError::Invalid("app.feed_item_retention_days must be > 0"));
    }
    if cfg.app.delivery_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.delivery_interval_ms must be > 0"));
    }

    let mut seen = std::collections::HashSet::new();
    for source in &cfg.sources {
        if source.site_id.trim().is_empty() {
            return Err(ConfigError::Invalid("sources[].site_id must be non-empty"));
        }
        if !seen.insert(source.site_id.as_str()) {
            return Err(ConfigError::Invalid("sources[].site_id must be unique"));
        }
        if source.name.trim().is_empty() {
            return Err(ConfigError::Invalid("sources[].name must be non-empty"));
        }
        if source.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("sources[].base_url must be non-empty"));
        }
        if source.feeds.iter().any(|f| !Category::parse(f).is_some_and(|c| c.is_feed())) {
            return Err(ConfigError::Invalid("sources[].feeds contains an unknown feed category"));
        }
        if source.leagues.iter().any(|l| l.trim().is_empty()) {
            return Err(ConfigError::Invalid("sources[].leagues entries must be non-empty"));
        }
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_secs: 300
  max_concurrent_leagues: 4
  fetch_timeout_secs: 20
  cache_ttl_secs: 15
  watcher_retention_days: 30
  feed_item_retention_days: 180
  delivery_interval_ms: 1000

sources:
  - site_id: "demo"
    name: "Demo League Site"
    base_url: "https://example.invalid/api/"
    tags: ["hockey"]
    feeds: ["trades", "contracts", "news"]
    leagues:
      - "Premier"
      - "Minor"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sources[0].leagues, vec!["Premier", "Minor"]);
    }

    #[test]
    fn defaults_fill_optional_app_fields() {
        let cfg: Config = serde_yaml::from_str(
            "app:\n  data_dir: \"./d\"\n  poll_interval_secs: 60\n",
        )
        .unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.max_concurrent_leagues, 4);
        assert_eq!(cfg.app.cache_ttl(), Duration::from_secs(15));
        assert_eq!(cfg.app.feed_item_retention(), chrono::Duration::days(180));
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn invalid_poll_interval() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.poll_interval_secs = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_secs")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_sources() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sources.push(cfg.sources[0].clone());
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("unique")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sources[0].feeds = vec!["games".into()];
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sources[0].base_url = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sources[0].leagues = vec![" ".into()];
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.sources[0].site_id, "demo");
    }
}
