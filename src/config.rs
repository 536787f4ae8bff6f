//! Configuration Module
//!
//! Resolved engine configuration. Built once at startup from an optional JSON
//! file plus environment overrides, then shared read-only by every component.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OfflineError, Result};

// == Strategy Name ==
/// The five caching policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyName {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
    CacheOnly,
}

impl StrategyName {
    pub const ALL: [StrategyName; 5] = [
        StrategyName::CacheFirst,
        StrategyName::NetworkFirst,
        StrategyName::StaleWhileRevalidate,
        StrategyName::NetworkOnly,
        StrategyName::CacheOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyName::CacheFirst => "cache-first",
            StrategyName::NetworkFirst => "network-first",
            StrategyName::StaleWhileRevalidate => "stale-while-revalidate",
            StrategyName::NetworkOnly => "network-only",
            StrategyName::CacheOnly => "cache-only",
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyName {
    type Err = OfflineError;

    fn from_str(s: &str) -> Result<Self> {
        StrategyName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| OfflineError::Config(format!("Unknown strategy '{}'", s)))
    }
}

/// One ordered `pattern -> strategy` rule. First match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRule {
    pub pattern: String,
    pub strategy: StrategyName,
}

impl StrategyRule {
    pub fn new(pattern: impl Into<String>, strategy: StrategyName) -> Self {
        Self {
            pattern: pattern.into(),
            strategy,
        }
    }
}

// == Cache Names ==
/// Unversioned family names of the four cache stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNames {
    pub pages: String,
    pub assets: String,
    pub api: String,
    pub runtime: String,
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            pages: "offline-pages".to_string(),
            assets: "offline-assets".to_string(),
            api: "offline-api".to_string(),
            runtime: "offline-runtime".to_string(),
        }
    }
}

// == Cache Settings ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Freshness window in seconds
    pub max_age: u64,
    /// Per-store entry budget
    pub max_items: usize,
    /// Drop the query string from request identities
    pub exclude_query_string: bool,
    /// `*.ext` patterns that always use cache-first
    pub assets: Vec<String>,
    /// Substring marking API requests
    pub api_marker: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_age: 86_400,
            max_items: 100,
            exclude_query_string: false,
            assets: [
                "*.js", "*.css", "*.woff", "*.woff2", "*.ttf", "*.eot", "*.svg", "*.png", "*.jpg",
                "*.jpeg", "*.gif", "*.webp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            api_marker: "/api/".to_string(),
        }
    }
}

// == Sync Settings ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub enabled: bool,
    /// Base backoff delay in milliseconds
    pub retry_interval_ms: u64,
    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,
    /// Upper bound of the random jitter added to each backoff
    pub jitter_ms: u64,
    /// Network-level failures tolerated before an entry turns `failed`
    pub max_retries: u32,
    /// Background-sync registration tag
    pub tag: String,
    /// Periodic drain interval while online
    pub poll_interval_ms: u64,
    /// Pause between two sequential replays
    pub inter_entry_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_interval_ms: 1_000,
            max_backoff_ms: 60_000,
            jitter_ms: 1_000,
            max_retries: 3,
            tag: "offline-sync".to_string(),
            poll_interval_ms: 30_000,
            inter_entry_delay_ms: 100,
        }
    }
}

// == Config ==
/// Engine configuration.
///
/// All values have defaults; see [`Config::load`] for the override order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    /// Suffix applied to every cache store name
    pub cache_version: u32,
    /// Origin of the application; base for relative URLs and the same-origin check
    pub origin: String,
    /// Ordered rules, first match wins
    pub strategies: Vec<StrategyRule>,
    pub default_strategy: StrategyName,
    pub cache: CacheSettings,
    pub sync: SyncSettings,
    /// URLs fetched into the pages store on install
    pub precache: Vec<String>,
    /// Page served to failed navigations
    pub offline_url: String,
    pub network_timeout_ms: u64,
    pub debug: bool,
    pub cache_names: CacheNames,
    pub server_port: u16,
    /// SQLite file for caches and queue; `None` uses the data directory default
    pub db_path: Option<PathBuf>,
    /// URL polled to detect connectivity; `None` disables probing
    pub probe_url: Option<String>,
    pub probe_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_version: 1,
            origin: "http://localhost:8000".to_string(),
            strategies: Vec::new(),
            default_strategy: StrategyName::NetworkFirst,
            cache: CacheSettings::default(),
            sync: SyncSettings::default(),
            precache: vec!["/offline.html".to_string()],
            offline_url: "/offline.html".to_string(),
            network_timeout_ms: 3_000,
            debug: false,
            cache_names: CacheNames::default(),
            server_port: 3000,
            db_path: None,
            probe_url: None,
            probe_interval_ms: 10_000,
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// Order: defaults, then the JSON file named by `OFFLINE_CONFIG` (if set),
    /// then individual environment overrides. The result is validated.
    pub fn load() -> Result<Self> {
        let mut config = match env::var("OFFLINE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OfflineError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| OfflineError::Config(format!("Invalid {}: {}", path.display(), e)))
    }

    /// Defaults with environment overrides applied.
    ///
    /// # Environment Variables
    /// - `OFFLINE_ENABLED` - master switch (default: true)
    /// - `OFFLINE_CACHE_VERSION` - cache version suffix (default: 1)
    /// - `OFFLINE_CACHE_MAX_AGE` - freshness window in seconds (default: 86400)
    /// - `OFFLINE_CACHE_MAX_ITEMS` - entries per store (default: 100)
    /// - `OFFLINE_DEFAULT_STRATEGY` - fallback strategy (default: network-first)
    /// - `OFFLINE_UPSTREAM` - application origin (default: http://localhost:8000)
    /// - `OFFLINE_DB_PATH` - SQLite file location
    /// - `APP_DEBUG` - verbose logging (default: false)
    /// - `SERVER_PORT` - HTTP port of the worker API (default: 3000)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_bool("OFFLINE_ENABLED") {
            self.enabled = v;
        }
        if let Some(v) = env_parse("OFFLINE_CACHE_VERSION") {
            self.cache_version = v;
        }
        if let Some(v) = env_parse("OFFLINE_CACHE_MAX_AGE") {
            self.cache.max_age = v;
        }
        if let Some(v) = env_parse("OFFLINE_CACHE_MAX_ITEMS") {
            self.cache.max_items = v;
        }
        if let Some(v) = env_parse("OFFLINE_DEFAULT_STRATEGY") {
            self.default_strategy = v;
        }
        if let Ok(v) = env::var("OFFLINE_UPSTREAM") {
            self.origin = v;
        }
        if let Ok(v) = env::var("OFFLINE_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_bool("APP_DEBUG") {
            self.debug = v;
        }
        if let Some(v) = env_parse("SERVER_PORT") {
            self.server_port = v;
        }
    }

    /// Rejects configurations that would install a partially-correct cache.
    ///
    /// Pattern syntax is checked when the matcher compiles them.
    pub fn validate(&self) -> Result<()> {
        self.origin_url()?;
        if self.cache.max_items == 0 {
            return Err(OfflineError::Config(
                "cache.max_items must be at least 1".to_string(),
            ));
        }
        let names = &self.cache_names;
        for (family, name) in [
            ("pages", &names.pages),
            ("assets", &names.assets),
            ("api", &names.api),
            ("runtime", &names.runtime),
        ] {
            if name.trim().is_empty() {
                return Err(OfflineError::Config(format!(
                    "cache_names.{} must not be empty",
                    family
                )));
            }
        }
        crate::matcher::StrategyMatcher::new(self).map(|_| ())
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| OfflineError::Config(format!("Invalid origin '{}': {}", self.origin, e)))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Default log filter for the binary.
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "offline_sync=debug,tower_http=debug"
        } else {
            "offline_sync=info,tower_http=info"
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
