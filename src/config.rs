//! Configuration surface for the flow pipeline (§6): the flow cache, the
//! fragmentation cache, and the free-form per-plugin option strings.
//!
//! Follows the same shape as the rest of the crate's configuration: serde
//! structs with `#[serde(default)]`, a `from_file`/`from_file_or_default`
//! pair, and builder-style setters.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Flow cache configuration (§6). `size`/`line` are log2 of the capacity
/// and row size respectively, matching how the original exposes them on
/// its command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowCacheConfig {
    #[serde(default = "default_size")]
    pub size: u32,
    #[serde(default = "default_line")]
    pub line: u32,
    #[serde(default = "default_active")]
    pub active_timeout_secs: f64,
    #[serde(default = "default_inactive")]
    pub inactive_timeout_secs: f64,
    #[serde(default)]
    pub split: bool,
}

fn default_size() -> u32 {
    17
}
fn default_line() -> u32 {
    4
}
fn default_active() -> f64 {
    300.0
}
fn default_inactive() -> f64 {
    30.0
}

impl Default for FlowCacheConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            line: default_line(),
            active_timeout_secs: default_active(),
            inactive_timeout_secs: default_inactive(),
            split: false,
        }
    }
}

impl FlowCacheConfig {
    pub fn capacity(&self) -> usize {
        1usize << self.size
    }

    pub fn row_size(&self) -> usize {
        1usize << self.line
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line > self.size {
            return Err(ConfigError::InvalidOption {
                key: "line".into(),
                reason: "row size (2^line) cannot exceed cache capacity (2^size)".into(),
            });
        }
        if self.active_timeout_secs <= 0.0 || self.inactive_timeout_secs <= 0.0 {
            return Err(ConfigError::InvalidOption {
                key: "active/inactive".into(),
                reason: "timeouts must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn with_active_timeout(mut self, secs: f64) -> Self {
        self.active_timeout_secs = secs;
        self
    }

    pub fn with_inactive_timeout(mut self, secs: f64) -> Self {
        self.inactive_timeout_secs = secs;
        self
    }

    pub fn with_split(mut self, split: bool) -> Self {
        self.split = split;
        self
    }
}

/// Fragmentation cache configuration (§6, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragCacheConfig {
    #[serde(default = "default_frag_timeout")]
    pub timeout_secs: f64,
}

fn default_frag_timeout() -> f64 {
    2.0
}

impl Default for FragCacheConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_frag_timeout(),
        }
    }
}

/// Top-level configuration, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub flow_cache: FlowCacheConfig,
    #[serde(default)]
    pub frag_cache: FragCacheConfig,
    /// Raw `key=value;...` option strings, one per plugin name.
    #[serde(default)]
    pub plugins: HashMap<String, String>,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        config.flow_cache.validate()?;
        Ok(config)
    }

    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }
}

/// Parses a plugin's `key=value;key2=value2` option string, the same
/// delimiter convention the original's option parser uses.
pub struct PluginOptions {
    values: HashMap<String, String>,
}

impl PluginOptions {
    pub const DELIMITER: char = ';';

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for entry in raw.split(Self::DELIMITER) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidOption {
                key: entry.to_string(),
                reason: "expected key=value".into(),
            })?;
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidOption {
                    key: key.to_string(),
                    reason: format!("could not parse '{raw}'"),
                }),
        }
    }
}
