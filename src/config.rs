//! Configuration management with YAML support

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable that overrides the store location.
pub const DB_PATH_ENV: &str = "TETHER_DB_PATH";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub readers: HashMap<String, ReaderConfig>,

    #[serde(default)]
    pub linking: LinkingConfig,

    #[serde(default)]
    pub hooks: HookConfig,
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Explicit store path; the platform data directory is used when unset
    #[serde(default)]
    pub path: Option<String>,
}

/// Individual reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub status: Option<String>, // 'active', 'frozen', 'deprecated'

    #[serde(default)]
    pub base_path: Option<String>,
}

/// Commit auto-linking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkingConfig {
    #[serde(default = "default_enabled")]
    pub auto_link: bool,

    #[serde(default = "default_window_days")]
    pub window_days: f64,

    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

/// Hook handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Upper bound on the summary lookup done by the session-end handler
    #[serde(default = "default_summary_timeout_ms")]
    pub summary_timeout_ms: u64,

    #[serde(default)]
    pub debug: bool,
}

// Default value functions
fn default_enabled() -> bool {
    true
}

fn default_window_days() -> f64 {
    14.0
}

fn default_min_score() -> f64 {
    0.2
}

fn default_summary_timeout_ms() -> u64 {
    2000
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            status: None,
            base_path: None,
        }
    }
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            auto_link: true,
            window_days: default_window_days(),
            min_score: default_min_score(),
        }
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            summary_timeout_ms: default_summary_timeout_ms(),
            debug: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./tether.yaml (current directory)
    /// 3. ~/.config/tether/tether.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "tether.yaml".to_string(),
            shellexpand::tilde("~/.config/tether/tether.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)
                    .with_context(|| format!("Failed to read config {}", search_path))?;
                let config: Config = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config {}", search_path))?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Resolve the store path
    /// Order: TETHER_DB_PATH, database.path, platform data directory
    pub fn database_path(&self) -> PathBuf {
        if let Ok(env_path) = std::env::var(DB_PATH_ENV) {
            if !env_path.trim().is_empty() {
                return PathBuf::from(shellexpand::tilde(&env_path).to_string());
            }
        }

        if let Some(path) = &self.database.path {
            return PathBuf::from(shellexpand::tilde(path).to_string());
        }

        default_database_path()
    }

    /// Check if a reader is enabled
    /// Returns false if:
    /// - Reader is explicitly disabled
    /// - Reader status is 'frozen' or 'deprecated'
    pub fn is_reader_enabled(&self, tag: &str) -> bool {
        self.readers.get(tag).map_or(true, |r| {
            if !r.enabled {
                return false;
            }
            !matches!(r.status.as_deref(), Some("frozen") | Some("deprecated"))
        })
    }

    /// Get the base path for a reader, if configured
    pub fn reader_path(&self, tag: &str) -> Option<PathBuf> {
        self.readers
            .get(tag)
            .and_then(|r| r.base_path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }
}

/// Platform data directory, e.g. `~/.local/share/tether/tether.db` on Linux
fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "tether")
        .map(|dirs| dirs.data_dir().join("tether.db"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_default()
                .join(".tether")
                .join("tether.db")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.linking.auto_link);
        assert_eq!(config.linking.window_days, 14.0);
        assert_eq!(config.linking.min_score, 0.2);
        assert_eq!(config.hooks.summary_timeout_ms, 2000);
    }

    #[test]
    fn test_reader_enabled_with_frozen_status() {
        let mut config = Config::default();
        config.readers.insert(
            "cline".to_string(),
            ReaderConfig {
                enabled: true,
                status: Some("frozen".to_string()),
                base_path: None,
            },
        );
        assert!(!config.is_reader_enabled("cline"));
        assert!(config.is_reader_enabled("cursor"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: ~/.local/share/tether/test.db

readers:
  claude-code:
    enabled: true
    base_path: /tmp/claude/projects
  copilot:
    enabled: false

linking:
  window_days: 7
  min_score: 0.35

hooks:
  summary_timeout_ms: 500
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.database.path.as_deref(),
            Some("~/.local/share/tether/test.db")
        );
        assert!(config.is_reader_enabled("claude-code"));
        assert!(!config.is_reader_enabled("copilot"));
        assert_eq!(
            config.reader_path("claude-code"),
            Some(PathBuf::from("/tmp/claude/projects"))
        );
        assert_eq!(config.linking.window_days, 7.0);
        assert_eq!(config.linking.min_score, 0.35);
        assert!(config.linking.auto_link);
        assert_eq!(config.hooks.summary_timeout_ms, 500);
    }

    #[test]
    fn test_database_path_falls_back_to_platform_dir() {
        let config = Config::default();
        if std::env::var(DB_PATH_ENV).is_err() {
            assert!(config.database_path().ends_with("tether.db"));
        }
    }
}
