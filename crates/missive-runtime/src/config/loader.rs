//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config`: enables `missive.toml`
//! - `yaml-config`: enables `missive.yaml` / `missive.yml`
//!
//! Both can be enabled at once; every enabled format is searched.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`missive.{profile}.toml` / `missive.{profile}.yaml`)
//! 3. Main config file (`missive.toml` / `missive.yaml`)
//! 4. Environment variables (`MISSIVE_*`)
//! 5. Programmatic overrides (`merge` / `set`)
//!
//! Overrides are figment providers, so only the keys they carry replace
//! values from lower layers.
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `MISSIVE_` prefix with `__` as separator:
//!
//! - `MISSIVE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `MISSIVE_RETRY__MAX_ATTEMPTS=5` → `retry.max_attempts = 5`
//! - `MISSIVE_LOCK__TIMEOUT_MS=2000` → `lock.timeout_ms = 2000`
//!
//! # Example
//!
//! ```rust,ignore
//! use missive_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::{Figment, Provider};
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::MissiveConfig;

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `MISSIVE_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("MISSIVE_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    /// Programmatic overrides, merged last.
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a provider on top of every other source.
    ///
    /// Only the keys the provider emits are overridden. Passing
    /// `Serialized::defaults(MissiveConfig { .. })` replaces every field.
    pub fn merge(mut self, provider: impl Provider) -> Self {
        self.overrides = self.overrides.merge(provider);
        self
    }

    /// Overrides a single dotted key, e.g. `set("retry.max_attempts", 5)`.
    pub fn set<T: serde::Serialize>(self, key: &str, value: T) -> Self {
        self.merge(Serialized::default(key, value))
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<MissiveConfig> {
        let profile = self.profile.clone();
        let config: MissiveConfig = self.build_figment()?.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    /// Builds the figment instance with all sources.
    pub fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(MissiveConfig::default()));

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with MISSIVE_ prefix");
            figment = figment.merge(
                Env::prefixed("MISSIVE_")
                    .ignore(&["PROFILE"])
                    .split("__"),
            );
        }

        Ok(figment.merge(self.overrides))
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("missive"));
        }
        paths
    }

    /// Searches one file format. The profile variant is merged before the
    /// base file; the first search path holding a base file wins.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        extensions: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for ext in extensions {
                let profile_path =
                    search_path.join(format!("missive.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(format!("missive.{ext}"));
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) =
                self.load_format_files(figment, &search_paths, &["toml"], |fig, path| {
                    fig.merge(Toml::file(path))
                });
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) =
                self.load_format_files(figment, &search_paths, &["yaml", "yml"], |fig, path| {
                    fig.merge(Yaml::file(path))
                });
            figment = f;
            found |= ok;
        }

        if !found {
            warn!(?search_paths, "No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<MissiveConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus environment variables.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<MissiveConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, MiddlewareName};
    use figment::Jail;

    #[test]
    fn test_default_config() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config, MissiveConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("MISSIVE_LOGGING__LEVEL", "debug");
            jail.set_env("MISSIVE_RETRY__MAX_ATTEMPTS", "5");
            jail.set_env("MISSIVE_LOCK__TIMEOUT_MS", "2000");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.retry.max_attempts, 5);
            assert_eq!(config.lock.timeout_ms, 2000);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::new()
            .file("/nonexistent/missive.toml")
            .without_env()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_programmatic_merge_wins() {
        Jail::expect_with(|jail| {
            jail.set_env("MISSIVE_LOGGING__LEVEL", "debug");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .set("logging.level", "error")
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Error);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_override_keeps_file_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.toml",
                r#"
                [retry]
                max_attempts = 4
                "#,
            )?;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .set("logging.level", LogLevel::Error)
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Error);
            assert_eq!(config.retry.max_attempts, 4);
            Ok(())
        });
    }

    #[test]
    fn test_full_config_merge_replaces_everything() {
        Jail::expect_with(|jail| {
            jail.set_env("MISSIVE_RETRY__MAX_ATTEMPTS", "7");
            let mut overrides = MissiveConfig::default();
            overrides.logging.level = LogLevel::Warn;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .merge(Serialized::defaults(overrides.clone()))
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config, overrides);
            Ok(())
        });
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!(Profile::parse("prod"), Profile::Production);
        assert_eq!(Profile::parse("Dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_under_base_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.staging.toml",
                r#"
                [retry]
                max_attempts = 9
                jitter = 0.1
                "#,
            )?;
            jail.create_file(
                "missive.toml",
                r#"
                [retry]
                max_attempts = 4

                [buses.query]
                middlewares = ["logger", "cacher"]
                "#,
            )?;

            let config = ConfigLoader::new()
                .profile("staging")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.retry.max_attempts, 4);
            assert_eq!(config.retry.jitter, 0.1);
            assert_eq!(
                config.buses.query.middlewares,
                vec![MiddlewareName::Logger, MiddlewareName::Cacher]
            );
            Ok(())
        });
    }
}
