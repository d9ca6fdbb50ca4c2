use std::path::{Path, PathBuf};

use parley_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Environment variable holding a fallback API key.
pub const API_KEY_ENV: &str = "PARLEY_API_KEY";

/// Loads [`AppConfig`] from YAML or TOML.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loader for `~/.parley/config.yml`.
    pub fn default_location() -> Self {
        Self::new(config_dir().join("config.yml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AppConfig> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("no .env loaded: {e}");
        }

        info!("loading config from {}", self.path.display());
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", self.path.display()))
        })?;

        let mut config = parse(&self.path, &raw)?;
        apply_env_key(&mut config, std::env::var(API_KEY_ENV).ok());
        config.validate()?;
        Ok(config)
    }
}

/// Base directory for parley's config and data files.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".parley"))
        .unwrap_or_else(|| PathBuf::from(".parley"))
}

fn parse(path: &Path, raw: &str) -> Result<AppConfig> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid TOML config: {e}")))
    } else {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("invalid YAML config: {e}")))
    }
}

fn apply_env_key(config: &mut AppConfig, env_key: Option<String>) {
    let Some(key) = env_key.filter(|k| !k.trim().is_empty()) else {
        return;
    };
    for provider in config.providers.iter_mut().filter(|p| p.key.is_empty()) {
        debug!("using {API_KEY_ENV} for provider '{}'", provider.id);
        provider.key.push(key.clone());
    }
}
