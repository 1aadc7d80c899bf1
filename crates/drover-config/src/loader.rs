use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use drover_core::{DroverError, Result};

use crate::schema::DroverConfig;

/// Loads the Drover configuration and keeps a shared, reloadable copy of it.
pub struct ConfigLoader {
    config: Arc<RwLock<DroverConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > DROVER_CONFIG env > ~/.drover/drover.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("DROVER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".drover")
            .join("drover.toml")
    }

    /// Read, apply environment overrides, validate. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            DroverConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse and validate a TOML document without touching the environment.
    pub fn from_toml(raw: &str) -> Result<DroverConfig> {
        let config = Self::parse(raw, Path::new("<inline>"))?;
        Self::check(&config)?;
        Ok(config)
    }

    /// A copy of the current config.
    pub fn get(&self) -> DroverConfig {
        self.config.read().clone()
    }

    /// The live config, updated in place by [`ConfigLoader::reload`].
    pub fn shared(&self) -> Arc<RwLock<DroverConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Re-read the file. The current config is kept if the new one fails to parse or validate.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(DroverError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    fn parse(raw: &str, origin: &Path) -> Result<DroverConfig> {
        toml::from_str::<DroverConfig>(raw).map_err(|e| {
            DroverError::Config(format!("failed to parse {}: {}", origin.display(), e))
        })
    }

    /// Log warnings, fail on errors.
    fn check(config: &DroverConfig) -> Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(DroverError::Config(e)),
        }
    }

    /// Apply env var overrides (DROVER_AGENT_MODEL, DROVER_MAX_ITERATIONS, etc.)
    pub fn apply_env_overrides(mut config: DroverConfig) -> DroverConfig {
        if let Ok(v) = std::env::var("DROVER_AGENT_MODEL") {
            config.agent.model = v;
        }
        if let Ok(v) = std::env::var("DROVER_MAX_ITERATIONS") {
            if let Ok(n) = v.parse::<u32>() {
                config.agent.max_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("DROVER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("DROVER_DANGEROUSLY_ALLOW_ALL") {
            config.authorization.dangerously_allow_all = matches!(v.as_str(), "1" | "true" | "yes");
        }
        config
    }
}
