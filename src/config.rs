//! Run configuration
//!
//! Values come from an optional TOML file and are overridden by command-line
//! flags (or their environment variables). Anything left unset falls back to
//! the defaults of [`RedeployOptions`].
//!
//! ```toml
//! context = "prod-eu"
//! name_filter = "database"
//! concurrency = 1
//! verify_ownership = false
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::redeploy::RedeployOptions;

/// Partial configuration from one source
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub name_filter: Option<String>,
    pub concurrency: Option<usize>,
    pub verify_ownership: Option<bool>,
}

impl ConfigLayer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents).map_err(|e| {
            Error::ConfigError(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Values set in `other` take precedence
    pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            kubeconfig: other.kubeconfig.or(self.kubeconfig),
            context: other.context.or(self.context),
            name_filter: other.name_filter.or(self.name_filter),
            concurrency: other.concurrency.or(self.concurrency),
            verify_ownership: other.verify_ownership.or(self.verify_ownership),
        }
    }
}

/// Fully resolved configuration for one run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedeployConfig {
    pub kubeconfig: Option<PathBuf>,
    /// Cluster context to target; `None` uses the kubeconfig's current context
    pub context: Option<String>,
    pub options: RedeployOptions,
}

impl RedeployConfig {
    /// Resolve the file (if any) and the command-line layer into a validated config
    pub fn load(file: Option<&Path>, overrides: ConfigLayer) -> Result<Self> {
        let base = match file {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                ConfigLayer::from_file(path)?
            }
            None => ConfigLayer::default(),
        };
        Self::from_layer(base.merge(overrides))
    }

    pub fn from_layer(layer: ConfigLayer) -> Result<Self> {
        let defaults = RedeployOptions::default();
        let config = RedeployConfig {
            kubeconfig: layer.kubeconfig,
            context: layer.context,
            options: RedeployOptions {
                name_filter: layer.name_filter.unwrap_or(defaults.name_filter),
                concurrency: layer.concurrency.unwrap_or(defaults.concurrency),
                verify_ownership: layer.verify_ownership.unwrap_or(defaults.verify_ownership),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.options.name_filter.is_empty() {
            return Err(Error::ConfigError(
                "name_filter must not be empty".to_string(),
            ));
        }
        if self.options.concurrency == 0 {
            return Err(Error::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if matches!(self.context.as_deref(), Some(c) if c.trim().is_empty()) {
            return Err(Error::ConfigError("context must not be blank".to_string()));
        }
        Ok(())
    }
}
