//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;
use std::time::Duration;

/// Placeholder shown instead of credentials.
const REDACTED: &str = "********";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Render the effective configuration as YAML with passwords masked.
    pub fn redacted_yaml(&self) -> Result<String> {
        let mut masked = self.clone();
        if !masked.source.password.is_empty() {
            masked.source.password = REDACTED.to_string();
        }
        if !masked.target.password.is_empty() {
            masked.target.password = REDACTED.to_string();
        }
        Ok(serde_yaml::to_string(&masked)?)
    }
}

impl MigrationConfig {
    /// Connection timeout as a [`Duration`].
    pub fn get_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    /// Statement timeout as a [`Duration`].
    pub fn get_query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }
}
