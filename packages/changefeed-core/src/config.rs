//! Notifier configuration.

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// Notifier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Maximum number of links followed when checking transitive modification
    pub max_link_depth: usize,
    /// Check builder consistency after every accumulated run
    pub verify_changesets: bool,
    /// Merge an undelivered handover with the next one instead of replacing it
    pub coalesce_handovers: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_link_depth: 16,
            verify_changesets: cfg!(debug_assertions),
            coalesce_handovers: true,
        }
    }
}

impl NotifierConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NotifyError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.max_link_depth == 0 {
            return Err(NotifyError::InvalidConfig(
                "max_link_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
