//! Handover configuration

use crate::error::UpdateError;
use serde::{Deserialize, Serialize};

/// Default suffix appended to the old container's name
pub const DEFAULT_RENAME_SUFFIX: &str = "-update";

/// Default confirmation window in seconds
pub const DEFAULT_TIMEOUT_SECS: u32 = 300;

/// When a new update is refused because of an armed deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutstandingUpdatePolicy {
    /// Refuse while any deadline is armed, expired or not
    #[default]
    RejectWhileArmed,
    /// Refuse only once the armed deadline has passed; a still-pending
    /// handover may be re-triggered and re-armed
    RejectExpired,
}

/// Self-update configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Suffix for the old container's temporary name
    pub rename_suffix: String,
    /// Confirmation window used by `self_update_with_default_timeout`
    pub default_timeout_secs: u32,
    /// Outstanding-update guard
    pub outstanding_policy: OutstandingUpdatePolicy,
}

impl UpdateConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML, filling omitted keys with defaults
    ///
    /// # Errors
    /// `UpdateError::Config` for malformed TOML or invalid values.
    pub fn from_toml_str(source: &str) -> Result<Self, UpdateError> {
        let config: Self =
            toml::from_str(source).map_err(|e| UpdateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// With rename suffix
    #[inline]
    #[must_use]
    pub fn with_rename_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.rename_suffix = suffix.into();
        self
    }

    /// With default timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, secs: u32) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// With outstanding-update policy
    #[inline]
    #[must_use]
    pub fn with_outstanding_policy(mut self, policy: OutstandingUpdatePolicy) -> Self {
        self.outstanding_policy = policy;
        self
    }

    /// Check values
    ///
    /// # Errors
    /// `UpdateError::Config` for an empty suffix, a suffix containing `/`
    /// or a zero default timeout.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.rename_suffix.is_empty() {
            return Err(UpdateError::Config("rename_suffix must not be empty".to_string()));
        }
        if self.rename_suffix.contains('/') {
            return Err(UpdateError::Config(format!(
                "rename_suffix {:?} contains '/'",
                self.rename_suffix
            )));
        }
        if self.default_timeout_secs == 0 {
            return Err(UpdateError::Config(
                "default_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            rename_suffix: DEFAULT_RENAME_SUFFIX.to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            outstanding_policy: OutstandingUpdatePolicy::default(),
        }
    }
}
