//! Reconciler Configuration
//!
//! Tunables for lane expiration and sync flushing. Defaults match the
//! behaviour hosts expect out of the box; a config can also be loaded from
//! JSON, in which case unknown fields are rejected and values validated.

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// Configuration for a [`Reconciler`](crate::Reconciler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// Expiration budget for sync and continuous-input lanes.
    pub input_timeout_ms: u64,

    /// Expiration budget for default and transition lanes.
    pub default_timeout_ms: u64,

    /// Time-slice default and continuous-input renders instead of finishing
    /// them in one go.
    pub concurrent_by_default: bool,

    /// Upper bound on consecutive sync-queue passes in one flush. A render
    /// that keeps scheduling sync work past this bound is reported and the
    /// remaining work is left queued.
    pub max_sync_flush_passes: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            input_timeout_ms: 250,
            default_timeout_ms: 5_000,
            concurrent_by_default: false,
            max_sync_flush_passes: 50,
        }
    }
}

impl ReconcilerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.input_timeout_ms == 0 {
            return Err(ReconcileError::InvalidConfig(
                "input_timeout_ms must be positive".into(),
            ));
        }
        if self.default_timeout_ms < self.input_timeout_ms {
            return Err(ReconcileError::InvalidConfig(format!(
                "default_timeout_ms ({}) is shorter than input_timeout_ms ({})",
                self.default_timeout_ms, self.input_timeout_ms
            )));
        }
        if self.max_sync_flush_passes == 0 {
            return Err(ReconcileError::InvalidConfig(
                "max_sync_flush_passes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReconcilerConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = ReconcilerConfig::from_json(r#"{ "concurrent_by_default": true }"#)
            .expect("valid config");
        assert!(config.concurrent_by_default);
        assert_eq!(config.default_timeout_ms, 5_000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ReconcilerConfig::from_json(r#"{ "frame_budget": 5 }"#).unwrap_err();
        assert!(matches!(err, ReconcileError::ConfigParse(_)));
    }

    #[test]
    fn inverted_timeouts_are_invalid() {
        let err = ReconcilerConfig::from_json(
            r#"{ "input_timeout_ms": 600, "default_timeout_ms": 500 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidConfig(_)));
    }
}
