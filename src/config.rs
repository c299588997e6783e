//! Event loop configuration
//!
//! Loaded from JSON by the CLI (`--config`), or built in code by embedders.
//! Every field is optional in the file; missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::clock::ClockKind;
use crate::error::{Error, Result};

/// Configuration for an [`EventLoop`](crate::EventLoop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Time source driving the timers
    pub clock: ClockKind,
    /// Upper bound on microtasks run by a single drain (starvation guard).
    /// `None` drains to the fixed point no matter how long that takes.
    pub max_microtasks_per_drain: Option<usize>,
    /// Log every unhandled callback error at `error` level in addition to
    /// calling the embedder's hook
    pub report_errors_to_log: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clock: ClockKind::System,
            max_microtasks_per_drain: None,
            report_errors_to_log: true,
        }
    }
}

impl LoopConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LoopConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn with_clock(mut self, clock: ClockKind) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_microtask_budget(mut self, limit: usize) -> Self {
        self.max_microtasks_per_drain = Some(limit);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_microtasks_per_drain == Some(0) {
            return Err(Error::config(
                "max_microtasks_per_drain must be at least 1 (omit it for no limit)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoopConfig::default();
        assert_eq!(config.clock, ClockKind::System);
        assert_eq!(config.max_microtasks_per_drain, None);
        assert!(config.report_errors_to_log);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(LoopConfig::from_json_str("{}").unwrap(), LoopConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = LoopConfig::from_json_str(
            r#"{ "clock": "virtual", "max_microtasks_per_drain": 64, "report_errors_to_log": false }"#,
        )
        .unwrap();
        assert_eq!(config.clock, ClockKind::Virtual);
        assert_eq!(config.max_microtasks_per_drain, Some(64));
        assert!(!config.report_errors_to_log);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let err = LoopConfig::from_json_str(r#"{ "max_microtasks_per_drain": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = LoopConfig::from_json_str(r#"{ "clok": "virtual" }"#).unwrap_err();
        assert!(matches!(err, Error::Json { .. }));
    }

    #[test]
    fn test_builder_methods() {
        let config = LoopConfig::default()
            .with_clock(ClockKind::Virtual)
            .with_microtask_budget(10);
        assert_eq!(config.clock, ClockKind::Virtual);
        assert_eq!(config.max_microtasks_per_drain, Some(10));
    }
}
