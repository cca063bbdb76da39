mod options;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::gate::PollPolicy;
use crate::{OverlayError, Result};

pub use options::{
    Direction, ExcerptOptions, FigureOptions, FlyEndpoint, FlyOptions, MapOptions, MapType,
    MarkdownOptions, MarkerOptions, OverlayOptions, PluginOptions, TimelineOptions,
    WordStreamOptions,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub coordinator: CoordinatorConfig,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()
    }
}

/// Settings shared by every overlay instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Interval between readiness rechecks of a pending gate.
    pub poll_interval_ms: u64,
    /// Rechecks allowed before a pending gate is failed. `None` keeps
    /// polling until the gate settles or the instance is torn down.
    pub max_poll_attempts: Option<u32>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_poll_attempts: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(OverlayError::invalid(
                "poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.max_poll_attempts == Some(0) {
            return Err(OverlayError::invalid(
                "max_poll_attempts",
                "must be at least one when set",
            ));
        }
        if !(10..=100).contains(&self.poll_interval_ms) {
            tracing::warn!(
                poll_interval_ms = self.poll_interval_ms,
                "poll interval outside the recommended 10-100 ms range"
            );
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval_ms: self.poll_interval_ms,
            max_attempts: self.max_poll_attempts,
        }
    }
}
