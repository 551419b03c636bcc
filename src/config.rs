//! Hub configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReplyResult, ValidationError};

/// Timeout used when a request does not name its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`ReplyHub`](crate::hub::ReplyHub).
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// use linereply::HubConfig;
///
/// let cfg = HubConfig::from_json(r#"{ "sweep_interval_ms": 500 }"#).unwrap();
/// assert_eq!(cfg.default_timeout_ms, 5000);
/// assert_eq!(cfg.sweep_interval_ms, Some(500));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Timeout for requests that do not specify one, in milliseconds.
    pub default_timeout_ms: u64,
    /// Interval of the background expiry sweep, in milliseconds.
    ///
    /// `None` disables the sweeper; expired queries are then purged only when
    /// the next line arrives, or removed by their own caller's timeout.
    pub sweep_interval_ms: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: millis(DEFAULT_TIMEOUT),
            sweep_interval_ms: None,
        }
    }
}

impl HubConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> ReplyResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            field: "<document>".to_string(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Sets the default request timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = millis(timeout);
        self
    }

    /// Enables the background sweeper at the given interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = Some(millis(interval));
        self
    }

    /// Checks that all durations are positive.
    pub fn validate(&self) -> ReplyResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "default_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(ValidationError::InvalidConfig {
                field: "sweep_interval_ms".to_string(),
                reason: "must be greater than zero when set".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Default request timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Sweeper interval, if enabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
