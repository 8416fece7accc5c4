/// Session reset policy module
///
/// Decides when accumulated adaptive state should be discarded: echo paths
/// drift as people and devices move, so a canceller that has run long
/// enough is better off re-converging than trusting a stale estimate. The
/// policy is consulted at frame boundaries; session boundaries reset
/// immediately regardless of it.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Reset policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetPolicyConfig {
    /// Near-end samples processed before a reset is due (60s at 16kHz)
    pub max_samples: u64,

    /// Wall-clock seconds since the last reset before one is due
    pub max_elapsed_secs: u64,
}

impl Default for ResetPolicyConfig {
    fn default() -> Self {
        Self {
            max_samples: 960_000,
            max_elapsed_secs: 120,
        }
    }
}

impl ResetPolicyConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_samples == 0 {
            return Err(PolicyError::InvalidConfig(
                "max_samples must be greater than 0".to_string(),
            ));
        }

        if self.max_elapsed_secs == 0 {
            return Err(PolicyError::InvalidConfig(
                "max_elapsed_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Tracks processed samples and elapsed time since the last reset
pub struct ResetPolicy {
    config: ResetPolicyConfig,
    samples_since_reset: u64,
    last_reset: Instant,
}

impl ResetPolicy {
    /// Create a policy, failing fast on invalid configuration
    pub fn new(config: ResetPolicyConfig) -> Result<Self, PolicyError> {
        config.validate()?;

        Ok(Self {
            config,
            samples_since_reset: 0,
            last_reset: Instant::now(),
        })
    }

    /// Whether either threshold has been crossed
    pub fn should_reset(&self) -> bool {
        self.samples_since_reset >= self.config.max_samples
            || self.last_reset.elapsed() >= Duration::from_secs(self.config.max_elapsed_secs)
    }

    /// Account for processed near-end samples
    pub fn record_samples(&mut self, count: usize) {
        self.samples_since_reset += count as u64;
    }

    /// Restart both thresholds after a reset was applied
    pub fn mark_reset(&mut self) {
        self.samples_since_reset = 0;
        self.last_reset = Instant::now();
    }

    /// Samples processed since the last reset
    pub fn samples_since_reset(&self) -> u64 {
        self.samples_since_reset
    }
}
