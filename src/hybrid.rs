/// Hybrid RLS+NLMS filter module
///
/// Runs an RLS and an NLMS canceller in parallel over the same reference
/// window, each with independent state, and blends their error outputs.
/// RLS dominates while only the far end is talking (it converges faster);
/// the blend flips toward NLMS during double-talk, where its slower
/// adaptation is more stable.

use crate::nlms::{NlmsConfig, NlmsFilter};
use crate::rls::{RlsConfig, RlsFilter};
use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum HybridError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Hybrid filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Number of filter taps shared by both branches
    pub filter_len: usize,

    /// Forgetting factor of the RLS branch
    pub rls_forgetting_factor: f32,

    /// Regularization of the RLS branch
    pub rls_regularization: f32,

    /// Step size of the NLMS branch
    pub nlms_step_size: f32,

    /// RLS share of the blend when no double-talk is active (flipped during
    /// double-talk)
    pub rls_weight: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            filter_len: 96,
            rls_forgetting_factor: 0.95,
            rls_regularization: 0.1,
            nlms_step_size: 0.1,
            rls_weight: 0.7,
        }
    }
}

impl HybridConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), HybridError> {
        if self.rls_weight < 0.0 || self.rls_weight > 1.0 {
            return Err(HybridError::InvalidConfig(
                "rls_weight must be between 0.0 and 1.0".to_string(),
            ));
        }

        self.nlms_config()
            .validate()
            .map_err(|e| HybridError::InvalidConfig(format!("NLMS branch: {}", e)))?;
        self.rls_config()
            .validate()
            .map_err(|e| HybridError::InvalidConfig(format!("RLS branch: {}", e)))?;

        Ok(())
    }

    /// Configuration of the NLMS branch
    pub fn nlms_config(&self) -> NlmsConfig {
        NlmsConfig {
            filter_len: self.filter_len,
            step_size: self.nlms_step_size,
            ..Default::default()
        }
    }

    /// Configuration of the RLS branch
    pub fn rls_config(&self) -> RlsConfig {
        RlsConfig {
            filter_len: self.filter_len,
            forgetting_factor: self.rls_forgetting_factor,
            regularization: self.rls_regularization,
            ..Default::default()
        }
    }
}

/// Parallel RLS+NLMS echo canceller with double-talk-aware blending
pub struct HybridFilter {
    config: HybridConfig,
    nlms: NlmsFilter,
    rls: RlsFilter,
}

impl HybridFilter {
    /// Create a filter, failing fast on invalid configuration
    pub fn new(config: HybridConfig) -> Result<Self, HybridError> {
        config.validate()?;

        let nlms = NlmsFilter::new(config.nlms_config())
            .map_err(|e| HybridError::InvalidConfig(e.to_string()))?;
        let rls = RlsFilter::new(config.rls_config())
            .map_err(|e| HybridError::InvalidConfig(e.to_string()))?;

        Ok(Self { config, nlms, rls })
    }

    /// Cancel echo in one near-end frame against its reference window
    ///
    /// Both branches adapt on every frame regardless of the double-talk
    /// flag; the flag only flips which branch dominates the blended output.
    pub fn process_frame(
        &mut self,
        near: &[Sample],
        reference: &[Sample],
        double_talk: bool,
    ) -> Vec<Sample> {
        let rls_output = self.rls.process_frame(near, reference);
        let nlms_output = self.nlms.process_frame(near, reference);

        let rls_share = if double_talk {
            1.0 - self.config.rls_weight
        } else {
            self.config.rls_weight
        };

        trace!(
            "Hybrid blend: rls_share={:.2}, double_talk={}",
            rls_share,
            double_talk
        );

        rls_output
            .iter()
            .zip(&nlms_output)
            .map(|(&r, &n)| rls_share * r + (1.0 - rls_share) * n)
            .collect()
    }

    /// Reset both branches to their initial state
    pub fn reset(&mut self) {
        self.nlms.reset();
        self.rls.reset();
    }

    /// Number of filter taps
    pub fn filter_len(&self) -> usize {
        self.config.filter_len
    }

    /// The NLMS branch
    pub fn nlms(&self) -> &NlmsFilter {
        &self.nlms
    }

    /// The RLS branch
    pub fn rls(&self) -> &RlsFilter {
        &self.rls
    }
}
