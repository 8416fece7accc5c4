/// NLMS adaptive filter module
///
/// Normalized least-mean-squares echo canceller operating sample by sample
/// over strict-past reference windows. The update step is normalized by
/// window energy, near-silent reference windows damp adaptation instead of
/// freezing it, and the emitted error is lightly smoothed against zipper
/// noise.

use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Scale applied to the update error when the reference window is near-silent
const GATE_SCALE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum NlmsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// NLMS filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlmsConfig {
    /// Number of filter taps (reference window length)
    pub filter_len: usize,

    /// Adaptation step size
    pub step_size: f32,

    /// Stabilizer added to the window energy in the update denominator
    pub epsilon: f32,

    /// Sum-squared window energy below which adaptation is damped
    pub energy_floor: f32,

    /// Weight of the current error in the output smoothing (1.0 disables)
    pub error_smoothing: f32,
}

impl Default for NlmsConfig {
    fn default() -> Self {
        Self {
            filter_len: 96,
            step_size: 0.2,
            epsilon: 1e-6,
            energy_floor: 1e-6,
            error_smoothing: 0.9,
        }
    }
}

impl NlmsConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), NlmsError> {
        if self.filter_len == 0 {
            return Err(NlmsError::InvalidConfig(
                "filter_len must be greater than 0".to_string(),
            ));
        }

        if self.step_size <= 0.0 {
            return Err(NlmsError::InvalidConfig(
                "step_size must be greater than 0".to_string(),
            ));
        }

        if self.epsilon <= 0.0 {
            return Err(NlmsError::InvalidConfig(
                "epsilon must be greater than 0".to_string(),
            ));
        }

        if self.energy_floor < 0.0 {
            return Err(NlmsError::InvalidConfig(
                "energy_floor must not be negative".to_string(),
            ));
        }

        if self.error_smoothing < 0.0 || self.error_smoothing > 1.0 {
            return Err(NlmsError::InvalidConfig(
                "error_smoothing must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Streaming NLMS echo canceller
pub struct NlmsFilter {
    config: NlmsConfig,
    weights: Vec<Sample>,
    last_error: Sample,
}

impl NlmsFilter {
    /// Create a filter, failing fast on invalid configuration
    pub fn new(config: NlmsConfig) -> Result<Self, NlmsError> {
        config.validate()?;

        let weights = vec![0.0; config.filter_len];

        Ok(Self {
            config,
            weights,
            last_error: 0.0,
        })
    }

    /// Cancel echo in one near-end frame against its reference window
    ///
    /// Returns the error (cleaned) frame. The first `filter_len` samples
    /// have no full past window and pass through unchanged; a reference
    /// window shorter than `filter_len` passes the whole frame through.
    pub fn process_frame(&mut self, near: &[Sample], reference: &[Sample]) -> Vec<Sample> {
        let len = self.config.filter_len;

        if reference.len() < len {
            trace!(
                "NLMS pass-through: reference window {} shorter than {} taps",
                reference.len(),
                len
            );
            return near.to_vec();
        }

        let mut output = near.to_vec();
        let limit = near.len().min(reference.len());

        for n in len..limit {
            let window = &reference[n - len..n];
            let estimate = dot(&self.weights, window);
            let energy = dot(window, window);

            let raw_error = near[n] - estimate;
            let error = self.config.error_smoothing * raw_error
                + (1.0 - self.config.error_smoothing) * self.last_error;
            self.last_error = error;

            // Damp adaptation when the reference is near-silent; the emitted
            // sample keeps its full amplitude
            let update_error = if energy < self.config.energy_floor {
                error * GATE_SCALE
            } else {
                error
            };

            let scale = self.config.step_size * update_error / (energy + self.config.epsilon);
            for (weight, &x) in self.weights.iter_mut().zip(window) {
                *weight += scale * x;
            }

            output[n] = error;
        }

        output
    }

    /// Restore zeroed weights and clear the smoothing state
    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.last_error = 0.0;
    }

    /// Number of filter taps
    pub fn filter_len(&self) -> usize {
        self.config.filter_len
    }

    /// Current filter weights
    pub fn weights(&self) -> &[Sample] {
        &self.weights
    }
}

fn dot(a: &[Sample], b: &[Sample]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
