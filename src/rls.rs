/// RLS adaptive filter module
///
/// Recursive least-squares echo canceller. Converges much faster than NLMS
/// at the cost of an LxL inverse-correlation matrix per filter. A guard on
/// the gain denominator skips updates that would blow up numerically while
/// still emitting the error sample from the unmodified weights.

use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum RlsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// RLS filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlsConfig {
    /// Number of filter taps (reference window length)
    pub filter_len: usize,

    /// Forgetting factor (lambda), weight given to past samples
    pub forgetting_factor: f32,

    /// Regularization (delta), P is initialized to I/delta
    pub regularization: f32,

    /// Gain denominator floor below which the update is skipped
    pub stability_floor: f32,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            filter_len: 96,
            forgetting_factor: 0.999,
            regularization: 0.1,
            stability_floor: 1e-10,
        }
    }
}

impl RlsConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), RlsError> {
        if self.filter_len == 0 {
            return Err(RlsError::InvalidConfig(
                "filter_len must be greater than 0".to_string(),
            ));
        }

        if self.forgetting_factor <= 0.0 || self.forgetting_factor > 1.0 {
            return Err(RlsError::InvalidConfig(
                "forgetting_factor must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.regularization <= 0.0 {
            return Err(RlsError::InvalidConfig(
                "regularization must be greater than 0".to_string(),
            ));
        }

        if self.stability_floor <= 0.0 {
            return Err(RlsError::InvalidConfig(
                "stability_floor must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Streaming RLS echo canceller
///
/// The inverse-correlation matrix is stored flat in row-major order; the
/// gain and row-product vectors are kept as scratch space so the per-sample
/// update does not allocate.
pub struct RlsFilter {
    config: RlsConfig,
    weights: Vec<Sample>,
    p: Vec<f32>,
    gain: Vec<f32>,
    row_product: Vec<f32>,
    skipped_updates: u64,
}

impl RlsFilter {
    /// Create a filter, failing fast on invalid configuration
    pub fn new(config: RlsConfig) -> Result<Self, RlsError> {
        config.validate()?;

        let len = config.filter_len;
        let mut filter = Self {
            weights: vec![0.0; len],
            p: vec![0.0; len * len],
            gain: vec![0.0; len],
            row_product: vec![0.0; len],
            skipped_updates: 0,
            config,
        };
        filter.init_p();

        Ok(filter)
    }

    /// Cancel echo in one near-end frame against its reference window
    ///
    /// Returns the error (cleaned) frame. Samples without a full past window
    /// pass through unchanged, as does the whole frame when the reference
    /// window is shorter than the filter.
    pub fn process_frame(&mut self, near: &[Sample], reference: &[Sample]) -> Vec<Sample> {
        let len = self.config.filter_len;

        if reference.len() < len {
            trace!(
                "RLS pass-through: reference window {} shorter than {} taps",
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
            let error = near[n] - estimate;

            self.update(window, error);
            output[n] = error;
        }

        output
    }

    /// One RLS update step; skipped entirely on a zero-excitation window or
    /// when the denominator leaves the stable range
    fn update(&mut self, window: &[Sample], error: f32) {
        let len = self.config.filter_len;
        let lambda = self.config.forgetting_factor;

        // A silent window carries no excitation; the update would only
        // rescale P by 1/lambda per sample, inflating it across sustained
        // far-end silence
        if dot(window, window) == 0.0 {
            return;
        }

        // gain numerator = P . x, row_product = x^T . P
        for i in 0..len {
            let row = &self.p[i * len..(i + 1) * len];
            self.gain[i] = dot(row, window);
        }
        for j in 0..len {
            let mut acc = 0.0;
            for i in 0..len {
                acc += window[i] * self.p[i * len + j];
            }
            self.row_product[j] = acc;
        }

        let denominator = lambda + dot(&self.row_product, window);
        if !denominator.is_finite() || denominator <= self.config.stability_floor {
            self.skipped_updates += 1;
            trace!(
                "RLS update skipped: denominator {:.3e} outside the stable range",
                denominator
            );
            return;
        }

        for value in self.gain.iter_mut() {
            *value /= denominator;
        }

        // P = (P - gain x row_product) / lambda
        for i in 0..len {
            let k_i = self.gain[i];
            for j in 0..len {
                let idx = i * len + j;
                self.p[idx] = (self.p[idx] - k_i * self.row_product[j]) / lambda;
            }
        }

        for (weight, &k_i) in self.weights.iter_mut().zip(&self.gain) {
            *weight += k_i * error;
        }
    }

    /// Restore zeroed weights and the initial P matrix
    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.init_p();
        self.skipped_updates = 0;
    }

    /// Number of filter taps
    pub fn filter_len(&self) -> usize {
        self.config.filter_len
    }

    /// Current filter weights
    pub fn weights(&self) -> &[Sample] {
        &self.weights
    }

    /// Updates skipped by the stability guard since creation or reset
    pub fn skipped_updates(&self) -> u64 {
        self.skipped_updates
    }

    fn init_p(&mut self) {
        let len = self.config.filter_len;
        self.p.iter_mut().for_each(|v| *v = 0.0);
        for i in 0..len {
            self.p[i * len + i] = 1.0 / self.config.regularization;
        }
    }
}

fn dot(a: &[f32], b: &[Sample]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
