/// Parameter auto-selection module
///
/// Block-level brute-force search over candidate filter parameters: run the
/// same input block once per candidate, score each run by mean absolute
/// error, keep the winner. This trades CPU for quality and is only viable
/// because filter length and block size are small.

use crate::sample::{denormalize_frame, normalize_frame, Sample};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Step-size candidates tried when none are configured
pub const DEFAULT_STEP_CANDIDATES: [f32; 3] = [0.05, 0.1, 0.2];

/// Regularization candidates tried when none are configured
pub const DEFAULT_REGULARIZATION_CANDIDATES: [f32; 3] = [0.1, 0.01, 0.001];

/// Forgetting factor used by the regularization sweep
const DEFAULT_FORGETTING: f32 = 0.999;

/// Power stabilizer of the block NLMS step normalization
const BLOCK_EPSILON: f32 = 1e-10;

/// Gain denominator floor of the block RLS update
const BLOCK_STABILITY_FLOOR: f32 = 1e-10;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Candidate parameter set is empty")]
    EmptyCandidates,

    #[error("Initial coefficient vector is empty")]
    EmptyCoefficients,

    #[error("Input signals are empty")]
    EmptySignal,

    #[error("Signal length mismatch: desired {desired} vs reference {reference}")]
    LengthMismatch { desired: usize, reference: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// One block run of a filter: the echo estimate and the error signal,
/// both in the normalized domain with a zero prefix of one filter length
#[derive(Debug, Clone)]
pub struct BlockRun {
    pub filtered: Vec<Sample>,
    pub error: Vec<Sample>,
}

/// Winning run of a candidate sweep
#[derive(Debug, Clone)]
pub struct Selection {
    /// Echo estimate of the best run, back in the PCM domain
    pub output: Vec<i16>,

    /// The winning candidate parameter
    pub parameter: f32,

    /// Mean absolute error of the winning run
    pub score: f32,
}

/// Run a block through an NLMS filter starting from the given coefficients
///
/// The step size is normalized by window power and the coefficients are
/// clipped to [-1, 1] after every update.
pub fn nlms_block(
    desired: &[Sample],
    reference: &[Sample],
    initial: &[Sample],
    step_size: f32,
) -> BlockRun {
    let filter_len = initial.len();
    let signal_len = desired.len().min(reference.len());

    let mut coefficients = initial.to_vec();
    let mut filtered = vec![0.0; desired.len()];
    let mut error = vec![0.0; desired.len()];

    for n in filter_len..signal_len {
        let window = &reference[n - filter_len..n];

        filtered[n] = dot(&coefficients, window);
        error[n] = desired[n] - filtered[n];

        let power = dot(window, window) + BLOCK_EPSILON;
        let normalized_step = step_size / power;

        for (c, &x) in coefficients.iter_mut().zip(window) {
            *c = (*c + normalized_step * error[n] * x).clamp(-1.0, 1.0);
        }
    }

    BlockRun { filtered, error }
}

/// Run a block through an RLS filter starting from the given coefficients
///
/// P is freshly initialized to I/regularization for every run;
/// zero-excitation windows and updates with a degenerate gain denominator
/// are skipped.
pub fn rls_block(
    desired: &[Sample],
    reference: &[Sample],
    initial: &[Sample],
    regularization: f32,
    forgetting_factor: f32,
) -> BlockRun {
    let filter_len = initial.len();
    let signal_len = desired.len().min(reference.len());

    let mut coefficients = initial.to_vec();
    let mut p = vec![0.0; filter_len * filter_len];
    for i in 0..filter_len {
        p[i * filter_len + i] = 1.0 / regularization;
    }

    let mut filtered = vec![0.0; desired.len()];
    let mut error = vec![0.0; desired.len()];
    let mut gain = vec![0.0; filter_len];
    let mut row_product = vec![0.0; filter_len];

    for n in filter_len..signal_len {
        let window = &reference[n - filter_len..n];

        filtered[n] = dot(&coefficients, window);
        error[n] = desired[n] - filtered[n];

        // Silent windows emit their error but must not rescale P
        if dot(window, window) == 0.0 {
            continue;
        }

        for i in 0..filter_len {
            let row = &p[i * filter_len..(i + 1) * filter_len];
            gain[i] = dot(row, window);
        }
        for j in 0..filter_len {
            let mut acc = 0.0;
            for i in 0..filter_len {
                acc += window[i] * p[i * filter_len + j];
            }
            row_product[j] = acc;
        }

        let denominator = forgetting_factor + dot(&row_product, window);
        if !denominator.is_finite() || denominator <= BLOCK_STABILITY_FLOOR {
            continue;
        }

        for value in gain.iter_mut() {
            *value /= denominator;
        }
        for i in 0..filter_len {
            let k_i = gain[i];
            for j in 0..filter_len {
                let idx = i * filter_len + j;
                p[idx] = (p[idx] - k_i * row_product[j]) / forgetting_factor;
            }
        }
        for (c, &k_i) in coefficients.iter_mut().zip(&gain) {
            *c += k_i * error[n];
        }
    }

    BlockRun { filtered, error }
}

/// Try each candidate step size on one PCM block and keep the best run
pub fn select_nlms_step(
    desired: &[i16],
    reference: &[i16],
    initial: &[Sample],
    step_sizes: &[f32],
) -> Result<Selection, SelectionError> {
    check_inputs(desired, reference, initial, step_sizes)?;

    let desired_norm = normalize_frame(desired);
    let reference_norm = normalize_frame(reference);

    let mut best: Option<(BlockRun, f32, f32)> = None;
    for &step in step_sizes {
        let run = nlms_block(&desired_norm, &reference_norm, initial, step);
        let score = mean_abs(&run.error);

        if best.as_ref().map_or(true, |&(_, _, s)| score < s) {
            best = Some((run, step, score));
        }
    }

    let (run, parameter, score) = best.expect("candidate set is non-empty");
    debug!(
        "Selected NLMS step {} (score {:.6}) from {} candidates",
        parameter,
        score,
        step_sizes.len()
    );

    Ok(Selection {
        output: denormalize_frame(&run.filtered),
        parameter,
        score,
    })
}

/// Try each candidate regularization on one PCM block and keep the best run
pub fn select_rls_regularization(
    desired: &[i16],
    reference: &[i16],
    initial: &[Sample],
    reg_params: &[f32],
) -> Result<Selection, SelectionError> {
    check_inputs(desired, reference, initial, reg_params)?;

    let desired_norm = normalize_frame(desired);
    let reference_norm = normalize_frame(reference);

    let mut best: Option<(BlockRun, f32, f32)> = None;
    for &reg in reg_params {
        let run = rls_block(
            &desired_norm,
            &reference_norm,
            initial,
            reg,
            DEFAULT_FORGETTING,
        );
        let score = mean_abs(&run.error);

        if best.as_ref().map_or(true, |&(_, _, s)| score < s) {
            best = Some((run, reg, score));
        }
    }

    let (run, parameter, score) = best.expect("candidate set is non-empty");
    debug!(
        "Selected RLS regularization {} (score {:.6}) from {} candidates",
        parameter,
        score,
        reg_params.len()
    );

    Ok(Selection {
        output: denormalize_frame(&run.filtered),
        parameter,
        score,
    })
}

fn check_inputs(
    desired: &[i16],
    reference: &[i16],
    initial: &[Sample],
    candidates: &[f32],
) -> Result<(), SelectionError> {
    if candidates.is_empty() {
        return Err(SelectionError::EmptyCandidates);
    }
    if initial.is_empty() {
        return Err(SelectionError::EmptyCoefficients);
    }
    if desired.is_empty() {
        return Err(SelectionError::EmptySignal);
    }
    if desired.len() != reference.len() {
        return Err(SelectionError::LengthMismatch {
            desired: desired.len(),
            reference: reference.len(),
        });
    }
    Ok(())
}

/// Candidate set swept by the auto-selecting filter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepCandidates {
    /// NLMS step sizes
    NlmsSteps(Vec<f32>),

    /// RLS regularization parameters
    RlsRegularization(Vec<f32>),
}

/// Auto-selecting filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSelectConfig {
    /// Number of filter taps per candidate run
    pub filter_len: usize,

    /// Parameters tried on every frame
    pub candidates: SweepCandidates,
}

impl Default for AutoSelectConfig {
    fn default() -> Self {
        Self {
            filter_len: 96,
            candidates: SweepCandidates::NlmsSteps(DEFAULT_STEP_CANDIDATES.to_vec()),
        }
    }
}

impl AutoSelectConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.filter_len == 0 {
            return Err(SelectionError::InvalidConfig(
                "filter_len must be greater than 0".to_string(),
            ));
        }

        let candidates = match &self.candidates {
            SweepCandidates::NlmsSteps(steps) => steps,
            SweepCandidates::RlsRegularization(regs) => regs,
        };
        if candidates.is_empty() {
            return Err(SelectionError::EmptyCandidates);
        }

        Ok(())
    }
}

/// Frame filter that re-runs the candidate sweep on every block
///
/// Holds no adaptive state across frames: each frame is swept from zero
/// coefficients, so quality depends on per-block re-convergence rather
/// than a persistent echo-path estimate.
pub struct AutoSelectFilter {
    config: AutoSelectConfig,
    last_parameter: Option<f32>,
}

impl AutoSelectFilter {
    /// Create a filter, failing fast on invalid configuration
    pub fn new(config: AutoSelectConfig) -> Result<Self, SelectionError> {
        config.validate()?;

        Ok(Self {
            config,
            last_parameter: None,
        })
    }

    /// Sweep one frame and return the winning run's error (cleaned) frame
    ///
    /// The first `filter_len` samples have no full past window and pass
    /// through unchanged, as does the whole frame when the reference window
    /// is shorter than the filter.
    pub fn process_frame(&mut self, near: &[Sample], reference: &[Sample]) -> Vec<Sample> {
        let filter_len = self.config.filter_len;

        if reference.len() < filter_len {
            return near.to_vec();
        }

        let initial = vec![0.0; filter_len];
        let mut best: Option<(BlockRun, f32, f32)> = None;

        match &self.config.candidates {
            SweepCandidates::NlmsSteps(steps) => {
                for &step in steps {
                    let run = nlms_block(near, reference, &initial, step);
                    let score = mean_abs(&run.error);
                    if best.as_ref().map_or(true, |&(_, _, s)| score < s) {
                        best = Some((run, step, score));
                    }
                }
            }
            SweepCandidates::RlsRegularization(regs) => {
                for &reg in regs {
                    let run = rls_block(near, reference, &initial, reg, DEFAULT_FORGETTING);
                    let score = mean_abs(&run.error);
                    if best.as_ref().map_or(true, |&(_, _, s)| score < s) {
                        best = Some((run, reg, score));
                    }
                }
            }
        }

        let (run, parameter, _score) = best.expect("candidate set is non-empty");
        self.last_parameter = Some(parameter);

        let mut output = run.error;
        let prefix = filter_len.min(near.len());
        output[..prefix].copy_from_slice(&near[..prefix]);
        output
    }

    /// Forget the last winning parameter
    pub fn reset(&mut self) {
        self.last_parameter = None;
    }

    /// Number of filter taps
    pub fn filter_len(&self) -> usize {
        self.config.filter_len
    }

    /// Parameter that won the most recent sweep
    pub fn last_parameter(&self) -> Option<f32> {
        self.last_parameter
    }
}

fn dot(a: &[Sample], b: &[Sample]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mean_abs(values: &[Sample]) -> f32 {
    values.iter().map(|v| v.abs()).sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn noise(length: usize, mut seed: u32) -> Vec<Sample> {
        (0..length)
            .map(|_| {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                (seed >> 8) as f32 / (1 << 24) as f32 - 0.5
            })
            .collect()
    }

    fn synth_echo(reference: &[Sample], path: &[(usize, f32)], filter_len: usize) -> Vec<Sample> {
        (0..reference.len())
            .map(|n| {
                if n < filter_len {
                    0.0
                } else {
                    path.iter().map(|&(lag, gain)| gain * reference[n - lag]).sum()
                }
            })
            .collect()
    }

    fn to_pcm(samples: &[Sample]) -> Vec<i16> {
        crate::sample::denormalize_frame(samples)
    }

    #[test]
    fn test_nlms_block_prefix_is_zero() {
        let desired = noise(100, 3);
        let reference = noise(100, 5);
        let initial = vec![0.0; 8];

        let run = nlms_block(&desired, &reference, &initial, 0.1);

        assert_eq!(run.filtered.len(), 100);
        assert!(run.filtered[..8].iter().all(|&v| v == 0.0));
        assert!(run.error[..8].iter().all(|&v| v == 0.0));
        assert!(run.error[8..].iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_nlms_block_reduces_echo() {
        let filter_len = 8;
        let reference = noise(2000, 21);
        let desired = synth_echo(&reference, &[(1, 0.5), (3, -0.3)], filter_len);
        let initial = vec![0.0; filter_len];

        let run = nlms_block(&desired, &reference, &initial, 0.2);

        let tail = 1500..2000;
        let echo: f32 = desired[tail.clone()].iter().map(|e| e * e).sum();
        let residual: f32 = run.error[tail].iter().map(|e| e * e).sum();
        assert!(residual < echo * 0.05, "residual {} vs echo {}", residual, echo);
    }

    #[test]
    fn test_nlms_block_clip_keeps_outputs_finite() {
        // An absurd step size would diverge without the coefficient clip
        let reference = noise(500, 33);
        let desired = synth_echo(&reference, &[(1, 0.9)], 4);
        let initial = vec![0.0; 4];

        let run = nlms_block(&desired, &reference, &initial, 50.0);

        assert!(run.filtered.iter().all(|v| v.is_finite()));
        assert!(run.error.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rls_block_reduces_echo() {
        let filter_len = 8;
        let reference = noise(1500, 41);
        let desired = synth_echo(&reference, &[(2, 0.4)], filter_len);
        let initial = vec![0.0; filter_len];

        let run = rls_block(&desired, &reference, &initial, 0.1, 0.999);

        let tail = 1000..1500;
        let echo: f32 = desired[tail.clone()].iter().map(|e| e * e).sum();
        let residual: f32 = run.error[tail].iter().map(|e| e * e).sum();
        assert!(residual < echo * 0.02, "residual {} vs echo {}", residual, echo);
    }

    #[test]
    fn test_rls_block_silent_reference_stays_finite() {
        let filter_len = 16;
        let desired = noise(2400, 47);
        let reference = vec![0.0; 2400];
        let initial = vec![0.0; filter_len];

        // Aggressive forgetting factor, the worst case for P growth
        let run = rls_block(&desired, &reference, &initial, 0.1, 0.95);

        assert!(run.error.iter().all(|v| v.is_finite()));
        assert!(run.filtered.iter().all(|&v| v == 0.0));
        assert_eq!(&run.error[filter_len..], &desired[filter_len..]);
    }

    #[test]
    fn test_select_nlms_step_picks_converging_candidate() {
        let filter_len = 8;
        let reference = noise(1000, 51);
        let desired = synth_echo(&reference, &[(1, 0.5)], filter_len);
        let initial = vec![0.0; filter_len];

        // 0.001 barely adapts within the block and 0.02 is still slow;
        // 0.2 converges fastest and must win the sweep
        let selection = select_nlms_step(
            &to_pcm(&desired),
            &to_pcm(&reference),
            &initial,
            &[0.001, 0.02, 0.2],
        )
        .unwrap();

        assert_relative_eq!(selection.parameter, 0.2, epsilon = 1e-6);
        assert_eq!(selection.output.len(), 1000);
        assert!(selection.score > 0.0);
    }

    #[test]
    fn test_select_rls_regularization_returns_winner() {
        let filter_len = 8;
        let reference = noise(1000, 61);
        let desired = synth_echo(&reference, &[(2, 0.4)], filter_len);
        let initial = vec![0.0; filter_len];

        let selection = select_rls_regularization(
            &to_pcm(&desired),
            &to_pcm(&reference),
            &initial,
            &DEFAULT_REGULARIZATION_CANDIDATES,
        )
        .unwrap();

        assert!(DEFAULT_REGULARIZATION_CANDIDATES.contains(&selection.parameter));
        assert!(selection.score.is_finite());
    }

    #[test]
    fn test_selection_input_validation() {
        let initial = vec![0.0; 8];

        match select_nlms_step(&[0; 100], &[0; 100], &initial, &[]) {
            Err(SelectionError::EmptyCandidates) => {}
            _ => panic!("Expected EmptyCandidates error"),
        }

        match select_nlms_step(&[0; 100], &[0; 100], &[], &[0.1]) {
            Err(SelectionError::EmptyCoefficients) => {}
            _ => panic!("Expected EmptyCoefficients error"),
        }

        match select_nlms_step(&[], &[], &initial, &[0.1]) {
            Err(SelectionError::EmptySignal) => {}
            _ => panic!("Expected EmptySignal error"),
        }

        match select_nlms_step(&[0; 100], &[0; 50], &initial, &[0.1]) {
            Err(SelectionError::LengthMismatch { desired, reference }) => {
                assert_eq!(desired, 100);
                assert_eq!(reference, 50);
            }
            _ => panic!("Expected LengthMismatch error"),
        }
    }

    #[test]
    fn test_auto_select_config_validation() {
        let config = AutoSelectConfig::default();
        assert!(config.validate().is_ok());

        let config = AutoSelectConfig {
            filter_len: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AutoSelectConfig {
            filter_len: 96,
            candidates: SweepCandidates::NlmsSteps(vec![]),
        };
        assert!(config.validate().is_err());
        assert!(AutoSelectFilter::new(config).is_err());
    }

    #[test]
    fn test_auto_select_filter_short_reference_passes_through() {
        let mut filter = AutoSelectFilter::new(AutoSelectConfig::default()).unwrap();

        let near = vec![0.3; 320];
        let reference = vec![0.5; 10];

        assert_eq!(filter.process_frame(&near, &reference), near);
        assert!(filter.last_parameter().is_none());
    }

    #[test]
    fn test_auto_select_filter_cleans_and_records_winner() {
        let config = AutoSelectConfig {
            filter_len: 8,
            candidates: SweepCandidates::NlmsSteps(vec![0.05, 0.2]),
        };
        let mut filter = AutoSelectFilter::new(config).unwrap();

        let reference = noise(1000, 71);
        let near = synth_echo(&reference, &[(1, 0.5)], 8);

        let output = filter.process_frame(&near, &reference);

        // Prefix passes through, the rest is the winning error signal
        assert_eq!(&output[..8], &near[..8]);
        let tail = 600..1000;
        let echo: f32 = near[tail.clone()].iter().map(|e| e * e).sum();
        let residual: f32 = output[tail].iter().map(|e| e * e).sum();
        assert!(residual < echo * 0.2);

        assert!(filter.last_parameter().is_some());
        filter.reset();
        assert!(filter.last_parameter().is_none());
    }
}
