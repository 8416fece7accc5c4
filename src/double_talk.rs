/// Double-talk detection module
///
/// Flags frames where the near-end speaker talks over the far-end playback.
/// Uses the near/far energy ratio with a hold-over counter so the decision
/// does not flap at word boundaries. While the decision is active the
/// pipeline attenuates the reference window rather than freezing adaptation.

use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum DoubleTalkError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Double-talk detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoubleTalkConfig {
    /// Near/far energy ratio above which double-talk is declared
    pub energy_ratio_threshold: f32,

    /// Number of calls the decision is held after the ratio drops
    pub hold_over_frames: u32,

    /// Scale applied to the reference window while double-talk is active
    pub reference_attenuation: f32,

    /// Stabilizer added to the far-end energy before dividing
    pub epsilon: f32,
}

impl Default for DoubleTalkConfig {
    fn default() -> Self {
        Self {
            energy_ratio_threshold: 1.5,
            hold_over_frames: 32,      // ~640ms of 20ms frames
            reference_attenuation: 0.3,
            epsilon: 1e-6,
        }
    }
}

impl DoubleTalkConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), DoubleTalkError> {
        if self.energy_ratio_threshold <= 0.0 {
            return Err(DoubleTalkError::InvalidConfig(
                "energy_ratio_threshold must be greater than 0".to_string(),
            ));
        }

        if self.reference_attenuation <= 0.0 || self.reference_attenuation > 1.0 {
            return Err(DoubleTalkError::InvalidConfig(
                "reference_attenuation must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.epsilon <= 0.0 {
            return Err(DoubleTalkError::InvalidConfig(
                "epsilon must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Energy-ratio double-talk detector with hold-over hysteresis
pub struct DoubleTalkDetector {
    config: DoubleTalkConfig,
    hold_over: u32,
    active: bool,
}

impl DoubleTalkDetector {
    /// Create a detector with default configuration
    pub fn new() -> Self {
        Self::with_config(DoubleTalkConfig::default())
    }

    /// Create a detector with custom configuration
    pub fn with_config(config: DoubleTalkConfig) -> Self {
        debug!("Initializing double-talk detector with config: {:?}", config);

        Self {
            config,
            hold_over: 0,
            active: false,
        }
    }

    /// Assess one frame pair and return whether double-talk is active
    ///
    /// A ratio above the threshold re-arms the hold-over counter; while the
    /// counter is nonzero the decision stays active and the counter drops by
    /// one per call.
    pub fn assess(&mut self, near: &[Sample], reference: &[Sample]) -> bool {
        let near_energy = mean_energy(near);
        let reference_energy = mean_energy(reference);
        let ratio = near_energy / (reference_energy + self.config.epsilon);

        trace!(
            "Double-talk assess: near={:.6}, far={:.6}, ratio={:.3}, hold_over={}",
            near_energy,
            reference_energy,
            ratio,
            self.hold_over
        );

        let was_active = self.active;

        if ratio > self.config.energy_ratio_threshold {
            self.hold_over = self.config.hold_over_frames;
            self.active = true;
        } else if self.hold_over > 0 {
            self.hold_over -= 1;
            self.active = true;
        } else {
            self.active = false;
        }

        if self.active != was_active {
            debug!(
                "Double-talk {} (ratio={:.3})",
                if self.active { "started" } else { "ended" },
                ratio
            );
        }

        self.active
    }

    /// Current decision without re-assessing
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Clear the decision and hold-over counter
    pub fn reset(&mut self) {
        self.hold_over = 0;
        self.active = false;
        debug!("Double-talk detector reset");
    }

    /// Get current configuration
    pub fn config(&self) -> &DoubleTalkConfig {
        &self.config
    }
}

impl Default for DoubleTalkDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean squared energy of a frame (0.0 for an empty frame)
fn mean_energy(samples: &[Sample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    sum_squares / samples.len() as f32
}
