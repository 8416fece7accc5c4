/// Echo cancellation pipeline module
///
/// Wires the reference buffer, double-talk detector, adaptive filter, and
/// session reset policy into the full-duplex frame path: the playback task
/// pushes far-end PCM through a `FarEndWriter`, the capture task feeds
/// near-end frames to `process_near_end` and forwards the cleaned frames
/// upstream.

use crate::double_talk::{DoubleTalkConfig, DoubleTalkDetector, DoubleTalkError};
use crate::filter::{EchoFilter, FilterError, FilterSelection};
use crate::reference_buffer::{ReferenceBuffer, ReferenceBufferError, DEFAULT_CAPACITY};
use crate::sample::{self, Sample, DEFAULT_FAR_END_SAMPLE_RATE};
use crate::session::{PolicyError, ResetPolicy, ResetPolicyConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Error, Debug)]
pub enum AecError {
    #[error("Reference buffer error: {0}")]
    ReferenceBuffer(#[from] ReferenceBufferError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Double-talk error: {0}")]
    DoubleTalk(#[from] DoubleTalkError),

    #[error("Reset policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Echo canceller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AecConfig {
    /// Far-end playback sample rate (reference samples are consumed 1:1,
    /// without resampling)
    pub far_end_sample_rate: u32,

    /// Reference buffer capacity in samples
    pub reference_capacity: usize,

    /// Adaptive filter algorithm and parameters
    pub filter: FilterSelection,

    /// Double-talk detection parameters
    pub double_talk: DoubleTalkConfig,

    /// Periodic reset thresholds
    pub reset_policy: ResetPolicyConfig,

    /// Linear gain applied to cleaned frames before the noise gate
    pub post_gain: f32,

    /// PCM amplitude at or below which cleaned samples are zeroed
    /// (0 disables the gate)
    pub noise_gate_level: i16,
}

impl Default for AecConfig {
    fn default() -> Self {
        Self {
            far_end_sample_rate: DEFAULT_FAR_END_SAMPLE_RATE,
            reference_capacity: DEFAULT_CAPACITY,
            filter: FilterSelection::default(),
            double_talk: DoubleTalkConfig::default(),
            reset_policy: ResetPolicyConfig::default(),
            post_gain: 1.2,
            noise_gate_level: 50,
        }
    }
}

impl AecConfig {
    /// Validate the whole configuration tree
    pub fn validate(&self) -> Result<(), AecError> {
        if self.far_end_sample_rate == 0 {
            return Err(AecError::InvalidConfig(
                "far_end_sample_rate must be greater than 0".to_string(),
            ));
        }

        if self.post_gain <= 0.0 {
            return Err(AecError::InvalidConfig(
                "post_gain must be greater than 0".to_string(),
            ));
        }

        if self.noise_gate_level < 0 {
            return Err(AecError::InvalidConfig(
                "noise_gate_level must not be negative".to_string(),
            ));
        }

        // Capacity bounds are enforced by the buffer itself at construction;
        // re-check here so validation alone catches them
        if self.reference_capacity == 0
            || self.reference_capacity > crate::reference_buffer::MAX_CAPACITY
        {
            return Err(AecError::ReferenceBuffer(
                ReferenceBufferError::InvalidCapacity(self.reference_capacity),
            ));
        }

        self.filter.validate()?;
        self.double_talk.validate()?;
        self.reset_policy.validate()?;

        Ok(())
    }
}

/// Cheap cloneable handle for the playback task to feed far-end audio
#[derive(Clone)]
pub struct FarEndWriter {
    reference: Arc<ReferenceBuffer>,
}

impl FarEndWriter {
    /// Normalize and append far-end PCM to the reference buffer
    pub fn push(&self, pcm: &[i16]) {
        let normalized = sample::normalize_frame(pcm);
        self.reference.push(&normalized);
    }
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone)]
pub struct CancellerStats {
    pub algorithm: &'static str,
    pub frames_processed: u64,
    pub frames_passed_through: u64,
    pub double_talk_frames: u64,
    pub resets: u64,
    pub reference_fill_ratio: f32,
}

/// Full-duplex echo canceller
pub struct EchoCanceller {
    config: AecConfig,
    reference: Arc<ReferenceBuffer>,
    filter: EchoFilter,
    detector: DoubleTalkDetector,
    policy: ResetPolicy,
    frames_processed: u64,
    frames_passed_through: u64,
    double_talk_frames: u64,
    resets: u64,
}

impl EchoCanceller {
    /// Create a canceller, failing fast on any invalid configuration
    pub fn new(config: AecConfig) -> Result<Self, AecError> {
        config.validate()?;

        info!(
            "Initializing echo canceller: algorithm={}, reference_capacity={}, far_end_rate={}Hz",
            config.filter.name(),
            config.reference_capacity,
            config.far_end_sample_rate
        );

        let reference = Arc::new(ReferenceBuffer::with_capacity(config.reference_capacity)?);
        let filter = EchoFilter::new(config.filter.clone())?;
        let detector = DoubleTalkDetector::with_config(config.double_talk.clone());
        let policy = ResetPolicy::new(config.reset_policy.clone())?;

        Ok(Self {
            config,
            reference,
            filter,
            detector,
            policy,
            frames_processed: 0,
            frames_passed_through: 0,
            double_talk_frames: 0,
            resets: 0,
        })
    }

    /// Normalize and append far-end PCM to the reference buffer
    pub fn push_far_end(&self, pcm: &[i16]) {
        let normalized = sample::normalize_frame(pcm);
        self.reference.push(&normalized);
    }

    /// Handle for the playback task; clones share the same buffer
    pub fn far_end(&self) -> FarEndWriter {
        FarEndWriter {
            reference: Arc::clone(&self.reference),
        }
    }

    /// Cancel echo in one near-end capture frame
    ///
    /// Frames are expected in capture order. When the reference buffer
    /// cannot cover the frame the input passes through untouched; filtered
    /// frames get the post gain and noise gate applied on the way out.
    pub fn process_near_end(&mut self, frame: &[i16]) -> Vec<i16> {
        if self.policy.should_reset() {
            self.apply_reset("policy threshold");
        }

        let near = sample::normalize_frame(frame);

        let window = match self.reference.recent(near.len()) {
            Ok(window) => window,
            Err(err) => {
                trace!("Passing frame through unfiltered: {}", err);
                self.frames_processed += 1;
                self.frames_passed_through += 1;
                self.policy.record_samples(frame.len());
                return frame.to_vec();
            }
        };

        let double_talk = self.detector.assess(&near, &window);
        let filter_input = if double_talk {
            self.double_talk_frames += 1;
            let attenuation = self.config.double_talk.reference_attenuation;
            window.iter().map(|&s| s * attenuation).collect()
        } else {
            window
        };

        let cleaned = self.filter.process_frame(&near, &filter_input, double_talk);

        self.frames_processed += 1;
        self.policy.record_samples(frame.len());

        if self.frames_processed % 500 == 0 {
            debug!(
                "Processed {} frames ({} passed through, {} double-talk, {} resets)",
                self.frames_processed,
                self.frames_passed_through,
                self.double_talk_frames,
                self.resets
            );
        }

        self.condition_output(&cleaned)
    }

    /// Reset filter state, detector, reference history, and policy counters
    pub fn reset(&mut self) {
        self.apply_reset("external request");
    }

    /// Immediate reset on an utterance boundary signaled by the far end
    pub fn notify_session_boundary(&mut self) {
        self.apply_reset("session boundary");
    }

    /// Get current statistics
    pub fn stats(&self) -> CancellerStats {
        CancellerStats {
            algorithm: self.filter.name(),
            frames_processed: self.frames_processed,
            frames_passed_through: self.frames_passed_through,
            double_talk_frames: self.double_talk_frames,
            resets: self.resets,
            reference_fill_ratio: self.reference.fill_ratio(),
        }
    }

    /// Get current configuration
    pub fn config(&self) -> &AecConfig {
        &self.config
    }

    fn apply_reset(&mut self, reason: &str) {
        self.filter.reset();
        self.detector.reset();
        self.reference.clear();
        self.policy.mark_reset();
        self.resets += 1;
        info!("Echo canceller reset ({})", reason);
    }

    /// Post gain, clamping denormalization, then the noise gate
    fn condition_output(&self, cleaned: &[Sample]) -> Vec<i16> {
        let gate = self.config.noise_gate_level;

        cleaned
            .iter()
            .map(|&s| {
                let pcm = sample::denormalize(s * self.config.post_gain);
                if gate > 0 && pcm.unsigned_abs() <= gate.unsigned_abs() {
                    0
                } else {
                    pcm
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rls::RlsConfig;

    fn noise(length: usize, mut seed: u32) -> Vec<Sample> {
        (0..length)
            .map(|_| {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                (seed >> 8) as f32 / (1 << 24) as f32 - 0.5
            })
            .collect()
    }

    /// Config with a small RLS filter; deterministic and fast to converge
    fn rls_test_config() -> AecConfig {
        AecConfig {
            filter: FilterSelection::Rls(RlsConfig {
                filter_len: 16,
                ..Default::default()
            }),
            post_gain: 1.0,
            noise_gate_level: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_canceller_creation() {
        let canceller = EchoCanceller::new(AecConfig::default()).unwrap();

        let stats = canceller.stats();
        assert_eq!(stats.algorithm, "hybrid");
        assert_eq!(stats.frames_processed, 0);
        assert_eq!(stats.resets, 0);
        assert_eq!(stats.reference_fill_ratio, 0.0);
    }

    #[test]
    fn test_invalid_configs_fail_fast() {
        let config = AecConfig {
            reference_capacity: 0,
            ..Default::default()
        };
        assert!(EchoCanceller::new(config).is_err());

        let config = AecConfig {
            reference_capacity: 5000,
            ..Default::default()
        };
        assert!(EchoCanceller::new(config).is_err());

        let config = AecConfig {
            post_gain: 0.0,
            ..Default::default()
        };
        assert!(EchoCanceller::new(config).is_err());

        let config = AecConfig {
            noise_gate_level: -1,
            ..Default::default()
        };
        assert!(EchoCanceller::new(config).is_err());

        let config = AecConfig {
            filter: FilterSelection::Rls(RlsConfig {
                filter_len: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(EchoCanceller::new(config).is_err());
    }

    #[test]
    fn test_empty_reference_passes_frame_through() {
        let mut canceller = EchoCanceller::new(rls_test_config()).unwrap();

        let frame: Vec<i16> = (0..320).map(|i| (i * 7 % 1000) as i16).collect();
        let output = canceller.process_near_end(&frame);

        assert_eq!(output, frame);

        let stats = canceller.stats();
        assert_eq!(stats.frames_processed, 1);
        assert_eq!(stats.frames_passed_through, 1);
    }

    #[test]
    fn test_cancels_lagged_echo_across_frames() {
        let mut canceller = EchoCanceller::new(rls_test_config()).unwrap();

        // Far-end stream; near end hears it one sample late at half gain
        let far = crate::sample::denormalize_frame(&noise(20 * 320, 77));
        let frames = 20;

        let mut last_output = Vec::new();
        let mut last_near = Vec::new();
        for k in 0..frames {
            let chunk = &far[k * 320..(k + 1) * 320];
            canceller.push_far_end(chunk);

            let near: Vec<i16> = (0..320)
                .map(|j| {
                    let global = k * 320 + j;
                    if global == 0 {
                        0
                    } else {
                        (far[global - 1] as f32 * 0.5) as i16
                    }
                })
                .collect();

            last_output = canceller.process_near_end(&near);
            last_near = near;
        }

        // Ignore the per-frame warmup prefix; the adapted region of the
        // last frame should carry almost no echo energy
        let energy = |pcm: &[i16]| {
            pcm.iter()
                .map(|&s| {
                    let v = s as f32 / 32768.0;
                    v * v
                })
                .sum::<f32>()
        };
        let residual = energy(&last_output[16..]);
        let echo = energy(&last_near[16..]);
        assert!(
            residual < echo * 0.05,
            "residual {} vs echo {}",
            residual,
            echo
        );

        let stats = canceller.stats();
        assert_eq!(stats.frames_processed, frames as u64);
        assert_eq!(stats.frames_passed_through, 0);
    }

    #[test]
    fn test_double_talk_frames_are_counted() {
        let mut canceller = EchoCanceller::new(rls_test_config()).unwrap();

        // Quiet far end, loud near end
        canceller.push_far_end(&vec![10i16; 320]);
        let near: Vec<i16> = (0..320)
            .map(|i| (8000.0 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin()) as i16)
            .collect();

        canceller.process_near_end(&near);

        let stats = canceller.stats();
        assert_eq!(stats.double_talk_frames, 1);
    }

    #[test]
    fn test_session_boundary_reset_is_observable() {
        let mut canceller = EchoCanceller::new(rls_test_config()).unwrap();

        let far = crate::sample::denormalize_frame(&noise(320, 13));
        canceller.push_far_end(&far);
        let near: Vec<i16> = far.iter().map(|&s| s / 2).collect();
        canceller.process_near_end(&near);

        let before = canceller.stats();
        assert_eq!(before.frames_passed_through, 0);
        assert!(before.reference_fill_ratio > 0.0);

        canceller.notify_session_boundary();

        let after = canceller.stats();
        assert_eq!(after.resets, 1);
        assert_eq!(after.reference_fill_ratio, 0.0);

        // Cleared reference history makes the next frame pass through
        let output = canceller.process_near_end(&near);
        assert_eq!(output, near);
        assert_eq!(canceller.stats().frames_passed_through, 1);
    }

    #[test]
    fn test_sample_policy_triggers_reset() {
        let config = AecConfig {
            reset_policy: ResetPolicyConfig {
                max_samples: 640,
                max_elapsed_secs: 3600,
            },
            ..rls_test_config()
        };
        let mut canceller = EchoCanceller::new(config).unwrap();

        let far = crate::sample::denormalize_frame(&noise(320, 21));
        let near: Vec<i16> = far.iter().map(|&s| s / 2).collect();

        for _ in 0..3 {
            canceller.push_far_end(&far);
            canceller.process_near_end(&near);
        }

        let stats = canceller.stats();
        assert_eq!(stats.resets, 1);
        // The post-reset frame found an empty reference buffer
        assert_eq!(stats.frames_passed_through, 1);
        assert_eq!(stats.frames_processed, 3);
    }

    #[test]
    fn test_noise_gate_zeroes_quiet_samples() {
        let config = AecConfig {
            noise_gate_level: 50,
            post_gain: 1.0,
            ..rls_test_config()
        };
        let mut canceller = EchoCanceller::new(config).unwrap();

        // Zero reference makes the RLS output an exact pass, so the gate
        // acts on the original amplitudes
        canceller.push_far_end(&vec![0i16; 320]);

        let mut near = vec![40i16; 320];
        near[100] = 1000;
        near[200] = -1000;

        let output = canceller.process_near_end(&near);

        assert!(output.iter().enumerate().all(|(i, &s)| {
            if i == 100 {
                s == 1000
            } else if i == 200 {
                s == -1000
            } else {
                s == 0
            }
        }));
    }

    #[test]
    fn test_post_gain_scales_output() {
        let config = AecConfig {
            noise_gate_level: 0,
            post_gain: 2.0,
            ..rls_test_config()
        };
        let mut canceller = EchoCanceller::new(config).unwrap();

        canceller.push_far_end(&vec![0i16; 320]);
        let near = vec![1000i16; 320];

        let output = canceller.process_near_end(&near);
        assert!(output.iter().all(|&s| s == 2000));
    }

    #[test]
    fn test_far_end_writer_shares_buffer() {
        let canceller = EchoCanceller::new(rls_test_config()).unwrap();

        let writer = canceller.far_end();
        let second = writer.clone();

        writer.push(&vec![100i16; 160]);
        second.push(&vec![200i16; 160]);

        assert!(canceller.stats().reference_fill_ratio > 0.0);

        // Both handles fed the same buffer
        let expected = 320.0 / canceller.config().reference_capacity as f32;
        assert!((canceller.stats().reference_fill_ratio - expected).abs() < 1e-6);
    }
}
