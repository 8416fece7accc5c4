/// Sample conversion module
///
/// Converts between 16-bit PCM at the service boundary and the normalized
/// f32 domain the adaptive filters operate in. The scale factor is 32768 in
/// both directions, so every i16 value round-trips exactly.

/// Normalized audio sample format (f32 in [-1.0, 1.0])
pub type Sample = f32;

/// Near-end capture sample rate (16kHz mono)
pub const NEAR_END_SAMPLE_RATE: u32 = 16000;

/// Default far-end playback sample rate (24kHz mono)
pub const DEFAULT_FAR_END_SAMPLE_RATE: u32 = 24000;

/// Near-end frame duration in milliseconds
pub const FRAME_DURATION_MS: u32 = 20;

/// Samples per near-end frame (20ms at 16kHz)
pub const FRAME_SIZE: usize = (NEAR_END_SAMPLE_RATE as usize / 1000) * FRAME_DURATION_MS as usize;

/// PCM normalization scale (2^15)
pub const PCM_SCALE: f32 = 32768.0;

/// Convert one i16 PCM sample to the normalized domain
pub fn normalize(sample: i16) -> Sample {
    sample as f32 / PCM_SCALE
}

/// Convert one normalized sample back to i16 PCM, clamping instead of wrapping
pub fn denormalize(sample: Sample) -> i16 {
    (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert a PCM frame to the normalized domain
pub fn normalize_frame(frame: &[i16]) -> Vec<Sample> {
    frame.iter().map(|&s| normalize(s)).collect()
}

/// Convert a normalized frame back to PCM
pub fn denormalize_frame(frame: &[Sample]) -> Vec<i16> {
    frame.iter().map(|&s| denormalize(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame_size_constant() {
        assert_eq!(FRAME_SIZE, 320);
    }

    #[test]
    fn test_normalize_extremes() {
        assert_relative_eq!(normalize(i16::MIN), -1.0, epsilon = 1e-6);
        assert_relative_eq!(normalize(0), 0.0, epsilon = 1e-6);
        assert!(normalize(i16::MAX) < 1.0);
        assert_relative_eq!(normalize(i16::MAX), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_round_trip_exact_for_all_i16() {
        // 32768 is a power of two, so the conversion is lossless
        for value in i16::MIN..=i16::MAX {
            assert_eq!(denormalize(normalize(value)), value);
        }
    }

    #[test]
    fn test_denormalize_clamps_out_of_range() {
        assert_eq!(denormalize(1.5), i16::MAX);
        assert_eq!(denormalize(-1.5), i16::MIN);
        assert_eq!(denormalize(1.0), i16::MAX); // 32768.0 clamps to 32767
        assert_eq!(denormalize(-1.0), i16::MIN);
    }

    #[test]
    fn test_frame_helpers() {
        let pcm = vec![0i16, 16384, -16384, i16::MAX, i16::MIN];
        let normalized = normalize_frame(&pcm);

        assert_eq!(normalized.len(), pcm.len());
        assert_relative_eq!(normalized[1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(normalized[2], -0.5, epsilon = 1e-6);

        let restored = denormalize_frame(&normalized);
        assert_eq!(restored, pcm);
    }
}
