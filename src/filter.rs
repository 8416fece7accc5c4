/// Filter selection module
///
/// A closed set of echo-cancellation algorithms, chosen once per session.
/// `FilterSelection` is the configuration side, `EchoFilter` the running
/// instance; dispatch is a plain enum match rather than trait objects.

use crate::auto_select::{AutoSelectConfig, AutoSelectFilter};
use crate::hybrid::{HybridConfig, HybridFilter};
use crate::nlms::{NlmsConfig, NlmsFilter};
use crate::rls::{RlsConfig, RlsFilter};
use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Algorithm choice plus its parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum FilterSelection {
    Nlms(NlmsConfig),
    Rls(RlsConfig),
    Hybrid(HybridConfig),
    AutoSelect(AutoSelectConfig),
}

impl Default for FilterSelection {
    fn default() -> Self {
        Self::Hybrid(HybridConfig::default())
    }
}

impl FilterSelection {
    /// Validate the wrapped configuration
    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            Self::Nlms(config) => config
                .validate()
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
            Self::Rls(config) => config
                .validate()
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
            Self::Hybrid(config) => config
                .validate()
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
            Self::AutoSelect(config) => config
                .validate()
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
        }
    }

    /// Short algorithm name for logs and stats
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nlms(_) => "nlms",
            Self::Rls(_) => "rls",
            Self::Hybrid(_) => "hybrid",
            Self::AutoSelect(_) => "auto_select",
        }
    }
}

/// Running filter instance behind a session's algorithm choice
pub enum EchoFilter {
    Nlms(NlmsFilter),
    Rls(RlsFilter),
    Hybrid(HybridFilter),
    AutoSelect(AutoSelectFilter),
}

impl EchoFilter {
    /// Instantiate the selected algorithm, failing fast on invalid
    /// configuration
    pub fn new(selection: FilterSelection) -> Result<Self, FilterError> {
        match selection {
            FilterSelection::Nlms(config) => NlmsFilter::new(config)
                .map(Self::Nlms)
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
            FilterSelection::Rls(config) => RlsFilter::new(config)
                .map(Self::Rls)
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
            FilterSelection::Hybrid(config) => HybridFilter::new(config)
                .map(Self::Hybrid)
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
            FilterSelection::AutoSelect(config) => AutoSelectFilter::new(config)
                .map(Self::AutoSelect)
                .map_err(|e| FilterError::InvalidConfig(e.to_string())),
        }
    }

    /// Cancel echo in one near-end frame against its reference window
    ///
    /// The double-talk flag only matters to the hybrid blend; the other
    /// algorithms see its effect through the attenuated reference window.
    pub fn process_frame(
        &mut self,
        near: &[Sample],
        reference: &[Sample],
        double_talk: bool,
    ) -> Vec<Sample> {
        match self {
            Self::Nlms(filter) => filter.process_frame(near, reference),
            Self::Rls(filter) => filter.process_frame(near, reference),
            Self::Hybrid(filter) => filter.process_frame(near, reference, double_talk),
            Self::AutoSelect(filter) => filter.process_frame(near, reference),
        }
    }

    /// Reset adaptive state to the initial coefficients
    pub fn reset(&mut self) {
        match self {
            Self::Nlms(filter) => filter.reset(),
            Self::Rls(filter) => filter.reset(),
            Self::Hybrid(filter) => filter.reset(),
            Self::AutoSelect(filter) => filter.reset(),
        }
    }

    /// Number of filter taps
    pub fn filter_len(&self) -> usize {
        match self {
            Self::Nlms(filter) => filter.filter_len(),
            Self::Rls(filter) => filter.filter_len(),
            Self::Hybrid(filter) => filter.filter_len(),
            Self::AutoSelect(filter) => filter.filter_len(),
        }
    }

    /// Short algorithm name for logs and stats
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nlms(_) => "nlms",
            Self::Rls(_) => "rls",
            Self::Hybrid(_) => "hybrid",
            Self::AutoSelect(_) => "auto_select",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(FilterSelection::Nlms(NlmsConfig::default()) ; "nlms")]
    #[test_case(FilterSelection::Rls(RlsConfig::default()) ; "rls")]
    #[test_case(FilterSelection::Hybrid(HybridConfig::default()) ; "hybrid")]
    #[test_case(FilterSelection::AutoSelect(AutoSelectConfig::default()) ; "auto_select")]
    fn test_variant_constructs_and_passes_silence_through(selection: FilterSelection) {
        assert!(selection.validate().is_ok());

        let mut filter = EchoFilter::new(selection).unwrap();
        assert_eq!(filter.filter_len(), 96);

        let near: Vec<f32> = (0..320)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 250.0 * i as f32 / 16000.0).sin())
            .collect();
        let reference = vec![0.0; 320];

        let output = filter.process_frame(&near, &reference, false);
        assert_eq!(output.len(), near.len());
        for (out, orig) in output.iter().zip(&near) {
            assert!((out - orig).abs() < 0.06, "out={}, orig={}", out, orig);
        }
    }

    #[test_case(FilterSelection::Nlms(NlmsConfig { filter_len: 0, ..Default::default() }) ; "nlms")]
    #[test_case(FilterSelection::Rls(RlsConfig { filter_len: 0, ..Default::default() }) ; "rls")]
    #[test_case(FilterSelection::Hybrid(HybridConfig { filter_len: 0, ..Default::default() }) ; "hybrid")]
    #[test_case(FilterSelection::AutoSelect(AutoSelectConfig { filter_len: 0, ..Default::default() }) ; "auto_select")]
    fn test_zero_filter_len_fails_fast(selection: FilterSelection) {
        assert!(selection.validate().is_err());
        assert!(EchoFilter::new(selection).is_err());
    }

    #[test]
    fn test_default_selection_is_hybrid() {
        let selection = FilterSelection::default();
        assert_eq!(selection.name(), "hybrid");

        let filter = EchoFilter::new(selection).unwrap();
        assert_eq!(filter.name(), "hybrid");
    }

    #[test]
    fn test_selection_round_trips_through_json() {
        let selection = FilterSelection::Rls(RlsConfig::default());
        let json = serde_json::to_string(&selection).unwrap();
        assert!(json.contains("\"algorithm\":\"rls\""));

        let back: FilterSelection = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "rls");
    }
}
