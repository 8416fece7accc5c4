/// Acoustic echo cancellation library
///
/// This library removes played-back far-end audio from the near-end
/// microphone capture so full-duplex voice sessions do not hear themselves.
/// It provides NLMS, RLS, and hybrid adaptive filters, per-frame parameter
/// auto-selection, double-talk detection, and a streaming pipeline fed by
/// concurrent playback and capture tasks.

pub mod auto_select;
pub mod double_talk;
pub mod filter;
pub mod hybrid;
pub mod nlms;
pub mod pipeline;
pub mod reference_buffer;
pub mod rls;
pub mod sample;
pub mod session;
pub mod wav_io;

// Re-export main types
pub use auto_select::{AutoSelectConfig, AutoSelectFilter, Selection, SelectionError, SweepCandidates};
pub use double_talk::{DoubleTalkConfig, DoubleTalkDetector, DoubleTalkError};
pub use filter::{EchoFilter, FilterError, FilterSelection};
pub use hybrid::{HybridConfig, HybridFilter};
pub use nlms::{NlmsConfig, NlmsFilter};
pub use pipeline::{AecConfig, AecError, CancellerStats, EchoCanceller, FarEndWriter};
pub use reference_buffer::{ReferenceBuffer, ReferenceBufferError, DEFAULT_CAPACITY, MAX_CAPACITY};
pub use rls::{RlsConfig, RlsFilter};
pub use sample::{Sample, DEFAULT_FAR_END_SAMPLE_RATE, FRAME_SIZE, NEAR_END_SAMPLE_RATE};
pub use session::{PolicyError, ResetPolicy, ResetPolicyConfig};
pub use wav_io::{read_mono_i16, write_mono_i16, WavError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
