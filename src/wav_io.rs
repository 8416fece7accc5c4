/// WAV file I/O for offline echo cancellation
///
/// Batch runs read prerecorded far-end and near-end captures and write the
/// cleaned result. Only mono 16-bit PCM is supported, matching the frame
/// format the pipeline works in.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WavError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported format: {channels} channels, {bits_per_sample}-bit {format:?} (need mono 16-bit PCM)")]
    UnsupportedFormat {
        channels: u16,
        bits_per_sample: u16,
        format: SampleFormat,
    },
}

/// Read a mono 16-bit PCM WAV file, returning samples and sample rate
pub fn read_mono_i16<P: AsRef<Path>>(path: P) -> Result<(Vec<i16>, u32), WavError> {
    let mut reader = WavReader::open(path.as_ref())?;
    let spec = reader.spec();

    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int
    {
        return Err(WavError::UnsupportedFormat {
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            format: spec.sample_format,
        });
    }

    let samples = reader.samples::<i16>().collect::<Result<Vec<i16>, _>>()?;

    debug!(
        "Read {} samples at {}Hz from {}",
        samples.len(),
        spec.sample_rate,
        path.as_ref().display()
    );

    Ok((samples, spec.sample_rate))
}

/// Write samples as a mono 16-bit PCM WAV file
pub fn write_mono_i16<P: AsRef<Path>>(
    path: P,
    samples: &[i16],
    sample_rate: u32,
) -> Result<(), WavError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    debug!(
        "Wrote {} samples at {}Hz to {}",
        samples.len(),
        sample_rate,
        path.as_ref().display()
    );

    Ok(())
}
