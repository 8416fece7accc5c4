/// Echo cancellation service binary
///
/// Standalone AEC service. With AEC_FAR_WAV and AEC_NEAR_WAV set it runs
/// offline over the recorded pair and writes the cleaned capture; otherwise
/// it runs a live demo with a synthetic playback task feeding the reference
/// buffer while the capture task cancels the echo.

use aec_processor::{
    wav_io, AecConfig, EchoCanceller, FilterSelection, FRAME_SIZE, NEAR_END_SAMPLE_RATE,
};
use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aec_processor=debug".parse().unwrap()),
        )
        .init();

    info!("Starting AetherOS Echo Cancellation Service");

    // Load configuration
    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("Algorithm: {}", config.filter.name());

    // Create echo canceller
    let canceller = match EchoCanceller::new(config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create echo canceller: {}", e);
            std::process::exit(1);
        }
    };

    let far_wav = std::env::var("AEC_FAR_WAV").ok();
    let near_wav = std::env::var("AEC_NEAR_WAV").ok();

    let result = match (far_wav, near_wav) {
        (Some(far), Some(near)) => run_offline(canceller, &far, &near).await,
        _ => run_demo(canceller).await,
    };

    if let Err(e) = result {
        error!("Service error: {:#}", e);
        std::process::exit(1);
    }

    info!("Echo cancellation service stopped");
}

/// Load configuration from environment or config file
fn load_config() -> Result<AecConfig> {
    let mut config = match std::env::var("AEC_CONFIG") {
        Ok(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("read config file {}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parse config file {}", path))?
        }
        Err(_) => AecConfig::default(),
    };

    if let Ok(algorithm) = std::env::var("AEC_ALGORITHM") {
        config.filter = match algorithm.as_str() {
            "nlms" => FilterSelection::Nlms(Default::default()),
            "rls" => FilterSelection::Rls(Default::default()),
            "hybrid" => FilterSelection::Hybrid(Default::default()),
            "auto_select" => FilterSelection::AutoSelect(Default::default()),
            other => bail!("Unknown algorithm: {}", other),
        };
    }

    Ok(config)
}

/// Cancel echo in a recorded far/near pair, frame by frame
async fn run_offline(
    mut canceller: EchoCanceller,
    far_path: &str,
    near_path: &str,
) -> Result<()> {
    let output_path =
        std::env::var("AEC_OUTPUT_WAV").unwrap_or_else(|_| "aec_output.wav".to_string());

    let (far, far_rate) = wav_io::read_mono_i16(far_path)
        .with_context(|| format!("read far-end wav {}", far_path))?;
    let (near, near_rate) = wav_io::read_mono_i16(near_path)
        .with_context(|| format!("read near-end wav {}", near_path))?;

    info!(
        "Offline run: {} far samples at {}Hz, {} near samples at {}Hz",
        far.len(),
        far_rate,
        near.len(),
        near_rate
    );

    // Feed the far end at the playback rate so each near frame sees the
    // matching slice of reference history
    let far_chunk = (far_rate as usize * FRAME_SIZE) / NEAR_END_SAMPLE_RATE as usize;
    let writer = canceller.far_end();

    let mut cleaned = Vec::with_capacity(near.len());
    let mut frame_index = 0;
    for frame in near.chunks(FRAME_SIZE) {
        let far_start = frame_index * far_chunk;
        if far_start < far.len() {
            let far_end = (far_start + far_chunk).min(far.len());
            writer.push(&far[far_start..far_end]);
        }

        cleaned.extend_from_slice(&canceller.process_near_end(frame));
        frame_index += 1;
    }

    wav_io::write_mono_i16(&output_path, &cleaned, near_rate)
        .with_context(|| format!("write cleaned wav {}", output_path))?;

    let stats = canceller.stats();
    info!(
        "Offline run complete: {} frames processed ({} passed through, {} double-talk), output: {}",
        stats.frames_processed, stats.frames_passed_through, stats.double_talk_frames, output_path
    );

    Ok(())
}

/// Live demo: a playback task pushes a synthetic far-end tone while the
/// capture task cancels the echoed copy out of the near-end frames
async fn run_demo(mut canceller: EchoCanceller) -> Result<()> {
    let demo_frames: usize = std::env::var("AEC_DEMO_FRAMES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(500);

    let far_rate = canceller.config().far_end_sample_rate;
    let far_chunk = (far_rate as usize * FRAME_SIZE) / NEAR_END_SAMPLE_RATE as usize;

    info!(
        "Demo mode: {} frames of 440Hz tone with simulated echo ({} far samples per frame)",
        demo_frames, far_chunk
    );

    let writer = canceller.far_end();
    let (tx, mut rx) = mpsc::channel::<Vec<i16>>(4);

    // Playback task: generate the far-end tone, feed the reference buffer,
    // and emit the echoed near-end frame the microphone would have heard
    let producer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(20));
        let mut phase: u64 = 0;
        let mut seed: u32 = 0x5eed_cafe;
        let mut dither_seed: u32 = 0x0dd5_eed5;

        for _ in 0..demo_frames {
            interval.tick().await;

            // Tone over a small dither floor; a pure sinusoid would leave the
            // RLS excitation rank-deficient and let P drift over a long run
            let chunk: Vec<i16> = (0..far_chunk)
                .map(|i| {
                    dither_seed = dither_seed.wrapping_mul(1664525).wrapping_add(1013904223);
                    let dither = ((dither_seed >> 24) as i32 - 128) as i16;
                    let t = (phase + i as u64) as f32 / far_rate as f32;
                    let s = (8000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16;
                    s.saturating_add(dither)
                })
                .collect();
            phase += far_chunk as u64;

            writer.push(&chunk);

            // Echo path: the tail of this chunk, one sample late at 60%
            // gain, under a small noise floor
            let tail = far_chunk.saturating_sub(FRAME_SIZE);
            let near: Vec<i16> = (0..FRAME_SIZE)
                .map(|j| {
                    seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                    let noise = ((seed >> 24) as i32 - 128) as i16 / 4;
                    let played = (tail + j)
                        .checked_sub(1)
                        .and_then(|i| chunk.get(i))
                        .copied()
                        .unwrap_or(0);
                    let echo = (played as f32 * 0.6) as i16;
                    echo.saturating_add(noise)
                })
                .collect();

            if tx.send(near).await.is_err() {
                break;
            }
        }
    });

    // Capture task: cancel the echo and report the attenuation
    let mut input_energy = 0.0f64;
    let mut output_energy = 0.0f64;
    let mut frames = 0usize;

    while let Some(frame) = rx.recv().await {
        let cleaned = canceller.process_near_end(&frame);

        input_energy += frame.iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
        output_energy += cleaned.iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
        frames += 1;

        if frames % 100 == 0 {
            let reduction_db = 10.0 * (input_energy / output_energy.max(1.0)).log10();
            info!(
                "Frame {}: echo reduction {:.1} dB, fill ratio {:.2}",
                frames,
                reduction_db,
                canceller.stats().reference_fill_ratio
            );
            input_energy = 0.0;
            output_energy = 0.0;
        }
    }

    producer.await.context("playback task panicked")?;

    let stats = canceller.stats();
    info!(
        "Demo complete: {} frames processed, {} passed through, {} double-talk, {} resets",
        stats.frames_processed, stats.frames_passed_through, stats.double_talk_frames, stats.resets
    );

    Ok(())
}
