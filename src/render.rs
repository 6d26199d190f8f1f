//! Offline rendering for auditioning scripts outside a host.

use crate::engine::Engine;
use std::path::Path;

/// Renders `frames` samples, feeding `input` through the engine in
/// `block_size` chunks. Missing input reads as silence.
pub fn render_offline(engine: &mut Engine, input: &[f32], frames: usize) -> Vec<f32> {
    let mut output = vec![0.0; frames];
    let block_size = engine.block_size().max(1);
    let mut offset = 0;
    while offset < frames {
        let end = (offset + block_size).min(frames);
        let block_in = input.get(offset..end.min(input.len())).unwrap_or(&[]);
        engine.process_block(block_in, &mut output[offset..end]);
        offset = end;
    }
    output
}

/// Writes mono 32-bit float samples to a WAV file.
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    log::info!("wrote {} samples", samples.len());
    Ok(())
}
