// Sample rate conversion using rubato
// Decoded audio is converted once, at load time, to the output device rate

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::EngineError;

/// Frames fed to rubato per process call.
const CHUNK_FRAMES: usize = 1024;

/// Resample interleaved stereo audio from `input_rate` to `output_rate`.
/// Returns the input unchanged when the rates already match.
pub fn resample_stereo(
    input: &[f32],
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f32>, EngineError> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        CHUNK_FRAMES,
        2,
    )
    .map_err(|e| EngineError::UnreadableSource(format!("failed to create resampler: {}", e)))?;

    let planar = deinterleave(input);
    let frames = planar[0].len();
    let mut output: Vec<f32> = Vec::with_capacity((input.len() as f64 * ratio) as usize + 16);

    let mut pos = 0;
    while frames - pos >= CHUNK_FRAMES {
        let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + CHUNK_FRAMES]).collect();
        let out = resampler
            .process(&chunk, None)
            .map_err(|e| EngineError::UnreadableSource(format!("resampling failed: {}", e)))?;
        interleave_into(&mut output, &out);
        pos += CHUNK_FRAMES;
    }

    // Remaining partial chunk, then flush the resampler's internal delay
    if pos < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        let out = resampler
            .process_partial(Some(&tail), None)
            .map_err(|e| EngineError::UnreadableSource(format!("resampling failed: {}", e)))?;
        interleave_into(&mut output, &out);
    }
    let out = resampler
        .process_partial::<&[f32]>(None, None)
        .map_err(|e| EngineError::UnreadableSource(format!("resampling failed: {}", e)))?;
    interleave_into(&mut output, &out);

    debug!(
        input_rate,
        output_rate,
        input_frames = frames,
        output_frames = output.len() / 2,
        "resampled source"
    );

    Ok(output)
}

/// [L, R, L, R, ...] -> [[L, L, ...], [R, R, ...]]
fn deinterleave(samples: &[f32]) -> [Vec<f32>; 2] {
    let frames = samples.len() / 2;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }
    [left, right]
}

fn interleave_into(out: &mut Vec<f32>, planar: &[Vec<f32>]) {
    for i in 0..planar[0].len() {
        out.push(planar[0][i]);
        out.push(planar[1][i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_passthrough() {
        let input = vec![0.25f32; 4410 * 2];
        let out = resample_stereo(&input, 44100, 44100).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_upsample_frame_count() {
        let input = vec![0.1f32; 44100 * 2]; // 1s of stereo at 44.1kHz
        let out = resample_stereo(&input, 44100, 48000).unwrap();
        let frames = out.len() / 2;
        // Within 1% of the ideal frame count; rubato trims filter delay edges
        assert!(
            (frames as f64 - 48000.0).abs() < 480.0,
            "got {} frames",
            frames
        );
    }

    #[test]
    fn test_downsample_frame_count() {
        let input = vec![0.1f32; 48000 * 2];
        let out = resample_stereo(&input, 48000, 22050).unwrap();
        let frames = out.len() / 2;
        assert!(
            (frames as f64 - 22050.0).abs() < 330.0,
            "got {} frames",
            frames
        );
    }

    #[test]
    fn test_channels_stay_independent() {
        // Left silent, right at constant level
        let mut input = Vec::new();
        for _ in 0..22050 {
            input.push(0.0);
            input.push(0.5);
        }
        let out = resample_stereo(&input, 22050, 44100).unwrap();
        let left_peak = out
            .chunks_exact(2)
            .map(|f| f[0].abs())
            .fold(0.0f32, f32::max);
        let right_peak = out
            .chunks_exact(2)
            .map(|f| f[1].abs())
            .fold(0.0f32, f32::max);
        assert!(left_peak < 0.01, "left bled to {}", left_peak);
        assert!(right_peak > 0.4, "right collapsed to {}", right_peak);
    }
}
