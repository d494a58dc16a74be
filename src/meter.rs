// Level metering math
// Converts raw sample blocks into the dB peak values the engine publishes

/// Minimum representable channel power in dBFS. Channels at or below this
/// level are treated as silent.
pub const SILENCE_FLOOR_DB: f32 = -160.0;

/// Display floor used when mapping power to a meter magnitude. The engine
/// itself clamps at [`SILENCE_FLOOR_DB`]; this much higher floor is the
/// visually useful range for bar meters.
pub const DISPLAY_FLOOR_DB: f32 = -60.0;

/// Peak absolute sample value per channel over a block of interleaved
/// stereo samples. Returns linear amplitudes in `[0, 1]` (assuming the
/// input is normalized f32 audio).
pub fn block_peaks(samples: &[f32]) -> (f32, f32) {
    let mut left: f32 = 0.0;
    let mut right: f32 = 0.0;
    for frame in samples.chunks_exact(2) {
        left = left.max(frame[0].abs());
        right = right.max(frame[1].abs());
    }
    (left, right)
}

/// Convert a linear peak amplitude to peak power in dBFS, clamped to
/// `[SILENCE_FLOOR_DB, 0]`.
pub fn power_db(peak: f32) -> f32 {
    if peak <= 0.0 {
        return SILENCE_FLOOR_DB;
    }
    (20.0 * peak.log10()).clamp(SILENCE_FLOOR_DB, 0.0)
}

/// Map a power reading in dB to a display magnitude in `[0, 1]`.
///
/// `floor_db` is the level rendered as zero; `0` dB maps to one. Readings
/// outside the range are clamped, so the result is always in `[0, 1]` and
/// the mapping never divides by zero for any negative floor.
pub fn normalized_magnitude(power_db: f32, floor_db: f32) -> f32 {
    if floor_db >= 0.0 {
        return if power_db >= 0.0 { 1.0 } else { 0.0 };
    }
    ((power_db - floor_db) / (0.0 - floor_db)).clamp(0.0, 1.0)
}
