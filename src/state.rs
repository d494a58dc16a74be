// Published playback state
// The only externally observable state of the engine

use serde::Serialize;

use crate::meter::SILENCE_FLOOR_DB;

/// Snapshot of the transport published to observers on every sampling tick
/// and returned by [`PlaybackEngine::current_state`](crate::PlaybackEngine::current_state).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackState {
    /// Whether the transport is currently playing.
    pub is_playing: bool,
    /// Seconds into the track, `0.0 <= t <= duration`.
    pub current_time: f64,
    /// Instantaneous peak power of the left channel in dBFS, `[-160, 0]`.
    pub left_power: f32,
    /// Instantaneous peak power of the right channel in dBFS, `[-160, 0]`.
    pub right_power: f32,
    /// Linear output gain in `[0, 1]`.
    pub volume: f32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            left_power: SILENCE_FLOOR_DB,
            right_power: SILENCE_FLOOR_DB,
            volume: 1.0,
        }
    }
}

/// Opaque ticket returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub(crate) u64);
