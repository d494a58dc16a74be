// Engine error types
// All failures are non-fatal; the engine stays in an inspectable state

use thiserror::Error;

/// Errors surfaced by [`PlaybackEngine`](crate::PlaybackEngine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The resource could not be opened, decoded, or resampled.
    /// The engine is left reset with no source loaded.
    #[error("unreadable source: {0}")]
    UnreadableSource(String),

    /// An operation that requires a loaded source (e.g. `play`) was
    /// invoked before any successful `load`. Engine state is unchanged.
    #[error("no source loaded")]
    NoSourceLoaded,

    /// The audio output device could not be opened or started.
    #[error("audio output error: {0}")]
    Output(String),
}

/// Convenience Result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;
