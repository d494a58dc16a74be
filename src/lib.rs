// Meterdeck - audio playback engine with live stereo level metering
// Module declarations

pub mod audio;
pub mod error;
pub mod meter;
pub mod state;

pub use audio::output::{CpalOutput, OutputDevice};
pub use audio::player::PlaybackEngine;
pub use error::{EngineError, Result};
pub use state::{PlaybackState, SubscriptionHandle};
