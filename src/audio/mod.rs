// Audio pipeline module
// Uses Symphonia for decoding, rubato for rate conversion, cpal for output

pub mod decoder;
pub mod output;
pub mod player;
pub mod resampler;
pub mod stubs;

pub use player::PlaybackEngine;
