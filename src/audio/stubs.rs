// Manual output device for deterministic testing
// Maintains the same OutputDevice interface as the cpal output but performs
// no audio I/O; a handle lets tests drive the render callback by hand

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::output::{OutputDevice, RenderFn};
use crate::error::EngineError;

/// Output device that renders only when told to. Tests (and headless
/// tooling) use the paired [`ManualOutputHandle`] to pull exact numbers of
/// frames through the engine, which stands in for the wall-clock cadence of
/// a real device callback.
pub struct ManualOutput {
    sample_rate: u32,
    slot: Arc<Mutex<Option<RenderFn>>>,
}

impl ManualOutput {
    pub fn new(sample_rate: u32) -> (Self, ManualOutputHandle) {
        let slot = Arc::new(Mutex::new(None));
        (
            Self {
                sample_rate,
                slot: slot.clone(),
            },
            ManualOutputHandle { slot },
        )
    }
}

impl OutputDevice for ManualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, render: RenderFn) -> Result<(), EngineError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(EngineError::Output("output already started".to_string()));
        }
        *slot = Some(render);
        Ok(())
    }
}

/// Driver side of a [`ManualOutput`].
#[derive(Clone)]
pub struct ManualOutputHandle {
    slot: Arc<Mutex<Option<RenderFn>>>,
}

impl ManualOutputHandle {
    /// Invoke the render callback for `frames` stereo frames and return the
    /// rendered interleaved samples (silence if the engine has not started
    /// the device yet).
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let mut buf = vec![0.0f32; frames * 2];
        if let Some(render) = self.slot.lock().as_mut() {
            render(&mut buf);
        }
        buf
    }
}
