// Audio output using cpal
// The engine renders interleaved stereo frames; the device maps them to
// whatever channel layout and sample format the hardware wants

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tracing::{debug, error};

use crate::error::EngineError;

/// Callback that fills a buffer of interleaved stereo f32 frames. Driven by
/// the output device at its own cadence.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Seam between the engine and the audio hardware. The cpal implementation
/// is the production device; tests drive the same callback through
/// [`ManualOutput`](crate::audio::stubs::ManualOutput).
pub trait OutputDevice {
    /// Output sample rate. Fixed for the lifetime of the device.
    fn sample_rate(&self) -> u32;

    /// Install the render callback and start the device. Called exactly
    /// once, at engine construction; the stream keeps running (rendering
    /// whatever the callback produces, typically silence when stopped)
    /// until the device is dropped.
    fn start(&mut self, render: RenderFn) -> Result<(), EngineError>;
}

/// Default-host cpal output.
pub struct CpalOutput {
    unstarted: Option<(cpal::Device, cpal::SupportedStreamConfig)>,
    sample_rate: u32,
    channels: u16,
    _stream: Option<Stream>,
}

impl CpalOutput {
    /// Open the default output device with its default configuration.
    pub fn new() -> Result<Self, EngineError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::Output("no output device available".to_string()))?;

        let config = device
            .default_output_config()
            .map_err(|e| EngineError::Output(format!("failed to get default output config: {}", e)))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        debug!(sample_rate, channels, "opened output device");

        Ok(Self {
            unstarted: Some((device, config)),
            sample_rate,
            channels,
            _stream: None,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        channels: u16,
        mut render: RenderFn,
    ) -> Result<Stream, EngineError> {
        // Scratch holds the stereo frames the engine renders before they are
        // spread across the device's channel layout
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels as usize;
                    scratch.resize(frames * 2, 0.0);
                    render(&mut scratch);

                    for (i, frame) in data.chunks_mut(channels as usize).enumerate() {
                        let left = scratch[i * 2];
                        let right = scratch[i * 2 + 1];
                        if channels == 1 {
                            frame[0] = T::from_sample(0.5 * (left + right));
                        } else {
                            frame[0] = T::from_sample(left);
                            frame[1] = T::from_sample(right);
                            for extra in frame.iter_mut().skip(2) {
                                *extra = T::from_sample(0.0f32);
                            }
                        }
                    }
                },
                move |err| {
                    error!("audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::Output(format!("failed to build output stream: {}", e)))?;

        Ok(stream)
    }
}

impl OutputDevice for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, render: RenderFn) -> Result<(), EngineError> {
        let (device, config) = self
            .unstarted
            .take()
            .ok_or_else(|| EngineError::Output("output already started".to_string()))?;
        let channels = self.channels;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), channels, render)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), channels, render)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), channels, render)?
            }
            format => {
                return Err(EngineError::Output(format!(
                    "unsupported sample format: {:?}",
                    format
                )))
            }
        };

        stream
            .play()
            .map_err(|e| EngineError::Output(format!("failed to start stream: {}", e)))?;

        self._stream = Some(stream);
        Ok(())
    }
}
