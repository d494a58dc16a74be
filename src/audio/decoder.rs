// Audio decoder using Symphonia
// Decodes an entire file into memory-resident interleaved stereo samples

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Fully decoded audio, interleaved stereo f32.
pub struct DecodedAudio {
    /// Interleaved `[L, R, L, R, ...]` samples.
    pub samples: Vec<f32>,
    /// Sample rate the samples are at.
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

impl AudioDecoder {
    /// Open an audio file and prepare for decoding.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path)
            .map_err(|e| EngineError::UnreadableSource(format!("failed to open file: {}", e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Hint the probe with the file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| EngineError::UnreadableSource(format!("unrecognized format: {}", e)))?;

        let format = probed.format;

        // First decodable audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::UnreadableSource("no audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::UnreadableSource(format!("no decoder for track: {}", e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Decode every packet in the stream and return the interleaved stereo
    /// result. Mono sources are duplicated into both channels; sources with
    /// more than two channels keep the first two.
    pub fn decode_all(mut self) -> Result<DecodedAudio, EngineError> {
        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break; // end of stream
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::UnreadableSource(format!(
                        "failed to read packet: {}",
                        e
                    )))
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Recoverable corruption; skip the packet
                    warn!("decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::UnreadableSource(format!("decode failed: {}", e)))
                }
            };

            let spec = *decoded.spec();
            let needs_new = match &sample_buf {
                Some(buf) => buf.capacity() < decoded.capacity() * spec.channels.count(),
                None => true,
            };
            if needs_new {
                sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }

            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                extend_as_stereo(&mut samples, buf.samples(), spec.channels.count());
            }
        }

        if samples.is_empty() {
            return Err(EngineError::UnreadableSource(
                "stream contains no audio frames".to_string(),
            ));
        }

        debug!(
            frames = samples.len() / 2,
            sample_rate = self.sample_rate,
            channels = self.channels,
            "decoded source"
        );

        Ok(DecodedAudio {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

/// Append interleaved samples with `channels` channels onto a stereo
/// interleaved buffer.
fn extend_as_stereo(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    match channels {
        0 => {}
        1 => {
            out.reserve(interleaved.len() * 2);
            for &s in interleaved {
                out.push(s);
                out.push(s);
            }
        }
        n => {
            out.reserve((interleaved.len() / n) * 2);
            for frame in interleaved.chunks_exact(n) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn write_wav(path: &Path, spec: hound::WavSpec, frames: usize, amp: f32) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / spec.sample_rate as f32;
            let s = amp * (TAU * 440.0 * t).sin();
            for _ in 0..spec.channels {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn stereo_spec(sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    #[test]
    fn test_decode_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, stereo_spec(44100), 44100, 0.5);

        let decoder = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.sample_rate(), 44100);
        assert_eq!(decoder.channels(), 2);

        let decoded = decoder.decode_all().unwrap();
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.frames(), 44100);
        assert!((decoded.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_mono_upmixes_to_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            ..stereo_spec(22050)
        };
        write_wav(&path, spec, 2205, 0.3);

        let decoded = AudioDecoder::open(&path).unwrap().decode_all().unwrap();
        assert_eq!(decoded.frames(), 2205);
        // Both channels carry the same signal
        for frame in decoded.samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"this is not audio data at all").unwrap();

        let result = AudioDecoder::open(&path).and_then(|d| d.decode_all().map(|_| ()));
        assert!(matches!(result, Err(EngineError::UnreadableSource(_))));
    }

    #[test]
    fn test_open_rejects_missing_file() {
        let err = AudioDecoder::open(Path::new("/nonexistent/file.flac")).err().unwrap();
        assert!(matches!(err, EngineError::UnreadableSource(_)));
    }

    #[test]
    fn test_extend_as_stereo_drops_extra_channels() {
        let mut out = Vec::new();
        // 5.1-style frames: only the first two channels survive
        extend_as_stereo(&mut out, &[0.1, 0.2, 0.9, 0.9, 0.9, 0.9], 6);
        assert_eq!(out, vec![0.1, 0.2]);
    }
}
