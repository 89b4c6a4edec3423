//! # Audio Decoding
//!
//! ## Sample Conversion:
//! Integer PCM is scaled to `[-1.0, 1.0)`:
//! - **8-bit**: unsigned, centred on 128
//! - **16-bit**: divided by 2^15
//! - **24-bit**: divided by 2^23
//! - **32-bit float**: passed through unchanged
//!
//! ## Rust Concepts:
//! - **Trait objects**: sessions hold an `Arc<dyn AudioDecoder>` so tests and
//!   other containers can plug in their own decoder
//! - **Read + Seek**: the same decode path serves files and in-memory cursors

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use thiserror::Error;
use wav::BitDepth;

/// Failures while locating or decoding audio.
#[derive(Debug, Error)]
pub enum AudioError {
    /// File could not be opened, or the RIFF/WAVE structure could not be read
    #[error("failed to read audio: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally valid but not something we can analyze
    #[error("unsupported audio: {0}")]
    Unsupported(String),

    /// The requested path is outside the media root or otherwise not allowed
    #[error("audio path rejected: {0}")]
    PathRejected(String),
}

/// Decoded audio as planar channels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// One vector of samples per channel, all of equal length
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Split interleaved samples into channels. A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];

        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        Self {
            channels,
            sample_rate,
        }
    }

    /// Number of samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Reduce to mono by summing all channels.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.as_slice() {
            [] => Vec::new(),
            [only] => only.clone(),
            [first, rest @ ..] => {
                let mut mono = first.clone();
                for channel in rest {
                    for (acc, &sample) in mono.iter_mut().zip(channel) {
                        *acc += sample;
                    }
                }
                mono
            }
        }
    }
}

/// Decodes audio containers into sample data.
pub trait AudioDecoder: Send + Sync {
    fn decode_from_path(&self, path: &Path) -> Result<DecodedAudio, AudioError>;

    fn decode_from_bytes(&self, bytes: &[u8]) -> Result<DecodedAudio, AudioError>;
}

/// RIFF/WAVE decoder built on the `wav` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl WavDecoder {
    fn decode<R: Read + Seek>(reader: &mut R) -> Result<DecodedAudio, AudioError> {
        let (header, data) = wav::read(reader)?;

        if header.channel_count == 0 {
            return Err(AudioError::Unsupported("file declares zero channels".to_string()));
        }
        if header.sampling_rate == 0 {
            return Err(AudioError::Unsupported("file declares a zero sample rate".to_string()));
        }

        let interleaved: Vec<f32> = match data {
            BitDepth::Eight(samples) => samples.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
            BitDepth::Sixteen(samples) => samples.iter().map(|&s| s as f32 / 32_768.0).collect(),
            BitDepth::TwentyFour(samples) => samples.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
            BitDepth::ThirtyTwoFloat(samples) => samples,
            BitDepth::Empty => {
                return Err(AudioError::Unsupported("file contains no sample data".to_string()))
            }
        };

        tracing::debug!(
            channels = header.channel_count,
            sample_rate = header.sampling_rate,
            bits_per_sample = header.bits_per_sample,
            samples = interleaved.len(),
            "Decoded WAV audio"
        );

        Ok(DecodedAudio::from_interleaved(
            &interleaved,
            header.channel_count as usize,
            header.sampling_rate,
        ))
    }
}

impl AudioDecoder for WavDecoder {
    fn decode_from_path(&self, path: &Path) -> Result<DecodedAudio, AudioError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::decode(&mut reader)
    }

    fn decode_from_bytes(&self, bytes: &[u8]) -> Result<DecodedAudio, AudioError> {
        Self::decode(&mut Cursor::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::{pcm16_wav, tone};

    #[test]
    fn test_decode_mono_pcm16() {
        let samples = tone(440.0, 8000, 800);
        let bytes = pcm16_wav(&[samples.clone()], 8000);

        let audio = WavDecoder.decode_from_bytes(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.channels.len(), 1);
        assert_eq!(audio.frames(), 800);
        assert!((audio.duration_seconds() - 0.1).abs() < 1e-9);

        for (decoded, original) in audio.channels[0].iter().zip(&samples) {
            assert!((decoded - original).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_stereo_and_sum_to_mono() {
        let left = vec![0.25f32; 100];
        let right = vec![-0.5f32; 100];
        let bytes = pcm16_wav(&[left, right], 16000);

        let audio = WavDecoder.decode_from_bytes(&bytes).unwrap();
        assert_eq!(audio.channels.len(), 2);
        assert_eq!(audio.frames(), 100);

        let mono = audio.to_mono();
        assert_eq!(mono.len(), 100);
        assert!(mono.iter().all(|&s| (s + 0.25).abs() < 1e-3));
    }

    #[test]
    fn test_decode_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, pcm16_wav(&[tone(100.0, 4000, 400)], 4000)).unwrap();

        let audio = WavDecoder.decode_from_path(&path).unwrap();
        assert_eq!(audio.sample_rate, 4000);
        assert_eq!(audio.frames(), 400);
    }

    #[test]
    fn test_garbage_bytes_fail() {
        assert!(WavDecoder.decode_from_bytes(b"definitely not a wav file").is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = WavDecoder
            .decode_from_path(Path::new("/nonexistent/audio.wav"))
            .unwrap_err();
        assert!(matches!(err, AudioError::Io(_)));
    }

    #[test]
    fn test_interleaving_drops_partial_frame() {
        let audio = DecodedAudio::from_interleaved(&[1.0, 2.0, 3.0, 4.0, 5.0], 2, 10);
        assert_eq!(audio.channels, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
    }
}
