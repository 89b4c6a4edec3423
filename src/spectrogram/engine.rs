//! # STFT Block Loop
//!
//! ## Algorithm:
//! 1. `shift = round(N * overlap)` with halves rounded to even, must be at
//!    least one sample
//! 2. `blocks = (len - N) / shift + 1`, requires `len >= N`
//! 3. Rows `0..blocks-1` window `samples[i*shift .. i*shift+N]`
//! 4. The last row takes the tail starting at `blocks*shift`, truncated to at
//!    most `N` samples and zero padded to `N` before windowing
//! 5. `|rfft(block)| / N` for bins `0..=N/2`
//!
//! The `blocks x bins` matrix must fit in `max_result_bytes` as f32 values;
//! larger requests are rejected before anything is allocated.
//!
//! ## Progress:
//! `on_progress(i / blocks)` fires every `progress_interval` blocks and
//! `on_progress(1.0)` exactly once after the last row. The sink is also asked
//! whether the computation was cancelled before every block.

use byteorder::{ByteOrder, NativeEndian};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use thiserror::Error;

use super::window::hann_window;
use super::{DEFAULT_MAX_FFT_LENGTH, DEFAULT_MAX_RESULT_BYTES, DEFAULT_PROGRESS_INTERVAL};

/// Reasons a spectrogram cannot be computed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrogramError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("insufficient samples: {available} available, at least {required} required")]
    InsufficientSamples { available: usize, required: usize },

    #[error("spectrogram computation was cancelled")]
    Cancelled,
}

/// Receives progress events from the block loop.
pub trait ProgressSink {
    /// Called with a non-decreasing fraction in `[0, 1]`.
    fn on_progress(&mut self, fraction: f32);

    /// Checked before every block; returning true aborts the computation.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Sink that ignores progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _fraction: f32) {}
}

impl ProgressSink for Vec<f32> {
    fn on_progress(&mut self, fraction: f32) {
        self.push(fraction);
    }
}

/// Validated analysis parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisParams {
    pub fft_length: usize,
    pub overlap_fraction: f64,
}

impl AnalysisParams {
    pub fn new(fft_length: usize, overlap_fraction: f64) -> Self {
        Self {
            fft_length,
            overlap_fraction,
        }
    }

    /// Distance in samples between consecutive block starts.
    ///
    /// Halves round to even: `N = 1025` at `0.5` shifts by 512 samples.
    pub fn shift(&self) -> usize {
        (self.fft_length as f64 * self.overlap_fraction).round_ties_even() as usize
    }

    /// Number of frequency bins per row (`N/2 + 1`).
    pub fn bins(&self) -> usize {
        self.fft_length / 2 + 1
    }

    /// Check the parameters against the engine limits and return the shift.
    pub fn validate(&self, max_fft_length: usize) -> Result<usize, SpectrogramError> {
        if self.fft_length < 2 {
            return Err(SpectrogramError::InvalidParameters(format!(
                "fftLength must be at least 2, got {}",
                self.fft_length
            )));
        }
        if self.fft_length > max_fft_length {
            return Err(SpectrogramError::InvalidParameters(format!(
                "fftLength must not exceed {}, got {}",
                max_fft_length, self.fft_length
            )));
        }
        if !(0.0..1.0).contains(&self.overlap_fraction) {
            return Err(SpectrogramError::InvalidParameters(format!(
                "overlapFraction must be in [0, 1), got {}",
                self.overlap_fraction
            )));
        }

        let shift = self.shift();
        if shift == 0 {
            return Err(SpectrogramError::InvalidParameters(format!(
                "fftLength {} with overlapFraction {} gives a block shift of zero samples",
                self.fft_length, self.overlap_fraction
            )));
        }
        Ok(shift)
    }

    /// Number of blocks (rows) for `sample_count` samples.
    pub fn block_count(&self, sample_count: usize) -> Result<usize, SpectrogramError> {
        let shift = self.validate(usize::MAX)?;
        if sample_count < self.fft_length {
            return Err(SpectrogramError::InsufficientSamples {
                available: sample_count,
                required: self.fft_length,
            });
        }
        Ok((sample_count - self.fft_length) / shift + 1)
    }

    /// Size in bytes of the f32 matrix for `blocks` rows, `None` on overflow.
    pub fn result_bytes(&self, blocks: usize) -> Option<usize> {
        blocks
            .checked_mul(self.bins())?
            .checked_mul(std::mem::size_of::<f32>())
    }
}

/// Magnitude matrix plus the timing information the client needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramResult {
    /// Row-major `rows x cols` magnitudes
    pub magnitudes: Vec<f32>,
    /// Time blocks
    pub rows: usize,
    /// Frequency bins
    pub cols: usize,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

impl SpectrogramResult {
    pub fn extent(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.magnitudes[index * self.cols..(index + 1) * self.cols]
    }

    /// Raw matrix bytes (row-major f32, native byte order) for the payload.
    pub fn to_native_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.magnitudes.len() * std::mem::size_of::<f32>()];
        NativeEndian::write_f32_into(&self.magnitudes, &mut bytes);
        bytes
    }
}

/// Computes spectrograms; holds the FFT planner so repeated lengths reuse plans.
pub struct SpectrogramEngine {
    planner: FftPlanner<f32>,
    max_fft_length: usize,
    progress_interval: usize,
    max_result_bytes: usize,
}

impl Default for SpectrogramEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FFT_LENGTH, DEFAULT_PROGRESS_INTERVAL)
    }
}

impl SpectrogramEngine {
    pub fn new(max_fft_length: usize, progress_interval: usize) -> Self {
        Self {
            planner: FftPlanner::new(),
            max_fft_length,
            progress_interval: progress_interval.max(1),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    /// Limit the size of the magnitude matrix a single request may produce.
    pub fn with_max_result_bytes(mut self, max_result_bytes: usize) -> Self {
        self.max_result_bytes = max_result_bytes;
        self
    }

    /// Compute the spectrogram of mono `samples` recorded at `sample_rate`.
    pub fn analyze(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        params: AnalysisParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<SpectrogramResult, SpectrogramError> {
        if sample_rate == 0 {
            return Err(SpectrogramError::InvalidParameters(
                "sample rate must be positive".to_string(),
            ));
        }
        let shift = params.validate(self.max_fft_length)?;
        let blocks = params.block_count(samples.len())?;
        let bins = params.bins();

        match params.result_bytes(blocks) {
            Some(bytes) if bytes <= self.max_result_bytes => {}
            _ => {
                return Err(SpectrogramError::InvalidParameters(format!(
                    "{} blocks x {} bins exceeds the result limit of {} bytes",
                    blocks, bins, self.max_result_bytes
                )))
            }
        }
        let mut magnitudes: Vec<f32> = Vec::new();
        magnitudes.try_reserve_exact(blocks * bins).map_err(|err| {
            SpectrogramError::InvalidParameters(format!(
                "cannot allocate {} blocks x {} bins: {}",
                blocks, bins, err
            ))
        })?;

        let n = params.fft_length;
        let window = hann_window(n);
        let fft = self.planner.plan_fft_forward(n);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); fft.get_inplace_scratch_len()];
        let scale = 1.0 / n as f32;

        let tail_start = (blocks * shift).min(samples.len());
        for block in 0..blocks {
            if progress.is_cancelled() {
                return Err(SpectrogramError::Cancelled);
            }
            if block % self.progress_interval == 0 {
                progress.on_progress(block as f32 / blocks as f32);
            }

            let segment = if block + 1 < blocks {
                let start = block * shift;
                &samples[start..start + n]
            } else {
                &samples[tail_start..]
            };

            for (k, slot) in buffer.iter_mut().enumerate() {
                let sample = segment.get(k).copied().unwrap_or(0.0);
                *slot = Complex::new(sample * window[k], 0.0);
            }
            fft.process_with_scratch(&mut buffer, &mut scratch);
            magnitudes.extend(buffer[..bins].iter().map(|bin| bin.norm() * scale));
        }

        progress.on_progress(1.0);

        Ok(SpectrogramResult {
            magnitudes,
            rows: blocks,
            cols: bins,
            sample_rate,
            duration_seconds: samples.len() as f64 / sample_rate as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(frequency: f32, sample_rate: u32, count: usize) -> Vec<f32> {
        (0..count)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn argmax(row: &[f32]) -> usize {
        row.iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    }

    #[test]
    fn test_shape_matches_block_count() {
        let samples = vec![0.1f32; 10_000];
        let mut engine = SpectrogramEngine::default();
        let result = engine
            .analyze(&samples, 8000, AnalysisParams::new(256, 0.5), &mut NoProgress)
            .unwrap();

        assert_eq!(result.extent(), [77, 129]);
        assert_eq!(result.magnitudes.len(), 77 * 129);
        assert!(result.magnitudes.iter().all(|&m| m >= 0.0 && m.is_finite()));
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_once() {
        let samples = vec![0.0f32; 10_000];
        let mut events: Vec<f32> = Vec::new();
        SpectrogramEngine::default()
            .analyze(&samples, 8000, AnalysisParams::new(256, 0.5), &mut events)
            .unwrap();

        // 77 blocks -> events at blocks 0,10,...,70 plus the final 1.0
        assert_eq!(events.len(), 9);
        assert_eq!(events[0], 0.0);
        assert!(events.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(events.iter().filter(|&&f| f == 1.0).count(), 1);
        assert_eq!(*events.last().unwrap(), 1.0);
    }

    #[test]
    fn test_tone_peaks_at_expected_bin() {
        // 1 kHz at 16 kHz with N = 1024 lands exactly on bin 64
        let samples = tone(1000.0, 16000, 16000);
        let result = SpectrogramEngine::default()
            .analyze(&samples, 16000, AnalysisParams::new(1024, 0.5), &mut NoProgress)
            .unwrap();

        assert_eq!(result.cols, 513);
        let first = result.row(0);
        assert_eq!(argmax(first), 64);
        // Unit sine through a Hann window: A/2 * coherent gain 0.5
        assert!((first[64] - 0.25).abs() < 0.01, "peak was {}", first[64]);
        assert!((result.duration_seconds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tail_block_is_zero_padded() {
        // Exactly one window of ones: the only row is the tail from `shift`
        let n = 64;
        let samples = vec![1.0f32; n];
        let params = AnalysisParams::new(n, 0.5);
        let result = SpectrogramEngine::default()
            .analyze(&samples, 1000, params, &mut NoProgress)
            .unwrap();

        assert_eq!(result.rows, 1);
        let window = hann_window(n);
        let tail_len = n - params.shift();
        let expected_dc: f32 = window[..tail_len].iter().sum::<f32>() / n as f32;
        assert!((result.row(0)[0] - expected_dc).abs() < 1e-5);
    }

    #[test]
    fn test_tail_past_end_gives_zero_row() {
        // shift rounds up to N, so the tail starts exactly at the end
        let samples = vec![0.5f32; 128];
        let params = AnalysisParams::new(64, 0.999);
        assert_eq!(params.shift(), 64);
        let result = SpectrogramEngine::default()
            .analyze(&samples, 1000, params, &mut NoProgress)
            .unwrap();

        assert_eq!(result.rows, 2);
        assert!(result.row(1).iter().all(|&m| m == 0.0));
        assert!(result.row(0)[0] > 0.0);
    }

    #[test]
    fn test_invalid_parameters() {
        let samples = vec![0.0f32; 4096];
        let mut engine = SpectrogramEngine::new(2048, 10);
        for params in [
            AnalysisParams::new(1, 0.5),
            AnalysisParams::new(4096, 0.5),
            AnalysisParams::new(256, 1.0),
            AnalysisParams::new(256, -0.1),
            AnalysisParams::new(256, 0.0),
            AnalysisParams::new(256, f64::NAN),
        ] {
            let err = engine.analyze(&samples, 8000, params, &mut NoProgress).unwrap_err();
            assert!(matches!(err, SpectrogramError::InvalidParameters(_)), "{:?}", params);
        }

        let err = engine
            .analyze(&samples, 0, AnalysisParams::new(256, 0.5), &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, SpectrogramError::InvalidParameters(_)));
    }

    #[test]
    fn test_shift_rounds_halves_to_even() {
        assert_eq!(AnalysisParams::new(1025, 0.5).shift(), 512);
        assert_eq!(AnalysisParams::new(1027, 0.5).shift(), 514);
        assert_eq!(AnalysisParams::new(1024, 0.5).shift(), 512);

        // shift 2, not 3: rows at 0 and 2, then the tail
        let params = AnalysisParams::new(5, 0.5);
        assert_eq!(params.shift(), 2);
        assert_eq!(params.block_count(9).unwrap(), 3);
        let result = SpectrogramEngine::default()
            .analyze(&[0.25; 9], 1000, params, &mut NoProgress)
            .unwrap();
        assert_eq!(result.extent(), [3, 3]);
    }

    #[test]
    fn test_oversized_result_is_rejected() {
        // shift 1 over 200k samples would need ~17.6 GB
        let samples = vec![0.0f32; 200_000];
        let params = AnalysisParams::new(65536, 0.00001);
        assert_eq!(params.shift(), 1);

        let mut events: Vec<f32> = Vec::new();
        let err = SpectrogramEngine::default()
            .analyze(&samples, 16000, params, &mut events)
            .unwrap_err();
        assert!(matches!(err, SpectrogramError::InvalidParameters(_)), "{:?}", err);
        assert!(events.is_empty());
    }

    #[test]
    fn test_result_limit_is_configurable() {
        let samples = vec![0.0f32; 10_000];
        let params = AnalysisParams::new(256, 0.5);
        // 77 x 129 f32 values
        assert_eq!(params.result_bytes(77), Some(77 * 129 * 4));

        let mut exact = SpectrogramEngine::default().with_max_result_bytes(77 * 129 * 4);
        assert!(exact.analyze(&samples, 8000, params, &mut NoProgress).is_ok());

        let mut tight = SpectrogramEngine::default().with_max_result_bytes(77 * 129 * 4 - 1);
        let err = tight.analyze(&samples, 8000, params, &mut NoProgress).unwrap_err();
        assert!(matches!(err, SpectrogramError::InvalidParameters(_)));

        assert_eq!(params.result_bytes(usize::MAX), None);
    }

    #[test]
    fn test_insufficient_samples() {
        let err = SpectrogramEngine::default()
            .analyze(&[0.0; 100], 8000, AnalysisParams::new(256, 0.5), &mut NoProgress)
            .unwrap_err();
        assert_eq!(
            err,
            SpectrogramError::InsufficientSamples {
                available: 100,
                required: 256
            }
        );
    }

    #[test]
    fn test_cancellation_stops_the_loop() {
        struct Cancelled;
        impl ProgressSink for Cancelled {
            fn on_progress(&mut self, _fraction: f32) {
                panic!("no progress expected after cancellation");
            }
            fn is_cancelled(&self) -> bool {
                true
            }
        }

        let err = SpectrogramEngine::default()
            .analyze(&[0.0; 4096], 8000, AnalysisParams::new(256, 0.5), &mut Cancelled)
            .unwrap_err();
        assert_eq!(err, SpectrogramError::Cancelled);
    }

    #[test]
    fn test_payload_bytes_are_native_f32() {
        let result = SpectrogramResult {
            magnitudes: vec![1.5, 0.25],
            rows: 1,
            cols: 2,
            sample_rate: 1,
            duration_seconds: 0.0,
        };
        let bytes = result.to_native_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(NativeEndian::read_f32(&bytes[4..]), 0.25);
    }
}
