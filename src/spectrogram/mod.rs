//! # Spectrogram Engine
//!
//! Short-time Fourier analysis of mono sample data. Blocks of `fftLength`
//! samples, `round(fftLength * overlapFraction)` apart (halves to even), are
//! Hann windowed and transformed; the magnitude of the non-negative frequency
//! half, divided by `fftLength`, forms one row of the result.
//!
//! ## Components:
//! - **window**: Hann analysis window
//! - **engine**: parameter validation, the block loop, progress reporting

pub mod engine;
pub mod window;

pub use engine::{
    AnalysisParams, NoProgress, ProgressSink, SpectrogramEngine, SpectrogramError,
    SpectrogramResult,
};
pub use window::hann_window;

/// FFT length used when a request does not specify one.
pub const DEFAULT_FFT_LENGTH: usize = 1024;

/// Overlap fraction used when a request does not specify one.
pub const DEFAULT_OVERLAP_FRACTION: f64 = 0.5;

/// Largest FFT length accepted unless configured otherwise.
pub const DEFAULT_MAX_FFT_LENGTH: usize = 65536;

/// A progress event is emitted every this many blocks.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 10;

/// Largest magnitude matrix, in bytes, a single request may produce.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 64 * 1024 * 1024;
