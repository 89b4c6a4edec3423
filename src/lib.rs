//! # spectro-stream
//!
//! Streams short-time Fourier analyses of audio recordings to a remote client
//! over a WebSocket. Control messages and the binary spectrogram share one
//! message stream using a hybrid JSON-header + aligned-payload frame format.
//!
//! ## Module Map:
//! - **protocol**: frame codec and message schemas (no transport knowledge)
//! - **router**: type-tag dispatch with a logging fallback
//! - **spectrogram**: Hann-windowed STFT engine with progress reporting
//! - **audio**: decoder collaborator (WAV) and source resolution
//! - **session**: per-connection orchestration, independent of actix
//! - **websocket**: the actix actor that drives a session over a socket
//! - **config / state / health / handlers / middleware**: the HTTP service around it

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod observer;
pub mod protocol;
pub mod router;
pub mod session;
pub mod spectrogram;
pub mod state;
pub mod websocket;
