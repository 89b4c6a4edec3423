//! # Audio Source Module
//!
//! The decoding collaborator used by spectrogram requests. Audio arrives either
//! as a path on the server or as the raw bytes of a file embedded in a binary
//! frame; both are decoded into planar `f32` channels and reduced to mono by
//! summing channels before analysis.
//!
//! ## Key Components:
//! - **decoder**: `AudioDecoder` trait, `DecodedAudio`, and the WAV implementation
//! - **source**: `AudioSource` and media-root path resolution

pub mod decoder; // Decoder trait and WAV implementation
pub mod source;  // Path / blob sources

pub use decoder::{AudioDecoder, AudioError, DecodedAudio, WavDecoder};
pub use source::{resolve_media_path, AudioSource};
