//! # Message Schemas
//!
//! Type tags and typed `content` bodies for every message the server sends or
//! understands. Inbound requests also accept the field names used by the
//! browser client that predates them (`filename`, `nfft`, `overlap`).

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Type tags used on the wire.
pub mod kinds {
    pub const REQUEST_FILE_SPECTROGRAM: &str = "request_file_spectrogram";
    pub const REQUEST_DATA_SPECTROGRAM: &str = "request_data_spectrogram";
    pub const INFORMATION: &str = "information";
    pub const STATUS: &str = "status";
    pub const LOADING_PROGRESS: &str = "loading_progress";
    pub const SPECTROGRAM: &str = "spectrogram";
    pub const ERROR: &str = "error";
}

/// Optional analysis parameters shared by both request types.
///
/// `fftLength` is kept signed so that a negative value reaches parameter
/// validation (and is reported as invalid) instead of failing to parse.
/// An explicit `null` means "use the server default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    #[serde(default, alias = "nfft", skip_serializing_if = "Option::is_none")]
    pub fft_length: Option<i64>,

    #[serde(default, alias = "overlap", skip_serializing_if = "Option::is_none")]
    pub overlap_fraction: Option<f64>,
}

/// Content of `request_file_spectrogram`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSpectrogramRequest {
    /// Path of the audio file, resolved against the configured media root
    #[serde(alias = "filename")]
    pub source: String,

    #[serde(default, alias = "nfft", skip_serializing_if = "Option::is_none")]
    pub fft_length: Option<i64>,

    #[serde(default, alias = "overlap", skip_serializing_if = "Option::is_none")]
    pub overlap_fraction: Option<f64>,
}

impl FileSpectrogramRequest {
    pub fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            fft_length: self.fft_length,
            overlap_fraction: self.overlap_fraction,
        }
    }
}

/// Content of `loading_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub progress: f32,
}

impl LoadingProgress {
    pub fn to_content(&self) -> Value {
        json!({ "progress": self.progress })
    }
}

/// Content of the `spectrogram` header; the payload is the row-major f32 matrix.
///
/// The content also carries `fs` and `length`, the names older browser clients
/// read the sample rate and the duration in seconds from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrogramMetadata {
    /// `[rows, cols]` = `[time blocks, frequency bins]`
    pub extent: [usize; 2],
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

impl SpectrogramMetadata {
    pub fn to_content(&self) -> Value {
        json!({
            "extent": self.extent,
            "sampleRate": self.sample_rate,
            "durationSeconds": self.duration_seconds,
            "fs": self.sample_rate,
            "length": self.duration_seconds,
        })
    }
}

/// Content of `error`, sent when a request cannot be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Machine-readable error code (e.g. `insufficient_samples`)
    pub code: String,
    pub message: String,
    /// Type tag of the request that failed
    pub request: String,
}

impl ErrorReport {
    pub fn to_content(&self) -> Value {
        json!({
            "code": self.code,
            "message": self.message,
            "request": self.request,
        })
    }
}

/// Deserialize message content into a typed body.
///
/// A `null` content is treated as an empty object so that requests with no
/// options can omit them entirely.
pub fn parse_content<T: DeserializeOwned>(content: Value) -> Result<T, serde_json::Error> {
    match content {
        Value::Null => serde_json::from_value(Value::Object(Map::new())),
        other => serde_json::from_value(other),
    }
}
