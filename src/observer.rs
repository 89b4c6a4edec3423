//! # Session Observer
//!
//! Protocol and compute code report what happens through this trait instead
//! of calling the logger directly. The production observer writes `tracing`
//! events; tests substitute counting observers, and the WebSocket layer wraps
//! the tracing observer to update server metrics.

use serde_json::Value;
use std::time::Duration;

use crate::error::RequestError;
use crate::protocol::ProtocolError;

/// Receives session events. Every method defaults to doing nothing.
pub trait SessionObserver: Send + Sync {
    fn connection_opened(&self, _connection: &str) {}

    fn connection_closed(&self, _connection: &str) {}

    /// A frame could not be decoded and was dropped.
    fn frame_dropped(&self, _connection: &str, _error: &ProtocolError) {}

    /// An `information` or `status` message arrived.
    fn housekeeping(&self, _connection: &str, _kind: &str, _content: &Value) {}

    /// A message with an unregistered type arrived.
    fn unknown_message(&self, _connection: &str, _kind: &str, _content: &Value) {}

    fn request_started(&self, _connection: &str, _kind: &str, _source: &str) {}

    fn request_failed(&self, _connection: &str, _kind: &str, _error: &RequestError) {}

    fn spectrogram_delivered(&self, _connection: &str, _extent: [usize; 2], _elapsed: Duration) {}
}

/// Logs every event with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn connection_opened(&self, connection: &str) {
        tracing::info!(connection, "WebSocket opened");
    }

    fn connection_closed(&self, connection: &str) {
        tracing::info!(connection, "WebSocket closed");
    }

    fn frame_dropped(&self, connection: &str, error: &ProtocolError) {
        tracing::warn!(connection, error = %error, "Dropping undecodable frame");
    }

    fn housekeeping(&self, connection: &str, kind: &str, content: &Value) {
        tracing::info!(connection, kind, content = %content, "Client message");
    }

    fn unknown_message(&self, connection: &str, kind: &str, content: &Value) {
        tracing::warn!(connection, kind, content = %content, "Unknown message type");
    }

    fn request_started(&self, connection: &str, kind: &str, source: &str) {
        tracing::info!(connection, kind, source, "Computing spectrogram");
    }

    fn request_failed(&self, connection: &str, kind: &str, error: &RequestError) {
        if error.is_reportable() {
            tracing::warn!(connection, kind, code = error.code(), error = %error, "Request failed");
        } else {
            tracing::debug!(connection, kind, "Request cancelled");
        }
    }

    fn spectrogram_delivered(&self, connection: &str, extent: [usize; 2], elapsed: Duration) {
        tracing::info!(
            connection,
            rows = extent[0],
            cols = extent[1],
            elapsed_ms = elapsed.as_millis() as u64,
            "Spectrogram sent"
        );
    }
}
