//! # Application State Management
//!
//! Shared state for every HTTP handler and every WebSocket actor.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers and actors hold a reference to the same data
//! - **RwLock**: many readers or one writer at a time
//! - **T**: the protected data (configuration, metrics)
//!
//! ### Lock poisoning
//! A thread that panics while holding a lock "poisons" it. The counters and
//! configuration here stay consistent after any single write, so a poisoned
//! lock is recovered with `PoisonError::into_inner` instead of taking the
//! whole server down.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// State shared across handlers and connections.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Counters updated by the middleware and the WebSocket actors
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Server-wide counters.
///
/// ## Fields:
/// - **request_count / error_count**: HTTP requests seen by the middleware
/// - **active_sessions**: open WebSocket connections
/// - **spectrograms_served**: `spectrogram` messages delivered
/// - **frames_dropped**: inbound frames that could not be decoded
/// - **endpoint_metrics**: per route pattern statistics
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: u32,
    pub spectrograms_served: u64,
    pub frames_dropped: u64,
    /// Key: "METHOD /pattern", e.g. "GET /api/v1/health"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for one route.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Total time spent serving this route (milliseconds)
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current configuration; the lock is released immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration if the new one validates.
    ///
    /// Analysis settings take effect for connections opened afterwards.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record one request against a route.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Claim a session slot if fewer than `max_sessions` are in use.
    ///
    /// The check and the increment happen under one write lock, so two
    /// simultaneous upgrades cannot both take the last slot.
    pub fn try_open_session(&self, max_sessions: usize) -> bool {
        let mut metrics = self.write_metrics();
        if metrics.active_sessions as usize >= max_sessions {
            return false;
        }
        metrics.active_sessions += 1;
        true
    }

    /// Release a slot claimed by `try_open_session`.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.write_metrics();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn increment_spectrograms_served(&self) {
        self.write_metrics().spectrograms_served += 1;
    }

    pub fn increment_frames_dropped(&self) {
        self.write_metrics().frames_dropped += 1;
    }

    /// Snapshot of the counters for the metrics endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    /// Fraction of HTTP requests that failed.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_admission() {
        let state = AppState::new(AppConfig::default());
        assert!(state.try_open_session(2));
        assert!(state.try_open_session(2));
        assert!(!state.try_open_session(2));
        assert_eq!(state.get_metrics_snapshot().active_sessions, 2);

        state.decrement_active_sessions();
        assert!(state.try_open_session(2));

        state.decrement_active_sessions();
        state.decrement_active_sessions();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_invalid_config_update_is_rejected() {
        let state = AppState::new(AppConfig::default());
        let mut config = AppConfig::default();
        config.performance.max_frame_bytes = 0;

        assert!(state.update_config(config).is_err());
        assert_eq!(state.get_config(), AppConfig::default());
    }
}
