//! Per-route request metrics.
//!
//! Requests are keyed by method and matched route pattern (`GET /api/v1/config`),
//! so WebSocket upgrades and unmatched paths do not create one entry per URL.

use crate::state::AppState;
use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, Error,
};
use std::time::Instant;

/// Wrap with `actix_web::middleware::from_fn(record_metrics)`.
pub async fn record_metrics(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let start_time = Instant::now();
    let route = req
        .match_pattern()
        .unwrap_or_else(|| req.path().to_string());
    let endpoint = format!("{} {}", req.method(), route);
    let state = req.app_data::<web::Data<AppState>>().cloned();

    if let Some(state) = &state {
        state.increment_request_count();
    }

    let result = next.call(req).await;

    if let Some(state) = &state {
        let duration_ms = start_time.elapsed().as_millis() as u64;
        let is_error = match &result {
            Ok(response) => {
                response.status().is_client_error() || response.status().is_server_error()
            }
            Err(_) => true,
        };

        state.record_endpoint_request(&endpoint, duration_ms, is_error);
        if is_error {
            state.increment_error_count();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{middleware::from_fn, test as actix_test, App, HttpResponse};

    #[actix_web::test]
    async fn test_requests_are_recorded_by_pattern() {
        let state = AppState::new(AppConfig::default());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(from_fn(record_metrics))
                .route("/items/{id}", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/fail", web::get().to(|| async { HttpResponse::BadRequest().finish() })),
        )
        .await;

        for uri in ["/items/1", "/items/2", "/fail"] {
            let req = actix_test::TestRequest::get().uri(uri).to_request();
            actix_test::call_service(&app, req).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 3);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /items/{id}"].request_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET /fail"].error_count, 1);
    }
}
