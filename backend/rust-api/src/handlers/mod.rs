use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::services::{AppState, SessionSlot};

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (session, phase, reason) = {
        let slot = state.exam.lock().await;
        match &*slot {
            SessionSlot::Ready(controller) => (slot.status(), Some(controller.phase()), None),
            SessionSlot::Unavailable(reason) => (slot.status(), None, Some(reason.clone())),
            SessionSlot::NoActiveSession => (slot.status(), None, None),
        }
    };
    let timer_armed = state.timer.lock().await.is_armed();

    // The service itself is up either way; only a failed upstream degrades it
    let (status_code, status) = if reason.is_some() {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "simulado-api",
            "version": env!("CARGO_PKG_VERSION"),
            "session": {
                "status": session,
                "phase": phase.map(|p| p.as_str()),
                "error": reason,
                "timer_armed": timer_armed,
            },
            "upstream": state.config.upstream_api_url,
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic Auth against `METRICS_AUTH` (`user:password`).
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());
    if credentials != expected {
        tracing::warn!("Rejected /metrics request with invalid credentials");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub mod exam;
pub mod sse;
