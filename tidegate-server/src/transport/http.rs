//! HTTP/JSON transport
//!
//! # API Endpoints
//!
//! ## POST /v1/check
//!
//! Check one inbound request against the route rules.
//!
//! ### Request Body
//!
//! ```json
//! {
//!   "route": "/api/search",
//!   "method": "GET",
//!   "addr": "203.0.113.5",
//!   "user_id": 482,
//!   "timestamp": 1723000000
//! }
//! ```
//!
//! `method`, `user_id`, and `timestamp` are optional.
//!
//! ### Response
//!
//! `200` when allowed, `429` when denied; either way the body carries the
//! structured decision and the response carries `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining`, and `X-RateLimit-Reset`. Denials also carry
//! `Retry-After`. When the server runs fail-closed and storage is down,
//! checks answer `503`.
//!
//! ## POST /v1/admin/unban
//!
//! Clear a client's ban: `{"client_key": "user:482"}`. Deployments are
//! expected to guard the `/v1/admin` prefix with their own authorization
//! layer.
//!
//! ## GET /v1/admin/stats
//!
//! Counter snapshot: total/banned clients, allow/deny counts, storage errors.
//!
//! ## GET /metrics
//!
//! Prometheus text exposition.
//!
//! ## GET /health
//!
//! Health check endpoint. Returns "OK" with 200 status.

use super::Transport;
use crate::gate::Gate;
use crate::types::{CheckRequest, CheckResponse, ErrorResponse, StatsResponse, UnbanRequest, UnbanResponse};
use anyhow::Result;
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tidegate::Error;

/// HTTP transport implementation.
pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Self {
        let addr = format!("{host}:{port}").parse().expect("Invalid address");
        Self { addr }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, gate: Gate) -> Result<()> {
        let app = router(gate);

        tracing::info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Build the service router. Split out so tests can drive it in-process.
pub fn router(gate: Gate) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/admin/unban", post(handle_unban))
        .route("/v1/admin/stats", get(handle_stats))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(|| async { "OK" }))
        .with_state(gate)
}

async fn handle_check(State(gate): State<Gate>, Json(req): Json<CheckRequest>) -> Response {
    let started = Instant::now();
    let now = match req.timestamp {
        Some(secs) => UNIX_EPOCH + Duration::from_secs(secs),
        None => SystemTime::now(),
    };

    let policy = gate.policies.resolve(&req.route);
    let decision = gate.limiter.admit(&req.context(), policy, now);
    let latency_us = started.elapsed().as_micros() as u64;

    match decision {
        Ok(decision) => {
            gate.server_metrics.record_request(latency_us, decision.allowed);

            let status = if decision.allowed {
                StatusCode::OK
            } else {
                StatusCode::TOO_MANY_REQUESTS
            };

            let mut headers = HeaderMap::new();
            headers.insert(
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(decision.quota.limit),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderValue::from(decision.quota.remaining),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-reset"),
                HeaderValue::from(crate::unix_secs(decision.quota.reset_at)),
            );
            if !decision.allowed {
                headers.insert(
                    HeaderName::from_static("retry-after"),
                    HeaderValue::from(decision.retry_after.as_secs()),
                );
            }

            (
                status,
                headers,
                Json(CheckResponse::from_decision(&decision, &policy.scope)),
            )
                .into_response()
        }
        Err(Error::StorageUnavailable(err)) => {
            gate.server_metrics.record_error(latency_us);
            tracing::error!(error = %err, "check failed: storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "storage unavailable".to_string(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            gate.server_metrics.record_error(latency_us);
            tracing::error!(error = %err, "check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal error".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn handle_unban(State(gate): State<Gate>, Json(req): Json<UnbanRequest>) -> Response {
    match gate.limiter.unban(&req.client_key, SystemTime::now()) {
        Ok(cleared) => Json(UnbanResponse { cleared }).into_response(),
        Err(Error::StorageUnavailable(err)) => {
            tracing::error!(error = %err, "unban failed: storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "storage unavailable".to_string(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "unban failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal error".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn handle_stats(State(gate): State<Gate>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: gate.server_metrics.uptime_seconds(),
        metrics: gate.core_metrics.snapshot(),
    })
}

async fn handle_metrics(State(gate): State<Gate>) -> String {
    gate.server_metrics
        .export_prometheus(&gate.core_metrics.snapshot())
}
