// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook ingress.
//!
//! Exposes `/webhook` for GitLab events plus `/health` and `/ready`. Every
//! webhook request passes the security envelope before its body is parsed;
//! job events are filtered to builds that still need a runner and carry a
//! recognized tag, then handed to the event processor. Everything else is
//! acknowledged and dropped so GitLab does not retry events we will never
//! act on.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::gitlab::types::{has_runner_tag, needs_runner, JobEvent, PipelineEvent};
use crate::metrics;
use crate::webhook::security::{self, RateLimiter, SecurityConfig, HEADER_GITLAB_EVENT};
use crate::webhook::EventProcessor;

/// Shared state behind the webhook routes.
pub struct WebhookState {
    /// Receives admitted events; the scheduler in production.
    pub processor: Arc<dyn EventProcessor>,
    /// Security envelope settings.
    pub security: SecurityConfig,
    /// Per-peer rate limiter.
    pub rate_limiter: RateLimiter,
    /// Whether the listener terminates TLS; feeds the transport check.
    pub tls_terminated: bool,
}

impl WebhookState {
    /// Create webhook state around an event processor.
    pub fn new(
        processor: Arc<dyn EventProcessor>,
        security: SecurityConfig,
        tls_terminated: bool,
    ) -> Self {
        let rate_limiter = RateLimiter::new(security.rate_limit_per_minute);
        Self {
            processor,
            security,
            rate_limiter,
            tls_terminated,
        }
    }
}

/// Build the ingress router.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn ready() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ready"}))
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    // Transport requirement.
    if state.security.require_tls && !state.tls_terminated {
        warn!("Rejected non-HTTPS request");
        return reject(StatusCode::FORBIDDEN, "HTTPS required");
    }

    // IP allow-list, port stripped.
    let peer_ip = peer.ip().to_string();
    if !security::ip_allowed(&state.security.allowed_ips, &peer_ip) {
        warn!(ip = %peer_ip, "Rejected request from non-allow-listed IP");
        return reject(StatusCode::FORBIDDEN, "Forbidden");
    }

    // Rate limit.
    if !state.rate_limiter.allow(&peer_ip) {
        warn!(ip = %peer_ip, "Rate limit exceeded");
        return reject(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
    }

    // Body size cap, checked against the declared length first so oversized
    // uploads are refused before being read.
    let declared_length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared_length.is_some_and(|len| len > state.security.max_body_size) {
        warn!(size = ?declared_length, "Request body too large");
        return reject(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.security.max_body_size as usize).await {
        Ok(body) => body,
        Err(_) => {
            warn!("Request body exceeded the size cap while reading");
            return reject(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    // Secret verification.
    if !security::verify_secret(&state.security.secret, &parts.headers, &body) {
        warn!("Invalid webhook signature");
        return reject(StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    // Event type.
    let event_type = parts
        .headers
        .get(HEADER_GITLAB_EVENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if event_type.is_empty() {
        warn!("Missing X-Gitlab-Event header");
        return reject(StatusCode::BAD_REQUEST, "Missing event type");
    }

    debug!(event_type = %event_type, "Received webhook event");

    match process_event(&state, event_type, &body).await {
        Ok(Disposition::Accepted) => {
            metrics::WEBHOOK_EVENTS.with_label_values(&["accepted"]).inc();
            accepted()
        }
        Ok(Disposition::Ignored) => {
            metrics::WEBHOOK_EVENTS.with_label_values(&["ignored"]).inc();
            accepted()
        }
        Err(e) => {
            error!(error = %e, "Failed to process webhook event");
            metrics::WEBHOOK_EVENTS.with_label_values(&["failed"]).inc();
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process event").into_response()
        }
    }
}

/// What became of an event that passed the envelope.
enum Disposition {
    /// A job was admitted into the scheduler.
    Accepted,
    /// The event was acknowledged and dropped.
    Ignored,
}

async fn process_event(
    state: &WebhookState,
    event_type: &str,
    body: &[u8],
) -> Result<Disposition> {
    match event_type {
        "Job Hook" => {
            let event: JobEvent =
                serde_json::from_slice(body).map_err(|e| Error::EventParse("job", e))?;

            info!(
                build_id = event.build_id,
                build_name = %event.build_name,
                build_status = %event.build_status,
                project_id = event.project_id,
                project_name = %event.project_name,
                "Processing job event"
            );

            // Only builds that still need a runner.
            if !needs_runner(&event.build_status) {
                debug!(status = %event.build_status, "Ignoring non-pending job");
                return Ok(Disposition::Ignored);
            }

            // Only jobs explicitly tagged for us.
            if !has_runner_tag(&event.tags) {
                debug!("Job does not carry a recognized runner tag, skipping");
                return Ok(Disposition::Ignored);
            }

            state.processor.process_job_event(&event).await?;
            Ok(Disposition::Accepted)
        }
        "Pipeline Hook" => {
            let event: PipelineEvent =
                serde_json::from_slice(body).map_err(|e| Error::EventParse("pipeline", e))?;
            state.processor.process_pipeline_event(&event).await?;
            Ok(Disposition::Ignored)
        }
        other => {
            debug!(event_type = %other, "Ignoring unsupported event type");
            Ok(Disposition::Ignored)
        }
    }
}

fn accepted() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "accepted"}))).into_response()
}

fn reject(status: StatusCode, message: &'static str) -> Response {
    metrics::WEBHOOK_EVENTS.with_label_values(&["rejected"]).inc();
    (status, message).into_response()
}
