// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prometheus metrics and the exporter endpoint.

use axum::routing::get;
use axum::Router;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge, TextEncoder,
};

/// Webhook requests by outcome (`accepted`, `ignored`, `rejected`, `failed`).
pub static WEBHOOK_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "firerunner_webhook_events_total",
        "Webhook requests by outcome",
        &["outcome"]
    )
    .expect("register firerunner_webhook_events_total")
});

/// Jobs admitted into the scheduler queue.
pub static JOBS_SCHEDULED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "firerunner_jobs_scheduled_total",
        "Jobs admitted into the scheduler queue"
    )
    .expect("register firerunner_jobs_scheduled_total")
});

/// Jobs that reached a terminal state, by final status.
pub static JOBS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "firerunner_jobs_completed_total",
        "Jobs that reached a terminal state",
        &["status"]
    )
    .expect("register firerunner_jobs_completed_total")
});

/// Jobs currently held in the registry.
pub static JOBS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "firerunner_jobs_tracked",
        "Jobs currently held in the registry"
    )
    .expect("register firerunner_jobs_tracked")
});

/// MicroVMs created via the backend.
pub static VMS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "firerunner_vms_created_total",
        "MicroVMs created via the backend"
    )
    .expect("register firerunner_vms_created_total")
});

/// MicroVMs destroyed via the backend.
pub static VMS_DESTROYED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "firerunner_vms_destroyed_total",
        "MicroVMs destroyed via the backend"
    )
    .expect("register firerunner_vms_destroyed_total")
});

/// MicroVMs currently tracked by the VM manager.
pub static VMS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "firerunner_vms_tracked",
        "MicroVMs currently tracked by the VM manager"
    )
    .expect("register firerunner_vms_tracked")
});

/// Render all registered metrics in Prometheus text format.
pub fn render() -> String {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}

/// Router serving the metrics exposition endpoint.
pub fn router(path: &str) -> Router {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Router::new().route(&path, get(|| async { render() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_metrics() {
        JOBS_SCHEDULED.inc();
        WEBHOOK_EVENTS.with_label_values(&["accepted"]).inc();

        let text = render();
        assert!(text.contains("firerunner_jobs_scheduled_total"));
        assert!(text.contains("firerunner_webhook_events_total"));
    }
}
