// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook ingress and its security envelope.

use async_trait::async_trait;

use crate::error::Result;
use crate::gitlab::types::{JobEvent, PipelineEvent};

/// HTTP routes and event dispatch.
pub mod handler;

/// Transport, allow-list, rate-limit, size, and secret checks.
pub mod security;

pub use handler::{router, WebhookState};
pub use security::{RateLimiter, SecurityConfig};

/// Receives events that passed the envelope and the eligibility filters.
///
/// Implemented by the scheduler; tests supply recording fakes.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Handle an admitted job event.
    async fn process_job_event(&self, event: &JobEvent) -> Result<()>;

    /// Handle a pipeline event. Informational only.
    async fn process_pipeline_event(&self, event: &PipelineEvent) -> Result<()>;
}
