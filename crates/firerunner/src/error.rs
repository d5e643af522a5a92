// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the orchestrator.

use thiserror::Error;

/// Orchestrator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The VM backend failed or is unreachable.
    #[error("VM backend error: {0}")]
    Backend(#[from] firerunner_flintlock::FlintlockError),

    /// A GitLab API call failed.
    #[error("GitLab error: {0}")]
    Gitlab(#[from] crate::gitlab::GitlabError),

    /// The job queue is full; the event was not admitted.
    #[error("job queue is full, cannot schedule job {0}")]
    QueueFull(i64),

    /// The scheduler is draining and accepts no new work.
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// The job's cancellation scope fired (deadline or explicit cancel).
    #[error("job {0} cancelled or timed out")]
    JobTimeout(i64),

    /// A VM is not tracked by the manager.
    #[error("VM {0} not found")]
    VmNotFound(String),

    /// A graceful shutdown did not finish within its deadline.
    #[error("{0} shutdown timed out")]
    ShutdownTimeout(&'static str),

    /// A webhook payload could not be decoded.
    #[error("failed to parse {0} event: {1}")]
    EventParse(&'static str, #[source] serde_json::Error),
}

/// Result type using the orchestrator [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
