// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polls GitLab until a job reaches a terminal status.
//!
//! Individual poll failures do not end the loop; GitLab is assumed to be
//! intermittently flaky and the orchestrator must not fail a build over a
//! transient API error. Only cancellation of the job's scope exits early.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gitlab::types::{is_terminal_status, JobInfo};
use crate::gitlab::CiPlatform;

/// Watches a single job via the CI platform API.
pub struct JobMonitor {
    ci: Arc<dyn CiPlatform>,
}

impl JobMonitor {
    /// Create a monitor backed by the given CI platform client.
    pub fn new(ci: Arc<dyn CiPlatform>) -> Self {
        Self { ci }
    }

    /// Poll until the job is terminal or the scope is cancelled.
    ///
    /// Returns the job in its terminal state. The caller decides how to
    /// classify non-`success` outcomes.
    pub async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        job_id: i64,
        poll_interval: Duration,
    ) -> Result<JobInfo> {
        info!(
            project_id = project_id,
            job_id = job_id,
            "Waiting for job completion"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    warn!(job_id = job_id, "Job monitoring cancelled");
                    return Err(Error::JobTimeout(job_id));
                }

                _ = tokio::time::sleep(poll_interval) => {
                    match self.ci.get_job(project_id, job_id).await {
                        Ok(job) if is_terminal_status(&job.status) => {
                            info!(
                                job_id = job_id,
                                status = %job.status,
                                duration = ?job.duration,
                                "Job completed"
                            );
                            return Ok(job);
                        }
                        Ok(job) => {
                            debug!(job_id = job_id, status = %job.status, "Job still running");
                        }
                        Err(e) => {
                            debug!(job_id = job_id, error = %e, "Job status poll failed");
                        }
                    }
                }
            }
        }
    }
}
