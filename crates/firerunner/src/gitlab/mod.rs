// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitLab integration: REST client, webhook payloads, and job monitoring.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// GitLab REST API client.
pub mod client;

/// Polls GitLab until a job reaches a terminal status.
pub mod job_monitor;

/// Webhook payloads, API types, and tag-derived VM sizing.
pub mod types;

pub use client::{GitlabClient, GitlabError};
pub use job_monitor::JobMonitor;
pub use types::{JobEvent, JobInfo, PipelineEvent, RunnerRegistration, VmRequirements};

/// The CI platform capability the scheduler and monitor depend on.
///
/// Production uses [`GitlabClient`]; tests supply in-memory fakes.
#[async_trait]
pub trait CiPlatform: Send + Sync {
    /// Register an ephemeral runner for a project, bound to a VM's IP.
    async fn register_runner(
        &self,
        project_id: i64,
        vm_ip: &str,
        tags: &[String],
    ) -> Result<RunnerRegistration>;

    /// Remove a runner. Removing an already-gone runner is success.
    async fn unregister_runner(&self, runner_id: i64) -> Result<()>;

    /// Read a job's current state.
    async fn get_job(&self, project_id: i64, job_id: i64) -> Result<JobInfo>;

    /// Cheap reachability probe.
    async fn health(&self) -> Result<()>;
}

#[async_trait]
impl CiPlatform for GitlabClient {
    async fn register_runner(
        &self,
        project_id: i64,
        vm_ip: &str,
        tags: &[String],
    ) -> Result<RunnerRegistration> {
        Ok(GitlabClient::register_runner(self, project_id, vm_ip, tags)
            .await
            .map_err(Error::Gitlab)?)
    }

    async fn unregister_runner(&self, runner_id: i64) -> Result<()> {
        Ok(GitlabClient::unregister_runner(self, runner_id)
            .await
            .map_err(Error::Gitlab)?)
    }

    async fn get_job(&self, project_id: i64, job_id: i64) -> Result<JobInfo> {
        Ok(GitlabClient::get_job(self, project_id, job_id)
            .await
            .map_err(Error::Gitlab)?)
    }

    async fn health(&self) -> Result<()> {
        Ok(GitlabClient::health(self).await.map_err(Error::Gitlab)?)
    }
}
