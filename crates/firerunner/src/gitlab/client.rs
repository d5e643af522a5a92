// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitLab REST API client.
//!
//! Covers the slice of the API the orchestrator needs: runner registration
//! and removal, job state reads, and a version probe for health checks.
//! Authentication uses the configured API token via `PRIVATE-TOKEN`.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::GitlabConfig;
use crate::gitlab::types::{JobInfo, ProjectInfo, RunnerInfo, RunnerRegistration};

/// Deadline applied to every GitLab API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitLab API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitlabError {
    /// The request could not be sent or the response not read.
    #[error("GitLab request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// GitLab answered with a non-success status.
    #[error("GitLab API error ({status}): {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Response body, truncated by GitLab to the error message.
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct RegisterRunnerResponse {
    id: i64,
    token: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

/// Client for the GitLab REST API.
#[derive(Debug, Clone)]
pub struct GitlabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    runner_tags: Vec<String>,
}

impl GitlabClient {
    /// Create a client from the GitLab configuration.
    pub fn new(config: &GitlabConfig) -> Result<Self, GitlabError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            runner_tags: config.runner_tags.clone(),
        })
    }

    /// Register an ephemeral project runner bound to a VM.
    ///
    /// The configured default tags are merged with the job's tags, and the
    /// description embeds the VM IP so operators can trace a runner back to
    /// its sandbox. The runner is locked and only accepts tagged jobs.
    pub async fn register_runner(
        &self,
        project_id: i64,
        vm_ip: &str,
        tags: &[String],
    ) -> Result<RunnerRegistration, GitlabError> {
        let mut all_tags = self.runner_tags.clone();
        all_tags.extend(tags.iter().cloned());
        let description = format!("FireRunner-VM-{vm_ip}");

        info!(
            project_id = project_id,
            vm_ip = %vm_ip,
            tags = ?all_tags,
            "Registering ephemeral GitLab runner"
        );

        let response = self
            .http
            .post(format!("{}/api/v4/runners", self.base_url))
            .json(&serde_json::json!({
                "token": self.token,
                "description": description,
                "tag_list": all_tags.join(","),
                "locked": true,
                "run_untagged": false,
                "paused": false,
            }))
            .send()
            .await?;
        let registered: RegisterRunnerResponse = check(response).await?.json().await?;

        info!(runner_id = registered.id, "Runner registered");

        Ok(RunnerRegistration {
            id: registered.id,
            token: registered.token,
            description,
            tags: all_tags,
        })
    }

    /// Delete a runner. A runner GitLab no longer knows about is success.
    pub async fn unregister_runner(&self, runner_id: i64) -> Result<(), GitlabError> {
        info!(runner_id = runner_id, "Unregistering GitLab runner");

        let response = self
            .http
            .delete(format!("{}/api/v4/runners/{runner_id}", self.base_url))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(runner_id = runner_id, "Runner already gone");
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }

    /// Read a job's current state.
    pub async fn get_job(&self, project_id: i64, job_id: i64) -> Result<JobInfo, GitlabError> {
        let response = self
            .http
            .get(format!(
                "{}/api/v4/projects/{project_id}/jobs/{job_id}",
                self.base_url
            ))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Read project details. Operator convenience, not on the job path.
    pub async fn get_project(&self, project_id: i64) -> Result<ProjectInfo, GitlabError> {
        let response = self
            .http
            .get(format!("{}/api/v4/projects/{project_id}", self.base_url))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// List the runners registered to a project.
    pub async fn list_project_runners(
        &self,
        project_id: i64,
    ) -> Result<Vec<RunnerInfo>, GitlabError> {
        let response = self
            .http
            .get(format!(
                "{}/api/v4/projects/{project_id}/runners",
                self.base_url
            ))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Probe the API with a cheap version query.
    pub async fn health(&self) -> Result<(), GitlabError> {
        let response = self
            .http
            .get(format!("{}/api/v4/version", self.base_url))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;
        let version: VersionResponse = check(response).await?.json().await?;
        debug!(version = %version.version, "GitLab reachable");
        Ok(())
    }
}

/// Turn non-success responses into [`GitlabError::Api`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response, GitlabError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(GitlabError::Api {
        status: status.as_u16(),
        message,
    })
}
