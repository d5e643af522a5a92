// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitLab webhook payloads, API types, and tag-derived VM sizing.

use serde::{Deserialize, Serialize};

/// Tag prefixes that mark a job as ours. A job without at least one tag
/// starting with one of these is ignored at the ingress.
pub const RUNNER_TAG_PREFIXES: [&str; 4] = ["firecracker", "microvm", "firerunner", "actuated"];

/// CI job statuses from which a build does not resume.
pub const TERMINAL_JOB_STATUSES: [&str; 4] = ["success", "failed", "canceled", "skipped"];

/// A GitLab `Job Hook` event, reduced to the fields the orchestrator reads.
/// Unknown fields in the payload are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Event discriminator, `build` for job hooks.
    #[serde(default)]
    pub object_kind: String,
    /// The build's ID; unique per GitLab instance.
    pub build_id: i64,
    /// Job name.
    #[serde(default)]
    pub build_name: String,
    /// Pipeline stage.
    #[serde(default)]
    pub build_stage: String,
    /// Current job status.
    #[serde(default)]
    pub build_status: String,
    /// Pipeline the job belongs to.
    #[serde(default)]
    pub pipeline_id: i64,
    /// Project the job belongs to.
    pub project_id: i64,
    /// Project name, for logging.
    #[serde(default)]
    pub project_name: String,
    /// Job tags; drive eligibility and VM sizing.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A GitLab `Pipeline Hook` event. Only logged, never scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Event discriminator, `pipeline` for pipeline hooks.
    #[serde(default)]
    pub object_kind: String,
    /// Pipeline attributes.
    #[serde(default)]
    pub object_attributes: PipelineAttributes,
    /// Project the pipeline belongs to.
    #[serde(default)]
    pub project: ProjectRef,
}

/// Attributes of a pipeline event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineAttributes {
    /// Pipeline ID.
    #[serde(default)]
    pub id: i64,
    /// Pipeline status.
    #[serde(default)]
    pub status: String,
    /// Git ref the pipeline runs for.
    #[serde(rename = "ref", default)]
    pub git_ref: String,
}

/// Project reference embedded in pipeline events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRef {
    /// Project ID.
    #[serde(default)]
    pub id: i64,
    /// Project name.
    #[serde(default)]
    pub name: String,
}

/// A registered ephemeral runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRegistration {
    /// GitLab's identifier for the runner; the handle used for cleanup.
    pub id: i64,
    /// Authentication token for the runner agent inside the VM.
    pub token: String,
    /// Human-readable description; embeds the VM IP.
    pub description: String,
    /// Tags the runner accepts jobs for.
    pub tags: Vec<String>,
}

/// Project details as reported by the GitLab projects API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project ID.
    pub id: i64,
    /// Project name.
    #[serde(default)]
    pub name: String,
    /// Full namespaced path, e.g. `group/project`.
    #[serde(default)]
    pub path_with_namespace: String,
}

/// A runner as listed by the GitLab runners API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerInfo {
    /// Runner ID.
    pub id: i64,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether the runner is paused.
    #[serde(default)]
    pub paused: bool,
    /// Whether the runner is shared across projects.
    #[serde(default)]
    pub is_shared: bool,
    /// Whether GitLab currently sees the runner as online.
    #[serde(default)]
    pub online: bool,
}

/// Job state as reported by the GitLab jobs API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// The job's ID.
    pub id: i64,
    /// Current status, one of created/pending/running/success/failed/canceled/skipped.
    #[serde(default)]
    pub status: String,
    /// Pipeline stage.
    #[serde(default)]
    pub stage: String,
    /// Job name.
    #[serde(default)]
    pub name: String,
    /// Runtime in seconds once the job has run.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Whether a CI status is terminal.
pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_JOB_STATUSES.contains(&status)
}

/// Whether a job event describes a build that still needs a runner.
pub fn needs_runner(status: &str) -> bool {
    status == "pending" || status == "created"
}

/// Whether at least one tag marks the job as ours.
pub fn has_runner_tag(tags: &[String]) -> bool {
    tags.iter().any(|tag| {
        let tag = tag.trim().to_lowercase();
        RUNNER_TAG_PREFIXES
            .iter()
            .any(|prefix| tag.starts_with(prefix))
    })
}

/// VM resources requested by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRequirements {
    /// Number of virtual CPUs.
    pub vcpu: i64,
    /// Guest memory in MB.
    pub memory_mb: i64,
}

impl VmRequirements {
    /// Extract VM requirements from job tags.
    ///
    /// Tags of the form `<prefix>-<N>cpu-<M>gb` (e.g. `firecracker-4cpu-8gb`)
    /// set the request. Malformed segments are ignored and the defaults kept;
    /// tag evolution on the CI side must never reject a job here.
    pub fn from_tags(tags: &[String], defaults: VmRequirements) -> Self {
        let mut requirements = defaults;

        for tag in tags {
            if !(tag.contains("cpu") && tag.contains("gb")) {
                continue;
            }
            for (i, segment) in tag.split('-').enumerate() {
                if let Some(value) = segment.strip_suffix("cpu") {
                    if let Ok(vcpu) = value.parse::<i64>() {
                        requirements.vcpu = vcpu;
                    }
                }
                // "gb" must not be the first segment; prefixes like
                // "gb-runner" would otherwise match.
                if i > 0 {
                    if let Some(value) = segment.strip_suffix("gb") {
                        if let Ok(memory_gb) = value.parse::<i64>() {
                            requirements.memory_mb = memory_gb * 1024;
                        }
                    }
                }
            }
        }

        requirements
    }

    /// Render the requirements back into a sizing tag.
    pub fn as_tag(&self, prefix: &str) -> String {
        format!("{prefix}-{}cpu-{}gb", self.vcpu, self.memory_mb / 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: VmRequirements = VmRequirements {
        vcpu: 2,
        memory_mb: 4096,
    };

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_tags_parses_sizing_tag() {
        let req = VmRequirements::from_tags(&tags(&["firecracker-4cpu-8gb"]), DEFAULTS);
        assert_eq!(req.vcpu, 4);
        assert_eq!(req.memory_mb, 8192);
    }

    #[test]
    fn test_from_tags_defaults_without_sizing_tag() {
        let req = VmRequirements::from_tags(&tags(&["firecracker", "linux"]), DEFAULTS);
        assert_eq!(req, DEFAULTS);
    }

    #[test]
    fn test_from_tags_ignores_malformed_segments() {
        let req = VmRequirements::from_tags(&tags(&["firecracker-xxcpu-8gb"]), DEFAULTS);
        assert_eq!(req.vcpu, 2);
        assert_eq!(req.memory_mb, 8192);

        let req = VmRequirements::from_tags(&tags(&["firecracker-4cpu-zzgb"]), DEFAULTS);
        assert_eq!(req.vcpu, 4);
        assert_eq!(req.memory_mb, 4096);
    }

    #[test]
    fn test_from_tags_gb_must_not_lead() {
        let req = VmRequirements::from_tags(&tags(&["8gb-cpu"]), DEFAULTS);
        assert_eq!(req, DEFAULTS);
    }

    #[test]
    fn test_from_tags_round_trip() {
        let req = VmRequirements {
            vcpu: 8,
            memory_mb: 16384,
        };
        let tag = req.as_tag("firecracker");
        assert_eq!(tag, "firecracker-8cpu-16gb");
        assert_eq!(VmRequirements::from_tags(&[tag], DEFAULTS), req);
    }

    #[test]
    fn test_has_runner_tag() {
        assert!(has_runner_tag(&tags(&["firecracker-2cpu-4gb"])));
        assert!(has_runner_tag(&tags(&["docker", "microvm"])));
        assert!(has_runner_tag(&tags(&["  FireRunner  "])));
        assert!(has_runner_tag(&tags(&["actuated-4cpu-8gb"])));
        assert!(!has_runner_tag(&tags(&["docker", "shell"])));
        assert!(!has_runner_tag(&[]));
    }

    #[test]
    fn test_status_predicates() {
        assert!(needs_runner("pending"));
        assert!(needs_runner("created"));
        assert!(!needs_runner("running"));

        assert!(is_terminal_status("success"));
        assert!(is_terminal_status("failed"));
        assert!(is_terminal_status("canceled"));
        assert!(is_terminal_status("skipped"));
        assert!(!is_terminal_status("running"));
        assert!(!is_terminal_status("pending"));
    }

    #[test]
    fn test_job_event_from_webhook_payload() {
        let payload = serde_json::json!({
            "object_kind": "build",
            "build_id": 42,
            "build_name": "compile",
            "build_stage": "build",
            "build_status": "pending",
            "pipeline_id": 7001,
            "project_id": 7,
            "project_name": "demo",
            "tags": ["firecracker-4cpu-8gb"],
            "runner_id": null,
            "commit": {"id": "deadbeef"}
        });

        let event: JobEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.build_id, 42);
        assert_eq!(event.project_id, 7);
        assert_eq!(event.build_status, "pending");
        assert_eq!(event.tags, vec!["firecracker-4cpu-8gb".to_string()]);
    }

    #[test]
    fn test_pipeline_event_from_webhook_payload() {
        let payload = serde_json::json!({
            "object_kind": "pipeline",
            "object_attributes": {"id": 7001, "status": "running", "ref": "main"},
            "project": {"id": 7, "name": "demo"}
        });

        let event: PipelineEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.object_attributes.id, 7001);
        assert_eq!(event.object_attributes.git_ref, "main");
        assert_eq!(event.project.id, 7);
    }
}
