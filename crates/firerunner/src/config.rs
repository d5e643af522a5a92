// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the orchestrator.
//!
//! Configuration is read from a YAML file; environment variables override the
//! security-critical keys (`GITLAB_URL`, `GITLAB_TOKEN`,
//! `GITLAB_WEBHOOK_SECRET`, `FLINTLOCK_ENDPOINT`, `SERVER_HOST`). All
//! duration-valued keys are plain integers in seconds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Webhook HTTP listener.
    pub server: ServerConfig,
    /// GitLab endpoint and credentials.
    pub gitlab: GitlabConfig,
    /// Flintlock backend connection.
    pub flintlock: FlintlockConfig,
    /// MicroVM spec defaults.
    pub vm: VmConfig,
    /// Scheduler sizing and deadlines.
    pub scheduler: SchedulerConfig,
    /// Metrics exporter.
    pub metrics: MetricsConfig,
    /// Logger setup.
    pub logging: LoggingConfig,
}

/// Webhook listener settings, including the security envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// HTTP read timeout in seconds.
    pub read_timeout: u64,
    /// HTTP write timeout in seconds.
    pub write_timeout: u64,
    /// Serve the webhook endpoint over TLS.
    pub tls_enabled: bool,
    /// Path to the TLS certificate (PEM).
    pub tls_cert_path: String,
    /// Path to the TLS private key (PEM).
    pub tls_key_path: String,
    /// Reject webhook requests that did not arrive over TLS.
    pub require_tls: bool,
    /// Peer addresses allowed to deliver webhooks. Empty allows all.
    pub allowed_ips: Vec<String>,
    /// Per-peer webhook requests allowed per minute.
    pub rate_limit_per_minute: u32,
    /// Maximum accepted webhook body size in bytes.
    pub max_body_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: 30,
            write_timeout: 30,
            tls_enabled: false,
            tls_cert_path: String::new(),
            tls_key_path: String::new(),
            require_tls: false,
            allowed_ips: Vec::new(),
            rate_limit_per_minute: 60,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// GitLab connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitlabConfig {
    /// Base URL of the GitLab instance.
    pub url: String,
    /// API token used for runner registration and job queries.
    pub token: String,
    /// Shared secret expected on incoming webhooks.
    pub webhook_secret: String,
    /// Tags merged into every runner registration.
    pub runner_tags: Vec<String>,
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            webhook_secret: String::new(),
            runner_tags: vec!["firecracker".to_string(), "microvm".to_string()],
        }
    }
}

/// Flintlock backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlintlockConfig {
    /// `host:port` of the flintlock gRPC endpoint.
    pub endpoint: String,
    /// Per-call deadline in seconds.
    pub timeout: u64,
    /// Attempts for microVM creation.
    pub retry_attempts: u32,
    /// Base delay between creation attempts in seconds.
    pub retry_delay: u64,
    /// Connect with TLS.
    pub tls_enabled: bool,
    /// Path to the CA certificate bundle (PEM).
    pub tls_ca_cert: String,
    /// Path to the client certificate (PEM).
    pub tls_client_cert: String,
    /// Path to the client private key (PEM).
    pub tls_client_key: String,
}

impl Default for FlintlockConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9090".to_string(),
            timeout: 30,
            retry_attempts: 3,
            retry_delay: 1,
            tls_enabled: false,
            tls_ca_cert: String::new(),
            tls_client_cert: String::new(),
            tls_client_key: String::new(),
        }
    }
}

/// Defaults applied to every microVM spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// vCPU count used when job tags request nothing.
    pub default_vcpu: i64,
    /// Memory in MB used when job tags request nothing.
    pub default_memory_mb: i64,
    /// OCI reference of the kernel image.
    pub kernel_image: String,
    /// OCI reference of the root filesystem image.
    pub rootfs_image: String,
    /// Parent network interface for guest NICs.
    pub network_interface: String,
    /// Labels merged onto every microVM.
    pub extra_labels: HashMap<String, String>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            default_vcpu: 2,
            default_memory_mb: 4096,
            kernel_image: "ghcr.io/firerunner/kernel:latest".to_string(),
            rootfs_image: "ghcr.io/firerunner/gitlab-runner:latest".to_string(),
            network_interface: "eth0".to_string(),
            extra_labels: HashMap::new(),
        }
    }
}

/// Scheduler sizing and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity of the pending-job queue.
    pub queue_size: usize,
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Per-job deadline in seconds, measured from enqueue.
    pub job_timeout: u64,
    /// Interval between reaper passes in seconds.
    pub cleanup_interval: u64,
    /// Deadline for microVM creation in seconds.
    pub vm_start_timeout: u64,
    /// Deadline for microVM teardown in seconds.
    pub vm_shutdown_timeout: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            worker_count: 5,
            job_timeout: 2 * 3600,
            cleanup_interval: 300,
            vm_start_timeout: 60,
            vm_shutdown_timeout: 30,
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose Prometheus metrics.
    pub enabled: bool,
    /// Metrics listener port.
    pub port: u16,
    /// Path the metrics are served on.
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9091,
            path: "/metrics".to_string(),
        }
    }
}

/// Logger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level (`trace`..`error`).
    pub level: String,
    /// Output format: `json` or `text`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, apply environment overrides and
    /// validate the result.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_string(), e))?;
        let mut config: Config = serde_yaml::from_str(&data)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override the security-critical keys from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("GITLAB_URL") {
            if !url.is_empty() {
                self.gitlab.url = url;
            }
        }
        if let Ok(token) = std::env::var("GITLAB_TOKEN") {
            if !token.is_empty() {
                self.gitlab.token = token;
            }
        }
        if let Ok(secret) = std::env::var("GITLAB_WEBHOOK_SECRET") {
            if !secret.is_empty() {
                self.gitlab.webhook_secret = secret;
            }
        }
        if let Ok(endpoint) = std::env::var("FLINTLOCK_ENDPOINT") {
            if !endpoint.is_empty() {
                self.flintlock.endpoint = endpoint;
            }
        }
        if let Ok(host) = std::env::var("SERVER_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
    }

    /// Check the invariants the orchestrator relies on at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gitlab.url.is_empty() {
            return Err(ConfigError::Invalid("gitlab.url is required"));
        }
        if self.gitlab.token.is_empty() {
            return Err(ConfigError::Invalid("gitlab.token is required"));
        }
        if self.flintlock.endpoint.is_empty() {
            return Err(ConfigError::Invalid("flintlock.endpoint is required"));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be in [1, 65535]"));
        }
        if self.vm.default_vcpu < 1 {
            return Err(ConfigError::Invalid("vm.default_vcpu must be >= 1"));
        }
        if self.vm.default_memory_mb < 512 {
            return Err(ConfigError::Invalid("vm.default_memory_mb must be >= 512"));
        }
        if self.scheduler.queue_size < 1 {
            return Err(ConfigError::Invalid("scheduler.queue_size must be >= 1"));
        }
        if self.scheduler.worker_count < 1 {
            return Err(ConfigError::Invalid("scheduler.worker_count must be >= 1"));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {0}: {1}")]
    Read(String, #[source] std::io::Error),
    /// The config file is not valid YAML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// A validation rule failed.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
