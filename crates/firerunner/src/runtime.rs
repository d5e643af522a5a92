// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime that wires every component together.
//!
//! [`OrchestratorRuntime::start`] builds the flintlock client, VM manager,
//! GitLab client, scheduler, webhook listener, and metrics exporter from a
//! [`Config`], and [`OrchestratorRuntime::shutdown`] tears them down in the
//! reverse order: ingress first so no new work arrives, then the scheduler
//! (draining workers), then the VM manager (destroying remaining VMs), and
//! finally the backend channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use firerunner_flintlock::{FlintlockClient, FlintlockClientConfig, FlintlockTlsConfig};

use crate::config::Config;
use crate::gitlab::types::VmRequirements;
use crate::gitlab::GitlabClient;
use crate::metrics;
use crate::scheduler::Scheduler;
use crate::vm_manager::VmManager;
use crate::webhook::{self, SecurityConfig, WebhookState};

/// Deadline for the startup health probes. Failures only warn; the
/// collaborators may come up after us.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A running orchestrator.
pub struct OrchestratorRuntime {
    scheduler: Arc<Scheduler>,
    vm_manager: Arc<VmManager>,
    flintlock: FlintlockClient,
    webhook_handle: axum_server::Handle,
    webhook_task: JoinHandle<()>,
    metrics_handle: Option<axum_server::Handle>,
    metrics_task: Option<JoinHandle<()>>,
}

impl OrchestratorRuntime {
    /// Start every component from the given configuration.
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        info!("Initializing application components");

        // Flintlock client; connection is lazy, probe reachability once.
        let flintlock = FlintlockClient::new(FlintlockClientConfig {
            endpoint: config.flintlock.endpoint.clone(),
            timeout: Duration::from_secs(config.flintlock.timeout),
            retry_attempts: config.flintlock.retry_attempts,
            retry_delay: Duration::from_secs(config.flintlock.retry_delay),
            tls: config.flintlock.tls_enabled.then(|| FlintlockTlsConfig {
                ca_cert: config.flintlock.tls_ca_cert.clone(),
                client_cert: config.flintlock.tls_client_cert.clone(),
                client_key: config.flintlock.tls_client_key.clone(),
            }),
        })
        .context("failed to create flintlock client")?;

        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, flintlock.health()).await {
            Ok(Ok(())) => info!("Flintlock reachable"),
            Ok(Err(e)) => warn!(error = %e, "Flintlock health check failed (will retry)"),
            Err(_) => warn!("Flintlock health check timed out (will retry)"),
        }

        let vm_manager = Arc::new(VmManager::new(
            Arc::new(flintlock.clone()),
            config.vm.clone(),
        ));
        vm_manager.start_reaper(Duration::from_secs(config.scheduler.cleanup_interval));

        // GitLab client.
        let gitlab = Arc::new(
            GitlabClient::new(&config.gitlab).context("failed to create GitLab client")?,
        );
        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, gitlab.health()).await {
            Ok(Ok(())) => info!("GitLab reachable"),
            Ok(Err(e)) => warn!(error = %e, "GitLab health check failed"),
            Err(_) => warn!("GitLab health check timed out"),
        }

        // Scheduler and workers.
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            VmRequirements {
                vcpu: config.vm.default_vcpu,
                memory_mb: config.vm.default_memory_mb,
            },
            vm_manager.clone(),
            gitlab.clone(),
        ));
        scheduler.start();

        // Webhook ingress.
        let security = SecurityConfig::from_server(&config.server, &config.gitlab.webhook_secret);
        let state = Arc::new(WebhookState::new(
            scheduler.clone(),
            security,
            config.server.tls_enabled,
        ));
        let app = webhook::router(state).layer(TimeoutLayer::new(Duration::from_secs(
            config.server.write_timeout,
        )));

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("invalid server.host/server.port")?;
        let webhook_handle = axum_server::Handle::new();
        let webhook_task = if config.server.tls_enabled {
            let tls = RustlsConfig::from_pem_file(
                &config.server.tls_cert_path,
                &config.server.tls_key_path,
            )
            .await
            .context("failed to load webhook TLS material")?;
            let handle = webhook_handle.clone();
            tokio::spawn(async move {
                if let Err(e) = axum_server::bind_rustls(addr, tls)
                    .handle(handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
                {
                    error!(error = %e, "Webhook server error");
                }
            })
        } else {
            let handle = webhook_handle.clone();
            tokio::spawn(async move {
                if let Err(e) = axum_server::bind(addr)
                    .handle(handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
                {
                    error!(error = %e, "Webhook server error");
                }
            })
        };

        // Surface bind failures at startup instead of in a background task.
        let bound = webhook_handle
            .listening()
            .await
            .context("webhook listener failed to bind")?;
        info!(addr = %bound, tls = config.server.tls_enabled, "Webhook server listening");

        // Metrics exporter on its own listener.
        let (metrics_handle, metrics_task) = if config.metrics.enabled {
            let metrics_addr: SocketAddr = format!("0.0.0.0:{}", config.metrics.port)
                .parse()
                .context("invalid metrics.port")?;
            let app = metrics::router(&config.metrics.path);
            let handle = axum_server::Handle::new();
            let server_handle = handle.clone();
            let task = tokio::spawn(async move {
                if let Err(e) = axum_server::bind(metrics_addr)
                    .handle(server_handle)
                    .serve(app.into_make_service())
                    .await
                {
                    error!(error = %e, "Metrics server error");
                }
            });
            let bound = handle
                .listening()
                .await
                .context("metrics listener failed to bind")?;
            info!(addr = %bound, path = %config.metrics.path, "Metrics server listening");
            (Some(handle), Some(task))
        } else {
            (None, None)
        };

        info!("Application started");

        Ok(Self {
            scheduler,
            vm_manager,
            flintlock,
            webhook_handle,
            webhook_task,
            metrics_handle,
            metrics_task,
        })
    }

    /// The scheduler, for queries and tests.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Gracefully stop everything, bounded by `deadline` per stage.
    pub async fn shutdown(self, deadline: Duration) -> anyhow::Result<()> {
        info!("Shutting down application");

        // Stop accepting webhooks first.
        self.webhook_handle.graceful_shutdown(Some(deadline));
        if let Some(handle) = &self.metrics_handle {
            handle.graceful_shutdown(Some(deadline));
        }

        if let Err(e) = self.scheduler.shutdown(deadline).await {
            error!(error = %e, "Failed to shut down scheduler cleanly");
        }

        if let Err(e) = self.vm_manager.shutdown(deadline).await {
            error!(error = %e, "Failed to shut down VM manager cleanly");
        }

        if let Err(e) = self.webhook_task.await {
            error!(error = %e, "Webhook server task panicked");
        }
        if let Some(task) = self.metrics_task {
            if let Err(e) = task.await {
                error!(error = %e, "Metrics server task panicked");
            }
        }

        self.flintlock.close();

        info!("Application shutdown completed");
        Ok(())
    }
}
