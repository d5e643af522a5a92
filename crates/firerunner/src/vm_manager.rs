// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! MicroVM lifecycle management.
//!
//! The manager is the registry authority for live VMs: it generates VM IDs,
//! enriches specs with standard metadata and labels, delegates to the
//! flintlock backend, and tracks every VM it created. A background reaper
//! destroys VMs that outlive their expected lifetime, which catches VMs
//! orphaned by crashes or logic bugs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use firerunner_flintlock::{FlintlockClient, MicroVm, MicroVmSpec};

use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::metrics;

/// Backend namespace all orchestrator VMs live in.
pub const VM_NAMESPACE: &str = "firerunner";

/// VMs older than this are considered orphaned and reaped.
const VM_MAX_AGE: Duration = Duration::from_secs(2 * 3600);

/// Deadline for a single reaper-initiated destroy.
const REAP_DESTROY_TIMEOUT: Duration = Duration::from_secs(30);

/// The microVM backend capability the manager depends on.
///
/// Production uses [`FlintlockClient`]; tests supply in-memory fakes.
#[async_trait]
pub trait MicrovmBackend: Send + Sync {
    /// Create a microVM from a full spec.
    async fn create_microvm(&self, spec: &MicroVmSpec) -> firerunner_flintlock::Result<MicroVm>;

    /// Delete a microVM. Deleting an unknown VM is success.
    async fn delete_microvm(&self, namespace: &str, id: &str) -> firerunner_flintlock::Result<()>;

    /// List microVMs in a namespace.
    async fn list_microvms(&self, namespace: &str) -> firerunner_flintlock::Result<Vec<MicroVm>>;

    /// Cheap reachability probe.
    async fn health(&self) -> firerunner_flintlock::Result<()>;
}

#[async_trait]
impl MicrovmBackend for FlintlockClient {
    async fn create_microvm(&self, spec: &MicroVmSpec) -> firerunner_flintlock::Result<MicroVm> {
        FlintlockClient::create_microvm(self, spec).await
    }

    async fn delete_microvm(&self, namespace: &str, id: &str) -> firerunner_flintlock::Result<()> {
        FlintlockClient::delete_microvm(self, namespace, id).await
    }

    async fn list_microvms(&self, namespace: &str) -> firerunner_flintlock::Result<Vec<MicroVm>> {
        FlintlockClient::list_microvms(self, namespace).await
    }

    async fn health(&self) -> firerunner_flintlock::Result<()> {
        FlintlockClient::health(self).await
    }
}

/// Request to create a VM for a job.
#[derive(Debug, Clone)]
pub struct VmRequest {
    /// The CI job the VM is created for.
    pub job_id: i64,
    /// Project the job belongs to.
    pub project_id: i64,
    /// Pipeline the job belongs to.
    pub pipeline_id: i64,
    /// Requested vCPU count.
    pub vcpu: i64,
    /// Requested memory in MB.
    pub memory_mb: i64,
}

/// Per-state VM counts.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VmStats {
    /// Number of tracked VMs.
    pub total_vms: usize,
    /// Tracked VMs grouped by state.
    pub by_state: HashMap<String, usize>,
}

/// Registry and lifecycle manager for microVMs.
pub struct VmManager {
    backend: Arc<dyn MicrovmBackend>,
    config: VmConfig,
    vms: RwLock<HashMap<String, MicroVm>>,
    shutdown: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl VmManager {
    /// Create a manager over the given backend.
    pub fn new(backend: Arc<dyn MicrovmBackend>, config: VmConfig) -> Self {
        Self {
            backend,
            config,
            vms: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            reaper: Mutex::new(None),
        }
    }

    /// Create a microVM for a job and track it.
    ///
    /// The caller owns the deadline via its surrounding timeout; the backend
    /// client additionally bounds each RPC with its configured call timeout.
    pub async fn create_vm(&self, req: &VmRequest) -> Result<MicroVm> {
        info!(
            job_id = req.job_id,
            project_id = req.project_id,
            vcpu = req.vcpu,
            memory_mb = req.memory_mb,
            "Creating MicroVM for job"
        );

        let spec = MicroVmSpec {
            id: generate_vm_id(req.job_id),
            namespace: VM_NAMESPACE.to_string(),
            vcpu: req.vcpu,
            memory_mb: req.memory_mb,
            kernel_image: self.config.kernel_image.clone(),
            rootfs_image: self.config.rootfs_image.clone(),
            network_interface: self.config.network_interface.clone(),
            metadata: self.prepare_metadata(req),
            labels: self.prepare_labels(req),
        };

        let started = std::time::Instant::now();
        let vm = self.backend.create_microvm(&spec).await?;

        info!(
            vm_id = %vm.id,
            ip_address = %vm.ip_address,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MicroVM created"
        );

        self.vms.write().unwrap().insert(vm.id.clone(), vm.clone());
        metrics::VMS_CREATED.inc();
        metrics::VMS_TRACKED.set(self.vms.read().unwrap().len() as i64);

        Ok(vm)
    }

    /// Destroy a tracked microVM.
    ///
    /// Unknown IDs fail with [`Error::VmNotFound`]; workers never hit this,
    /// the reaper tolerates it.
    pub async fn destroy_vm(&self, vm_id: &str) -> Result<()> {
        let vm = self
            .vms
            .read()
            .unwrap()
            .get(vm_id)
            .cloned()
            .ok_or_else(|| Error::VmNotFound(vm_id.to_string()))?;

        info!(vm_id = %vm_id, "Destroying MicroVM");

        let started = std::time::Instant::now();
        self.backend.delete_microvm(&vm.namespace, &vm.id).await?;

        self.vms.write().unwrap().remove(vm_id);
        metrics::VMS_DESTROYED.inc();
        metrics::VMS_TRACKED.set(self.vms.read().unwrap().len() as i64);

        info!(
            vm_id = %vm_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MicroVM destroyed"
        );
        Ok(())
    }

    /// Look up a tracked VM.
    pub fn get_vm(&self, vm_id: &str) -> Option<MicroVm> {
        self.vms.read().unwrap().get(vm_id).cloned()
    }

    /// Snapshot of all tracked VMs.
    pub fn list_vms(&self) -> Vec<MicroVm> {
        self.vms.read().unwrap().values().cloned().collect()
    }

    /// Per-state counts of tracked VMs.
    pub fn stats(&self) -> VmStats {
        let vms = self.vms.read().unwrap();
        let mut by_state: HashMap<String, usize> = HashMap::new();
        for vm in vms.values() {
            *by_state.entry(vm.state.clone()).or_default() += 1;
        }
        VmStats {
            total_vms: vms.len(),
            by_state,
        }
    }

    /// Start the stale-VM reaper.
    pub fn start_reaper(self: &Arc<Self>, interval: Duration) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "VM reaper started");
            loop {
                tokio::select! {
                    biased;

                    _ = manager.shutdown.cancelled() => {
                        info!("VM reaper received shutdown signal");
                        break;
                    }

                    _ = tokio::time::sleep(interval) => {
                        manager.reap_stale().await;
                    }
                }
            }
            info!("VM reaper stopped");
        });
        *self.reaper.lock().unwrap() = Some(handle);
    }

    /// Destroy every tracked VM older than the maximum age.
    async fn reap_stale(&self) {
        debug!("Running VM cleanup");

        let cutoff = Utc::now()
            - chrono::Duration::from_std(VM_MAX_AGE).unwrap_or(chrono::Duration::hours(2));
        let stale: Vec<String> = self
            .vms
            .read()
            .unwrap()
            .values()
            .filter(|vm| vm.created_at < cutoff)
            .map(|vm| vm.id.clone())
            .collect();

        if stale.is_empty() {
            return;
        }

        warn!(count = stale.len(), "Found stale VMs");

        for vm_id in stale {
            match tokio::time::timeout(REAP_DESTROY_TIMEOUT, self.destroy_vm(&vm_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(Error::VmNotFound(_))) => {}
                Ok(Err(e)) => {
                    error!(vm_id = %vm_id, error = %e, "Failed to reap stale VM");
                }
                Err(_) => {
                    error!(vm_id = %vm_id, "Timed out reaping stale VM");
                }
            }
        }
    }

    /// Stop the reaper and destroy every remaining VM under one deadline.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        info!("Shutting down VM manager");

        self.shutdown.cancel();
        let reaper = self.reaper.lock().unwrap().take();
        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                error!(error = %e, "VM reaper task panicked");
            }
        }

        let remaining: Vec<String> = self.vms.read().unwrap().keys().cloned().collect();
        info!(count = remaining.len(), "Destroying remaining VMs");

        let destroy_all = async {
            for vm_id in remaining {
                if let Err(e) = self.destroy_vm(&vm_id).await {
                    error!(vm_id = %vm_id, error = %e, "Failed to destroy VM during shutdown");
                }
            }
        };

        tokio::time::timeout(deadline, destroy_all)
            .await
            .map_err(|_| Error::ShutdownTimeout("VM manager"))
    }

    fn prepare_metadata(&self, req: &VmRequest) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("pipeline_id".to_string(), req.pipeline_id.to_string());
        metadata.insert("firerunner.job_id".to_string(), req.job_id.to_string());
        metadata.insert(
            "firerunner.project_id".to_string(),
            req.project_id.to_string(),
        );
        metadata.insert(
            "firerunner.created_at".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        metadata
    }

    fn prepare_labels(&self, req: &VmRequest) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "firerunner".to_string());
        labels.insert("job_id".to_string(), req.job_id.to_string());
        labels.insert("project_id".to_string(), req.project_id.to_string());
        for (k, v) in &self.config.extra_labels {
            labels.insert(k.clone(), v.clone());
        }
        labels
    }
}

fn generate_vm_id(job_id: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("vm-{job_id}-{}", &suffix[..8])
}
