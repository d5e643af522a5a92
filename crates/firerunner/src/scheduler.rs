// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The job lifecycle engine.
//!
//! The scheduler owns the job registry and a fixed pool of workers. Each
//! admitted job moves through `queued → running → {finished | failed}`; a
//! worker drives the whole lifecycle for one job at a time: provision a
//! microVM, register an ephemeral runner against it, watch the build until
//! it is terminal, then tear both down again. The fixed pool bounds
//! concurrent VM creation and with it the load on the backend.
//!
//! Ownership rules:
//! - The registry is the single authority for jobs; the queue carries IDs.
//! - A terminal job holds no resources. Cleanup always runs runner-first,
//!   then VM, so GitLab stops trusting a runner before its sandbox vanishes.
//! - Cleanup uses fresh deadlines, never the job's own (possibly already
//!   cancelled) scope.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use firerunner_flintlock::MicroVm;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::gitlab::types::{JobEvent, PipelineEvent, VmRequirements};
use crate::gitlab::{CiPlatform, JobMonitor};
use crate::metrics;
use crate::vm_manager::{VmManager, VmRequest};
use crate::webhook::EventProcessor;

/// How long `schedule_job` waits for queue space before rejecting.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for registering a runner.
const RUNNER_REGISTER_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for unregistering a runner during cleanup.
const RUNNER_UNREGISTER_TIMEOUT: Duration = Duration::from_secs(30);
/// Interval between job status polls.
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// How long terminal jobs stay in the registry before the reaper drops them.
const JOB_RETENTION: Duration = Duration::from_secs(3600);

/// The VM-provisioning capability the scheduler depends on.
///
/// Production uses [`VmManager`]; tests supply in-memory fakes.
#[async_trait]
pub trait VmProvisioner: Send + Sync {
    /// Create a microVM for a job.
    async fn create_vm(&self, req: &VmRequest) -> Result<MicroVm>;

    /// Destroy a microVM by ID.
    async fn destroy_vm(&self, vm_id: &str) -> Result<()>;
}

#[async_trait]
impl VmProvisioner for VmManager {
    async fn create_vm(&self, req: &VmRequest) -> Result<MicroVm> {
        VmManager::create_vm(self, req).await
    }

    async fn destroy_vm(&self, vm_id: &str) -> Result<()> {
        VmManager::destroy_vm(self, vm_id).await
    }
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Admitted, waiting for a worker.
    Queued,
    /// A worker is driving the lifecycle.
    Running,
    /// The build completed with `success`.
    Finished,
    /// Any other outcome: build failure, timeout, or control-plane error.
    Failed,
}

impl JobStatus {
    /// Whether no further transitions happen from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Stable string form, used for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One admitted CI build and everything the orchestrator knows about it.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// The build's ID; keys the registry.
    pub id: i64,
    /// Project the build belongs to.
    pub project_id: i64,
    /// Pipeline the build belongs to.
    pub pipeline_id: i64,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Tags from the job event.
    pub tags: Vec<String>,
    /// Requested vCPU count.
    pub vcpu: i64,
    /// Requested memory in MB.
    pub memory_mb: i64,
    /// When the job was admitted.
    pub created_at: DateTime<Utc>,
    /// When a worker picked the job up.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// The VM provisioned for this job, until cleanup.
    pub vm: Option<MicroVm>,
    /// The registered runner's ID, 0 until registered and after cleanup.
    pub runner_id: i64,
    /// Terminal error, if any.
    pub error: Option<String>,
    #[serde(skip)]
    cancel: CancellationToken,
}

/// Registry counts reported by [`Scheduler::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// Jobs currently in the registry.
    pub total_jobs: usize,
    /// Capacity of the pending-job queue.
    pub queue_capacity: usize,
    /// Size of the worker pool.
    pub workers: usize,
    /// Jobs grouped by lifecycle state.
    pub by_status: HashMap<String, usize>,
}

/// Bounded concurrent scheduler for CI jobs.
pub struct Scheduler {
    config: SchedulerConfig,
    defaults: VmRequirements,
    vm_provisioner: Arc<dyn VmProvisioner>,
    ci: Arc<dyn CiPlatform>,

    jobs: RwLock<HashMap<i64, Job>>,
    queue_tx: mpsc::Sender<i64>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<i64>>>,

    shutdown: CancellationToken,
    accepting: AtomicBool,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler. Call [`start`](Self::start) to spawn the workers.
    pub fn new(
        config: SchedulerConfig,
        defaults: VmRequirements,
        vm_provisioner: Arc<dyn VmProvisioner>,
        ci: Arc<dyn CiPlatform>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            config,
            defaults,
            vm_provisioner,
            ci,
            jobs: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            shutdown: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool and the finished-job reaper.
    pub fn start(self: &Arc<Self>) {
        info!(workers = self.config.worker_count, "Starting scheduler");

        let mut handles = self.handles.lock().unwrap();
        for worker_id in 0..self.config.worker_count {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                scheduler.worker_loop(worker_id + 1).await;
            }));
        }

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.reaper_loop().await;
        }));

        info!("Scheduler started");
    }

    /// Admit a job event into the queue.
    ///
    /// Waits up to five seconds for queue space so transient bursts are
    /// absorbed, then rejects with [`Error::QueueFull`]. An admitted job is
    /// never silently dropped; the rest of its lifecycle runs asynchronously.
    pub async fn schedule_job(&self, event: &JobEvent) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        info!(
            job_id = event.build_id,
            project_id = event.project_id,
            stage = %event.build_stage,
            name = %event.build_name,
            "Scheduling new job"
        );

        let requirements = VmRequirements::from_tags(&event.tags, self.defaults);
        let cancel = self.job_scope(Duration::from_secs(self.config.job_timeout));

        let job = Job {
            id: event.build_id,
            project_id: event.project_id,
            pipeline_id: event.pipeline_id,
            status: JobStatus::Queued,
            tags: event.tags.clone(),
            vcpu: requirements.vcpu,
            memory_mb: requirements.memory_mb,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            vm: None,
            runner_id: 0,
            error: None,
            cancel: cancel.clone(),
        };

        {
            let mut jobs = self.jobs.write().unwrap();
            jobs.insert(job.id, job);
            metrics::JOBS_TRACKED.set(jobs.len() as i64);
        }

        match self.queue_tx.send_timeout(event.build_id, ENQUEUE_TIMEOUT).await {
            Ok(()) => {
                metrics::JOBS_SCHEDULED.inc();
                info!(job_id = event.build_id, "Job queued");
                Ok(())
            }
            Err(_) => {
                cancel.cancel();
                let mut jobs = self.jobs.write().unwrap();
                jobs.remove(&event.build_id);
                metrics::JOBS_TRACKED.set(jobs.len() as i64);
                Err(Error::QueueFull(event.build_id))
            }
        }
    }

    /// Snapshot of a single job.
    pub fn get_job(&self, job_id: i64) -> Option<Job> {
        self.jobs.read().unwrap().get(&job_id).cloned()
    }

    /// Snapshot of all tracked jobs.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.jobs.read().unwrap().values().cloned().collect()
    }

    /// Registry counts.
    pub fn stats(&self) -> SchedulerStats {
        let jobs = self.jobs.read().unwrap();
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for job in jobs.values() {
            *by_status.entry(job.status.as_str().to_string()).or_default() += 1;
        }
        SchedulerStats {
            total_jobs: jobs.len(),
            queue_capacity: self.config.queue_size,
            workers: self.config.worker_count,
            by_status,
        }
    }

    /// Drain the scheduler.
    ///
    /// Stops admissions, broadcasts shutdown (which also cancels every job
    /// scope, interrupting in-flight monitoring), closes the queue, and
    /// waits for workers and the reaper up to `deadline`. Workers finish the
    /// cleanup of their current job before exiting.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        info!("Shutting down scheduler");

        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.queue_rx.lock().await.close();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        let drained = tokio::time::timeout(deadline, futures::future::join_all(handles)).await;

        // Queued jobs that never reached a worker still hold scopes.
        for job in self.jobs.read().unwrap().values() {
            job.cancel.cancel();
        }

        match drained {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Scheduler task panicked");
                    }
                }
                info!("Scheduler shutdown completed");
                Ok(())
            }
            Err(_) => {
                warn!("Scheduler shutdown timeout");
                Err(Error::ShutdownTimeout("scheduler"))
            }
        }
    }

    /// Create a job scope: cancelled explicitly, by the deadline watchdog,
    /// or by the shutdown broadcast (scopes are children of the shutdown
    /// token). Cleanup never runs under this scope.
    fn job_scope(&self, timeout: Duration) -> CancellationToken {
        let token = self.shutdown.child_token();
        let watchdog = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watchdog.cancelled() => {}
                _ = tokio::time::sleep(timeout) => watchdog.cancel(),
            }
        });
        token
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        info!(worker_id = worker_id, "Worker started");

        loop {
            let job_id = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!(worker_id = worker_id, "Worker shutdown signal received");
                    break;
                }

                next = self.next_job() => match next {
                    Some(job_id) => job_id,
                    None => {
                        info!(worker_id = worker_id, "Job queue closed, worker stopping");
                        break;
                    }
                },
            };

            self.process_job(worker_id, job_id).await;
        }
    }

    async fn next_job(&self) -> Option<i64> {
        let mut queue = self.queue_rx.lock().await;
        queue.recv().await
    }

    async fn process_job(&self, worker_id: usize, job_id: i64) {
        let Some(job) = self.get_job(job_id) else {
            warn!(job_id = job_id, "Dequeued job is no longer tracked");
            return;
        };

        info!(
            worker_id = worker_id,
            job_id = job_id,
            project_id = job.project_id,
            vcpu = job.vcpu,
            memory_mb = job.memory_mb,
            "Processing job"
        );

        self.mark_running(job_id);
        let cancel = job.cancel.clone();

        // Provision the VM. Nothing to release on failure.
        let request = VmRequest {
            job_id,
            project_id: job.project_id,
            pipeline_id: job.pipeline_id,
            vcpu: job.vcpu,
            memory_mb: job.memory_mb,
        };
        let vm = match self
            .step(
                &cancel,
                Duration::from_secs(self.config.vm_start_timeout),
                job_id,
                self.vm_provisioner.create_vm(&request),
            )
            .await
        {
            Ok(vm) => vm,
            Err(e) => {
                error!(job_id = job_id, error = %e, "Failed to create VM for job");
                self.finish_job(job_id, Some(e.to_string()));
                return;
            }
        };
        self.record_vm(job_id, vm.clone());

        // Register the ephemeral runner against the VM's address.
        let registration = match self
            .step(
                &cancel,
                RUNNER_REGISTER_TIMEOUT,
                job_id,
                self.ci.register_runner(job.project_id, &vm.ip_address, &job.tags),
            )
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                error!(job_id = job_id, error = %e, "Failed to register runner");
                self.cleanup_job(job_id, 0, Some(vm.id.clone())).await;
                self.finish_job(job_id, Some(e.to_string()));
                return;
            }
        };
        self.record_runner(job_id, registration.id);

        // Watch the build until it is terminal or the scope fires.
        let monitor = JobMonitor::new(self.ci.clone());
        let outcome = monitor
            .wait_for_completion(&cancel, job.project_id, job_id, JOB_POLL_INTERVAL)
            .await;
        let job_error = match outcome {
            Ok(finished) if finished.status == "success" => None,
            Ok(finished) => Some(format!("job finished with status: {}", finished.status)),
            Err(e) => Some(e.to_string()),
        };

        self.cleanup_job(job_id, registration.id, Some(vm.id)).await;
        self.finish_job(job_id, job_error);
    }

    /// Run one lifecycle step under the job scope and an own deadline.
    async fn step<T>(
        &self,
        cancel: &CancellationToken,
        limit: Duration,
        job_id: i64,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(Error::JobTimeout(job_id)),

            outcome = tokio::time::timeout(limit, fut) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::JobTimeout(job_id)),
            },
        }
    }

    /// Release a job's resources: runner first, then VM.
    ///
    /// Runs under fresh deadlines; a cancelled job must still be cleaned up.
    /// Errors are logged, never surfaced; the reapers are the safety net.
    async fn cleanup_job(&self, job_id: i64, runner_id: i64, vm_id: Option<String>) {
        if runner_id > 0 {
            info!(job_id = job_id, runner_id = runner_id, "Unregistering GitLab runner");
            match tokio::time::timeout(
                RUNNER_UNREGISTER_TIMEOUT,
                self.ci.unregister_runner(runner_id),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(job_id = job_id, runner_id = runner_id, error = %e, "Failed to unregister runner");
                }
                Err(_) => {
                    error!(job_id = job_id, runner_id = runner_id, "Timed out unregistering runner");
                }
            }
        }

        if let Some(vm_id) = vm_id {
            info!(job_id = job_id, vm_id = %vm_id, "Destroying ephemeral VM");
            match tokio::time::timeout(
                Duration::from_secs(self.config.vm_shutdown_timeout),
                self.vm_provisioner.destroy_vm(&vm_id),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(job_id = job_id, vm_id = %vm_id, error = %e, "Failed to destroy VM");
                }
                Err(_) => {
                    error!(job_id = job_id, vm_id = %vm_id, "Timed out destroying VM");
                }
            }
        }

        self.clear_resources(job_id);
    }

    async fn reaper_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.cleanup_interval);
        info!(interval_secs = interval.as_secs(), "Job reaper started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Job reaper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(interval) => {
                    self.reap_finished();
                }
            }
        }

        info!("Job reaper stopped");
    }

    /// Drop terminal jobs older than the retention window.
    fn reap_finished(&self) {
        debug!("Running job cleanup");

        let cutoff = Utc::now()
            - chrono::Duration::from_std(JOB_RETENTION).unwrap_or(chrono::Duration::hours(1));
        let mut jobs = self.jobs.write().unwrap();
        jobs.retain(|job_id, job| {
            let expired = job.status.is_terminal()
                && job.finished_at.map(|t| t < cutoff).unwrap_or(false);
            if expired {
                debug!(job_id = job_id, "Cleaning up old job");
                job.cancel.cancel();
            }
            !expired
        });
        metrics::JOBS_TRACKED.set(jobs.len() as i64);
    }

    fn mark_running(&self, job_id: i64) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Running;
                if job.started_at.is_none() {
                    job.started_at = Some(Utc::now());
                }
            }
        }
    }

    fn record_vm(&self, job_id: i64, vm: MicroVm) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.vm = Some(vm);
        }
    }

    fn record_runner(&self, job_id: i64, runner_id: i64) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.runner_id = runner_id;
        }
    }

    fn clear_resources(&self, job_id: i64) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.vm = None;
            job.runner_id = 0;
        }
    }

    /// Stamp the terminal state. Terminal states are immutable; a second
    /// call is a no-op.
    fn finish_job(&self, job_id: i64, error: Option<String>) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status.is_terminal() {
                return;
            }
            job.status = if error.is_some() {
                JobStatus::Failed
            } else {
                JobStatus::Finished
            };
            job.error = error;
            job.finished_at = Some(Utc::now());
            metrics::JOBS_COMPLETED
                .with_label_values(&[job.status.as_str()])
                .inc();
            info!(job_id = job_id, status = %job.status, "Job processing completed");
        }
    }
}

#[async_trait]
impl EventProcessor for Scheduler {
    async fn process_job_event(&self, event: &JobEvent) -> Result<()> {
        self.schedule_job(event).await
    }

    async fn process_pipeline_event(&self, event: &PipelineEvent) -> Result<()> {
        debug!(
            pipeline_id = event.object_attributes.id,
            project_id = event.project.id,
            status = %event.object_attributes.status,
            "Pipeline event received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(JobStatus::Finished.to_string(), "finished");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Finished).unwrap(),
            "\"finished\""
        );
    }
}
