// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end scheduler tests against in-memory collaborators.
//!
//! The scheduler only sees the `VmProvisioner` and `CiPlatform` seams, so
//! these tests drive whole job lifecycles without a flintlock host or a
//! GitLab instance.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use firerunner::config::SchedulerConfig;
use firerunner::error::{Error, Result};
use firerunner::gitlab::types::{JobEvent, JobInfo, RunnerRegistration, VmRequirements};
use firerunner::gitlab::CiPlatform;
use firerunner::scheduler::{JobStatus, Scheduler, VmProvisioner};
use firerunner::vm_manager::VmRequest;
use firerunner_flintlock::{FlintlockError, MicroVm};

const DEFAULTS: VmRequirements = VmRequirements {
    vcpu: 2,
    memory_mb: 4096,
};

/// VM provisioner fake recording every create and destroy.
struct FakeVms {
    fail_create: bool,
    created: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
}

impl FakeVms {
    fn new() -> Self {
        Self {
            fail_create: false,
            created: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl VmProvisioner for FakeVms {
    async fn create_vm(&self, req: &VmRequest) -> Result<MicroVm> {
        if self.fail_create {
            return Err(Error::Backend(FlintlockError::BackendUnavailable(
                tonic::Status::unavailable("connection refused"),
            )));
        }
        let vm = MicroVm {
            id: format!("vm-{}-fake0000", req.job_id),
            namespace: "firerunner".to_string(),
            state: "running".to_string(),
            ip_address: "10.0.0.42".to_string(),
            created_at: Utc::now(),
            metadata: Default::default(),
            labels: Default::default(),
        };
        self.created.lock().unwrap().push(vm.id.clone());
        Ok(vm)
    }

    async fn destroy_vm(&self, vm_id: &str) -> Result<()> {
        self.destroyed.lock().unwrap().push(vm_id.to_string());
        Ok(())
    }
}

/// CI platform fake with a settable job status.
struct FakeCi {
    fail_register: bool,
    job_status: Mutex<String>,
    registered: Mutex<Vec<i64>>,
    unregistered: Mutex<Vec<i64>>,
    next_runner_id: AtomicI64,
}

impl FakeCi {
    fn with_status(status: &str) -> Self {
        Self {
            fail_register: false,
            job_status: Mutex::new(status.to_string()),
            registered: Mutex::new(Vec::new()),
            unregistered: Mutex::new(Vec::new()),
            next_runner_id: AtomicI64::new(9000),
        }
    }

    fn failing_register() -> Self {
        Self {
            fail_register: true,
            ..Self::with_status("pending")
        }
    }
}

#[async_trait]
impl CiPlatform for FakeCi {
    async fn register_runner(
        &self,
        _project_id: i64,
        _vm_ip: &str,
        tags: &[String],
    ) -> Result<RunnerRegistration> {
        if self.fail_register {
            return Err(Error::Gitlab(firerunner::gitlab::GitlabError::Api {
                status: 403,
                message: "registration token invalid".to_string(),
            }));
        }
        let id = self.next_runner_id.fetch_add(1, Ordering::SeqCst);
        self.registered.lock().unwrap().push(id);
        Ok(RunnerRegistration {
            id,
            token: "glrt-fake".to_string(),
            description: "FireRunner-VM-10.0.0.42".to_string(),
            tags: tags.to_vec(),
        })
    }

    async fn unregister_runner(&self, runner_id: i64) -> Result<()> {
        self.unregistered.lock().unwrap().push(runner_id);
        Ok(())
    }

    async fn get_job(&self, _project_id: i64, job_id: i64) -> Result<JobInfo> {
        Ok(JobInfo {
            id: job_id,
            status: self.job_status.lock().unwrap().clone(),
            stage: "build".to_string(),
            name: "compile".to_string(),
            duration: None,
        })
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

fn test_config(workers: usize, queue_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        queue_size,
        worker_count: workers,
        job_timeout: 300,
        cleanup_interval: 3600,
        vm_start_timeout: 5,
        vm_shutdown_timeout: 5,
    }
}

fn job_event(build_id: i64, tags: &[&str]) -> JobEvent {
    JobEvent {
        object_kind: "build".to_string(),
        build_id,
        build_name: "compile".to_string(),
        build_stage: "build".to_string(),
        build_status: "pending".to_string(),
        pipeline_id: 7001,
        project_id: 7,
        project_name: "demo".to_string(),
        tags: tags.iter().map(|s| s.to_string()).collect(),
    }
}

/// Poll the registry until the job reaches `status` or the timeout elapses.
async fn wait_for_status(scheduler: &Scheduler, job_id: i64, status: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        if let Some(job) = scheduler.get_job(job_id) {
            if job.status == status {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} did not reach {status}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_lifecycle() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::with_status("success"));
    let scheduler = Arc::new(Scheduler::new(
        test_config(1, 10),
        DEFAULTS,
        vms.clone(),
        ci.clone(),
    ));
    scheduler.start();

    scheduler
        .schedule_job(&job_event(42, &["firecracker-4cpu-8gb"]))
        .await
        .unwrap();

    wait_for_status(&scheduler, 42, JobStatus::Finished).await;
    let job = scheduler.get_job(42).unwrap();

    // Sizing came from the tag.
    assert_eq!(job.vcpu, 4);
    assert_eq!(job.memory_mb, 8192);
    assert!(job.error.is_none());

    // Terminal jobs hold no resources.
    assert!(job.vm.is_none());
    assert_eq!(job.runner_id, 0);

    // Timestamps are ordered.
    let started = job.started_at.unwrap();
    let finished = job.finished_at.unwrap();
    assert!(job.created_at <= started);
    assert!(started <= finished);

    // One VM created and destroyed, one runner registered and unregistered.
    assert_eq!(vms.created.lock().unwrap().len(), 1);
    assert_eq!(vms.destroyed.lock().unwrap().len(), 1);
    assert_eq!(ci.registered.lock().unwrap().len(), 1);
    assert_eq!(ci.unregistered.lock().unwrap().len(), 1);

    let stats = scheduler.stats();
    assert_eq!(stats.total_jobs, 1);
    assert_eq!(stats.by_status.get("finished"), Some(&1));

    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_build_failure_is_classified_failed() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::with_status("canceled"));
    let scheduler = Arc::new(Scheduler::new(
        test_config(1, 10),
        DEFAULTS,
        vms.clone(),
        ci.clone(),
    ));
    scheduler.start();

    scheduler
        .schedule_job(&job_event(42, &["firecracker"]))
        .await
        .unwrap();

    wait_for_status(&scheduler, 42, JobStatus::Failed).await;
    let job = scheduler.get_job(42).unwrap();
    assert!(job.error.as_deref().unwrap().contains("canceled"));

    // Cleanup still ran in full.
    assert_eq!(vms.destroyed.lock().unwrap().len(), 1);
    assert_eq!(ci.unregistered.lock().unwrap().len(), 1);

    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backend_down_fails_job_without_cleanup_targets() {
    let vms = Arc::new(FakeVms::failing());
    let ci = Arc::new(FakeCi::with_status("pending"));
    let scheduler = Arc::new(Scheduler::new(
        test_config(1, 10),
        DEFAULTS,
        vms.clone(),
        ci.clone(),
    ));
    scheduler.start();

    scheduler
        .schedule_job(&job_event(42, &["firecracker"]))
        .await
        .unwrap();

    wait_for_status(&scheduler, 42, JobStatus::Failed).await;
    let job = scheduler.get_job(42).unwrap();
    assert!(job.error.as_deref().unwrap().contains("unavailable"));

    // No runner was ever created, no VM to destroy.
    assert!(ci.registered.lock().unwrap().is_empty());
    assert!(ci.unregistered.lock().unwrap().is_empty());
    assert!(vms.destroyed.lock().unwrap().is_empty());

    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_register_failure_destroys_vm() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::failing_register());
    let scheduler = Arc::new(Scheduler::new(
        test_config(1, 10),
        DEFAULTS,
        vms.clone(),
        ci.clone(),
    ));
    scheduler.start();

    scheduler
        .schedule_job(&job_event(42, &["firecracker"]))
        .await
        .unwrap();

    wait_for_status(&scheduler, 42, JobStatus::Failed).await;
    let job = scheduler.get_job(42).unwrap();
    assert!(job.error.as_deref().unwrap().contains("registration token"));

    // The VM was cleaned up even though no runner existed.
    assert_eq!(vms.destroyed.lock().unwrap().len(), 1);
    assert!(ci.unregistered.lock().unwrap().is_empty());

    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_queue_full_rejects_second_job() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::with_status("pending"));
    // queue_size = 1 and no workers running: the queue never drains.
    let scheduler = Arc::new(Scheduler::new(test_config(0, 1), DEFAULTS, vms, ci));

    scheduler
        .schedule_job(&job_event(1, &["firecracker"]))
        .await
        .unwrap();

    let err = scheduler
        .schedule_job(&job_event(2, &["firecracker"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueueFull(2)));

    // The first job is still queued; the rejected one left the registry.
    assert_eq!(scheduler.get_job(1).unwrap().status, JobStatus::Queued);
    assert!(scheduler.get_job(2).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_admission_with_single_slot() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::with_status("pending"));
    let scheduler = Arc::new(Scheduler::new(test_config(0, 1), DEFAULTS, vms, ci));

    let event1 = job_event(1, &["firecracker"]);
    let event2 = job_event(2, &["firecracker"]);
    let (first, second) = tokio::join!(
        scheduler.schedule_job(&event1),
        scheduler.schedule_job(&event2),
    );

    // Exactly one wins the slot, the other is rejected.
    assert!(first.is_ok() ^ second.is_ok());
    let admitted = scheduler.list_jobs();
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].status, JobStatus::Queued);
}

#[tokio::test(start_paused = true)]
async fn test_no_workers_leaves_jobs_queued_and_shutdown_completes() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::with_status("pending"));
    let scheduler = Arc::new(Scheduler::new(test_config(0, 10), DEFAULTS, vms, ci));
    scheduler.start();

    for id in 1..=3 {
        scheduler
            .schedule_job(&job_event(id, &["firecracker"]))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    for id in 1..=3 {
        assert_eq!(scheduler.get_job(id).unwrap().status, JobStatus::Queued);
    }

    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_expired_deadline_fails_job_immediately() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::with_status("pending"));
    let mut config = test_config(1, 10);
    // The scope expires before the worker can do anything.
    config.job_timeout = 0;
    let scheduler = Arc::new(Scheduler::new(config, DEFAULTS, vms.clone(), ci));
    scheduler.start();

    scheduler
        .schedule_job(&job_event(42, &["firecracker"]))
        .await
        .unwrap();

    wait_for_status(&scheduler, 42, JobStatus::Failed).await;
    let job = scheduler.get_job(42).unwrap();
    assert!(job.error.as_deref().unwrap().contains("cancelled or timed out"));

    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_poll_cleans_up() {
    let vms = Arc::new(FakeVms::new());
    // The job never becomes terminal; the worker sits in the polling loop.
    let ci = Arc::new(FakeCi::with_status("running"));
    let scheduler = Arc::new(Scheduler::new(
        test_config(1, 10),
        DEFAULTS,
        vms.clone(),
        ci.clone(),
    ));
    scheduler.start();

    scheduler
        .schedule_job(&job_event(42, &["firecracker"]))
        .await
        .unwrap();

    // Wait until the runner exists, i.e. the worker reached monitoring.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while ci.registered.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "runner never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    scheduler.shutdown(Duration::from_secs(10)).await.unwrap();

    let job = scheduler.get_job(42).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.vm.is_none());
    assert_eq!(job.runner_id, 0);

    // Cleanup ran on its own deadlines despite the cancelled scope.
    assert_eq!(ci.unregistered.lock().unwrap().len(), 1);
    assert_eq!(vms.destroyed.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_after_shutdown_is_rejected() {
    let vms = Arc::new(FakeVms::new());
    let ci = Arc::new(FakeCi::with_status("pending"));
    let scheduler = Arc::new(Scheduler::new(test_config(1, 10), DEFAULTS, vms, ci));
    scheduler.start();
    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();

    let err = scheduler
        .schedule_job(&job_event(42, &["firecracker"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}
