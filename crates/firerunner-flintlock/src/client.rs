// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC client for the flintlock microVM provisioning service.
//!
//! The client holds one long-lived multiplexed channel with HTTP/2 keepalive
//! and applies the configured call timeout to every request. Connection
//! establishment is lazy, so constructing the client does not require the
//! backend to be up; [`FlintlockClient::health`] probes reachability.

use std::time::Duration;

use tonic::Code;
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, warn};

use crate::error::{FlintlockError, Result};
use crate::proto::v1alpha1;
use crate::proto::v1alpha1::micro_vm_service_client::MicroVmServiceClient;
use crate::types::{MicroVm, MicroVmSpec};

/// HTTP/2 keepalive ping interval.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
/// Deadline for a keepalive ping acknowledgement.
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(3);
/// Poll interval used by [`FlintlockClient::wait_for_microvm`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Namespace listed by [`FlintlockClient::health`]. It is expected to be
/// empty; the call only proves the backend answers.
const HEALTH_NAMESPACE: &str = "flintlock-health";

/// TLS material for the flintlock connection.
#[derive(Debug, Clone, Default)]
pub struct FlintlockTlsConfig {
    /// Path to the CA certificate bundle (PEM). Empty uses system roots.
    pub ca_cert: String,
    /// Path to the client certificate (PEM) for mutual TLS.
    pub client_cert: String,
    /// Path to the client private key (PEM) for mutual TLS.
    pub client_key: String,
}

/// Connection settings for [`FlintlockClient`].
#[derive(Debug, Clone)]
pub struct FlintlockClientConfig {
    /// `host:port` of the flintlock gRPC endpoint.
    pub endpoint: String,
    /// Per-call deadline applied to every request.
    pub timeout: Duration,
    /// How many times `create_microvm` is attempted.
    pub retry_attempts: u32,
    /// Base delay between create attempts; scaled linearly per attempt.
    pub retry_delay: Duration,
    /// TLS configuration. `None` is only permitted for loopback endpoints.
    pub tls: Option<FlintlockTlsConfig>,
}

impl Default for FlintlockClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9090".to_string(),
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            tls: None,
        }
    }
}

/// Typed client for the flintlock microVM service.
#[derive(Debug, Clone)]
pub struct FlintlockClient {
    inner: MicroVmServiceClient<tonic::transport::Channel>,
    config: FlintlockClientConfig,
}

impl FlintlockClient {
    /// Create a client for the configured endpoint.
    ///
    /// Fails when TLS material cannot be loaded or when a plaintext endpoint
    /// points somewhere other than loopback.
    pub fn new(config: FlintlockClientConfig) -> Result<Self> {
        if config.tls.is_none() && !endpoint_is_loopback(&config.endpoint) {
            return Err(FlintlockError::InsecureEndpoint(config.endpoint));
        }

        let scheme = if config.tls.is_some() { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{}", config.endpoint))?
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        if let Some(tls) = &config.tls {
            let mut tls_config = ClientTlsConfig::new();
            if !tls.ca_cert.is_empty() {
                let pem = std::fs::read(&tls.ca_cert)?;
                tls_config = tls_config.ca_certificate(Certificate::from_pem(pem));
            }
            if !tls.client_cert.is_empty() && !tls.client_key.is_empty() {
                let cert = std::fs::read(&tls.client_cert)?;
                let key = std::fs::read(&tls.client_key)?;
                tls_config = tls_config.identity(Identity::from_pem(cert, key));
            }
            endpoint = endpoint.tls_config(tls_config)?;
        }

        let channel = endpoint.connect_lazy();
        Ok(Self {
            inner: MicroVmServiceClient::new(channel),
            config,
        })
    }

    /// Create a microVM and return its handle with the backend-assigned state.
    ///
    /// The call is retried `retry_attempts` times with a linearly growing
    /// delay; the last RPC error is surfaced when all attempts fail.
    pub async fn create_microvm(&self, spec: &MicroVmSpec) -> Result<MicroVm> {
        let request = build_create_request(spec);
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let mut client = self.inner.clone();
            match client.create_micro_vm(tonic::Request::new(request.clone())).await {
                Ok(resp) => {
                    let vm = resp
                        .into_inner()
                        .microvm
                        .map(MicroVm::from_proto)
                        .ok_or_else(|| {
                            FlintlockError::BackendUnavailable(tonic::Status::internal(
                                "create response carried no microvm",
                            ))
                        })?;
                    return Ok(vm);
                }
                Err(status) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(map_status(status));
                    }
                    warn!(
                        microvm_id = %spec.id,
                        attempt = attempt,
                        error = %status,
                        "CreateMicroVM failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
            }
        }
    }

    /// Delete a microVM. A VM the backend no longer knows about is success.
    pub async fn delete_microvm(&self, namespace: &str, id: &str) -> Result<()> {
        let mut client = self.inner.clone();
        let request = v1alpha1::DeleteMicroVmRequest {
            id: id.to_string(),
            namespace: namespace.to_string(),
        };
        match client.delete_micro_vm(tonic::Request::new(request)).await {
            Ok(_) => Ok(()),
            Err(status) if status.code() == Code::NotFound => {
                debug!(namespace = %namespace, id = %id, "microVM already gone");
                Ok(())
            }
            Err(status) => Err(map_status(status)),
        }
    }

    /// Fetch a microVM, returning `None` when the backend does not know it.
    pub async fn get_microvm(&self, namespace: &str, id: &str) -> Result<Option<MicroVm>> {
        let mut client = self.inner.clone();
        let request = v1alpha1::GetMicroVmRequest {
            id: id.to_string(),
            namespace: namespace.to_string(),
        };
        match client.get_micro_vm(tonic::Request::new(request)).await {
            Ok(resp) => Ok(resp.into_inner().microvm.map(MicroVm::from_proto)),
            Err(status) if status.code() == Code::NotFound => Ok(None),
            Err(status) => Err(map_status(status)),
        }
    }

    /// List all microVMs in a namespace.
    pub async fn list_microvms(&self, namespace: &str) -> Result<Vec<MicroVm>> {
        let mut client = self.inner.clone();
        let request = v1alpha1::ListMicroVMsRequest {
            namespace: namespace.to_string(),
        };
        let resp = client
            .list_micro_v_ms(tonic::Request::new(request))
            .await
            .map_err(map_status)?;
        Ok(resp
            .into_inner()
            .microvm
            .into_iter()
            .map(MicroVm::from_proto)
            .collect())
    }

    /// Poll until the microVM reaches `target_state` or the timeout elapses.
    pub async fn wait_for_microvm(
        &self,
        namespace: &str,
        id: &str,
        target_state: &str,
        timeout: Duration,
    ) -> Result<()> {
        let wait = async {
            loop {
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
                match self.get_microvm(namespace, id).await {
                    Ok(Some(vm)) if vm.state == target_state => return,
                    Ok(_) => {}
                    // The VM may not be visible yet; keep polling.
                    Err(e) => debug!(namespace = %namespace, id = %id, error = %e, "poll failed"),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| FlintlockError::WaitTimeout {
                namespace: namespace.to_string(),
                id: id.to_string(),
                state: target_state.to_string(),
            })
    }

    /// Probe the backend with a cheap list call against a sentinel namespace.
    pub async fn health(&self) -> Result<()> {
        self.list_microvms(HEALTH_NAMESPACE).await.map(|_| ())
    }

    /// Release the underlying connection.
    pub fn close(self) {}
}

fn build_create_request(spec: &MicroVmSpec) -> v1alpha1::CreateMicroVmRequest {
    v1alpha1::CreateMicroVmRequest {
        microvm: Some(v1alpha1::MicroVmSpec {
            id: spec.id.clone(),
            namespace: spec.namespace.clone(),
            vcpu: spec.vcpu,
            memory_in_mb: spec.memory_mb,
            kernel: Some(v1alpha1::Kernel {
                image: spec.kernel_image.clone(),
                filename: "vmlinux".to_string(),
                add_vmlinux_header: false,
            }),
            root_volume: Some(v1alpha1::Volume {
                id: "root".to_string(),
                is_read_only: false,
                source: Some(v1alpha1::VolumeSource {
                    container: Some(v1alpha1::ContainerVolumeSource {
                        image: spec.rootfs_image.clone(),
                    }),
                }),
            }),
            interfaces: vec![v1alpha1::NetworkInterface {
                device_id: spec.network_interface.clone(),
                r#type: v1alpha1::IfaceType::Macvtap as i32,
                guest_mac: String::new(),
            }],
            metadata: spec.metadata.clone(),
            labels: spec.labels.clone(),
        }),
    }
}

fn map_status(status: tonic::Status) -> FlintlockError {
    match status.code() {
        Code::InvalidArgument | Code::FailedPrecondition | Code::AlreadyExists => {
            FlintlockError::BadSpec(status)
        }
        Code::DeadlineExceeded | Code::Cancelled => FlintlockError::Timeout(status),
        _ => FlintlockError::BackendUnavailable(status),
    }
}

fn endpoint_is_loopback(endpoint: &str) -> bool {
    let host = if let Some(rest) = endpoint.strip_prefix('[') {
        // Bracketed IPv6 literal, e.g. "[::1]:9090".
        rest.split(']').next().unwrap_or_default()
    } else {
        endpoint.rsplit_once(':').map_or(endpoint, |(host, _)| host)
    };
    if host == "localhost" {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_spec() -> MicroVmSpec {
        MicroVmSpec {
            id: "vm-42-deadbeef".to_string(),
            namespace: "firerunner".to_string(),
            vcpu: 4,
            memory_mb: 8192,
            kernel_image: "ghcr.io/firerunner/kernel:latest".to_string(),
            rootfs_image: "ghcr.io/firerunner/gitlab-runner:latest".to_string(),
            network_interface: "eth0".to_string(),
            metadata: HashMap::from([("firerunner.job_id".to_string(), "42".to_string())]),
            labels: HashMap::from([("app".to_string(), "firerunner".to_string())]),
        }
    }

    #[test]
    fn test_build_create_request() {
        let request = build_create_request(&sample_spec());
        let microvm = request.microvm.unwrap();

        assert_eq!(microvm.id, "vm-42-deadbeef");
        assert_eq!(microvm.namespace, "firerunner");
        assert_eq!(microvm.vcpu, 4);
        assert_eq!(microvm.memory_in_mb, 8192);

        let kernel = microvm.kernel.unwrap();
        assert_eq!(kernel.filename, "vmlinux");
        assert!(!kernel.add_vmlinux_header);

        let volume = microvm.root_volume.unwrap();
        assert_eq!(volume.id, "root");
        assert_eq!(
            volume.source.unwrap().container.unwrap().image,
            "ghcr.io/firerunner/gitlab-runner:latest"
        );

        assert_eq!(microvm.interfaces.len(), 1);
        assert_eq!(microvm.interfaces[0].device_id, "eth0");
        assert_eq!(microvm.interfaces[0].r#type, v1alpha1::IfaceType::Macvtap as i32);
        assert_eq!(microvm.metadata.get("firerunner.job_id").unwrap(), "42");
    }

    #[test]
    fn test_map_status() {
        let err = map_status(tonic::Status::invalid_argument("bad vcpu"));
        assert!(matches!(err, FlintlockError::BadSpec(_)));

        let err = map_status(tonic::Status::deadline_exceeded("too slow"));
        assert!(matches!(err, FlintlockError::Timeout(_)));

        let err = map_status(tonic::Status::unavailable("connection refused"));
        assert!(matches!(err, FlintlockError::BackendUnavailable(_)));
    }

    #[test]
    fn test_endpoint_is_loopback() {
        assert!(endpoint_is_loopback("localhost:9090"));
        assert!(endpoint_is_loopback("127.0.0.1:9090"));
        assert!(endpoint_is_loopback("[::1]:9090"));
        assert!(!endpoint_is_loopback("flintlock.internal:9090"));
        assert!(!endpoint_is_loopback("10.0.0.5:9090"));
    }

    #[test]
    fn test_plaintext_rejected_for_remote_endpoint() {
        let config = FlintlockClientConfig {
            endpoint: "flintlock.internal:9090".to_string(),
            tls: None,
            ..Default::default()
        };
        let err = FlintlockClient::new(config).unwrap_err();
        assert!(matches!(err, FlintlockError::InsecureEndpoint(_)));
    }

    #[tokio::test]
    async fn test_plaintext_allowed_for_loopback() {
        let config = FlintlockClientConfig::default();
        assert!(FlintlockClient::new(config).is_ok());
    }
}
