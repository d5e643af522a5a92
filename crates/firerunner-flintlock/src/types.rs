// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types for microVMs, decoupled from the generated wire types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proto::v1alpha1;

/// MicroVM state: created on the backend, not yet running.
pub const STATE_PENDING: &str = "pending";
/// MicroVM state: booted and executing.
pub const STATE_RUNNING: &str = "running";
/// MicroVM state: the backend failed to bring the VM up.
pub const STATE_FAILED: &str = "failed";
/// MicroVM state: teardown in progress.
pub const STATE_DELETING: &str = "deleting";
/// MicroVM state: anything the backend reports that we do not model.
pub const STATE_UNKNOWN: &str = "unknown";

/// Specification for creating a microVM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroVmSpec {
    /// Unique identifier, chosen by the caller.
    pub id: String,
    /// Backend namespace the VM lives in.
    pub namespace: String,
    /// Number of virtual CPUs.
    pub vcpu: i64,
    /// Guest memory in MB.
    pub memory_mb: i64,
    /// OCI reference of the kernel image.
    pub kernel_image: String,
    /// OCI reference of the root filesystem image.
    pub rootfs_image: String,
    /// Parent network interface the guest NIC attaches to.
    pub network_interface: String,
    /// Free-form metadata stored on the VM.
    pub metadata: HashMap<String, String>,
    /// Labels stored on the VM.
    pub labels: HashMap<String, String>,
}

/// A live microVM known to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroVm {
    /// Unique identifier.
    pub id: String,
    /// Backend namespace the VM lives in.
    pub namespace: String,
    /// Backend state translated via [`map_state`].
    pub state: String,
    /// Guest IP address, empty when the backend has not reported one yet.
    pub ip_address: String,
    /// When this client first observed the VM.
    pub created_at: DateTime<Utc>,
    /// Free-form metadata stored on the VM.
    pub metadata: HashMap<String, String>,
    /// Labels stored on the VM.
    pub labels: HashMap<String, String>,
}

impl MicroVm {
    pub(crate) fn from_proto(vm: v1alpha1::MicroVm) -> Self {
        let spec = vm.spec.unwrap_or_default();
        let status = vm.status.unwrap_or_default();
        let ip_address = extract_ip_address(&status.network_interfaces);
        Self {
            id: spec.id,
            namespace: spec.namespace,
            state: map_state(status.state()).to_string(),
            ip_address,
            created_at: Utc::now(),
            metadata: spec.metadata,
            labels: spec.labels,
        }
    }
}

/// Translate a backend state into the orchestrator-internal state string.
pub fn map_state(state: v1alpha1::micro_vm_status::MicroVmState) -> &'static str {
    use v1alpha1::micro_vm_status::MicroVmState;
    match state {
        MicroVmState::Pending => STATE_PENDING,
        MicroVmState::Created => STATE_RUNNING,
        MicroVmState::Failed => STATE_FAILED,
        MicroVmState::Deleting => STATE_DELETING,
        _ => STATE_UNKNOWN,
    }
}

fn extract_ip_address(interfaces: &[v1alpha1::NetworkInterfaceStatus]) -> String {
    let Some(iface) = interfaces.first() else {
        return String::new();
    };
    if !iface.ip_address.is_empty() {
        iface.ip_address.clone()
    } else {
        // Older backends only report the host-side device name.
        iface.host_device_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v1alpha1::micro_vm_status::MicroVmState;

    #[test]
    fn test_map_state() {
        assert_eq!(map_state(MicroVmState::Pending), "pending");
        assert_eq!(map_state(MicroVmState::Created), "running");
        assert_eq!(map_state(MicroVmState::Failed), "failed");
        assert_eq!(map_state(MicroVmState::Deleting), "deleting");
        assert_eq!(map_state(MicroVmState::Deleted), "unknown");
    }

    #[test]
    fn test_from_proto_prefers_ip_address() {
        let vm = v1alpha1::MicroVm {
            version: 1,
            spec: Some(v1alpha1::MicroVmSpec {
                id: "vm-42-abcd1234".to_string(),
                namespace: "firerunner".to_string(),
                ..Default::default()
            }),
            status: Some(v1alpha1::MicroVmStatus {
                state: MicroVmState::Created as i32,
                network_interfaces: vec![v1alpha1::NetworkInterfaceStatus {
                    host_device_name: "fltap0".to_string(),
                    ip_address: "10.0.0.42".to_string(),
                }],
            }),
        };

        let vm = MicroVm::from_proto(vm);
        assert_eq!(vm.id, "vm-42-abcd1234");
        assert_eq!(vm.state, "running");
        assert_eq!(vm.ip_address, "10.0.0.42");
    }

    #[test]
    fn test_from_proto_falls_back_to_host_device_name() {
        let vm = v1alpha1::MicroVm {
            version: 1,
            spec: Some(v1alpha1::MicroVmSpec::default()),
            status: Some(v1alpha1::MicroVmStatus {
                state: MicroVmState::Pending as i32,
                network_interfaces: vec![v1alpha1::NetworkInterfaceStatus {
                    host_device_name: "fltap0".to_string(),
                    ip_address: String::new(),
                }],
            }),
        };

        let vm = MicroVm::from_proto(vm);
        assert_eq!(vm.state, "pending");
        assert_eq!(vm.ip_address, "fltap0");
    }

    #[test]
    fn test_from_proto_without_status() {
        let vm = MicroVm::from_proto(v1alpha1::MicroVm::default());
        assert_eq!(vm.state, "pending");
        assert!(vm.ip_address.is_empty());
    }
}
