// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed client for the flintlock microVM provisioning service.
//!
//! Flintlock exposes a gRPC API for creating and destroying Firecracker
//! microVMs. This crate mirrors the vendor wire types 1:1 (see
//! `proto/microvm.proto`) and wraps them in a small domain surface:
//!
//! - [`FlintlockClient`]: connect, create, delete, get, list, wait, health
//! - [`MicroVm`] / [`MicroVmSpec`]: backend-independent VM types
//! - [`map_state`]: backend state enum → orchestrator state strings
//!
//! The transport is a single multiplexed HTTP/2 channel with keepalive.
//! TLS is optional; plaintext is only accepted for loopback endpoints.

/// gRPC client for the microVM service.
pub mod client;

/// Error types for the flintlock client.
pub mod error;

/// Generated wire types, committed from `proto/microvm.proto`.
pub mod proto;

/// Domain types for microVMs.
pub mod types;

pub use client::{FlintlockClient, FlintlockClientConfig, FlintlockTlsConfig};
pub use error::{FlintlockError, Result};
pub use types::{map_state, MicroVm, MicroVmSpec};
