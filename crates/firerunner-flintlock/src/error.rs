// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the flintlock client.

use thiserror::Error;

/// Flintlock client errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlintlockError {
    /// The backend is unreachable or returned an unexpected RPC error.
    #[error("flintlock backend unavailable: {0}")]
    BackendUnavailable(tonic::Status),

    /// The backend rejected the microVM specification.
    #[error("flintlock rejected the microVM spec: {0}")]
    BadSpec(tonic::Status),

    /// The call exceeded its deadline or was cancelled mid-flight.
    #[error("flintlock call timed out: {0}")]
    Timeout(tonic::Status),

    /// Connection setup failed.
    #[error("flintlock transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Reading TLS certificate material failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A plaintext endpoint was configured for a non-loopback address.
    #[error("plaintext flintlock endpoint {0} is only permitted for loopback")]
    InsecureEndpoint(String),

    /// A microVM did not reach the requested state within the deadline.
    #[error("timed out waiting for microVM {namespace}/{id} to reach state {state}")]
    WaitTimeout {
        /// Namespace of the microVM.
        namespace: String,
        /// Identifier of the microVM.
        id: String,
        /// The state that was waited for.
        state: String,
    },
}

/// Result type using [`FlintlockError`].
pub type Result<T> = std::result::Result<T, FlintlockError>;
