// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generated wire types for the flintlock microVM API.
//!
//! The code in `microvm.services.api.v1alpha1.rs` is generated from
//! `proto/microvm.proto` and committed. Rebuild it with the `regen-proto`
//! feature enabled when the vendor definitions change.

#[allow(clippy::all)]
#[path = "microvm.services.api.v1alpha1.rs"]
pub mod v1alpha1;
