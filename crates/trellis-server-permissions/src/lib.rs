// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission service for Trellis.
//!
//! [`PermissionService`] is what request handlers talk to. It answers
//! "what may this actor do here" and performs sharing writes, keeping
//! inherited rows on page subtrees consistent with their roots.

pub mod cache;
pub mod collaborators;
pub mod propagation;
pub mod service;
pub mod status;

pub use cache::{DecisionCache, DecisionKey};
pub use collaborators::{
	InMemorySpaceMembership, InMemoryWorkflowProgression, SpaceMembership, WorkflowProgression,
};
pub use propagation::{PropagationLocks, PropagationStatus, PropagationTicket, RetryPolicy};
pub use service::{
	DeleteResourceOutcome, EffectivePermission, PermissionService, PermissionSource,
	RevokeOutcome, SetPermissionOutcome,
};
pub use status::{authorize, deny_status, ErrorStatus};
