// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission model and resolution engine for Trellis.
//!
//! This crate is free of I/O. It defines:
//!
//! - [`types`]: identifier newtypes and [`ResourceType`]
//! - [`operations`]: capability flags and the [`OperationSet`] bitset
//! - [`levels`]: the permission level registry
//! - [`row`]: permission rows, grants and patches
//! - [`resolver`]: the pure [`resolve`] algorithm
//! - [`tier`]: subscription tiers and the free-space defaults
//! - [`workflow`]: the evaluation step gate for proposals
//!
//! Storage and orchestration live in `trellis-server-db` and
//! `trellis-server-permissions`.

pub mod actor;
pub mod assignee;
pub mod error;
pub mod levels;
pub mod operations;
pub mod resolver;
pub mod row;
pub mod tier;
pub mod types;
pub mod workflow;

pub use actor::{Actor, ActorKey};
pub use assignee::Assignee;
pub use error::{PermissionError, Result};
pub use levels::{levels_allowing_operation, operations_for_level, PermissionLevel};
pub use operations::{Operation, OperationSet};
pub use resolver::{
	nearest_root_rows, resolve, row_matches, space_wide_operations, MembershipFacts,
	ResolutionInput,
};
pub use row::{Grant, NewPermissionRow, PermissionPatch, PermissionRow, RootDeletionPolicy};
pub use tier::{free_member_operations, SubscriptionTier};
pub use types::{EvaluationId, PermissionId, ResourceId, ResourceType, RoleId, SpaceId, UserId};
pub use workflow::{
	select_step_rows, step_phase, EvaluationStep, EvaluationType, ProgressionSnapshot,
	StepPermissions, StepPhase, StepResult, StepRows, StepState,
};
