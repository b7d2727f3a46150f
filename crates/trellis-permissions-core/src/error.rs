// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error taxonomy shared by every layer of the permission engine.
//!
//! "No access" is never an error: the resolver returns an empty
//! [`OperationSet`](crate::OperationSet) for that. These variants are reserved
//! for malformed input and storage or integrity failures, and every one of
//! them must be treated as a denial by callers.

use crate::types::PermissionId;

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("{kind} not found: {id}")]
	NotFound { kind: &'static str, id: String },

	#[error("duplicate permission: {0}")]
	DuplicatePermission(String),

	#[error("permission {id} is an inheritance root for {dependents} dependent row(s)")]
	InheritanceRootInUse { id: PermissionId, dependents: usize },

	#[error("data integrity error: {0}")]
	DataIntegrity(String),

	#[error("traversal budget exceeded: {0}")]
	TraversalBudgetExceeded(String),

	#[error("storage error: {0}")]
	Storage(String),
}

impl PermissionError {
	pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
		Self::NotFound {
			kind,
			id: id.to_string(),
		}
	}

	pub fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidInput(message.into())
	}
}

pub type Result<T> = std::result::Result<T, PermissionError>;
