// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP status mapping for the API layer.
//!
//! Whether a denied resource may be revealed to exist is the caller's call;
//! these helpers only translate the outcome.

use http::StatusCode;
use trellis_permissions_core::{Actor, Operation, OperationSet, PermissionError};

/// Status for a request that was denied.
///
/// Hidden resources are reported as missing. Visible ones distinguish an
/// anonymous visitor, who could sign in, from a user who simply lacks access.
pub fn deny_status(actor: &Actor, reveal_existence: bool) -> StatusCode {
	if !reveal_existence {
		StatusCode::NOT_FOUND
	} else if actor.is_anonymous() {
		StatusCode::UNAUTHORIZED
	} else {
		StatusCode::FORBIDDEN
	}
}

/// `Ok` if `operations` include `needed`, otherwise the denial status.
pub fn authorize(
	operations: OperationSet,
	needed: Operation,
	actor: &Actor,
	reveal_existence: bool,
) -> Result<(), StatusCode> {
	if operations.has(needed) {
		Ok(())
	} else {
		Err(deny_status(actor, reveal_existence))
	}
}

pub trait ErrorStatus {
	fn status_code(&self) -> StatusCode;
}

impl ErrorStatus for PermissionError {
	fn status_code(&self) -> StatusCode {
		match self {
			PermissionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
			PermissionError::NotFound { .. } => StatusCode::NOT_FOUND,
			PermissionError::DuplicatePermission(_)
			| PermissionError::InheritanceRootInUse { .. } => StatusCode::CONFLICT,
			// Fail closed: an unfinished walk is a denial.
			PermissionError::TraversalBudgetExceeded(_) => StatusCode::FORBIDDEN,
			PermissionError::DataIntegrity(message) => {
				tracing::error!(error = %message, "permission data integrity failure");
				StatusCode::INTERNAL_SERVER_ERROR
			}
			PermissionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use trellis_permissions_core::{PermissionId, UserId};

	#[test]
	fn hidden_resources_are_not_found() {
		assert_eq!(deny_status(&Actor::anonymous(), false), StatusCode::NOT_FOUND);
		assert_eq!(
			deny_status(&Actor::user(UserId::generate()), false),
			StatusCode::NOT_FOUND
		);
	}

	#[test]
	fn visible_resources_distinguish_sign_in() {
		assert_eq!(deny_status(&Actor::anonymous(), true), StatusCode::UNAUTHORIZED);
		assert_eq!(
			deny_status(&Actor::user(UserId::generate()), true),
			StatusCode::FORBIDDEN
		);
	}

	#[test]
	fn authorize_checks_the_needed_operation() {
		let actor = Actor::user(UserId::generate());
		let ops = OperationSet::from_iter([Operation::Read]);
		assert!(authorize(ops, Operation::Read, &actor, true).is_ok());
		assert_eq!(
			authorize(ops, Operation::EditContent, &actor, true),
			Err(StatusCode::FORBIDDEN)
		);
	}

	#[test]
	fn error_statuses() {
		assert_eq!(
			PermissionError::invalid("bad id").status_code(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			PermissionError::not_found("resource", "x").status_code(),
			StatusCode::NOT_FOUND
		);
		assert_eq!(
			PermissionError::InheritanceRootInUse {
				id: PermissionId::generate(),
				dependents: 1
			}
			.status_code(),
			StatusCode::CONFLICT
		);
		assert_eq!(
			PermissionError::DataIntegrity("cycle".into()).status_code(),
			StatusCode::INTERNAL_SERVER_ERROR
		);
		assert_eq!(
			PermissionError::TraversalBudgetExceeded("deep".into()).status_code(),
			StatusCode::FORBIDDEN
		);
	}
}
