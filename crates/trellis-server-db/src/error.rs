// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use trellis_permissions_core::PermissionError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error(transparent)]
	Permission(#[from] PermissionError),
}

impl DbError {
	/// Errors worth retrying the whole transaction for: a busy or locked
	/// database, or a pool that could not hand out a connection in time.
	pub fn is_transient(&self) -> bool {
		match self {
			DbError::Sqlx(sqlx::Error::PoolTimedOut) => true,
			DbError::Sqlx(sqlx::Error::Database(e)) => {
				matches!(e.code().as_deref(), Some("5") | Some("6") | Some("517") | Some("262"))
			}
			_ => false,
		}
	}

	pub(crate) fn is_unique_violation(&self) -> bool {
		matches!(self, DbError::Sqlx(sqlx::Error::Database(e)) if e.is_unique_violation())
	}
}

impl From<DbError> for PermissionError {
	fn from(err: DbError) -> Self {
		match err {
			DbError::Permission(inner) => inner,
			other if other.is_unique_violation() => PermissionError::DuplicatePermission(other.to_string()),
			other => PermissionError::Storage(other.to_string()),
		}
	}
}

pub type Result<T> = std::result::Result<T, DbError>;
