// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission rows and their grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assignee::Assignee;
use crate::error::PermissionError;
use crate::levels::PermissionLevel;
use crate::operations::OperationSet;
use crate::types::{PermissionId, ResourceId, ResourceType, SpaceId};

/// What a row grants: a named level or an explicit operation set, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Grant {
	Level(PermissionLevel),
	Operations(OperationSet),
}

impl Grant {
	/// Builds a grant from the two optional stored columns.
	pub fn from_parts(
		level: Option<PermissionLevel>,
		operations: Option<OperationSet>,
	) -> Result<Self, PermissionError> {
		match (level, operations) {
			(Some(_), Some(_)) => Err(PermissionError::invalid(
				"a permission carries either a level or an operation set, not both",
			)),
			(None, None) => Err(PermissionError::invalid(
				"a permission must carry a level or an operation set",
			)),
			(Some(level), None) => Ok(Grant::Level(level)),
			(None, Some(ops)) => Grant::operations(ops),
		}
	}

	/// An explicit operation grant. Empty sets are rejected.
	pub fn operations(ops: OperationSet) -> Result<Self, PermissionError> {
		if ops.is_empty() {
			return Err(PermissionError::invalid("operation set must not be empty"));
		}
		Ok(Grant::Operations(ops))
	}

	/// Expands the grant through the level registry.
	pub fn expand(&self) -> OperationSet {
		match self {
			Grant::Level(level) => level.operations(),
			Grant::Operations(ops) => *ops,
		}
	}

	pub fn level(&self) -> Option<PermissionLevel> {
		match self {
			Grant::Level(level) => Some(*level),
			Grant::Operations(_) => None,
		}
	}

	pub fn explicit_operations(&self) -> Option<OperationSet> {
		match self {
			Grant::Level(_) => None,
			Grant::Operations(ops) => Some(*ops),
		}
	}
}

impl From<PermissionLevel> for Grant {
	fn from(level: PermissionLevel) -> Self {
		Grant::Level(level)
	}
}

/// One assignment of a grant to one assignee on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
	pub id: PermissionId,
	pub resource_id: ResourceId,
	pub resource_type: ResourceType,
	pub space_id: SpaceId,
	pub assignee: Assignee,
	pub grant: Grant,
	/// Non-owning back-reference to the root this row was copied from.
	pub inherited_from: Option<PermissionId>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl PermissionRow {
	/// A row defined directly on its resource rather than copied from an
	/// ancestor.
	pub fn is_root(&self) -> bool {
		self.inherited_from.is_none()
	}

	pub fn operations(&self) -> OperationSet {
		self.grant.expand()
	}

	/// The root this row is, or derives from.
	pub fn root_id(&self) -> PermissionId {
		self.inherited_from.unwrap_or(self.id)
	}
}

/// Input for creating a permission row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPermissionRow {
	pub resource_id: ResourceId,
	pub resource_type: ResourceType,
	pub space_id: SpaceId,
	pub assignee: Assignee,
	pub grant: Grant,
	pub inherited_from: Option<PermissionId>,
}

impl NewPermissionRow {
	pub fn root(
		resource_id: ResourceId,
		resource_type: ResourceType,
		space_id: SpaceId,
		assignee: Assignee,
		grant: Grant,
	) -> Self {
		Self {
			resource_id,
			resource_type,
			space_id,
			assignee,
			grant,
			inherited_from: None,
		}
	}

	pub fn inheriting(mut self, source: PermissionId) -> Self {
		self.inherited_from = Some(source);
		self
	}
}

/// What happens to dependent rows when their inheritance root is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootDeletionPolicy {
	/// Dependents become roots, keeping their last propagated grant.
	#[default]
	Detach,
	/// Deleting a root that still has dependents fails.
	Reject,
}

/// Partial update of a permission row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPatch {
	pub grant: Option<Grant>,
	/// `Some(None)` turns the row into a root.
	pub inherited_from: Option<Option<PermissionId>>,
}
