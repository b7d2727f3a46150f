// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core identifier and resource type definitions.
//!
//! - **ID newtypes**: Type-safe wrappers around UUIDs ([`UserId`], [`SpaceId`],
//!   [`RoleId`], [`ResourceId`], [`PermissionId`], [`EvaluationId`]) preventing
//!   a role id from being passed where a user id is expected
//! - **Resource types**: The closed set of things a permission row can be
//!   attached to ([`ResourceType`])
//!
//! All ID types serialize transparently as UUID strings. Parsing a malformed
//! identifier yields [`PermissionError::InvalidInput`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PermissionError;

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $label:expr, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = PermissionError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Uuid::parse_str(s)
					.map(Self)
					.map_err(|_| PermissionError::InvalidInput(format!("malformed {} id '{s}'", $label)))
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(UserId, "user", "Unique identifier for a user.");
define_id_type!(SpaceId, "space", "Unique identifier for a space.");
define_id_type!(RoleId, "role", "Unique identifier for a space-scoped role.");
define_id_type!(
	ResourceId,
	"resource",
	"Unique identifier for a page, category, proposal or other protected resource."
);
define_id_type!(PermissionId, "permission", "Unique identifier for a permission row.");
define_id_type!(
	EvaluationId,
	"evaluation",
	"Unique identifier for a proposal evaluation step."
);

impl From<EvaluationId> for ResourceId {
	fn from(id: EvaluationId) -> Self {
		ResourceId(id.0)
	}
}

impl From<ResourceId> for EvaluationId {
	fn from(id: ResourceId) -> Self {
		EvaluationId(id.0)
	}
}

// =============================================================================
// Resource Types
// =============================================================================

/// Types of resources that can carry permission rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
	Space,
	Page,
	PostCategory,
	ProposalCategory,
	Proposal,
	ProposalEvaluation,
}

impl ResourceType {
	/// Returns all resource types.
	pub fn all() -> &'static [ResourceType] {
		&[
			ResourceType::Space,
			ResourceType::Page,
			ResourceType::PostCategory,
			ResourceType::ProposalCategory,
			ResourceType::Proposal,
			ResourceType::ProposalEvaluation,
		]
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceType::Space => "space",
			ResourceType::Page => "page",
			ResourceType::PostCategory => "post_category",
			ResourceType::ProposalCategory => "proposal_category",
			ResourceType::Proposal => "proposal",
			ResourceType::ProposalEvaluation => "proposal_evaluation",
		}
	}

	/// Only pages form a containment tree that permissions are inherited along.
	pub fn uses_tree_inheritance(&self) -> bool {
		matches!(self, ResourceType::Page)
	}

	/// Proposals and their steps resolve through the workflow step gate.
	pub fn uses_step_gate(&self) -> bool {
		matches!(
			self,
			ResourceType::Proposal | ResourceType::ProposalEvaluation
		)
	}
}

impl fmt::Display for ResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceType {
	type Err = PermissionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ResourceType::all()
			.iter()
			.copied()
			.find(|t| t.as_str() == s)
			.ok_or_else(|| PermissionError::InvalidInput(format!("unknown resource type '{s}'")))
	}
}
