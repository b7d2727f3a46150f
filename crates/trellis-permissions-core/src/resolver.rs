// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission resolution.
//!
//! This module contains the core [`resolve`] function. It is a pure,
//! synchronous computation over an immutable [`ResolutionInput`] snapshot:
//!
//! 1. **Admin bypass**: space admins receive every operation, for every
//!    resource type
//! 2. **Row gathering**: direct rows (or the active evaluation step's rows),
//!    the nearest ancestor's root rows, and completed-step fallbacks
//! 3. **Assignee matching**: public, space membership, role membership, user
//! 4. **Union**: the grants of all matching rows are OR-ed together, plus
//!    whatever matching space-wide rows carry over (see
//!    [`space_wide_operations`])
//!
//! Grants are additive. The most permissive matching row always wins and no
//! matching row means the empty set, which is a normal outcome. Free spaces
//! take a separate path described in [`crate::tier`].

use std::collections::HashSet;

use tracing::instrument;

use crate::actor::Actor;
use crate::assignee::Assignee;
use crate::levels::PermissionLevel;
use crate::operations::{Operation, OperationSet};
use crate::row::PermissionRow;
use crate::tier::{free_member_operations, SubscriptionTier};
use crate::types::{ResourceId, ResourceType, RoleId, SpaceId};

/// Facts about the actor's standing in the resource's space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipFacts {
	pub is_member: bool,
	pub roles: HashSet<RoleId>,
}

/// Everything the resolver needs, fetched up front.
#[derive(Debug, Clone)]
pub struct ResolutionInput {
	pub resource_type: ResourceType,
	pub resource_id: ResourceId,
	pub space_id: SpaceId,
	/// Rows stored on the resource, or the active step rows for proposals.
	pub rows: Vec<PermissionRow>,
	/// Root rows of the nearest ancestor that defines any.
	pub inherited_rows: Vec<PermissionRow>,
	/// Read-only rows synthesized for completed evaluation steps.
	pub fallback_rows: Vec<PermissionRow>,
	/// Rows on the space itself. Only some of their operations carry over.
	pub space_rows: Vec<PermissionRow>,
	pub tier: SubscriptionTier,
	pub membership: MembershipFacts,
}

impl ResolutionInput {
	pub fn new(resource_type: ResourceType, resource_id: ResourceId, space_id: SpaceId) -> Self {
		Self {
			resource_type,
			resource_id,
			space_id,
			rows: Vec::new(),
			inherited_rows: Vec::new(),
			fallback_rows: Vec::new(),
			space_rows: Vec::new(),
			tier: SubscriptionTier::default(),
			membership: MembershipFacts::default(),
		}
	}

	pub fn with_rows(mut self, rows: Vec<PermissionRow>) -> Self {
		self.rows = rows;
		self
	}

	pub fn with_inherited_rows(mut self, rows: Vec<PermissionRow>) -> Self {
		self.inherited_rows = rows;
		self
	}

	pub fn with_fallback_rows(mut self, rows: Vec<PermissionRow>) -> Self {
		self.fallback_rows = rows;
		self
	}

	pub fn with_space_rows(mut self, rows: Vec<PermissionRow>) -> Self {
		self.space_rows = rows;
		self
	}

	pub fn with_tier(mut self, tier: SubscriptionTier) -> Self {
		self.tier = tier;
		self
	}

	pub fn with_membership(mut self, membership: MembershipFacts) -> Self {
		self.membership = membership;
		self
	}

	pub fn all_rows(&self) -> impl Iterator<Item = &PermissionRow> {
		self
			.rows
			.iter()
			.chain(self.inherited_rows.iter())
			.chain(self.fallback_rows.iter())
	}

	fn rows_and_space_rows(&self) -> impl Iterator<Item = &PermissionRow> {
		self.all_rows().chain(self.space_rows.iter())
	}

	/// True if any gathered row is assigned to a role, so role membership
	/// has to be fetched. Free spaces never consult roles.
	pub fn needs_roles(&self) -> bool {
		!self.tier.is_free()
			&& self
				.rows_and_space_rows()
				.any(|row| matches!(row.assignee, Assignee::Role { .. }))
	}

	/// True if any gathered row is assigned to the whole space, or the space
	/// is on the free tier where members get defaults.
	pub fn needs_space_membership(&self) -> bool {
		self.tier.is_free()
			|| self
				.rows_and_space_rows()
				.any(|row| matches!(row.assignee, Assignee::Space { .. }))
	}
}

/// Computes the operations `actor` holds on the resource described by `input`.
#[instrument(
	level = "debug",
	skip(actor, input),
	fields(
		resource_type = %input.resource_type,
		resource_id = %input.resource_id,
		actor = %actor.key(),
	)
)]
pub fn resolve(actor: &Actor, input: &ResolutionInput) -> OperationSet {
	// No resource type opts out of the bypass.
	if actor.is_space_admin {
		return OperationSet::universal();
	}

	let operations = if input.tier.is_free() {
		free_tier_operations(actor, input)
	} else {
		shared_operations(actor, input)
	};

	tracing::debug!(tier = %input.tier, operations = ?operations, "resolved permissions");
	operations
}

fn matching_union<'a>(
	rows: impl Iterator<Item = &'a PermissionRow>,
	actor: &Actor,
	input: &ResolutionInput,
) -> OperationSet {
	rows
		.filter(|row| row_matches(row, actor, &input.membership, input.space_id))
		.fold(OperationSet::empty(), |ops, row| ops | row.operations())
}

fn shared_operations(actor: &Actor, input: &ResolutionInput) -> OperationSet {
	let own = matching_union(input.all_rows(), actor, input);
	let space_wide = matching_union(input.space_rows.iter(), actor, input);
	own | space_wide_operations(input.resource_type, space_wide)
}

/// Free spaces have no per-row sharing and no roles. Public rows apply to
/// everyone; user and space rows only count on proposal steps.
fn free_tier_operations(actor: &Actor, input: &ResolutionInput) -> OperationSet {
	let mut operations = OperationSet::empty();
	if actor.user_id.is_some() && input.membership.is_member {
		operations |= free_member_operations(input.resource_type);
	}

	let step_gated = input.resource_type.uses_step_gate();
	for row in input.all_rows() {
		let applies = match row.assignee {
			Assignee::Public => true,
			Assignee::Role { .. } => false,
			Assignee::Space { .. } | Assignee::User { .. } => {
				step_gated && row_matches(row, actor, &input.membership, input.space_id)
			}
		};
		if applies {
			operations |= row.operations();
		}
	}
	operations
}

/// Operations that space-wide grants add on a resource of `resource_type`.
///
/// `delete_any_page` lets its holder delete pages (never proposals, which
/// are their own resource type) and `moderate_forums` makes its holder a
/// moderator in every post category.
pub fn space_wide_operations(resource_type: ResourceType, space_wide: OperationSet) -> OperationSet {
	match resource_type {
		ResourceType::Page if space_wide.has(Operation::DeleteAnyPage) => {
			OperationSet::from_iter([Operation::Delete])
		}
		ResourceType::PostCategory if space_wide.has(Operation::ModerateForums) => {
			PermissionLevel::Moderator.operations()
		}
		_ => OperationSet::empty(),
	}
}

/// Returns true if `row` applies to `actor`.
pub fn row_matches(
	row: &PermissionRow,
	actor: &Actor,
	membership: &MembershipFacts,
	resource_space: SpaceId,
) -> bool {
	match row.assignee {
		Assignee::Public => true,
		Assignee::Space { id } => {
			actor.user_id.is_some() && membership.is_member && id == resource_space
		}
		Assignee::Role { id } => actor.user_id.is_some() && membership.roles.contains(&id),
		Assignee::User { id } => actor.user_id == Some(id),
	}
}

/// Picks the root rows of the first ancestor (nearest-first) that has at
/// least one root row. Ancestor levels are never merged.
pub fn nearest_root_rows<I>(ancestors: I) -> Option<(ResourceId, Vec<PermissionRow>)>
where
	I: IntoIterator<Item = (ResourceId, Vec<PermissionRow>)>,
{
	ancestors.into_iter().find_map(|(resource_id, rows)| {
		let roots: Vec<PermissionRow> = rows.into_iter().filter(PermissionRow::is_root).collect();
		(!roots.is_empty()).then_some((resource_id, roots))
	})
}
