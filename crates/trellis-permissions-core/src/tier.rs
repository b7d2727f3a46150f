// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Subscription tiers.
//!
//! Per-row sharing and roles belong to the paid tiers. A free space resolves
//! through fixed defaults: members get [`free_member_operations`] for the
//! resource type, public rows still apply to everyone, and proposal steps
//! keep their user and space rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PermissionError;
use crate::levels::PermissionLevel;
use crate::operations::{Operation, OperationSet};
use crate::types::ResourceType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
	Free,
	#[default]
	Community,
	Enterprise,
}

impl SubscriptionTier {
	pub fn all() -> &'static [SubscriptionTier] {
		&[
			SubscriptionTier::Free,
			SubscriptionTier::Community,
			SubscriptionTier::Enterprise,
		]
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			SubscriptionTier::Free => "free",
			SubscriptionTier::Community => "community",
			SubscriptionTier::Enterprise => "enterprise",
		}
	}

	pub fn is_free(&self) -> bool {
		matches!(self, SubscriptionTier::Free)
	}
}

impl fmt::Display for SubscriptionTier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SubscriptionTier {
	type Err = PermissionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		SubscriptionTier::all()
			.iter()
			.copied()
			.find(|tier| tier.as_str() == s)
			.ok_or_else(|| PermissionError::InvalidInput(format!("unknown subscription tier '{s}'")))
	}
}

/// What every member of a free space may do on a resource type.
pub fn free_member_operations(resource_type: ResourceType) -> OperationSet {
	use Operation::*;

	match resource_type {
		ResourceType::Space => OperationSet::from_iter([CreatePage, CreateBounty, CreatePost]),
		ResourceType::Page => PermissionLevel::EditContent.operations().with(Delete),
		ResourceType::PostCategory => PermissionLevel::CommentVote.operations().with(CreatePost),
		ResourceType::ProposalCategory
		| ResourceType::Proposal
		| ResourceType::ProposalEvaluation => PermissionLevel::View.operations(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn paid_tier_is_the_default() {
		assert_eq!(SubscriptionTier::default(), SubscriptionTier::Community);
		assert!(!SubscriptionTier::Enterprise.is_free());
		assert!(SubscriptionTier::Free.is_free());
	}

	#[test]
	fn tier_parses_from_name() {
		for tier in SubscriptionTier::all() {
			assert_eq!(tier.as_str().parse::<SubscriptionTier>().unwrap(), *tier);
		}
		let err = "gold".parse::<SubscriptionTier>().unwrap_err();
		assert!(matches!(err, PermissionError::InvalidInput(_)));
	}

	#[test]
	fn free_members_never_share() {
		for resource_type in ResourceType::all() {
			let ops = free_member_operations(*resource_type);
			assert!(ops.has(Operation::Read) || *resource_type == ResourceType::Space);
			assert!(!ops.has(Operation::GrantPermissions));
		}
	}
}
