// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operation flags and the [`OperationSet`] bitset.
//!
//! The effective permission of an actor on a resource is the union of every
//! operation granted by a matching row. Grants are additive; there is no deny
//! flag.

use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PermissionError;

/// A single capability an actor may hold on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
	Read,
	Comment,
	EditContent,
	EditPosition,
	Delete,
	GrantPermissions,
	CreatePage,
	CreateBounty,
	CreateForumCategory,
	ModerateForums,
	ReviewProposals,
	DeleteAnyPage,
	CreatePost,
	CommentPosts,
	VotePosts,
	EditCategory,
	DeleteCategory,
	Review,
	Evaluate,
	Vote,
	MoveProposal,
}

const ALL_OPERATIONS: [Operation; 21] = [
	Operation::Read,
	Operation::Comment,
	Operation::EditContent,
	Operation::EditPosition,
	Operation::Delete,
	Operation::GrantPermissions,
	Operation::CreatePage,
	Operation::CreateBounty,
	Operation::CreateForumCategory,
	Operation::ModerateForums,
	Operation::ReviewProposals,
	Operation::DeleteAnyPage,
	Operation::CreatePost,
	Operation::CommentPosts,
	Operation::VotePosts,
	Operation::EditCategory,
	Operation::DeleteCategory,
	Operation::Review,
	Operation::Evaluate,
	Operation::Vote,
	Operation::MoveProposal,
];

impl Operation {
	/// Returns every operation in declaration order.
	pub fn all() -> &'static [Operation] {
		&ALL_OPERATIONS
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Operation::Read => "read",
			Operation::Comment => "comment",
			Operation::EditContent => "edit_content",
			Operation::EditPosition => "edit_position",
			Operation::Delete => "delete",
			Operation::GrantPermissions => "grant_permissions",
			Operation::CreatePage => "create_page",
			Operation::CreateBounty => "create_bounty",
			Operation::CreateForumCategory => "create_forum_category",
			Operation::ModerateForums => "moderate_forums",
			Operation::ReviewProposals => "review_proposals",
			Operation::DeleteAnyPage => "delete_any_page",
			Operation::CreatePost => "create_post",
			Operation::CommentPosts => "comment_posts",
			Operation::VotePosts => "vote_posts",
			Operation::EditCategory => "edit_category",
			Operation::DeleteCategory => "delete_category",
			Operation::Review => "review",
			Operation::Evaluate => "evaluate",
			Operation::Vote => "vote",
			Operation::MoveProposal => "move_proposal",
		}
	}

	fn bit(self) -> u32 {
		1 << (self as u32)
	}
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Operation {
	type Err = PermissionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ALL_OPERATIONS
			.iter()
			.copied()
			.find(|op| op.as_str() == s)
			.ok_or_else(|| PermissionError::InvalidInput(format!("unknown operation '{s}'")))
	}
}

/// A set of [`Operation`] flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperationSet(u32);

impl OperationSet {
	pub const fn empty() -> Self {
		Self(0)
	}

	/// Every operation. Returned for space admins.
	pub fn universal() -> Self {
		Self::from_iter(ALL_OPERATIONS)
	}

	pub fn is_empty(&self) -> bool {
		self.0 == 0
	}

	pub fn has(&self, op: Operation) -> bool {
		self.0 & op.bit() != 0
	}

	pub fn insert(&mut self, op: Operation) {
		self.0 |= op.bit();
	}

	pub fn with(mut self, op: Operation) -> Self {
		self.insert(op);
		self
	}

	pub fn union(self, other: OperationSet) -> Self {
		Self(self.0 | other.0)
	}

	pub fn is_superset_of(&self, other: &OperationSet) -> bool {
		self.0 & other.0 == other.0
	}

	pub fn len(&self) -> usize {
		self.0.count_ones() as usize
	}

	pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
		ALL_OPERATIONS.iter().copied().filter(|op| self.has(*op))
	}

	/// Operation names, used for the stored representation of explicit grants.
	pub fn names(&self) -> Vec<&'static str> {
		self.iter().map(|op| op.as_str()).collect()
	}

	pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, PermissionError> {
		names
			.into_iter()
			.map(Operation::from_str)
			.collect::<Result<OperationSet, _>>()
	}
}

impl FromIterator<Operation> for OperationSet {
	fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
		let mut set = OperationSet::empty();
		for op in iter {
			set.insert(op);
		}
		set
	}
}

impl std::ops::BitOr for OperationSet {
	type Output = OperationSet;

	fn bitor(self, rhs: OperationSet) -> OperationSet {
		self.union(rhs)
	}
}

impl std::ops::BitOrAssign for OperationSet {
	fn bitor_assign(&mut self, rhs: OperationSet) {
		self.0 |= rhs.0;
	}
}

impl fmt::Debug for OperationSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.iter()).finish()
	}
}

/// Serializes as a map of every flag to a boolean, e.g.
/// `{"read": true, "comment": false, ...}`.
impl Serialize for OperationSet {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(ALL_OPERATIONS.len()))?;
		for op in ALL_OPERATIONS {
			map.serialize_entry(op.as_str(), &self.has(op))?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for OperationSet {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let flags = BTreeMap::<String, bool>::deserialize(deserializer)?;
		let mut set = OperationSet::empty();
		for (name, enabled) in flags {
			let op = Operation::from_str(&name).map_err(D::Error::custom)?;
			if enabled {
				set.insert(op);
			}
		}
		Ok(set)
	}
}
