// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission level registry.
//!
//! A [`PermissionLevel`] is a named bundle of operations. The mapping is a
//! pure, exhaustive lookup: adding a level without extending
//! [`operations_for_level`] is a compile error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PermissionError;
use crate::operations::{Operation, OperationSet};

/// Named permission levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
	/// Read only.
	View,
	/// Read and comment.
	Comment,
	/// Edit page content and position.
	EditContent,
	/// Everything a page or category member can do, including sharing.
	FullAccess,
	/// Author access to a proposal page.
	ProposalEditor,
	/// Manage a forum category and its permissions.
	CategoryAdmin,
	/// Moderate posts in a forum category.
	Moderator,
	/// Comment on and vote for posts in a forum category.
	CommentVote,
}

impl PermissionLevel {
	/// Returns all levels in declaration order.
	pub fn all() -> &'static [PermissionLevel] {
		&[
			PermissionLevel::View,
			PermissionLevel::Comment,
			PermissionLevel::EditContent,
			PermissionLevel::FullAccess,
			PermissionLevel::ProposalEditor,
			PermissionLevel::CategoryAdmin,
			PermissionLevel::Moderator,
			PermissionLevel::CommentVote,
		]
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			PermissionLevel::View => "view",
			PermissionLevel::Comment => "comment",
			PermissionLevel::EditContent => "edit_content",
			PermissionLevel::FullAccess => "full_access",
			PermissionLevel::ProposalEditor => "proposal_editor",
			PermissionLevel::CategoryAdmin => "category_admin",
			PermissionLevel::Moderator => "moderator",
			PermissionLevel::CommentVote => "comment_vote",
		}
	}

	pub fn operations(&self) -> OperationSet {
		operations_for_level(*self)
	}

	/// Returns true if this level grants at least every operation of `other`.
	pub fn includes(&self, other: PermissionLevel) -> bool {
		self.operations().is_superset_of(&other.operations())
	}
}

impl fmt::Display for PermissionLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PermissionLevel {
	type Err = PermissionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		PermissionLevel::all()
			.iter()
			.copied()
			.find(|level| level.as_str() == s)
			.ok_or_else(|| PermissionError::InvalidInput(format!("unknown permission level '{s}'")))
	}
}

/// Returns the operations granted by `level`.
pub fn operations_for_level(level: PermissionLevel) -> OperationSet {
	use Operation::*;

	let view = OperationSet::from_iter([Read]);
	let comment = view.with(Comment);
	let edit_content = comment.with(EditContent).with(EditPosition);
	let comment_vote = view.with(CommentPosts).with(VotePosts);
	let moderator = comment_vote.with(CreatePost).with(ModerateForums);

	match level {
		PermissionLevel::View => view,
		PermissionLevel::Comment => comment,
		PermissionLevel::EditContent => edit_content,
		PermissionLevel::FullAccess => edit_content
			.with(Delete)
			.with(GrantPermissions)
			.with(CreatePost)
			.with(CommentPosts)
			.with(VotePosts),
		PermissionLevel::ProposalEditor => edit_content.with(Delete).with(MoveProposal),
		PermissionLevel::CategoryAdmin => moderator
			.with(EditCategory)
			.with(DeleteCategory)
			.with(GrantPermissions),
		PermissionLevel::Moderator => moderator,
		PermissionLevel::CommentVote => comment_vote,
	}
}

/// Returns every level whose operation set contains `op`, for permission
/// editing UIs.
pub fn levels_allowing_operation(op: Operation) -> Vec<PermissionLevel> {
	PermissionLevel::all()
		.iter()
		.copied()
		.filter(|level| level.operations().has(op))
		.collect()
}
