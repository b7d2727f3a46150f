// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission assignees.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{RoleId, SpaceId, UserId};

/// The target of a permission row. Exactly one kind per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignee {
	/// A single user.
	User { id: UserId },
	/// Every user holding the role.
	Role { id: RoleId },
	/// Every member of the space.
	Space { id: SpaceId },
	/// Anyone, including anonymous visitors and non-members.
	Public,
}

impl Assignee {
	pub fn kind(&self) -> &'static str {
		match self {
			Assignee::User { .. } => "user",
			Assignee::Role { .. } => "role",
			Assignee::Space { .. } => "space",
			Assignee::Public => "public",
		}
	}
}

impl fmt::Display for Assignee {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Assignee::User { id } => write!(f, "user:{id}"),
			Assignee::Role { id } => write!(f, "role:{id}"),
			Assignee::Space { id } => write!(f, "space:{id}"),
			Assignee::Public => f.write_str("public"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serializes_with_kind_tag() {
		let id = SpaceId::generate();
		let json = serde_json::to_value(Assignee::Space { id }).unwrap();
		assert_eq!(json["kind"], "space");
		assert_eq!(json["id"], id.to_string());

		let public = serde_json::to_value(Assignee::Public).unwrap();
		assert_eq!(public, serde_json::json!({ "kind": "public" }));
	}

	#[test]
	fn deserializes_role() {
		let id = RoleId::generate();
		let assignee: Assignee =
			serde_json::from_value(serde_json::json!({ "kind": "role", "id": id.to_string() })).unwrap();
		assert_eq!(assignee, Assignee::Role { id });
		assert_eq!(assignee.kind(), "role");
	}
}
