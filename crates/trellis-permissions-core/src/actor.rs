// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::UserId;

/// The party a permission decision is computed for.
///
/// Admin status is supplied by the caller; the engine never derives it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
	pub user_id: Option<UserId>,
	pub is_space_admin: bool,
}

impl Actor {
	pub fn anonymous() -> Self {
		Self::default()
	}

	pub fn user(user_id: UserId) -> Self {
		Self {
			user_id: Some(user_id),
			is_space_admin: false,
		}
	}

	pub fn admin(user_id: UserId) -> Self {
		Self {
			user_id: Some(user_id),
			is_space_admin: true,
		}
	}

	pub fn is_anonymous(&self) -> bool {
		self.user_id.is_none()
	}

	/// Cache key for decisions computed for this actor.
	pub fn key(&self) -> ActorKey {
		match (self.user_id, self.is_space_admin) {
			(_, true) => ActorKey::Admin,
			(Some(id), false) => ActorKey::User(id),
			(None, false) => ActorKey::Anonymous,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKey {
	Anonymous,
	User(UserId),
	Admin,
}

impl fmt::Display for ActorKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActorKey::Anonymous => f.write_str("anonymous"),
			ActorKey::User(id) => write!(f, "user:{id}"),
			ActorKey::Admin => f.write_str("admin"),
		}
	}
}
