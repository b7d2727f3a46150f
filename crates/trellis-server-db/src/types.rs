// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use trellis_permissions_core::{PermissionError, ResourceId, ResourceType, RoleId, SpaceId};

use crate::error::DbError;

/// A node in a space's content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
	pub id: ResourceId,
	pub resource_type: ResourceType,
	pub space_id: SpaceId,
	/// Only pages have parents.
	pub parent_id: Option<ResourceId>,
	pub title: String,
	pub deleted_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

impl Resource {
	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
	pub resource_type: ResourceType,
	pub space_id: SpaceId,
	pub parent_id: Option<ResourceId>,
	pub title: String,
}

impl NewResource {
	pub fn new(resource_type: ResourceType, space_id: SpaceId) -> Self {
		Self {
			resource_type,
			space_id,
			parent_id: None,
			title: String::new(),
		}
	}

	pub fn page(space_id: SpaceId, parent_id: Option<ResourceId>) -> Self {
		Self {
			parent_id,
			..Self::new(ResourceType::Page, space_id)
		}
	}

	pub fn titled(mut self, title: impl Into<String>) -> Self {
		self.title = title.into();
		self
	}
}

/// Bounds for tree walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalOptions {
	pub include_deleted: bool,
	pub max_depth: usize,
}

impl TraversalOptions {
	pub const DEFAULT_MAX_DEPTH: usize = 256;

	pub fn including_deleted(mut self) -> Self {
		self.include_deleted = true;
		self
	}
}

impl Default for TraversalOptions {
	fn default() -> Self {
		Self {
			include_deleted: false,
			max_depth: Self::DEFAULT_MAX_DEPTH,
		}
	}
}

/// Systems that mirror their roles into a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
	Discord,
	GuildXyz,
	Collabland,
	TokenGate,
}

impl RoleSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			RoleSource::Discord => "discord",
			RoleSource::GuildXyz => "guild_xyz",
			RoleSource::Collabland => "collabland",
			RoleSource::TokenGate => "token_gate",
		}
	}
}

impl fmt::Display for RoleSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RoleSource {
	type Err = PermissionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"discord" => Ok(RoleSource::Discord),
			"guild_xyz" => Ok(RoleSource::GuildXyz),
			"collabland" => Ok(RoleSource::Collabland),
			"token_gate" => Ok(RoleSource::TokenGate),
			other => Err(PermissionError::invalid(format!("unknown role source: {other}"))),
		}
	}
}

/// A named group of users inside one space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
	pub id: RoleId,
	pub space_id: SpaceId,
	pub name: String,
	/// `None` for roles created inside the platform.
	pub source: Option<RoleSource>,
	pub source_id: Option<String>,
	pub created_at: DateTime<Utc>,
}

/// Parse a stored value, treating garbage as a data integrity failure.
pub(crate) fn parse_column<T>(raw: &str, column: &str) -> Result<T, DbError>
where
	T: FromStr<Err = PermissionError>,
{
	raw.parse::<T>().map_err(|e| {
		tracing::error!(column, value = raw, error = %e, "malformed stored value");
		DbError::Permission(PermissionError::DataIntegrity(format!(
			"column {column} holds {raw:?}: {e}"
		)))
	})
}

pub(crate) fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(raw)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}
