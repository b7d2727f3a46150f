// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resource tree repository.
//!
//! Pages form a tree through `parent_id`; every other resource type is a
//! standalone node. The walk functions take a bare connection so callers can
//! run them inside a transaction alongside permission writes.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::{HashSet, VecDeque};
use trellis_permissions_core::{PermissionError, ResourceId, ResourceType, SpaceId};

use crate::error::DbError;
use crate::types::{parse_column, parse_timestamp, NewResource, Resource, TraversalOptions};

const RESOURCE_COLUMNS: &str =
	"id, resource_type, space_id, parent_id, title, deleted_at, created_at";

#[async_trait]
pub trait ResourceTreeStore: Send + Sync {
	async fn create_resource(&self, resource: &NewResource) -> Result<Resource, DbError>;
	async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, DbError>;
	async fn get_resource_including_deleted(
		&self,
		id: ResourceId,
	) -> Result<Option<Resource>, DbError>;
	async fn soft_delete_resource(&self, id: ResourceId) -> Result<bool, DbError>;
	async fn restore_resource(&self, id: ResourceId) -> Result<bool, DbError>;
	async fn move_resource(
		&self,
		id: ResourceId,
		new_parent: Option<ResourceId>,
	) -> Result<Resource, DbError>;
	async fn ancestors_of(
		&self,
		id: ResourceId,
		options: TraversalOptions,
	) -> Result<Vec<Resource>, DbError>;
	async fn descendants_of(
		&self,
		id: ResourceId,
		options: TraversalOptions,
	) -> Result<Vec<Resource>, DbError>;
}

/// Repository for the resource tree.
#[derive(Clone)]
pub struct ResourceTreeRepository {
	pool: SqlitePool,
	max_depth: usize,
}

impl ResourceTreeRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			max_depth: TraversalOptions::DEFAULT_MAX_DEPTH,
		}
	}

	pub fn with_max_depth(mut self, max_depth: usize) -> Self {
		self.max_depth = max_depth;
		self
	}

	pub fn traversal(&self) -> TraversalOptions {
		TraversalOptions {
			include_deleted: false,
			max_depth: self.max_depth,
		}
	}

	/// Create a resource after checking its parent.
	///
	/// # Errors
	/// - `InvalidInput` if a non-page has a parent, or the parent is not a
	///   page of the same space.
	/// - `NotFound` if the parent does not exist.
	#[tracing::instrument(skip(self, resource), fields(resource_type = %resource.resource_type, space_id = %resource.space_id))]
	pub async fn create_resource(&self, resource: &NewResource) -> Result<Resource, DbError> {
		let mut conn = self.pool.acquire().await?;
		let created = insert_resource(&mut conn, resource).await?;
		tracing::debug!(resource_id = %created.id, "resource created");
		Ok(created)
	}

	#[tracing::instrument(skip(self), fields(resource_id = %id))]
	pub async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_resource(&mut conn, id, false).await
	}

	#[tracing::instrument(skip(self), fields(resource_id = %id))]
	pub async fn get_resource_including_deleted(
		&self,
		id: ResourceId,
	) -> Result<Option<Resource>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_resource(&mut conn, id, true).await
	}

	/// Mark a resource deleted. Its rows stay so a restore brings them back.
	///
	/// # Returns
	/// `false` if the resource does not exist or is already deleted.
	#[tracing::instrument(skip(self), fields(resource_id = %id))]
	pub async fn soft_delete_resource(&self, id: ResourceId) -> Result<bool, DbError> {
		let mut conn = self.pool.acquire().await?;
		set_deleted(&mut conn, id, true).await
	}

	#[tracing::instrument(skip(self), fields(resource_id = %id))]
	pub async fn restore_resource(&self, id: ResourceId) -> Result<bool, DbError> {
		let mut conn = self.pool.acquire().await?;
		set_deleted(&mut conn, id, false).await
	}

	#[tracing::instrument(skip(self), fields(resource_id = %id))]
	pub async fn move_resource(
		&self,
		id: ResourceId,
		new_parent: Option<ResourceId>,
	) -> Result<Resource, DbError> {
		let mut tx = self.pool.begin().await?;
		let moved = reparent(&mut tx, id, new_parent, self.max_depth).await?;
		tx.commit().await?;
		Ok(moved)
	}

	#[tracing::instrument(skip(self), fields(resource_id = %id))]
	pub async fn ancestors_of(
		&self,
		id: ResourceId,
		options: TraversalOptions,
	) -> Result<Vec<Resource>, DbError> {
		let mut conn = self.pool.acquire().await?;
		ancestors_of(&mut conn, id, options).await
	}

	#[tracing::instrument(skip(self), fields(resource_id = %id))]
	pub async fn descendants_of(
		&self,
		id: ResourceId,
		options: TraversalOptions,
	) -> Result<Vec<Resource>, DbError> {
		let mut conn = self.pool.acquire().await?;
		descendants_of(&mut conn, id, options).await
	}
}

#[async_trait]
impl ResourceTreeStore for ResourceTreeRepository {
	async fn create_resource(&self, resource: &NewResource) -> Result<Resource, DbError> {
		self.create_resource(resource).await
	}

	async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, DbError> {
		self.get_resource(id).await
	}

	async fn get_resource_including_deleted(
		&self,
		id: ResourceId,
	) -> Result<Option<Resource>, DbError> {
		self.get_resource_including_deleted(id).await
	}

	async fn soft_delete_resource(&self, id: ResourceId) -> Result<bool, DbError> {
		self.soft_delete_resource(id).await
	}

	async fn restore_resource(&self, id: ResourceId) -> Result<bool, DbError> {
		self.restore_resource(id).await
	}

	async fn move_resource(
		&self,
		id: ResourceId,
		new_parent: Option<ResourceId>,
	) -> Result<Resource, DbError> {
		self.move_resource(id, new_parent).await
	}

	async fn ancestors_of(
		&self,
		id: ResourceId,
		options: TraversalOptions,
	) -> Result<Vec<Resource>, DbError> {
		self.ancestors_of(id, options).await
	}

	async fn descendants_of(
		&self,
		id: ResourceId,
		options: TraversalOptions,
	) -> Result<Vec<Resource>, DbError> {
		self.descendants_of(id, options).await
	}
}

fn row_to_resource(row: &SqliteRow) -> Result<Resource, DbError> {
	let id: String = row.get("id");
	let resource_type: String = row.get("resource_type");
	let space_id: String = row.get("space_id");
	let parent_id: Option<String> = row.get("parent_id");
	let deleted_at: Option<String> = row.get("deleted_at");
	let created_at: String = row.get("created_at");

	Ok(Resource {
		id: parse_column(&id, "resources.id")?,
		resource_type: parse_column(&resource_type, "resources.resource_type")?,
		space_id: parse_column(&space_id, "resources.space_id")?,
		parent_id: parent_id
			.map(|p| parse_column(&p, "resources.parent_id"))
			.transpose()?,
		title: row.get("title"),
		deleted_at: deleted_at
			.map(|d| parse_timestamp(&d, "deleted_at"))
			.transpose()?,
		created_at: parse_timestamp(&created_at, "created_at")?,
	})
}

pub async fn fetch_resource(
	conn: &mut SqliteConnection,
	id: ResourceId,
	include_deleted: bool,
) -> Result<Option<Resource>, DbError> {
	let sql = if include_deleted {
		format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?")
	} else {
		format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ? AND deleted_at IS NULL")
	};
	let row = sqlx::query(&sql)
		.bind(id.to_string())
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_resource(&r)).transpose()
}

/// Like [`fetch_resource`] but a missing resource is `NotFound`.
pub async fn require_resource(
	conn: &mut SqliteConnection,
	id: ResourceId,
	include_deleted: bool,
) -> Result<Resource, DbError> {
	fetch_resource(conn, id, include_deleted)
		.await?
		.ok_or_else(|| PermissionError::not_found("resource", id).into())
}

pub async fn insert_resource(
	conn: &mut SqliteConnection,
	resource: &NewResource,
) -> Result<Resource, DbError> {
	if let Some(parent_id) = resource.parent_id {
		if resource.resource_type != ResourceType::Page {
			return Err(PermissionError::invalid(format!(
				"{} resources cannot have a parent",
				resource.resource_type
			))
			.into());
		}
		let parent = require_resource(conn, parent_id, false).await?;
		check_parent(&parent, resource.space_id)?;
	}

	let now = Utc::now();
	let created = Resource {
		id: ResourceId::generate(),
		resource_type: resource.resource_type,
		space_id: resource.space_id,
		parent_id: resource.parent_id,
		title: resource.title.clone(),
		deleted_at: None,
		created_at: now,
	};

	sqlx::query(
		r#"
		INSERT INTO resources (id, resource_type, space_id, parent_id, title, deleted_at, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, NULL, ?, ?)
		"#,
	)
	.bind(created.id.to_string())
	.bind(created.resource_type.as_str())
	.bind(created.space_id.to_string())
	.bind(created.parent_id.map(|p| p.to_string()))
	.bind(&created.title)
	.bind(now.to_rfc3339())
	.bind(now.to_rfc3339())
	.execute(&mut *conn)
	.await?;

	Ok(created)
}

fn check_parent(parent: &Resource, space_id: SpaceId) -> Result<(), DbError> {
	if parent.resource_type != ResourceType::Page {
		return Err(PermissionError::invalid("a page's parent must be a page").into());
	}
	if parent.space_id != space_id {
		return Err(PermissionError::invalid("a page cannot be placed under another space").into());
	}
	Ok(())
}

pub async fn set_deleted(
	conn: &mut SqliteConnection,
	id: ResourceId,
	deleted: bool,
) -> Result<bool, DbError> {
	let now = Utc::now().to_rfc3339();
	let sql = if deleted {
		"UPDATE resources SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL"
	} else {
		"UPDATE resources SET deleted_at = NULL, updated_at = ? WHERE id = ? AND deleted_at IS NOT NULL"
	};
	let mut query = sqlx::query(sql);
	if deleted {
		query = query.bind(now.clone());
	}
	let result = query
		.bind(now)
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;

	let changed = result.rows_affected() > 0;
	if changed {
		tracing::info!(resource_id = %id, deleted, "resource deletion state changed");
	}
	Ok(changed)
}

/// Move a page under a new parent, or to the top of its space.
///
/// # Errors
/// `InvalidInput` when the move would create a cycle, cross spaces, or the
/// resource is not a page.
pub async fn reparent(
	conn: &mut SqliteConnection,
	id: ResourceId,
	new_parent: Option<ResourceId>,
	max_depth: usize,
) -> Result<Resource, DbError> {
	let mut resource = require_resource(conn, id, true).await?;
	if resource.resource_type != ResourceType::Page {
		return Err(PermissionError::invalid("only pages can be moved").into());
	}

	if let Some(parent_id) = new_parent {
		if parent_id == id {
			return Err(PermissionError::invalid("a page cannot be its own parent").into());
		}
		let parent = require_resource(conn, parent_id, true).await?;
		check_parent(&parent, resource.space_id)?;

		let options = TraversalOptions {
			include_deleted: true,
			max_depth,
		};
		let lineage = ancestors_of(conn, parent_id, options).await?;
		if lineage.iter().any(|a| a.id == id) {
			return Err(PermissionError::invalid(
				"a page cannot be moved under its own descendant",
			)
			.into());
		}
	}

	sqlx::query("UPDATE resources SET parent_id = ?, updated_at = ? WHERE id = ?")
		.bind(new_parent.map(|p| p.to_string()))
		.bind(Utc::now().to_rfc3339())
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;

	tracing::info!(resource_id = %id, parent_id = ?new_parent, "resource moved");
	resource.parent_id = new_parent;
	Ok(resource)
}

pub async fn fetch_children(
	conn: &mut SqliteConnection,
	id: ResourceId,
	include_deleted: bool,
) -> Result<Vec<Resource>, DbError> {
	let sql = if include_deleted {
		format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE parent_id = ? ORDER BY created_at, id")
	} else {
		format!(
			"SELECT {RESOURCE_COLUMNS} FROM resources WHERE parent_id = ? AND deleted_at IS NULL ORDER BY created_at, id"
		)
	};
	let rows = sqlx::query(&sql)
		.bind(id.to_string())
		.fetch_all(&mut *conn)
		.await?;
	rows.iter().map(row_to_resource).collect()
}

/// Live resources of one type in a space, oldest first.
pub async fn fetch_space_resources(
	conn: &mut SqliteConnection,
	space_id: SpaceId,
	resource_type: ResourceType,
) -> Result<Vec<Resource>, DbError> {
	let sql = format!(
		"SELECT {RESOURCE_COLUMNS} FROM resources WHERE space_id = ? AND resource_type = ? AND deleted_at IS NULL ORDER BY created_at, id"
	);
	let rows = sqlx::query(&sql)
		.bind(space_id.to_string())
		.bind(resource_type.as_str())
		.fetch_all(&mut *conn)
		.await?;
	rows.iter().map(row_to_resource).collect()
}

/// Ancestors of `id`, nearest first, not including `id` itself.
///
/// Without `include_deleted` the walk stops before the first deleted
/// ancestor, so nothing above it is returned.
///
/// # Errors
/// - `NotFound` if `id` does not exist.
/// - `DataIntegrity` if the parent chain loops.
/// - `TraversalBudgetExceeded` past `max_depth` ancestors.
pub async fn ancestors_of(
	conn: &mut SqliteConnection,
	id: ResourceId,
	options: TraversalOptions,
) -> Result<Vec<Resource>, DbError> {
	let start = require_resource(conn, id, true).await?;
	let mut visited = HashSet::from([id]);
	let mut ancestors = Vec::new();
	let mut next = start.parent_id;

	while let Some(parent_id) = next {
		if !visited.insert(parent_id) {
			tracing::error!(resource_id = %id, revisited = %parent_id, "cycle in resource tree");
			return Err(PermissionError::DataIntegrity(format!(
				"resource {parent_id} appears twice above {id}"
			))
			.into());
		}
		if ancestors.len() >= options.max_depth {
			return Err(PermissionError::TraversalBudgetExceeded(format!(
				"more than {} ancestors above {id}",
				options.max_depth
			))
			.into());
		}
		let Some(parent) = fetch_resource(conn, parent_id, true).await? else {
			break;
		};
		if parent.is_deleted() && !options.include_deleted {
			break;
		}
		next = parent.parent_id;
		ancestors.push(parent);
	}

	Ok(ancestors)
}

/// Descendants of `id` in breadth-first order, parents before children.
///
/// Without `include_deleted`, deleted pages and everything under them are
/// skipped.
///
/// # Errors
/// - `DataIntegrity` if a node is reached twice.
/// - `TraversalBudgetExceeded` when the tree is deeper than `max_depth`.
pub async fn descendants_of(
	conn: &mut SqliteConnection,
	id: ResourceId,
	options: TraversalOptions,
) -> Result<Vec<Resource>, DbError> {
	let mut visited = HashSet::from([id]);
	let mut queue = VecDeque::from([(id, 0usize)]);
	let mut descendants = Vec::new();

	while let Some((current, depth)) = queue.pop_front() {
		for child in fetch_children(conn, current, options.include_deleted).await? {
			if !visited.insert(child.id) {
				tracing::error!(resource_id = %id, revisited = %child.id, "cycle in resource tree");
				return Err(PermissionError::DataIntegrity(format!(
					"resource {} reached twice below {id}",
					child.id
				))
				.into());
			}
			if depth + 1 > options.max_depth {
				return Err(PermissionError::TraversalBudgetExceeded(format!(
					"subtree of {id} is deeper than {}",
					options.max_depth
				))
				.into());
			}
			queue.push_back((child.id, depth + 1));
			descendants.push(child);
		}
	}

	Ok(descendants)
}

/// The outermost ancestor of `id`, or `id` itself at the top.
pub async fn top_level_of(
	conn: &mut SqliteConnection,
	id: ResourceId,
	max_depth: usize,
) -> Result<ResourceId, DbError> {
	let options = TraversalOptions {
		include_deleted: true,
		max_depth,
	};
	let ancestors = ancestors_of(conn, id, options).await?;
	Ok(ancestors.last().map(|r| r.id).unwrap_or(id))
}

/// Hard-delete a resource and its subtree.
///
/// # Returns
/// The ids removed, the resource itself first.
pub async fn delete_subtree(
	conn: &mut SqliteConnection,
	id: ResourceId,
	max_depth: usize,
) -> Result<Vec<ResourceId>, DbError> {
	require_resource(conn, id, true).await?;
	let options = TraversalOptions {
		include_deleted: true,
		max_depth,
	};
	let mut ids = vec![id];
	ids.extend(descendants_of(conn, id, options).await?.into_iter().map(|r| r.id));

	for resource_id in ids.iter().rev() {
		sqlx::query("DELETE FROM resources WHERE id = ?")
			.bind(resource_id.to_string())
			.execute(&mut *conn)
			.await?;
	}

	tracing::info!(resource_id = %id, removed = ids.len(), "resource subtree deleted");
	Ok(ids)
}
