// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission row repository.
//!
//! Each row grants one assignee either a level or an explicit operation set on
//! one resource. Rows copied down a page tree point back at their root through
//! `inherited_from_permission_id`; that pointer is a plain column with no
//! foreign key so that root deletion can detach dependents explicitly.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use trellis_permissions_core::{
	Assignee, Grant, NewPermissionRow, OperationSet, PermissionError, PermissionId,
	PermissionLevel, PermissionPatch, PermissionRow, ResourceId, ResourceType, RootDeletionPolicy,
	SpaceId,
};

use crate::error::DbError;
use crate::types::{parse_column, parse_timestamp};

const PERMISSION_COLUMNS: &str = "id, resource_id, resource_type, space_id, assignee_kind, assignee_id, \
	permission_level, operations, inherited_from_permission_id, created_at, updated_at";

/// Result of deleting one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedPermission {
	pub row: PermissionRow,
	/// Former dependents that became roots.
	pub detached: Vec<PermissionId>,
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
	async fn rows_for(&self, resource_id: ResourceId) -> Result<Vec<PermissionRow>, DbError>;
	async fn get_row(&self, id: PermissionId) -> Result<Option<PermissionRow>, DbError>;
	async fn create_row(&self, row: &NewPermissionRow) -> Result<PermissionRow, DbError>;
	async fn update_row(
		&self,
		id: PermissionId,
		patch: &PermissionPatch,
	) -> Result<PermissionRow, DbError>;
	async fn delete_row(&self, id: PermissionId) -> Result<DeletedPermission, DbError>;
	async fn dependents_of(&self, id: PermissionId) -> Result<Vec<PermissionRow>, DbError>;
	async fn find_for_assignee(
		&self,
		resource_id: ResourceId,
		assignee: &Assignee,
	) -> Result<Option<PermissionRow>, DbError>;
}

/// Repository for permission rows.
#[derive(Clone)]
pub struct PermissionRepository {
	pool: SqlitePool,
	policy: RootDeletionPolicy,
}

impl PermissionRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			policy: RootDeletionPolicy::default(),
		}
	}

	pub fn with_policy(mut self, policy: RootDeletionPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn policy(&self) -> RootDeletionPolicy {
		self.policy
	}

	#[tracing::instrument(skip(self), fields(resource_id = %resource_id))]
	pub async fn rows_for(&self, resource_id: ResourceId) -> Result<Vec<PermissionRow>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_rows_for(&mut conn, resource_id).await
	}

	#[tracing::instrument(skip(self), fields(permission_id = %id))]
	pub async fn get_row(&self, id: PermissionId) -> Result<Option<PermissionRow>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_row(&mut conn, id).await
	}

	/// Insert a row.
	///
	/// # Errors
	/// - `DuplicatePermission` if the assignee already has a row on the
	///   resource.
	/// - `NotFound` / `InvalidInput` for a bad `inherited_from`.
	#[tracing::instrument(skip(self, row), fields(resource_id = %row.resource_id, assignee = %row.assignee))]
	pub async fn create_row(&self, row: &NewPermissionRow) -> Result<PermissionRow, DbError> {
		let mut conn = self.pool.acquire().await?;
		insert_row(&mut conn, row).await
	}

	#[tracing::instrument(skip(self, patch), fields(permission_id = %id))]
	pub async fn update_row(
		&self,
		id: PermissionId,
		patch: &PermissionPatch,
	) -> Result<PermissionRow, DbError> {
		let mut tx = self.pool.begin().await?;
		let updated = update_row(&mut tx, id, patch).await?;
		tx.commit().await?;
		Ok(updated)
	}

	/// Delete a row, applying the repository's root deletion policy to its
	/// dependents in the same transaction.
	#[tracing::instrument(skip(self), fields(permission_id = %id, policy = ?self.policy))]
	pub async fn delete_row(&self, id: PermissionId) -> Result<DeletedPermission, DbError> {
		let mut tx = self.pool.begin().await?;
		let deleted = delete_row(&mut tx, id, self.policy).await?;
		tx.commit().await?;
		Ok(deleted)
	}

	#[tracing::instrument(skip(self), fields(permission_id = %id))]
	pub async fn dependents_of(&self, id: PermissionId) -> Result<Vec<PermissionRow>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_dependents(&mut conn, id).await
	}

	#[tracing::instrument(skip(self, assignee), fields(resource_id = %resource_id, assignee = %assignee))]
	pub async fn find_for_assignee(
		&self,
		resource_id: ResourceId,
		assignee: &Assignee,
	) -> Result<Option<PermissionRow>, DbError> {
		let mut conn = self.pool.acquire().await?;
		find_for_assignee(&mut conn, resource_id, assignee).await
	}
}

#[async_trait]
impl PermissionStore for PermissionRepository {
	async fn rows_for(&self, resource_id: ResourceId) -> Result<Vec<PermissionRow>, DbError> {
		self.rows_for(resource_id).await
	}

	async fn get_row(&self, id: PermissionId) -> Result<Option<PermissionRow>, DbError> {
		self.get_row(id).await
	}

	async fn create_row(&self, row: &NewPermissionRow) -> Result<PermissionRow, DbError> {
		self.create_row(row).await
	}

	async fn update_row(
		&self,
		id: PermissionId,
		patch: &PermissionPatch,
	) -> Result<PermissionRow, DbError> {
		self.update_row(id, patch).await
	}

	async fn delete_row(&self, id: PermissionId) -> Result<DeletedPermission, DbError> {
		self.delete_row(id).await
	}

	async fn dependents_of(&self, id: PermissionId) -> Result<Vec<PermissionRow>, DbError> {
		self.dependents_of(id).await
	}

	async fn find_for_assignee(
		&self,
		resource_id: ResourceId,
		assignee: &Assignee,
	) -> Result<Option<PermissionRow>, DbError> {
		self.find_for_assignee(resource_id, assignee).await
	}
}

fn assignee_id(assignee: &Assignee) -> String {
	match assignee {
		Assignee::User { id } => id.to_string(),
		Assignee::Role { id } => id.to_string(),
		Assignee::Space { id } => id.to_string(),
		Assignee::Public => String::new(),
	}
}

fn row_to_permission(row: &SqliteRow) -> Result<PermissionRow, DbError> {
	let id: String = row.get("id");
	let resource_id: String = row.get("resource_id");
	let resource_type: String = row.get("resource_type");
	let space_id: String = row.get("space_id");
	let kind: String = row.get("assignee_kind");
	let target: String = row.get("assignee_id");
	let level: Option<String> = row.get("permission_level");
	let operations: Option<String> = row.get("operations");
	let inherited_from: Option<String> = row.get("inherited_from_permission_id");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");

	let assignee = match kind.as_str() {
		"user" => Assignee::User {
			id: parse_column(&target, "permissions.assignee_id")?,
		},
		"role" => Assignee::Role {
			id: parse_column(&target, "permissions.assignee_id")?,
		},
		"space" => Assignee::Space {
			id: parse_column(&target, "permissions.assignee_id")?,
		},
		"public" => Assignee::Public,
		other => {
			return Err(PermissionError::DataIntegrity(format!("unknown assignee kind {other:?}")).into())
		}
	};

	let level = level
		.map(|l| parse_column::<PermissionLevel>(&l, "permissions.permission_level"))
		.transpose()?;
	let operations = operations
		.map(|o| serde_json::from_str::<OperationSet>(&o))
		.transpose()?;
	let grant = Grant::from_parts(level, operations)
		.map_err(|e| PermissionError::DataIntegrity(format!("permission {id}: {e}")))?;

	Ok(PermissionRow {
		id: parse_column(&id, "permissions.id")?,
		resource_id: parse_column(&resource_id, "permissions.resource_id")?,
		resource_type: parse_column(&resource_type, "permissions.resource_type")?,
		space_id: parse_column(&space_id, "permissions.space_id")?,
		assignee,
		grant,
		inherited_from: inherited_from
			.map(|p| parse_column(&p, "permissions.inherited_from_permission_id"))
			.transpose()?,
		created_at: parse_timestamp(&created_at, "created_at")?,
		updated_at: parse_timestamp(&updated_at, "updated_at")?,
	})
}

fn grant_columns(grant: &Grant) -> Result<(Option<&'static str>, Option<String>), DbError> {
	Ok(match grant {
		Grant::Level(level) => (Some(level.as_str()), None),
		Grant::Operations(ops) => (None, Some(serde_json::to_string(ops)?)),
	})
}

/// Rows on a resource, oldest first.
pub async fn fetch_rows_for(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
) -> Result<Vec<PermissionRow>, DbError> {
	let sql = format!(
		"SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource_id = ? ORDER BY created_at, id"
	);
	let rows = sqlx::query(&sql)
		.bind(resource_id.to_string())
		.fetch_all(&mut *conn)
		.await?;
	rows.iter().map(row_to_permission).collect()
}

/// Root rows on a resource, oldest first.
pub async fn fetch_root_rows_for(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
) -> Result<Vec<PermissionRow>, DbError> {
	Ok(fetch_rows_for(conn, resource_id)
		.await?
		.into_iter()
		.filter(PermissionRow::is_root)
		.collect())
}

/// Rows on the space resources of `space_id`. These grant space-wide
/// capabilities such as deleting any page or moderating every forum.
pub async fn fetch_space_rows(
	conn: &mut SqliteConnection,
	space_id: SpaceId,
) -> Result<Vec<PermissionRow>, DbError> {
	let sql = format!(
		"SELECT {PERMISSION_COLUMNS} FROM permissions WHERE space_id = ? AND resource_type = ? ORDER BY created_at, id"
	);
	let rows = sqlx::query(&sql)
		.bind(space_id.to_string())
		.bind(ResourceType::Space.as_str())
		.fetch_all(&mut *conn)
		.await?;
	rows.iter().map(row_to_permission).collect()
}

pub async fn has_root_rows(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
) -> Result<bool, DbError> {
	let count: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM permissions WHERE resource_id = ? AND inherited_from_permission_id IS NULL",
	)
	.bind(resource_id.to_string())
	.fetch_one(&mut *conn)
	.await?;
	Ok(count > 0)
}

pub async fn fetch_row(
	conn: &mut SqliteConnection,
	id: PermissionId,
) -> Result<Option<PermissionRow>, DbError> {
	let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?");
	let row = sqlx::query(&sql)
		.bind(id.to_string())
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_permission(&r)).transpose()
}

pub async fn require_row(
	conn: &mut SqliteConnection,
	id: PermissionId,
) -> Result<PermissionRow, DbError> {
	fetch_row(conn, id)
		.await?
		.ok_or_else(|| PermissionError::not_found("permission", id).into())
}

pub async fn find_for_assignee(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
	assignee: &Assignee,
) -> Result<Option<PermissionRow>, DbError> {
	let sql = format!(
		"SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource_id = ? AND assignee_kind = ? AND assignee_id = ?"
	);
	let row = sqlx::query(&sql)
		.bind(resource_id.to_string())
		.bind(assignee.kind())
		.bind(assignee_id(assignee))
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_permission(&r)).transpose()
}

/// Rows whose inheritance pointer names `root_id`.
pub async fn fetch_dependents(
	conn: &mut SqliteConnection,
	root_id: PermissionId,
) -> Result<Vec<PermissionRow>, DbError> {
	let sql = format!(
		"SELECT {PERMISSION_COLUMNS} FROM permissions WHERE inherited_from_permission_id = ? ORDER BY created_at, id"
	);
	let rows = sqlx::query(&sql)
		.bind(root_id.to_string())
		.fetch_all(&mut *conn)
		.await?;
	rows.iter().map(row_to_permission).collect()
}

async fn check_source(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
	source_id: PermissionId,
) -> Result<(), DbError> {
	let source = require_row(conn, source_id).await?;
	if source.resource_id == resource_id {
		return Err(PermissionError::invalid("a row cannot inherit from a row on its own resource").into());
	}
	if !source.is_root() {
		return Err(PermissionError::invalid(format!(
			"permission {source_id} is itself inherited and cannot be a source"
		))
		.into());
	}
	Ok(())
}

pub async fn insert_row(
	conn: &mut SqliteConnection,
	row: &NewPermissionRow,
) -> Result<PermissionRow, DbError> {
	if let Some(existing) = find_for_assignee(conn, row.resource_id, &row.assignee).await? {
		return Err(PermissionError::DuplicatePermission(format!(
			"{} already has permission {} on {}",
			row.assignee, existing.id, row.resource_id
		))
		.into());
	}
	if let Some(source_id) = row.inherited_from {
		check_source(conn, row.resource_id, source_id).await?;
	}

	let now = Utc::now();
	let created = PermissionRow {
		id: PermissionId::generate(),
		resource_id: row.resource_id,
		resource_type: row.resource_type,
		space_id: row.space_id,
		assignee: row.assignee,
		grant: row.grant,
		inherited_from: row.inherited_from,
		created_at: now,
		updated_at: now,
	};
	let (level, operations) = grant_columns(&created.grant)?;

	let sql = format!(
		"INSERT INTO permissions ({PERMISSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
	);
	let result = sqlx::query(&sql)
		.bind(created.id.to_string())
		.bind(created.resource_id.to_string())
		.bind(created.resource_type.as_str())
		.bind(created.space_id.to_string())
		.bind(created.assignee.kind())
		.bind(assignee_id(&created.assignee))
		.bind(level)
		.bind(operations)
		.bind(created.inherited_from.map(|p| p.to_string()))
		.bind(now.to_rfc3339())
		.bind(now.to_rfc3339())
		.execute(&mut *conn)
		.await;

	if let Err(e) = result {
		let err = DbError::from(e);
		if err.is_unique_violation() {
			return Err(PermissionError::DuplicatePermission(format!(
				"{} already has a permission on {}",
				created.assignee, created.resource_id
			))
			.into());
		}
		return Err(err);
	}

	tracing::debug!(
		permission_id = %created.id,
		resource_id = %created.resource_id,
		inherited = created.inherited_from.is_some(),
		"permission row created"
	);
	Ok(created)
}

pub async fn update_row(
	conn: &mut SqliteConnection,
	id: PermissionId,
	patch: &PermissionPatch,
) -> Result<PermissionRow, DbError> {
	let mut row = require_row(conn, id).await?;

	if let Some(grant) = patch.grant {
		row.grant = grant;
	}
	if let Some(inherited_from) = patch.inherited_from {
		if let Some(source_id) = inherited_from {
			check_source(conn, row.resource_id, source_id).await?;
		}
		row.inherited_from = inherited_from;
	}
	row.updated_at = Utc::now();

	let (level, operations) = grant_columns(&row.grant)?;
	sqlx::query(
		r#"
		UPDATE permissions
		SET permission_level = ?, operations = ?, inherited_from_permission_id = ?, updated_at = ?
		WHERE id = ?
		"#,
	)
	.bind(level)
	.bind(operations)
	.bind(row.inherited_from.map(|p| p.to_string()))
	.bind(row.updated_at.to_rfc3339())
	.bind(id.to_string())
	.execute(&mut *conn)
	.await?;

	Ok(row)
}

/// Turn every dependent of `root_id` into a root with its current grant.
pub async fn detach_dependents(
	conn: &mut SqliteConnection,
	root_id: PermissionId,
) -> Result<Vec<PermissionId>, DbError> {
	let dependents = fetch_dependents(conn, root_id).await?;
	let now = Utc::now().to_rfc3339();
	for dependent in &dependents {
		sqlx::query(
			"UPDATE permissions SET inherited_from_permission_id = NULL, updated_at = ? WHERE id = ?",
		)
		.bind(&now)
		.bind(dependent.id.to_string())
		.execute(&mut *conn)
		.await?;
	}
	Ok(dependents.into_iter().map(|d| d.id).collect())
}

/// Delete one row. Deleting a root applies `policy` to its dependents.
///
/// # Errors
/// - `NotFound` if the row does not exist.
/// - `InheritanceRootInUse` under [`RootDeletionPolicy::Reject`] when
///   dependents exist.
pub async fn delete_row(
	conn: &mut SqliteConnection,
	id: PermissionId,
	policy: RootDeletionPolicy,
) -> Result<DeletedPermission, DbError> {
	let row = require_row(conn, id).await?;

	let detached = if row.is_root() {
		match policy {
			RootDeletionPolicy::Reject => {
				let dependents = fetch_dependents(conn, id).await?;
				if !dependents.is_empty() {
					return Err(PermissionError::InheritanceRootInUse {
						id,
						dependents: dependents.len(),
					}
					.into());
				}
				Vec::new()
			}
			RootDeletionPolicy::Detach => detach_dependents(conn, id).await?,
		}
	} else {
		Vec::new()
	};

	sqlx::query("DELETE FROM permissions WHERE id = ?")
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;

	tracing::info!(permission_id = %id, detached = detached.len(), "permission row deleted");
	Ok(DeletedPermission { row, detached })
}

/// Remove every row on `resource_ids`. Dependents of those rows that live
/// outside the set are detached rather than deleted.
///
/// # Returns
/// The number of rows deleted.
pub async fn delete_rows_for_resources(
	conn: &mut SqliteConnection,
	resource_ids: &[ResourceId],
) -> Result<usize, DbError> {
	let doomed: HashSet<ResourceId> = resource_ids.iter().copied().collect();
	let mut deleted = 0usize;

	for resource_id in resource_ids {
		for row in fetch_rows_for(conn, *resource_id).await? {
			if row.is_root() {
				for dependent in fetch_dependents(conn, row.id).await? {
					if doomed.contains(&dependent.resource_id) {
						continue;
					}
					update_row(
						conn,
						dependent.id,
						&PermissionPatch {
							grant: None,
							inherited_from: Some(None),
						},
					)
					.await?;
				}
			}
		}
		let result = sqlx::query("DELETE FROM permissions WHERE resource_id = ?")
			.bind(resource_id.to_string())
			.execute(&mut *conn)
			.await?;
		deleted += result.rows_affected() as usize;
	}

	Ok(deleted)
}
