// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Role repository.
//!
//! Roles belong to one space. Users are assigned roles either inside the
//! platform or by an external sync that mirrors roles from another system.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use trellis_permissions_core::{PermissionError, RoleId, SpaceId, UserId};

use crate::error::DbError;
use crate::types::{parse_column, parse_timestamp, Role, RoleSource};

#[async_trait]
pub trait RoleStore: Send + Sync {
	async fn create_role(&self, space_id: SpaceId, name: &str) -> Result<Role, DbError>;
	async fn get_role(&self, id: RoleId) -> Result<Option<Role>, DbError>;
	async fn list_roles(&self, space_id: SpaceId) -> Result<Vec<Role>, DbError>;
	async fn roles_for_user(
		&self,
		space_id: SpaceId,
		user_id: Option<UserId>,
	) -> Result<HashSet<RoleId>, DbError>;
	async fn assign_role(&self, role_id: RoleId, user_id: UserId) -> Result<(), DbError>;
	async fn unassign_role(&self, role_id: RoleId, user_id: UserId) -> Result<bool, DbError>;
	async fn upsert_external_role(
		&self,
		space_id: SpaceId,
		source: RoleSource,
		source_id: &str,
		name: &str,
	) -> Result<Role, DbError>;
	async fn sync_user_roles(
		&self,
		space_id: SpaceId,
		user_id: UserId,
		source: RoleSource,
		role_ids: &[RoleId],
	) -> Result<(), DbError>;
}

/// Repository for roles and role assignments.
#[derive(Clone)]
pub struct RoleRepository {
	pool: SqlitePool,
}

impl RoleRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Create a role owned by the platform itself.
	#[tracing::instrument(skip(self, name), fields(space_id = %space_id))]
	pub async fn create_role(&self, space_id: SpaceId, name: &str) -> Result<Role, DbError> {
		let role = Role {
			id: RoleId::generate(),
			space_id,
			name: name.to_string(),
			source: None,
			source_id: None,
			created_at: Utc::now(),
		};
		let mut conn = self.pool.acquire().await?;
		insert_role(&mut conn, &role).await?;

		tracing::info!(role_id = %role.id, "role created");
		Ok(role)
	}

	#[tracing::instrument(skip(self), fields(role_id = %id))]
	pub async fn get_role(&self, id: RoleId) -> Result<Option<Role>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_role(&mut conn, id).await
	}

	#[tracing::instrument(skip(self), fields(space_id = %space_id))]
	pub async fn list_roles(&self, space_id: SpaceId) -> Result<Vec<Role>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, space_id, name, source, source_id, created_at
			FROM roles
			WHERE space_id = ?
			ORDER BY name, id
			"#,
		)
		.bind(space_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_role).collect()
	}

	/// Roles the user holds in `space_id`.
	///
	/// # Returns
	/// The empty set for anonymous callers, without touching the database.
	#[tracing::instrument(skip(self), fields(space_id = %space_id))]
	pub async fn roles_for_user(
		&self,
		space_id: SpaceId,
		user_id: Option<UserId>,
	) -> Result<HashSet<RoleId>, DbError> {
		let Some(user_id) = user_id else {
			return Ok(HashSet::new());
		};
		let mut conn = self.pool.acquire().await?;
		fetch_roles_for_user(&mut conn, space_id, user_id).await
	}

	/// Assign a role. Assigning twice is a no-op.
	///
	/// # Errors
	/// `NotFound` if the role does not exist.
	#[tracing::instrument(skip(self), fields(role_id = %role_id, user_id = %user_id))]
	pub async fn assign_role(&self, role_id: RoleId, user_id: UserId) -> Result<(), DbError> {
		let mut conn = self.pool.acquire().await?;
		let role = fetch_role(&mut conn, role_id)
			.await?
			.ok_or_else(|| PermissionError::not_found("role", role_id))?;
		insert_assignment(&mut conn, &role, user_id).await
	}

	/// # Returns
	/// `true` if an assignment was removed.
	#[tracing::instrument(skip(self), fields(role_id = %role_id, user_id = %user_id))]
	pub async fn unassign_role(&self, role_id: RoleId, user_id: UserId) -> Result<bool, DbError> {
		let result = sqlx::query("DELETE FROM role_assignments WHERE role_id = ? AND user_id = ?")
			.bind(role_id.to_string())
			.bind(user_id.to_string())
			.execute(&self.pool)
			.await?;

		let removed = result.rows_affected() > 0;
		if removed {
			tracing::info!("role unassigned");
		}
		Ok(removed)
	}

	/// Mirror a role from an external system, creating it on first sight and
	/// renaming it afterwards.
	#[tracing::instrument(skip(self, name), fields(space_id = %space_id, source = %source, source_id = %source_id))]
	pub async fn upsert_external_role(
		&self,
		space_id: SpaceId,
		source: RoleSource,
		source_id: &str,
		name: &str,
	) -> Result<Role, DbError> {
		let mut tx = self.pool.begin().await?;

		let existing = sqlx::query(
			r#"
			SELECT id, space_id, name, source, source_id, created_at
			FROM roles
			WHERE space_id = ? AND source = ? AND source_id = ?
			"#,
		)
		.bind(space_id.to_string())
		.bind(source.as_str())
		.bind(source_id)
		.fetch_optional(&mut *tx)
		.await?;

		let role = match existing {
			Some(row) => {
				let mut role = row_to_role(&row)?;
				if role.name != name {
					sqlx::query("UPDATE roles SET name = ? WHERE id = ?")
						.bind(name)
						.bind(role.id.to_string())
						.execute(&mut *tx)
						.await?;
					role.name = name.to_string();
				}
				role
			}
			None => {
				let role = Role {
					id: RoleId::generate(),
					space_id,
					name: name.to_string(),
					source: Some(source),
					source_id: Some(source_id.to_string()),
					created_at: Utc::now(),
				};
				insert_role(&mut tx, &role).await?;
				tracing::info!(role_id = %role.id, "external role mirrored");
				role
			}
		};

		tx.commit().await?;
		Ok(role)
	}

	/// Replace the user's assignments for every role of `source` with
	/// `role_ids`. Roles from other sources and internal roles are untouched.
	///
	/// # Errors
	/// `InvalidInput` if a role id does not belong to the space or carries a
	/// different source.
	#[tracing::instrument(skip(self, role_ids), fields(space_id = %space_id, user_id = %user_id, source = %source, count = role_ids.len()))]
	pub async fn sync_user_roles(
		&self,
		space_id: SpaceId,
		user_id: UserId,
		source: RoleSource,
		role_ids: &[RoleId],
	) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		let mut roles = Vec::with_capacity(role_ids.len());
		for role_id in role_ids {
			let role = fetch_role(&mut tx, *role_id)
				.await?
				.ok_or_else(|| PermissionError::not_found("role", role_id))?;
			if role.space_id != space_id || role.source != Some(source) {
				return Err(PermissionError::invalid(format!(
					"role {role_id} is not a {source} role of space {space_id}"
				))
				.into());
			}
			roles.push(role);
		}

		sqlx::query(
			r#"
			DELETE FROM role_assignments
			WHERE user_id = ? AND space_id = ?
			AND role_id IN (SELECT id FROM roles WHERE space_id = ? AND source = ?)
			"#,
		)
		.bind(user_id.to_string())
		.bind(space_id.to_string())
		.bind(space_id.to_string())
		.bind(source.as_str())
		.execute(&mut *tx)
		.await?;

		for role in &roles {
			insert_assignment(&mut tx, role, user_id).await?;
		}

		tx.commit().await?;
		tracing::info!(assigned = roles.len(), "user roles synchronised");
		Ok(())
	}
}

#[async_trait]
impl RoleStore for RoleRepository {
	async fn create_role(&self, space_id: SpaceId, name: &str) -> Result<Role, DbError> {
		self.create_role(space_id, name).await
	}

	async fn get_role(&self, id: RoleId) -> Result<Option<Role>, DbError> {
		self.get_role(id).await
	}

	async fn list_roles(&self, space_id: SpaceId) -> Result<Vec<Role>, DbError> {
		self.list_roles(space_id).await
	}

	async fn roles_for_user(
		&self,
		space_id: SpaceId,
		user_id: Option<UserId>,
	) -> Result<HashSet<RoleId>, DbError> {
		self.roles_for_user(space_id, user_id).await
	}

	async fn assign_role(&self, role_id: RoleId, user_id: UserId) -> Result<(), DbError> {
		self.assign_role(role_id, user_id).await
	}

	async fn unassign_role(&self, role_id: RoleId, user_id: UserId) -> Result<bool, DbError> {
		self.unassign_role(role_id, user_id).await
	}

	async fn upsert_external_role(
		&self,
		space_id: SpaceId,
		source: RoleSource,
		source_id: &str,
		name: &str,
	) -> Result<Role, DbError> {
		self.upsert_external_role(space_id, source, source_id, name).await
	}

	async fn sync_user_roles(
		&self,
		space_id: SpaceId,
		user_id: UserId,
		source: RoleSource,
		role_ids: &[RoleId],
	) -> Result<(), DbError> {
		self.sync_user_roles(space_id, user_id, source, role_ids).await
	}
}

fn row_to_role(row: &SqliteRow) -> Result<Role, DbError> {
	let id: String = row.get("id");
	let space_id: String = row.get("space_id");
	let source: Option<String> = row.get("source");
	let created_at: String = row.get("created_at");

	Ok(Role {
		id: parse_column(&id, "roles.id")?,
		space_id: parse_column(&space_id, "roles.space_id")?,
		name: row.get("name"),
		source: source.map(|s| parse_column(&s, "roles.source")).transpose()?,
		source_id: row.get("source_id"),
		created_at: parse_timestamp(&created_at, "created_at")?,
	})
}

pub async fn fetch_role(conn: &mut SqliteConnection, id: RoleId) -> Result<Option<Role>, DbError> {
	let row = sqlx::query(
		r#"
		SELECT id, space_id, name, source, source_id, created_at
		FROM roles
		WHERE id = ?
		"#,
	)
	.bind(id.to_string())
	.fetch_optional(&mut *conn)
	.await?;

	row.map(|r| row_to_role(&r)).transpose()
}

pub async fn fetch_roles_for_user(
	conn: &mut SqliteConnection,
	space_id: SpaceId,
	user_id: UserId,
) -> Result<HashSet<RoleId>, DbError> {
	let rows = sqlx::query(
		r#"
		SELECT ra.role_id
		FROM role_assignments ra
		JOIN roles r ON r.id = ra.role_id
		WHERE ra.user_id = ? AND r.space_id = ?
		"#,
	)
	.bind(user_id.to_string())
	.bind(space_id.to_string())
	.fetch_all(&mut *conn)
	.await?;

	rows
		.iter()
		.map(|r| {
			let id: String = r.get("role_id");
			parse_column(&id, "role_assignments.role_id")
		})
		.collect()
}

async fn insert_role(conn: &mut SqliteConnection, role: &Role) -> Result<(), DbError> {
	sqlx::query(
		r#"
		INSERT INTO roles (id, space_id, name, source, source_id, created_at)
		VALUES (?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(role.id.to_string())
	.bind(role.space_id.to_string())
	.bind(&role.name)
	.bind(role.source.map(|s| s.as_str()))
	.bind(role.source_id.as_deref())
	.bind(role.created_at.to_rfc3339())
	.execute(&mut *conn)
	.await?;
	Ok(())
}

async fn insert_assignment(
	conn: &mut SqliteConnection,
	role: &Role,
	user_id: UserId,
) -> Result<(), DbError> {
	sqlx::query(
		r#"
		INSERT OR IGNORE INTO role_assignments (role_id, user_id, space_id, created_at)
		VALUES (?, ?, ?, ?)
		"#,
	)
	.bind(role.id.to_string())
	.bind(user_id.to_string())
	.bind(role.space_id.to_string())
	.bind(Utc::now().to_rfc3339())
	.execute(&mut *conn)
	.await?;
	Ok(())
}
