// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Table definitions.
//!
//! Identifiers are UUIDs stored as TEXT and timestamps are RFC 3339 strings.
//! Public assignees store an empty `assignee_id` so that a plain unique index
//! covers every assignee kind.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const STATEMENTS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS resources (
		id TEXT PRIMARY KEY,
		resource_type TEXT NOT NULL,
		space_id TEXT NOT NULL,
		parent_id TEXT REFERENCES resources(id) ON DELETE CASCADE,
		title TEXT NOT NULL DEFAULT '',
		deleted_at TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_resources_parent ON resources(parent_id)",
	"CREATE INDEX IF NOT EXISTS idx_resources_space ON resources(space_id)",
	r#"
	CREATE TABLE IF NOT EXISTS roles (
		id TEXT PRIMARY KEY,
		space_id TEXT NOT NULL,
		name TEXT NOT NULL,
		source TEXT,
		source_id TEXT,
		created_at TEXT NOT NULL,
		UNIQUE(space_id, source, source_id)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS role_assignments (
		role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
		user_id TEXT NOT NULL,
		space_id TEXT NOT NULL,
		created_at TEXT NOT NULL,
		PRIMARY KEY (role_id, user_id)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_role_assignments_user ON role_assignments(space_id, user_id)",
	r#"
	CREATE TABLE IF NOT EXISTS permissions (
		id TEXT PRIMARY KEY,
		resource_id TEXT NOT NULL,
		resource_type TEXT NOT NULL,
		space_id TEXT NOT NULL,
		assignee_kind TEXT NOT NULL CHECK (assignee_kind IN ('user', 'role', 'space', 'public')),
		assignee_id TEXT NOT NULL DEFAULT '',
		permission_level TEXT,
		operations TEXT,
		inherited_from_permission_id TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		CHECK ((permission_level IS NULL) <> (operations IS NULL)),
		CHECK ((assignee_kind = 'public') = (assignee_id = ''))
	)
	"#,
	r#"
	CREATE UNIQUE INDEX IF NOT EXISTS idx_permissions_assignee
		ON permissions(resource_id, assignee_kind, assignee_id)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_permissions_inherited_from ON permissions(inherited_from_permission_id)",
	r#"
	CREATE TABLE IF NOT EXISTS evaluation_steps (
		id TEXT PRIMARY KEY,
		proposal_id TEXT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
		space_id TEXT NOT NULL,
		step_index INTEGER NOT NULL,
		title TEXT NOT NULL,
		evaluation_type TEXT NOT NULL,
		created_at TEXT NOT NULL,
		UNIQUE(proposal_id, step_index)
	)
	"#,
];

/// Create every table and index if missing. Safe to run repeatedly.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	let mut tx = pool.begin().await?;
	for statement in STATEMENTS {
		sqlx::query(statement).execute(&mut *tx).await?;
	}
	tx.commit().await?;

	tracing::info!(statements = STATEMENTS.len(), "schema migrated");
	Ok(())
}
