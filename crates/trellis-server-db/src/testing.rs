// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use trellis_permissions_core::{ResourceId, ResourceType, SpaceId};

use crate::schema::run_migrations;

/// In-memory database with the full schema.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str(":memory:")
		.unwrap()
		.foreign_keys(true)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool");

	run_migrations(&pool).await.expect("Failed to migrate test pool");
	pool
}

/// Insert a resource row directly, bypassing validation.
pub async fn insert_test_resource(
	pool: &SqlitePool,
	resource_type: ResourceType,
	space_id: SpaceId,
	parent_id: Option<ResourceId>,
) -> ResourceId {
	let id = ResourceId::generate();
	let now = Utc::now().to_rfc3339();
	sqlx::query(
		r#"
		INSERT INTO resources (id, resource_type, space_id, parent_id, title, created_at, updated_at)
		VALUES (?, ?, ?, ?, '', ?, ?)
		"#,
	)
	.bind(id.to_string())
	.bind(resource_type.as_str())
	.bind(space_id.to_string())
	.bind(parent_id.map(|p| p.to_string()))
	.bind(&now)
	.bind(&now)
	.execute(pool)
	.await
	.unwrap();
	id
}

/// Point `id` at `parent_id` without any cycle checks.
pub async fn force_parent(pool: &SqlitePool, id: ResourceId, parent_id: ResourceId) {
	sqlx::query("UPDATE resources SET parent_id = ? WHERE id = ?")
		.bind(parent_id.to_string())
		.bind(id.to_string())
		.execute(pool)
		.await
		.unwrap();
}
