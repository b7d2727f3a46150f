// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for the Trellis permission engine.
//!
//! Repositories wrap a [`SqlitePool`](sqlx::SqlitePool) and expose an
//! `async_trait` store trait each. The free functions in every module take a
//! bare `SqliteConnection` so that the service layer can compose them inside
//! one transaction.

pub mod error;
pub mod evaluation;
pub mod permission;
pub mod pool;
pub mod propagate;
pub mod role;
pub mod schema;
pub mod testing;
pub mod tree;
pub mod types;

pub use error::{DbError, Result};
pub use evaluation::{
	EvaluationStepRepository, EvaluationStepStore, TemplatePermission, TemplateStep,
	WorkflowTemplate,
};
pub use permission::{DeletedPermission, PermissionRepository, PermissionStore};
pub use pool::create_pool;
pub use propagate::{propagate, resync, PropagationReport};
pub use role::{RoleRepository, RoleStore};
pub use schema::run_migrations;
pub use tree::{ResourceTreeRepository, ResourceTreeStore};
pub use types::{NewResource, Resource, Role, RoleSource, TraversalOptions};
