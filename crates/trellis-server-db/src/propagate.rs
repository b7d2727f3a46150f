// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Copy-down of page permissions.
//!
//! A root row on a page is copied as a dependent row onto every descendant
//! page that is not shadowed by a closer page with root rows of its own.
//! Everything here runs on the caller's connection, which is expected to be
//! inside a transaction so that a failure leaves no partial state.

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::collections::{BTreeSet, HashSet};
use trellis_permissions_core::{
	NewPermissionRow, PermissionError, PermissionId, PermissionPatch, ResourceId, ResourceType,
};

use crate::error::DbError;
use crate::permission::{
	fetch_dependents, fetch_root_rows_for, find_for_assignee, has_root_rows, insert_row,
	require_row, update_row,
};
use crate::tree::{ancestors_of, descendants_of};
use crate::types::TraversalOptions;

/// Counts of what a propagation run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
	pub roots: Vec<PermissionId>,
	pub created: usize,
	pub updated: usize,
	pub removed: usize,
	/// Resources whose rows were written.
	pub touched: BTreeSet<ResourceId>,
}

impl PropagationReport {
	pub fn merge(&mut self, other: PropagationReport) {
		self.roots.extend(other.roots);
		self.created += other.created;
		self.updated += other.updated;
		self.removed += other.removed;
		self.touched.extend(other.touched);
	}

	pub fn changed(&self) -> bool {
		self.created + self.updated + self.removed > 0
	}
}

/// Descendant pages of `resource_id` that inherit from its root rows.
///
/// Deleted pages are included so a restored page is already consistent. A
/// page with root rows of its own is shadowed together with its subtree.
pub async fn propagation_targets(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
	max_depth: usize,
) -> Result<Vec<ResourceId>, DbError> {
	let options = TraversalOptions {
		include_deleted: true,
		max_depth,
	};
	let descendants = descendants_of(conn, resource_id, options).await?;

	let mut shadowed = HashSet::new();
	let mut targets = Vec::with_capacity(descendants.len());
	for node in descendants {
		let parent_shadowed = node
			.parent_id
			.is_some_and(|parent| shadowed.contains(&parent));
		if parent_shadowed || has_root_rows(conn, node.id).await? {
			shadowed.insert(node.id);
			continue;
		}
		targets.push(node.id);
	}

	Ok(targets)
}

/// Bring every dependent of one root row in line with the tree.
///
/// # Errors
/// - `NotFound` if the row does not exist.
/// - `InvalidInput` if the row is itself a dependent.
#[tracing::instrument(skip(conn), fields(permission_id = %root_id))]
pub async fn propagate(
	conn: &mut SqliteConnection,
	root_id: PermissionId,
	max_depth: usize,
) -> Result<PropagationReport, DbError> {
	let root = require_row(conn, root_id).await?;
	if !root.is_root() {
		return Err(PermissionError::invalid(format!(
			"permission {root_id} is inherited; propagate its root instead"
		))
		.into());
	}

	let mut report = PropagationReport {
		roots: vec![root_id],
		..Default::default()
	};
	if !root.resource_type.uses_tree_inheritance() {
		return Ok(report);
	}

	let targets = propagation_targets(conn, root.resource_id, max_depth).await?;
	let target_set: HashSet<ResourceId> = targets.iter().copied().collect();

	for target in &targets {
		match find_for_assignee(conn, *target, &root.assignee).await? {
			Some(existing) if existing.inherited_from == Some(root.id) => {
				if existing.grant != root.grant {
					let patch = PermissionPatch {
						grant: Some(root.grant),
						inherited_from: None,
					};
					update_row(conn, existing.id, &patch).await?;
					report.updated += 1;
					report.touched.insert(*target);
				}
			}
			Some(existing) if existing.inherited_from.is_some() => {
				let patch = PermissionPatch {
					grant: Some(root.grant),
					inherited_from: Some(Some(root.id)),
				};
				update_row(conn, existing.id, &patch).await?;
				report.updated += 1;
				report.touched.insert(*target);
			}
			// Targets never carry root rows.
			Some(_) => {}
			None => {
				let row = NewPermissionRow::root(
					*target,
					ResourceType::Page,
					root.space_id,
					root.assignee,
					root.grant,
				)
				.inheriting(root.id);
				insert_row(conn, &row).await?;
				report.created += 1;
				report.touched.insert(*target);
			}
		}
	}

	for dependent in fetch_dependents(conn, root.id).await? {
		if target_set.contains(&dependent.resource_id) {
			continue;
		}
		sqlx::query("DELETE FROM permissions WHERE id = ?")
			.bind(dependent.id.to_string())
			.execute(&mut *conn)
			.await?;
		report.removed += 1;
		report.touched.insert(dependent.resource_id);
	}

	tracing::debug!(
		created = report.created,
		updated = report.updated,
		removed = report.removed,
		"root propagated"
	);
	Ok(report)
}

/// Root rows of the nearest ancestor holding any, walking through deleted
/// ancestors.
pub async fn nearest_ancestor_roots(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
	max_depth: usize,
) -> Result<Vec<PermissionId>, DbError> {
	let options = TraversalOptions {
		include_deleted: true,
		max_depth,
	};
	for ancestor in ancestors_of(conn, resource_id, options).await? {
		let roots = fetch_root_rows_for(conn, ancestor.id).await?;
		if !roots.is_empty() {
			return Ok(roots.into_iter().map(|r| r.id).collect());
		}
	}
	Ok(Vec::new())
}

/// Recompute every inherited row in the subtree of `resource_id`.
///
/// Propagates the nearest ancestor's roots, the resource's own roots, and the
/// roots of every descendant. Target sets of different roots never overlap,
/// so the order does not matter.
#[tracing::instrument(skip(conn), fields(resource_id = %resource_id))]
pub async fn resync(
	conn: &mut SqliteConnection,
	resource_id: ResourceId,
	max_depth: usize,
) -> Result<PropagationReport, DbError> {
	let mut roots = nearest_ancestor_roots(conn, resource_id, max_depth).await?;
	roots.extend(
		fetch_root_rows_for(conn, resource_id)
			.await?
			.into_iter()
			.map(|r| r.id),
	);

	let options = TraversalOptions {
		include_deleted: true,
		max_depth,
	};
	for node in descendants_of(conn, resource_id, options).await? {
		roots.extend(
			fetch_root_rows_for(conn, node.id)
				.await?
				.into_iter()
				.map(|r| r.id),
		);
	}

	let mut report = PropagationReport::default();
	for root_id in roots {
		report.merge(propagate(conn, root_id, max_depth).await?);
	}

	tracing::info!(
		roots = report.roots.len(),
		created = report.created,
		updated = report.updated,
		removed = report.removed,
		"subtree resynchronised"
	);
	Ok(report)
}
