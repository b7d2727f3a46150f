// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The permission service consumed by the API layer.
//!
//! Reads build an immutable [`ResolutionInput`] snapshot and hand it to the
//! pure resolver. Writes run in one transaction together with the
//! propagation they trigger, retried as a whole on transient errors and
//! serialized per resource tree.

use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;
use trellis_permissions_core::{
	select_step_rows, Actor, Assignee, EvaluationId, EvaluationStep, EvaluationType, Grant,
	MembershipFacts, NewPermissionRow, Operation, OperationSet, PermissionError, PermissionId,
	PermissionLevel, PermissionPatch, PermissionRow, ProgressionSnapshot, ResolutionInput,
	ResourceId, ResourceType, RoleId, SpaceId, StepPermissions, StepRows, StepState,
	SubscriptionTier, UserId,
};
use trellis_server_config::PermissionsConfig;
use trellis_server_db::evaluation::{fetch_step, fetch_step_permissions, fetch_steps, step_row};
use trellis_server_db::permission::{
	delete_row, delete_rows_for_resources, fetch_root_rows_for, fetch_row, fetch_rows_for,
	fetch_space_rows, find_for_assignee, has_root_rows, insert_row, require_row, update_row,
};
use trellis_server_db::propagate::nearest_ancestor_roots;
use trellis_server_db::role::{fetch_role, fetch_roles_for_user};
use trellis_server_db::tree::{
	ancestors_of, delete_subtree, descendants_of, fetch_resource, fetch_space_resources,
	insert_resource, reparent, require_resource, top_level_of,
};
use trellis_server_db::{
	propagate, resync, DbError, DeletedPermission, EvaluationStepRepository, NewResource,
	PermissionRepository, PropagationReport, Resource, ResourceTreeRepository, Role,
	RoleRepository, RoleSource, TraversalOptions, WorkflowTemplate,
};

use crate::cache::{DecisionCache, DecisionKey};
use crate::collaborators::{SpaceMembership, WorkflowProgression};
use crate::propagation::{PropagationLocks, PropagationTicket, RetryPolicy};

/// Where an effective row comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PermissionSource {
	Direct,
	Inherited {
		from_resource: ResourceId,
		root_id: PermissionId,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermission {
	pub row: PermissionRow,
	#[serde(flatten)]
	pub source: PermissionSource,
}

#[derive(Debug, Clone)]
pub struct SetPermissionOutcome {
	pub row: PermissionRow,
	/// False when an existing row for the assignee was updated.
	pub created: bool,
	pub propagation: PropagationTicket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
	pub revoked: DeletedPermission,
	pub report: PropagationReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteResourceOutcome {
	pub resources: Vec<ResourceId>,
	pub rows_removed: usize,
}

struct WrittenPermission {
	row: PermissionRow,
	created: bool,
	roots: Vec<PermissionId>,
	report: PropagationReport,
}

/// Where a resolution request lands.
struct Subject {
	space_id: SpaceId,
	proposal_id: Option<ResourceId>,
	step_id: Option<EvaluationId>,
}

/// Facts shared by every decision in one space.
struct SpaceContext {
	tier: SubscriptionTier,
	space_rows: Vec<PermissionRow>,
}

#[derive(Clone)]
pub struct PermissionService {
	pool: SqlitePool,
	config: PermissionsConfig,
	tree: ResourceTreeRepository,
	permissions: PermissionRepository,
	roles: RoleRepository,
	steps: EvaluationStepRepository,
	membership: Arc<dyn SpaceMembership>,
	progression: Arc<dyn WorkflowProgression>,
	cache: Arc<DecisionCache>,
	locks: Arc<PropagationLocks>,
	retry: RetryPolicy,
}

impl PermissionService {
	pub fn new(
		pool: SqlitePool,
		config: PermissionsConfig,
		membership: Arc<dyn SpaceMembership>,
		progression: Arc<dyn WorkflowProgression>,
	) -> Self {
		Self {
			tree: ResourceTreeRepository::new(pool.clone()).with_max_depth(config.max_traversal_depth),
			permissions: PermissionRepository::new(pool.clone())
				.with_policy(config.root_deletion_policy),
			roles: RoleRepository::new(pool.clone()),
			steps: EvaluationStepRepository::new(pool.clone()),
			cache: Arc::new(DecisionCache::new(
				config.cache_ttl(),
				config.cache_max_entries,
			)),
			locks: Arc::new(PropagationLocks::new()),
			retry: RetryPolicy::new(
				config.propagation_max_retries,
				config.propagation_base_delay(),
			),
			pool,
			config,
			membership,
			progression,
		}
	}

	pub fn config(&self) -> &PermissionsConfig {
		&self.config
	}

	pub fn cache(&self) -> &DecisionCache {
		&self.cache
	}

	fn traversal(&self) -> TraversalOptions {
		TraversalOptions {
			include_deleted: false,
			max_depth: self.config.max_traversal_depth,
		}
	}

	/// Drops cached decisions in a space. Membership collaborators call this
	/// when someone joins or leaves, and billing when the tier changes.
	pub fn invalidate_space(&self, space_id: SpaceId) -> usize {
		self.cache.invalidate_space(space_id)
	}

	/// Builds the actor for a request, asking the membership collaborator
	/// whether the user administers the space.
	pub async fn actor_for(
		&self,
		space_id: SpaceId,
		user_id: Option<UserId>,
	) -> Result<Actor, PermissionError> {
		let Some(user_id) = user_id else {
			return Ok(Actor::anonymous());
		};
		if self.membership.is_admin(space_id, user_id).await? {
			Ok(Actor::admin(user_id))
		} else {
			Ok(Actor::user(user_id))
		}
	}

	// =========================================================================
	// Decisions
	// =========================================================================

	/// Operations `actor` holds on a resource.
	///
	/// # Errors
	/// - `NotFound` if the resource (or evaluation step) does not exist.
	/// - `InvalidInput` if `resource_type` does not match the stored resource.
	/// - `TraversalBudgetExceeded` past the resolve timeout or depth limit.
	#[tracing::instrument(
		skip(self, actor),
		fields(resource_type = %resource_type, resource_id = %resource_id, actor = %actor.key())
	)]
	pub async fn resolve(
		&self,
		resource_type: ResourceType,
		resource_id: ResourceId,
		actor: &Actor,
	) -> Result<OperationSet, PermissionError> {
		let key = DecisionKey::new(resource_type, resource_id, actor.key());
		if let Some(operations) = self.cache.get(&key) {
			tracing::trace!("decision cache hit");
			return Ok(operations);
		}

		let timeout = self.config.resolve_timeout();
		let (operations, space_id) = tokio::time::timeout(
			timeout,
			self.resolve_uncached(resource_type, resource_id, actor),
		)
		.await
		.map_err(|_| {
			tracing::warn!(timeout_ms = timeout.as_millis() as u64, "resolution timed out");
			PermissionError::TraversalBudgetExceeded(format!(
				"resolving {resource_type} {resource_id} took longer than {} ms",
				timeout.as_millis()
			))
		})??;

		// Step-gated decisions follow workflow state this service is not told about.
		if !resource_type.uses_step_gate() {
			self.cache.insert(key, space_id, operations);
		}
		Ok(operations)
	}

	pub async fn can(
		&self,
		operation: Operation,
		resource_type: ResourceType,
		resource_id: ResourceId,
		actor: &Actor,
	) -> Result<bool, PermissionError> {
		Ok(self
			.resolve(resource_type, resource_id, actor)
			.await?
			.has(operation))
	}

	async fn resolve_uncached(
		&self,
		resource_type: ResourceType,
		resource_id: ResourceId,
		actor: &Actor,
	) -> Result<(OperationSet, SpaceId), DbError> {
		let mut conn = self.pool.acquire().await?;
		let subject = self.locate(&mut conn, resource_type, resource_id).await?;

		if actor.is_space_admin {
			tracing::debug!("space admin bypass");
			return Ok((OperationSet::universal(), subject.space_id));
		}

		let context = self
			.space_context(&mut conn, subject.space_id, resource_type)
			.await?;
		let input = self
			.gather(&mut conn, resource_type, resource_id, &subject, &context)
			.await?;
		let membership = self.membership_facts(&mut conn, &input, actor).await?;
		let input = input.with_membership(membership);

		let operations = trellis_permissions_core::resolve(actor, &input);
		Ok((operations, subject.space_id))
	}

	async fn locate(
		&self,
		conn: &mut SqliteConnection,
		resource_type: ResourceType,
		resource_id: ResourceId,
	) -> Result<Subject, DbError> {
		if resource_type == ResourceType::ProposalEvaluation {
			let step_id = EvaluationId::from(resource_id);
			let step = fetch_step(conn, step_id)
				.await?
				.ok_or_else(|| PermissionError::not_found("evaluation step", step_id))?;
			return Ok(Subject {
				space_id: step.space_id,
				proposal_id: Some(step.proposal_id),
				step_id: Some(step.id),
			});
		}

		let resource = require_resource(conn, resource_id, false).await?;
		if resource.resource_type != resource_type {
			return Err(PermissionError::invalid(format!(
				"{resource_id} is a {}, not a {resource_type}",
				resource.resource_type
			))
			.into());
		}
		Ok(Subject {
			space_id: resource.space_id,
			proposal_id: (resource_type == ResourceType::Proposal).then_some(resource_id),
			step_id: None,
		})
	}

	async fn space_context(
		&self,
		conn: &mut SqliteConnection,
		space_id: SpaceId,
		resource_type: ResourceType,
	) -> Result<SpaceContext, DbError> {
		let tier = self.membership.tier(space_id).await?;
		// Only pages and post categories pick anything up from the space.
		let receives_space_grants =
			matches!(resource_type, ResourceType::Page | ResourceType::PostCategory);
		let space_rows = if receives_space_grants && !tier.is_free() {
			fetch_space_rows(conn, space_id).await?
		} else {
			Vec::new()
		};
		Ok(SpaceContext { tier, space_rows })
	}

	async fn gather(
		&self,
		conn: &mut SqliteConnection,
		resource_type: ResourceType,
		resource_id: ResourceId,
		subject: &Subject,
		context: &SpaceContext,
	) -> Result<ResolutionInput, DbError> {
		let input = ResolutionInput::new(resource_type, resource_id, subject.space_id)
			.with_tier(context.tier)
			.with_space_rows(context.space_rows.clone());

		if let Some(proposal_id) = subject.proposal_id {
			// The proposal's own rows are replaced by its steps' rows.
			let selected = self.step_rows(conn, proposal_id, subject.step_id).await?;
			return Ok(input
				.with_rows(selected.active)
				.with_fallback_rows(selected.fallback));
		}

		let mut rows = fetch_rows_for(conn, resource_id).await?;
		if !resource_type.uses_tree_inheritance() {
			return Ok(input.with_rows(rows));
		}

		let inherited = self
			.nearest_inherited_roots(conn, resource_id, self.traversal())
			.await?
			.map(|(_, roots)| roots)
			.unwrap_or_default();
		// Copies of a root the live ancestor walk no longer reaches, such as
		// one above a trashed page, grant nothing.
		let live: HashSet<PermissionId> = inherited.iter().map(|root| root.id).collect();
		rows.retain(|row| row.inherited_from.map_or(true, |root_id| live.contains(&root_id)));

		Ok(input.with_rows(rows).with_inherited_rows(inherited))
	}

	async fn nearest_inherited_roots(
		&self,
		conn: &mut SqliteConnection,
		resource_id: ResourceId,
		options: TraversalOptions,
	) -> Result<Option<(ResourceId, Vec<PermissionRow>)>, DbError> {
		let mut chain = Vec::new();
		for ancestor in ancestors_of(conn, resource_id, options).await? {
			let roots = fetch_root_rows_for(conn, ancestor.id).await?;
			let found = !roots.is_empty();
			chain.push((ancestor.id, roots));
			if found {
				break;
			}
		}
		Ok(trellis_permissions_core::nearest_root_rows(chain))
	}

	async fn step_rows(
		&self,
		conn: &mut SqliteConnection,
		proposal_id: ResourceId,
		only: Option<EvaluationId>,
	) -> Result<StepRows, DbError> {
		let mut steps = fetch_step_permissions(conn, proposal_id).await?;
		if let Some(only) = only {
			steps.retain(|entry| entry.step.id == only);
		}
		let progression = self.progression_snapshot(proposal_id, &steps).await?;
		Ok(select_step_rows(&steps, &progression))
	}

	async fn progression_snapshot(
		&self,
		proposal_id: ResourceId,
		steps: &[StepPermissions],
	) -> Result<ProgressionSnapshot, PermissionError> {
		let current = self.progression.current_step_index(proposal_id).await?;
		let mut snapshot = ProgressionSnapshot::at(current);
		for entry in steps.iter().filter(|entry| entry.step.index <= current) {
			let state = StepState {
				result: self.progression.step_result(entry.step.id).await?,
				appealed: self.progression.is_appealed(entry.step.id).await?,
			};
			snapshot = snapshot.with_state(entry.step.id, state);
		}
		Ok(snapshot)
	}

	/// Roles and membership are only looked up when a gathered row needs them.
	async fn membership_facts(
		&self,
		conn: &mut SqliteConnection,
		input: &ResolutionInput,
		actor: &Actor,
	) -> Result<MembershipFacts, DbError> {
		let Some(user_id) = actor.user_id else {
			return Ok(MembershipFacts::default());
		};

		let roles = if input.needs_roles() {
			fetch_roles_for_user(conn, input.space_id, user_id).await?
		} else {
			HashSet::new()
		};
		let is_member = if input.needs_space_membership() {
			self.membership.is_member(input.space_id, user_id).await?
		} else {
			false
		};

		Ok(MembershipFacts { is_member, roles })
	}

	/// Rows that shape decisions on a resource, each tagged with its origin.
	///
	/// Inherited rows are listed once: through the local dependent when
	/// propagation has copied them, otherwise as the ancestor's root.
	#[tracing::instrument(skip(self), fields(resource_id = %resource_id))]
	pub async fn list_effective_permissions(
		&self,
		resource_id: ResourceId,
	) -> Result<Vec<EffectivePermission>, PermissionError> {
		Ok(self.effective_permissions(resource_id).await?)
	}

	async fn effective_permissions(
		&self,
		resource_id: ResourceId,
	) -> Result<Vec<EffectivePermission>, DbError> {
		let mut conn = self.pool.acquire().await?;

		let Some(resource) = fetch_resource(&mut conn, resource_id, false).await? else {
			let step_id = EvaluationId::from(resource_id);
			if fetch_step(&mut conn, step_id).await?.is_none() {
				return Err(PermissionError::not_found("resource", resource_id).into());
			}
			return Ok(fetch_rows_for(&mut conn, resource_id)
				.await?
				.into_iter()
				.map(|row| EffectivePermission {
					row,
					source: PermissionSource::Direct,
				})
				.collect());
		};

		let nearest = if resource.resource_type.uses_tree_inheritance() {
			self
				.nearest_inherited_roots(&mut conn, resource_id, self.traversal())
				.await?
		} else {
			None
		};
		let live: HashSet<PermissionId> = nearest
			.iter()
			.flat_map(|(_, roots)| roots.iter().map(|root| root.id))
			.collect();

		let mut effective = Vec::new();
		let mut covered = HashSet::new();
		for row in fetch_rows_for(&mut conn, resource_id).await? {
			let source = match row.inherited_from {
				None => PermissionSource::Direct,
				Some(root_id) if !live.contains(&root_id) => {
					tracing::debug!(permission_id = %row.id, root_id = %root_id, "skipping copy of an unreachable root");
					continue;
				}
				Some(root_id) => {
					let root = fetch_row(&mut conn, root_id).await?.ok_or_else(|| {
						tracing::error!(permission_id = %row.id, root_id = %root_id, "dependent row points at a missing root");
						PermissionError::DataIntegrity(format!(
							"permission {} inherits from missing row {root_id}",
							row.id
						))
					})?;
					covered.insert(root_id);
					PermissionSource::Inherited {
						from_resource: root.resource_id,
						root_id,
					}
				}
			};
			effective.push(EffectivePermission { row, source });
		}

		if let Some((from_resource, roots)) = nearest {
			for root in roots.into_iter().filter(|r| !covered.contains(&r.id)) {
				effective.push(EffectivePermission {
					source: PermissionSource::Inherited {
						from_resource,
						root_id: root.id,
					},
					row: root,
				});
			}
		}

		Ok(effective)
	}

	/// Ids of the live resources of one type in a space on which `actor`
	/// holds `read`, oldest first. Listings call this once instead of
	/// resolving every resource.
	///
	/// # Errors
	/// `InvalidInput` for evaluation steps, which are listed through their
	/// proposal.
	#[tracing::instrument(
		skip(self, actor),
		fields(resource_type = %resource_type, space_id = %space_id, actor = %actor.key())
	)]
	pub async fn accessible_resource_ids(
		&self,
		resource_type: ResourceType,
		space_id: SpaceId,
		actor: &Actor,
	) -> Result<Vec<ResourceId>, PermissionError> {
		if resource_type == ResourceType::ProposalEvaluation {
			return Err(PermissionError::invalid(
				"evaluation steps are listed through their proposal",
			));
		}
		Ok(self.accessible(resource_type, space_id, actor).await?)
	}

	async fn accessible(
		&self,
		resource_type: ResourceType,
		space_id: SpaceId,
		actor: &Actor,
	) -> Result<Vec<ResourceId>, DbError> {
		let mut conn = self.pool.acquire().await?;
		let resources = fetch_space_resources(&mut conn, space_id, resource_type).await?;
		if actor.is_space_admin {
			return Ok(resources.into_iter().map(|r| r.id).collect());
		}

		let context = self.space_context(&mut conn, space_id, resource_type).await?;
		let membership = self
			.space_membership_facts(&mut conn, space_id, actor, context.tier)
			.await?;

		let candidates = resources.len();
		let mut accessible = Vec::new();
		for resource in resources {
			let subject = Subject {
				space_id,
				proposal_id: (resource_type == ResourceType::Proposal).then_some(resource.id),
				step_id: None,
			};
			let input = self
				.gather(&mut conn, resource_type, resource.id, &subject, &context)
				.await?
				.with_membership(membership.clone());
			if trellis_permissions_core::resolve(actor, &input).has(Operation::Read) {
				accessible.push(resource.id);
			}
		}

		tracing::debug!(candidates, accessible = accessible.len(), "accessible resources listed");
		Ok(accessible)
	}

	/// Membership facts for many decisions in one space, fetched once.
	async fn space_membership_facts(
		&self,
		conn: &mut SqliteConnection,
		space_id: SpaceId,
		actor: &Actor,
		tier: SubscriptionTier,
	) -> Result<MembershipFacts, DbError> {
		let Some(user_id) = actor.user_id else {
			return Ok(MembershipFacts::default());
		};
		let roles = if tier.is_free() {
			HashSet::new()
		} else {
			fetch_roles_for_user(conn, space_id, user_id).await?
		};
		Ok(MembershipFacts {
			is_member: self.membership.is_member(space_id, user_id).await?,
			roles,
		})
	}

	// =========================================================================
	// Sharing writes
	// =========================================================================

	/// Grants `grant` to `assignee` on a resource, replacing any row the
	/// assignee already has there. An inherited row becomes a root.
	///
	/// Propagation runs in the same transaction unless the subtree is larger
	/// than `async_propagation_threshold`; then the row is committed first and
	/// the returned ticket completes once descendants have caught up.
	///
	/// # Errors
	/// - `NotFound` if the resource or a role assignee does not exist.
	/// - `InvalidInput` for a space or role assignee from another space, or
	///   for proposals, whose permissions are set per evaluation step.
	#[tracing::instrument(skip(self), fields(resource_id = %resource_id, assignee = %assignee))]
	pub async fn set_permission(
		&self,
		resource_id: ResourceId,
		assignee: Assignee,
		grant: Grant,
	) -> Result<SetPermissionOutcome, PermissionError> {
		let resource = self.require_resource(resource_id, false).await?;
		if resource.resource_type == ResourceType::Proposal {
			return Err(PermissionError::invalid(
				"proposal permissions are set on its evaluation steps",
			));
		}

		let guard = self.lock_tree(&resource).await?;
		let subtree = self.subtree_ids(&resource).await?;
		let deferred = subtree.len() > self.config.async_propagation_threshold;

		let written = self
			.retry
			.run("set_permission", || {
				self.write_permission(&resource, assignee, grant, !deferred)
			})
			.await?;

		tracing::info!(
			permission_id = %written.row.id,
			created = written.created,
			deferred,
			"permission set"
		);
		self.cache.invalidate_resources(&subtree);
		if resource.resource_type == ResourceType::Space {
			self.cache.invalidate_space(resource.space_id);
		}

		if !deferred {
			self.cache.invalidate_resources(&written.report.touched);
			return Ok(SetPermissionOutcome {
				row: written.row,
				created: written.created,
				propagation: PropagationTicket::completed(written.report),
			});
		}

		let (ticket, reporter) = PropagationTicket::deferred();
		let service = self.clone();
		let roots = written.roots;
		let span = tracing::info_span!("deferred_propagation", ticket = %reporter.id(), roots = roots.len());
		tokio::spawn(
			async move {
				let _guard = guard;
				let outcome = service
					.retry
					.run("deferred_propagation", || service.propagate_roots(&roots))
					.await
					.map_err(PermissionError::from);
				match &outcome {
					Ok(report) => {
						service.cache.invalidate_resources(&subtree);
						service.cache.invalidate_resources(&report.touched);
						tracing::info!(
							created = report.created,
							updated = report.updated,
							removed = report.removed,
							"deferred propagation finished"
						);
					}
					Err(e) => tracing::error!(error = %e, "deferred propagation failed"),
				}
				reporter.finish(outcome);
			}
			.instrument(span),
		);

		Ok(SetPermissionOutcome {
			row: written.row,
			created: written.created,
			propagation: ticket,
		})
	}

	async fn write_permission(
		&self,
		resource: &Resource,
		assignee: Assignee,
		grant: Grant,
		propagate_now: bool,
	) -> Result<WrittenPermission, DbError> {
		let mut tx = self.pool.begin().await?;
		check_assignee(&mut tx, resource.space_id, &assignee).await?;
		let had_roots = has_root_rows(&mut tx, resource.id).await?;

		let (row, created) = match find_for_assignee(&mut tx, resource.id, &assignee).await? {
			Some(existing) => {
				let patch = PermissionPatch {
					grant: Some(grant),
					inherited_from: if existing.is_root() { None } else { Some(None) },
				};
				(update_row(&mut tx, existing.id, &patch).await?, false)
			}
			None => {
				let row = NewPermissionRow::root(
					resource.id,
					resource.resource_type,
					resource.space_id,
					assignee,
					grant,
				);
				(insert_row(&mut tx, &row).await?, true)
			}
		};

		let mut roots = vec![row.id];
		if !had_roots && resource.resource_type.uses_tree_inheritance() {
			// The resource now shadows its subtree from the ancestor's roots.
			roots.extend(nearest_ancestor_roots(&mut tx, resource.id, self.config.max_traversal_depth).await?);
		}

		let report = if propagate_now {
			self.propagate_in(&mut tx, &roots).await?
		} else {
			PropagationReport::default()
		};
		tx.commit().await?;

		Ok(WrittenPermission {
			row,
			created,
			roots,
			report,
		})
	}

	async fn propagate_in(
		&self,
		conn: &mut SqliteConnection,
		roots: &[PermissionId],
	) -> Result<PropagationReport, DbError> {
		let mut report = PropagationReport::default();
		for root_id in roots {
			report.merge(propagate(conn, *root_id, self.config.max_traversal_depth).await?);
		}
		Ok(report)
	}

	async fn propagate_roots(&self, roots: &[PermissionId]) -> Result<PropagationReport, DbError> {
		let mut tx = self.pool.begin().await?;
		let report = self.propagate_in(&mut tx, roots).await?;
		tx.commit().await?;
		Ok(report)
	}

	/// Deletes a root row. Its dependents are detached or the call is
	/// rejected, per the configured root deletion policy.
	///
	/// # Errors
	/// - `NotFound` if the row does not exist.
	/// - `InvalidInput` for an inherited row; revoke its root instead.
	/// - `InheritanceRootInUse` under the reject policy.
	#[tracing::instrument(skip(self), fields(permission_id = %permission_id))]
	pub async fn revoke_permission(
		&self,
		permission_id: PermissionId,
	) -> Result<RevokeOutcome, PermissionError> {
		let row = self
			.permissions
			.get_row(permission_id)
			.await?
			.ok_or_else(|| PermissionError::not_found("permission", permission_id))?;
		if let Some(root_id) = row.inherited_from {
			return Err(PermissionError::invalid(format!(
				"permission {permission_id} is inherited from {root_id}; revoke the root or override it"
			)));
		}

		let (_guard, subtree) = if row.resource_type.uses_tree_inheritance() {
			let resource = self.require_resource(row.resource_id, true).await?;
			let guard = self.lock_tree(&resource).await?;
			(guard, self.subtree_ids(&resource).await?)
		} else {
			(self.locks.acquire(row.resource_id).await, vec![row.resource_id])
		};

		let outcome = self
			.retry
			.run("revoke_permission", || self.delete_permission(permission_id))
			.await?;

		self.cache.invalidate_resources(&subtree);
		self.cache.invalidate_resources(&outcome.report.touched);
		if row.resource_type == ResourceType::Space {
			self.cache.invalidate_space(row.space_id);
		}
		tracing::info!(detached = outcome.revoked.detached.len(), "permission revoked");
		Ok(outcome)
	}

	async fn delete_permission(&self, permission_id: PermissionId) -> Result<RevokeOutcome, DbError> {
		let mut tx = self.pool.begin().await?;
		let revoked = delete_row(&mut tx, permission_id, self.permissions.policy()).await?;

		let resource_id = revoked.row.resource_id;
		let report = if revoked.row.resource_type.uses_tree_inheritance()
			&& !has_root_rows(&mut tx, resource_id).await?
		{
			// The subtree falls back to the nearest ancestor's roots.
			let roots = nearest_ancestor_roots(&mut tx, resource_id, self.config.max_traversal_depth).await?;
			self.propagate_in(&mut tx, &roots).await?
		} else {
			PropagationReport::default()
		};

		tx.commit().await?;
		Ok(RevokeOutcome { revoked, report })
	}

	/// Recomputes every inherited row in a subtree. Used by repair tooling.
	#[tracing::instrument(skip(self), fields(resource_id = %resource_id))]
	pub async fn resync_subtree(
		&self,
		resource_id: ResourceId,
	) -> Result<PropagationReport, PermissionError> {
		let resource = self.require_resource(resource_id, true).await?;
		let _guard = self.lock_tree(&resource).await?;
		let subtree = self.subtree_ids(&resource).await?;

		let report = self
			.retry
			.run("resync_subtree", || self.resync_in_tx(resource_id))
			.await?;

		self.cache.invalidate_resources(&subtree);
		self.cache.invalidate_resources(&report.touched);
		Ok(report)
	}

	async fn resync_in_tx(&self, resource_id: ResourceId) -> Result<PropagationReport, DbError> {
		let mut tx = self.pool.begin().await?;
		let report = resync(&mut tx, resource_id, self.config.max_traversal_depth).await?;
		tx.commit().await?;
		Ok(report)
	}

	// =========================================================================
	// Resource lifecycle
	// =========================================================================

	/// Creates a resource with its default rows: post categories get a
	/// space-wide `full_access` root, and pages inherit their parent's
	/// effective roots.
	#[tracing::instrument(skip(self, resource), fields(resource_type = %resource.resource_type, space_id = %resource.space_id))]
	pub async fn create_resource(&self, resource: &NewResource) -> Result<Resource, PermissionError> {
		let _guard = match resource.parent_id {
			Some(parent_id) => {
				let parent = self.require_resource(parent_id, false).await?;
				Some(self.lock_tree(&parent).await?)
			}
			None => None,
		};

		let created = self
			.retry
			.run("create_resource", || self.insert_seeded(resource))
			.await?;
		tracing::info!(resource_id = %created.id, "resource created");
		Ok(created)
	}

	async fn insert_seeded(&self, resource: &NewResource) -> Result<Resource, DbError> {
		let mut tx = self.pool.begin().await?;
		let created = insert_resource(&mut tx, resource).await?;

		match created.resource_type {
			ResourceType::PostCategory => {
				let row = NewPermissionRow::root(
					created.id,
					created.resource_type,
					created.space_id,
					Assignee::Space {
						id: created.space_id,
					},
					Grant::Level(PermissionLevel::FullAccess),
				);
				insert_row(&mut tx, &row).await?;
			}
			ResourceType::Page if created.parent_id.is_some() => {
				for root_id in nearest_ancestor_roots(&mut tx, created.id, self.config.max_traversal_depth).await? {
					let root = require_row(&mut tx, root_id).await?;
					let row = NewPermissionRow::root(
						created.id,
						ResourceType::Page,
						root.space_id,
						root.assignee,
						root.grant,
					)
					.inheriting(root.id);
					insert_row(&mut tx, &row).await?;
				}
			}
			_ => {}
		}

		tx.commit().await?;
		Ok(created)
	}

	/// Hard-deletes a resource, its subtree, and every row on them. A
	/// proposal takes its evaluation steps and their rows with it.
	#[tracing::instrument(skip(self), fields(resource_id = %resource_id))]
	pub async fn delete_resource(
		&self,
		resource_id: ResourceId,
	) -> Result<DeleteResourceOutcome, PermissionError> {
		let resource = self.require_resource(resource_id, true).await?;
		let _guard = self.lock_tree(&resource).await?;

		let outcome = self
			.retry
			.run("delete_resource", || self.delete_resource_tx(&resource))
			.await?;

		self.cache.invalidate_resources(&outcome.resources);
		tracing::info!(
			resources = outcome.resources.len(),
			rows = outcome.rows_removed,
			"resource deleted"
		);
		Ok(outcome)
	}

	async fn delete_resource_tx(&self, resource: &Resource) -> Result<DeleteResourceOutcome, DbError> {
		let mut tx = self.pool.begin().await?;

		let mut row_owners = vec![resource.id];
		row_owners.extend(
			descendants_of(&mut tx, resource.id, self.traversal().including_deleted())
				.await?
				.into_iter()
				.map(|r| r.id),
		);
		if resource.resource_type == ResourceType::Proposal {
			row_owners.extend(
				fetch_steps(&mut tx, resource.id)
					.await?
					.into_iter()
					.map(|step| ResourceId::from(step.id)),
			);
		}

		let rows_removed = delete_rows_for_resources(&mut tx, &row_owners).await?;
		let resources = delete_subtree(&mut tx, resource.id, self.config.max_traversal_depth).await?;
		tx.commit().await?;

		Ok(DeleteResourceOutcome {
			resources,
			rows_removed,
		})
	}

	/// Soft-deletes a resource. Decisions on it report `NotFound` until it is
	/// restored.
	#[tracing::instrument(skip(self), fields(resource_id = %resource_id))]
	pub async fn trash_resource(&self, resource_id: ResourceId) -> Result<bool, PermissionError> {
		let resource = self.require_resource(resource_id, true).await?;
		let subtree = self.subtree_ids(&resource).await?;
		let changed = self.tree.soft_delete_resource(resource_id).await?;
		self.cache.invalidate_resources(&subtree);
		Ok(changed)
	}

	#[tracing::instrument(skip(self), fields(resource_id = %resource_id))]
	pub async fn restore_resource(&self, resource_id: ResourceId) -> Result<bool, PermissionError> {
		let resource = self.require_resource(resource_id, true).await?;
		let subtree = self.subtree_ids(&resource).await?;
		let changed = self.tree.restore_resource(resource_id).await?;
		self.cache.invalidate_resources(&subtree);
		Ok(changed)
	}

	/// Moves a page and brings the inherited rows of its subtree in line
	/// with the new position.
	#[tracing::instrument(skip(self), fields(resource_id = %resource_id, parent_id = ?new_parent))]
	pub async fn move_resource(
		&self,
		resource_id: ResourceId,
		new_parent: Option<ResourceId>,
	) -> Result<PropagationReport, PermissionError> {
		let resource = self.require_resource(resource_id, true).await?;
		let _guards = self.lock_move(&resource, new_parent).await?;
		let subtree = self.subtree_ids(&resource).await?;

		let report = self
			.retry
			.run("move_resource", || self.move_in_tx(resource_id, new_parent))
			.await?;

		self.cache.invalidate_resources(&subtree);
		self.cache.invalidate_resources(&report.touched);
		Ok(report)
	}

	async fn move_in_tx(
		&self,
		resource_id: ResourceId,
		new_parent: Option<ResourceId>,
	) -> Result<PropagationReport, DbError> {
		let depth = self.config.max_traversal_depth;
		let mut tx = self.pool.begin().await?;

		let previous_roots = nearest_ancestor_roots(&mut tx, resource_id, depth).await?;
		reparent(&mut tx, resource_id, new_parent, depth).await?;
		// Drop what the old position handed down, then inherit from the new one.
		let mut report = self.propagate_in(&mut tx, &previous_roots).await?;
		report.merge(resync(&mut tx, resource_id, depth).await?);

		tx.commit().await?;
		Ok(report)
	}

	async fn require_resource(
		&self,
		resource_id: ResourceId,
		include_deleted: bool,
	) -> Result<Resource, DbError> {
		let mut conn = self.pool.acquire().await?;
		require_resource(&mut conn, resource_id, include_deleted).await
	}

	/// Locks the tree holding `resource`. The top-level id is read again once
	/// the lock is held, since a move may have re-rooted the resource while
	/// this call waited.
	async fn lock_tree(&self, resource: &Resource) -> Result<OwnedMutexGuard<()>, DbError> {
		let mut key = self.tree_of(resource).await?;
		loop {
			let guard = self.locks.acquire(key).await;
			let current = self.tree_of(resource).await?;
			if current == key {
				return Ok(guard);
			}
			tracing::debug!(resource_id = %resource.id, from = %key, to = %current, "tree changed while waiting for its lock");
			drop(guard);
			key = current;
		}
	}

	/// Locks both the source and destination trees of a move, with the same
	/// re-check as [`Self::lock_tree`].
	async fn lock_move(
		&self,
		resource: &Resource,
		new_parent: Option<ResourceId>,
	) -> Result<Vec<OwnedMutexGuard<()>>, DbError> {
		let mut trees = self.move_trees(resource, new_parent).await?;
		loop {
			let guards = self.locks.acquire_all(trees.clone()).await;
			let current = self.move_trees(resource, new_parent).await?;
			if current == trees {
				return Ok(guards);
			}
			drop(guards);
			trees = current;
		}
	}

	async fn move_trees(
		&self,
		resource: &Resource,
		new_parent: Option<ResourceId>,
	) -> Result<BTreeSet<ResourceId>, DbError> {
		let mut trees = BTreeSet::from([self.tree_of(resource).await?]);
		match new_parent {
			Some(parent_id) => {
				let parent = self.require_resource(parent_id, true).await?;
				trees.insert(self.tree_of(&parent).await?);
			}
			None => {
				trees.insert(resource.id);
			}
		}
		Ok(trees)
	}

	/// Lock key for writes under `resource`.
	async fn tree_of(&self, resource: &Resource) -> Result<ResourceId, DbError> {
		if !resource.resource_type.uses_tree_inheritance() {
			return Ok(resource.id);
		}
		let mut conn = self.pool.acquire().await?;
		top_level_of(&mut conn, resource.id, self.config.max_traversal_depth).await
	}

	/// `resource` and everything under it, deleted pages included.
	async fn subtree_ids(&self, resource: &Resource) -> Result<Vec<ResourceId>, DbError> {
		let mut ids = vec![resource.id];
		if resource.resource_type.uses_tree_inheritance() {
			let mut conn = self.pool.acquire().await?;
			ids.extend(
				descendants_of(&mut conn, resource.id, self.traversal().including_deleted())
					.await?
					.into_iter()
					.map(|r| r.id),
			);
		}
		Ok(ids)
	}

	// =========================================================================
	// Roles
	// =========================================================================

	pub async fn roles_for_user(
		&self,
		space_id: SpaceId,
		user_id: Option<UserId>,
	) -> Result<HashSet<RoleId>, PermissionError> {
		Ok(self.roles.roles_for_user(space_id, user_id).await?)
	}

	pub async fn create_role(&self, space_id: SpaceId, name: &str) -> Result<Role, PermissionError> {
		Ok(self.roles.create_role(space_id, name).await?)
	}

	pub async fn list_roles(&self, space_id: SpaceId) -> Result<Vec<Role>, PermissionError> {
		Ok(self.roles.list_roles(space_id).await?)
	}

	pub async fn upsert_external_role(
		&self,
		space_id: SpaceId,
		source: RoleSource,
		source_id: &str,
		name: &str,
	) -> Result<Role, PermissionError> {
		Ok(self
			.roles
			.upsert_external_role(space_id, source, source_id, name)
			.await?)
	}

	pub async fn assign_role(&self, role_id: RoleId, user_id: UserId) -> Result<(), PermissionError> {
		let role = self.require_role(role_id).await?;
		self.roles.assign_role(role_id, user_id).await?;
		self.cache.invalidate_space(role.space_id);
		Ok(())
	}

	pub async fn unassign_role(&self, role_id: RoleId, user_id: UserId) -> Result<bool, PermissionError> {
		let role = self.require_role(role_id).await?;
		let removed = self.roles.unassign_role(role_id, user_id).await?;
		if removed {
			self.cache.invalidate_space(role.space_id);
		}
		Ok(removed)
	}

	/// Replaces a user's roles from one external source.
	pub async fn sync_user_roles(
		&self,
		space_id: SpaceId,
		user_id: UserId,
		source: RoleSource,
		role_ids: &[RoleId],
	) -> Result<(), PermissionError> {
		self
			.roles
			.sync_user_roles(space_id, user_id, source, role_ids)
			.await?;
		self.cache.invalidate_space(space_id);
		Ok(())
	}

	async fn require_role(&self, role_id: RoleId) -> Result<Role, PermissionError> {
		self
			.roles
			.get_role(role_id)
			.await?
			.ok_or_else(|| PermissionError::not_found("role", role_id))
	}

	// =========================================================================
	// Evaluation steps
	// =========================================================================

	pub async fn add_evaluation_step(
		&self,
		proposal_id: ResourceId,
		title: &str,
		evaluation_type: EvaluationType,
	) -> Result<EvaluationStep, PermissionError> {
		Ok(self.steps.add_step(proposal_id, title, evaluation_type).await?)
	}

	pub async fn evaluation_steps(
		&self,
		proposal_id: ResourceId,
	) -> Result<Vec<StepPermissions>, PermissionError> {
		Ok(self.steps.steps_with_permissions(proposal_id).await?)
	}

	/// Grants on one evaluation step, replacing the assignee's existing row.
	#[tracing::instrument(skip(self), fields(evaluation_id = %evaluation_id, assignee = %assignee))]
	pub async fn set_step_permission(
		&self,
		evaluation_id: EvaluationId,
		assignee: Assignee,
		grant: Grant,
	) -> Result<PermissionRow, PermissionError> {
		Ok(self
			.retry
			.run("set_step_permission", || {
				self.write_step_permission(evaluation_id, assignee, grant)
			})
			.await?)
	}

	async fn write_step_permission(
		&self,
		evaluation_id: EvaluationId,
		assignee: Assignee,
		grant: Grant,
	) -> Result<PermissionRow, DbError> {
		let mut tx = self.pool.begin().await?;
		let step = fetch_step(&mut tx, evaluation_id)
			.await?
			.ok_or_else(|| PermissionError::not_found("evaluation step", evaluation_id))?;
		check_assignee(&mut tx, step.space_id, &assignee).await?;

		let row = match find_for_assignee(&mut tx, step.id.into(), &assignee).await? {
			Some(existing) => {
				let patch = PermissionPatch {
					grant: Some(grant),
					inherited_from: None,
				};
				update_row(&mut tx, existing.id, &patch).await?
			}
			None => insert_row(&mut tx, &step_row(&step, assignee, grant)).await?,
		};

		tx.commit().await?;
		Ok(row)
	}

	/// Copies a workflow template's steps and rows onto a proposal.
	///
	/// # Errors
	/// `InvalidInput` if a template row names another space or one of its
	/// roles.
	#[tracing::instrument(skip(self, template), fields(proposal_id = %proposal_id))]
	pub async fn apply_workflow_template(
		&self,
		proposal_id: ResourceId,
		template: &WorkflowTemplate,
	) -> Result<Vec<StepPermissions>, PermissionError> {
		self.check_template(proposal_id, template).await?;
		Ok(self
			.steps
			.apply_workflow_template(proposal_id, template)
			.await?)
	}

	async fn check_template(
		&self,
		proposal_id: ResourceId,
		template: &WorkflowTemplate,
	) -> Result<(), DbError> {
		let mut conn = self.pool.acquire().await?;
		let proposal = require_resource(&mut conn, proposal_id, false).await?;
		for permission in template.steps.iter().flat_map(|step| &step.permissions) {
			check_assignee(&mut conn, proposal.space_id, &permission.assignee).await?;
		}
		Ok(())
	}
}

/// Space assignees must name the resource's own space, and role assignees a
/// role of that space.
async fn check_assignee(
	conn: &mut SqliteConnection,
	space_id: SpaceId,
	assignee: &Assignee,
) -> Result<(), DbError> {
	match assignee {
		Assignee::Space { id } if *id != space_id => Err(PermissionError::invalid(format!(
			"space assignee {id} does not match resource space {space_id}"
		))
		.into()),
		Assignee::Role { id } => {
			let role = fetch_role(conn, *id)
				.await?
				.ok_or_else(|| PermissionError::not_found("role", id))?;
			if role.space_id != space_id {
				return Err(PermissionError::invalid(format!(
					"role {id} belongs to space {}, not {space_id}",
					role.space_id
				))
				.into());
			}
			Ok(())
		}
		_ => Ok(()),
	}
}
