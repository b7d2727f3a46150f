// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Facts owned by other services.
//!
//! Space membership and workflow progression are not stored by this crate.
//! The service asks for them through these traits while building a
//! resolution snapshot. The in-memory implementations back tests and the
//! admin tooling.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use trellis_permissions_core::{
	EvaluationId, PermissionError, ResourceId, SpaceId, StepResult, SubscriptionTier, UserId,
};

#[async_trait]
pub trait SpaceMembership: Send + Sync {
	async fn is_member(&self, space_id: SpaceId, user_id: UserId) -> Result<bool, PermissionError>;
	async fn is_admin(&self, space_id: SpaceId, user_id: UserId) -> Result<bool, PermissionError>;
	/// The space's subscription tier. Billing owns this fact.
	async fn tier(&self, space_id: SpaceId) -> Result<SubscriptionTier, PermissionError>;
}

/// Review progress of proposals.
#[async_trait]
pub trait WorkflowProgression: Send + Sync {
	/// Index of the step currently under way. Proposals that have not entered
	/// review report 0.
	async fn current_step_index(&self, proposal_id: ResourceId) -> Result<u32, PermissionError>;
	async fn step_result(
		&self,
		evaluation_id: EvaluationId,
	) -> Result<Option<StepResult>, PermissionError>;
	async fn is_appealed(&self, evaluation_id: EvaluationId) -> Result<bool, PermissionError>;
}

#[derive(Debug, Default)]
pub struct InMemorySpaceMembership {
	/// space -> user -> is_admin
	members: RwLock<HashMap<SpaceId, HashMap<UserId, bool>>>,
	/// Spaces not listed are on the default paid tier.
	tiers: RwLock<HashMap<SpaceId, SubscriptionTier>>,
}

impl InMemorySpaceMembership {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_member(&self, space_id: SpaceId, user_id: UserId) {
		self
			.members
			.write()
			.entry(space_id)
			.or_default()
			.entry(user_id)
			.or_insert(false);
	}

	pub fn add_admin(&self, space_id: SpaceId, user_id: UserId) {
		self
			.members
			.write()
			.entry(space_id)
			.or_default()
			.insert(user_id, true);
	}

	pub fn set_tier(&self, space_id: SpaceId, tier: SubscriptionTier) {
		self.tiers.write().insert(space_id, tier);
	}

	pub fn remove_member(&self, space_id: SpaceId, user_id: UserId) -> bool {
		self
			.members
			.write()
			.get_mut(&space_id)
			.is_some_and(|users| users.remove(&user_id).is_some())
	}
}

#[async_trait]
impl SpaceMembership for InMemorySpaceMembership {
	async fn is_member(&self, space_id: SpaceId, user_id: UserId) -> Result<bool, PermissionError> {
		Ok(self
			.members
			.read()
			.get(&space_id)
			.is_some_and(|users| users.contains_key(&user_id)))
	}

	async fn is_admin(&self, space_id: SpaceId, user_id: UserId) -> Result<bool, PermissionError> {
		Ok(self
			.members
			.read()
			.get(&space_id)
			.and_then(|users| users.get(&user_id).copied())
			.unwrap_or(false))
	}

	async fn tier(&self, space_id: SpaceId) -> Result<SubscriptionTier, PermissionError> {
		Ok(self
			.tiers
			.read()
			.get(&space_id)
			.copied()
			.unwrap_or_default())
	}
}

#[derive(Debug, Default)]
pub struct InMemoryWorkflowProgression {
	current: RwLock<HashMap<ResourceId, u32>>,
	results: RwLock<HashMap<EvaluationId, StepResult>>,
	appealed: RwLock<HashSet<EvaluationId>>,
}

impl InMemoryWorkflowProgression {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_current_step(&self, proposal_id: ResourceId, index: u32) {
		self.current.write().insert(proposal_id, index);
	}

	pub fn record_result(&self, evaluation_id: EvaluationId, result: StepResult) {
		self.results.write().insert(evaluation_id, result);
	}

	pub fn appeal(&self, evaluation_id: EvaluationId) {
		self.appealed.write().insert(evaluation_id);
	}

	pub fn close_appeal(&self, evaluation_id: EvaluationId) {
		self.appealed.write().remove(&evaluation_id);
	}
}

#[async_trait]
impl WorkflowProgression for InMemoryWorkflowProgression {
	async fn current_step_index(&self, proposal_id: ResourceId) -> Result<u32, PermissionError> {
		Ok(self.current.read().get(&proposal_id).copied().unwrap_or(0))
	}

	async fn step_result(
		&self,
		evaluation_id: EvaluationId,
	) -> Result<Option<StepResult>, PermissionError> {
		Ok(self.results.read().get(&evaluation_id).copied())
	}

	async fn is_appealed(&self, evaluation_id: EvaluationId) -> Result<bool, PermissionError> {
		Ok(self.appealed.read().contains(&evaluation_id))
	}
}
