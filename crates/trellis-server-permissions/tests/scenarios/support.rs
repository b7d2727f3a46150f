// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use trellis_permissions_core::{
	Actor, Assignee, Grant, Operation, OperationSet, PermissionLevel, ResourceId, ResourceType,
	SpaceId, UserId,
};
use trellis_server_config::PermissionsConfig;
use trellis_server_db::testing::create_test_pool;
use trellis_server_db::{NewResource, Resource};
use trellis_server_permissions::{
	InMemorySpaceMembership, InMemoryWorkflowProgression, PermissionService,
};

pub struct Harness {
	pub service: PermissionService,
	pub membership: Arc<InMemorySpaceMembership>,
	pub progression: Arc<InMemoryWorkflowProgression>,
	pub space: SpaceId,
}

pub async fn harness() -> Harness {
	harness_with(PermissionsConfig::default()).await
}

pub async fn harness_with(config: PermissionsConfig) -> Harness {
	let pool = create_test_pool().await;
	let membership = Arc::new(InMemorySpaceMembership::new());
	let progression = Arc::new(InMemoryWorkflowProgression::new());
	let service = PermissionService::new(pool, config, membership.clone(), progression.clone());
	Harness {
		service,
		membership,
		progression,
		space: SpaceId::generate(),
	}
}

impl Harness {
	pub fn member(&self) -> UserId {
		let user = UserId::generate();
		self.membership.add_member(self.space, user);
		user
	}

	pub async fn page(&self, parent: Option<ResourceId>) -> Resource {
		self
			.service
			.create_resource(&NewResource::page(self.space, parent))
			.await
			.unwrap()
	}

	pub async fn resource(&self, resource_type: ResourceType) -> Resource {
		self
			.service
			.create_resource(&NewResource::new(resource_type, self.space))
			.await
			.unwrap()
	}

	pub async fn grant(&self, resource_id: ResourceId, assignee: Assignee, grant: impl Into<Grant>) {
		self
			.service
			.set_permission(resource_id, assignee, grant.into())
			.await
			.unwrap();
	}

	pub fn space_assignee(&self) -> Assignee {
		Assignee::Space { id: self.space }
	}

	pub async fn page_ops(&self, resource_id: ResourceId, actor: &Actor) -> OperationSet {
		self
			.service
			.resolve(ResourceType::Page, resource_id, actor)
			.await
			.unwrap()
	}
}

pub fn level(level: PermissionLevel) -> OperationSet {
	level.operations()
}

pub fn ops<const N: usize>(operations: [Operation; N]) -> OperationSet {
	OperationSet::from_iter(operations)
}
