// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;
use trellis_permissions_core::{
	Actor, Assignee, Operation, PermissionError, PermissionLevel, SpaceId, UserId,
};
use trellis_server_db::RoleSource;

use super::support::{harness, ops};

#[tokio::test]
async fn assigning_a_role_twice_changes_nothing() {
	let h = harness().await;
	let user = UserId::generate();
	let role = h.service.create_role(h.space, "Reviewers").await.unwrap();

	h.service.assign_role(role.id, user).await.unwrap();
	let once = h.service.roles_for_user(h.space, Some(user)).await.unwrap();
	h.service.assign_role(role.id, user).await.unwrap();
	let twice = h.service.roles_for_user(h.space, Some(user)).await.unwrap();

	assert_eq!(once, HashSet::from([role.id]));
	assert_eq!(once, twice);
}

#[tokio::test]
async fn anonymous_actors_have_no_roles() {
	let h = harness().await;
	assert!(h.service.roles_for_user(h.space, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn role_changes_invalidate_cached_decisions() {
	let h = harness().await;
	let user = UserId::generate();
	let actor = Actor::user(user);
	let role = h.service.create_role(h.space, "Editors").await.unwrap();
	let page = h.page(None).await;
	h.grant(page.id, Assignee::Role { id: role.id }, PermissionLevel::EditContent)
		.await;

	assert!(h.page_ops(page.id, &actor).await.is_empty());

	h.service.assign_role(role.id, user).await.unwrap();
	assert!(h.page_ops(page.id, &actor).await.has(Operation::EditContent));

	assert!(h.service.unassign_role(role.id, user).await.unwrap());
	assert!(h.page_ops(page.id, &actor).await.is_empty());
	assert!(!h.service.unassign_role(role.id, user).await.unwrap());
}

#[tokio::test]
async fn unknown_role_cannot_be_assigned() {
	let h = harness().await;
	let err = h
		.service
		.assign_role(trellis_permissions_core::RoleId::generate(), UserId::generate())
		.await
		.unwrap_err();
	assert!(matches!(err, PermissionError::NotFound { .. }));
}

#[tokio::test]
async fn external_roles_sync_per_source() {
	let h = harness().await;
	let user = UserId::generate();
	let actor = Actor::user(user);
	let holders = h
		.service
		.upsert_external_role(h.space, RoleSource::Discord, "guild-role-1", "Holders")
		.await
		.unwrap();
	let again = h
		.service
		.upsert_external_role(h.space, RoleSource::Discord, "guild-role-1", "Token Holders")
		.await
		.unwrap();
	assert_eq!(holders.id, again.id);

	let page = h.page(None).await;
	h.grant(page.id, Assignee::Role { id: holders.id }, PermissionLevel::View)
		.await;

	h.service
		.sync_user_roles(h.space, user, RoleSource::Discord, &[holders.id])
		.await
		.unwrap();
	assert_eq!(h.page_ops(page.id, &actor).await, ops([Operation::Read]));

	h.service
		.sync_user_roles(h.space, user, RoleSource::Discord, &[])
		.await
		.unwrap();
	assert!(h.page_ops(page.id, &actor).await.is_empty());
}

#[tokio::test]
async fn roles_from_other_spaces_do_not_leak() {
	let h = harness().await;
	let user = UserId::generate();
	let foreign = h
		.service
		.create_role(SpaceId::generate(), "Reviewers")
		.await
		.unwrap();
	h.service.assign_role(foreign.id, user).await.unwrap();

	assert!(h
		.service
		.roles_for_user(h.space, Some(user))
		.await
		.unwrap()
		.is_empty());
	assert_eq!(h.service.list_roles(foreign.space_id).await.unwrap().len(), 1);
}
