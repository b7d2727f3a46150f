// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;
use trellis_permissions_core::{
	free_member_operations, Actor, Assignee, Grant, Operation, PermissionLevel, ResourceId,
	ResourceType, SubscriptionTier, UserId,
};

use super::support::{harness, level, ops};

fn ids<const N: usize>(ids: [ResourceId; N]) -> HashSet<ResourceId> {
	HashSet::from(ids)
}

#[tokio::test]
async fn delete_any_page_reaches_every_page() {
	let h = harness().await;
	let member = Actor::user(h.member());
	let space = h.resource(ResourceType::Space).await;
	let top = h.page(None).await;
	let nested = h.page(Some(top.id)).await;
	h.grant(
		space.id,
		h.space_assignee(),
		Grant::Operations(ops([Operation::DeleteAnyPage])),
	)
	.await;

	assert_eq!(h.page_ops(top.id, &member).await, ops([Operation::Delete]));
	assert_eq!(h.page_ops(nested.id, &member).await, ops([Operation::Delete]));
	assert!(h.page_ops(top.id, &Actor::user(UserId::generate())).await.is_empty());

	let proposal = h.resource(ResourceType::Proposal).await;
	let on_proposal = h
		.service
		.resolve(ResourceType::Proposal, proposal.id, &member)
		.await
		.unwrap();
	assert!(!on_proposal.has(Operation::Delete));
}

#[tokio::test]
async fn forum_moderators_moderate_every_category() {
	let h = harness().await;
	let user = UserId::generate();
	let role = h.service.create_role(h.space, "Moderators").await.unwrap();
	h.service.assign_role(role.id, user).await.unwrap();
	let space = h.resource(ResourceType::Space).await;
	let general = h.resource(ResourceType::PostCategory).await;
	let announcements = h.resource(ResourceType::PostCategory).await;

	h.grant(
		space.id,
		Assignee::Role { id: role.id },
		Grant::Operations(ops([Operation::ModerateForums])),
	)
	.await;

	for category in [general.id, announcements.id] {
		let granted = h
			.service
			.resolve(ResourceType::PostCategory, category, &Actor::user(user))
			.await
			.unwrap();
		assert_eq!(granted, level(PermissionLevel::Moderator));
	}
}

#[tokio::test]
async fn free_spaces_ignore_shared_rows_and_roles() {
	let h = harness().await;
	h.membership.set_tier(h.space, SubscriptionTier::Free);
	let member = UserId::generate();
	h.membership.add_member(h.space, member);
	let outsider = UserId::generate();
	let role = h.service.create_role(h.space, "Editors").await.unwrap();
	h.service.assign_role(role.id, outsider).await.unwrap();

	let page = h.page(None).await;
	h.grant(page.id, Assignee::Role { id: role.id }, PermissionLevel::FullAccess)
		.await;
	h.grant(page.id, Assignee::Public, PermissionLevel::View).await;

	assert_eq!(
		h.page_ops(page.id, &Actor::user(member)).await,
		free_member_operations(ResourceType::Page)
	);
	assert_eq!(
		h.page_ops(page.id, &Actor::user(outsider)).await,
		ops([Operation::Read])
	);
	assert_eq!(
		h.page_ops(page.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
}

#[tokio::test]
async fn free_tier_post_categories_use_defaults() {
	let h = harness().await;
	h.membership.set_tier(h.space, SubscriptionTier::Free);
	let member = Actor::user(h.member());
	let category = h.resource(ResourceType::PostCategory).await;

	let granted = h
		.service
		.resolve(ResourceType::PostCategory, category.id, &member)
		.await
		.unwrap();
	assert_eq!(granted, free_member_operations(ResourceType::PostCategory));
	assert!(!granted.has(Operation::GrantPermissions));
}

#[tokio::test]
async fn accessible_pages_follow_resolution() {
	let h = harness().await;
	let member = h.member();
	let shared = h.page(None).await;
	h.grant(shared.id, h.space_assignee(), PermissionLevel::View).await;
	let public = h.page(None).await;
	h.grant(public.id, Assignee::Public, PermissionLevel::View).await;
	let private = h.page(None).await;
	let trashed = h.page(None).await;
	h.grant(trashed.id, Assignee::Public, PermissionLevel::View).await;
	assert!(h.service.trash_resource(trashed.id).await.unwrap());

	let for_member = h
		.service
		.accessible_resource_ids(ResourceType::Page, h.space, &Actor::user(member))
		.await
		.unwrap();
	assert_eq!(for_member.into_iter().collect::<HashSet<_>>(), ids([shared.id, public.id]));

	let for_anonymous = h
		.service
		.accessible_resource_ids(ResourceType::Page, h.space, &Actor::anonymous())
		.await
		.unwrap();
	assert_eq!(for_anonymous.into_iter().collect::<HashSet<_>>(), ids([public.id]));

	let admin = UserId::generate();
	let for_admin = h
		.service
		.accessible_resource_ids(ResourceType::Page, h.space, &Actor::admin(admin))
		.await
		.unwrap();
	assert_eq!(for_admin.into_iter().collect::<HashSet<_>>(), ids([shared.id, public.id, private.id]));
}

#[tokio::test]
async fn accessible_pages_skip_children_of_trashed_pages() {
	let h = harness().await;
	let top = h.page(None).await;
	h.grant(top.id, Assignee::Public, PermissionLevel::View).await;
	let middle = h.page(Some(top.id)).await;
	let leaf = h.page(Some(middle.id)).await;

	let before = h
		.service
		.accessible_resource_ids(ResourceType::Page, h.space, &Actor::anonymous())
		.await
		.unwrap();
	assert_eq!(before.into_iter().collect::<HashSet<_>>(), ids([top.id, middle.id, leaf.id]));

	assert!(h.service.trash_resource(middle.id).await.unwrap());
	let after = h
		.service
		.accessible_resource_ids(ResourceType::Page, h.space, &Actor::anonymous())
		.await
		.unwrap();
	assert_eq!(after.into_iter().collect::<HashSet<_>>(), ids([top.id]));
}
