// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use proptest::prelude::*;
use trellis_permissions_core::{
	Actor, Assignee, Operation, OperationSet, PermissionError, PermissionLevel, ResourceId,
	ResourceType, UserId,
};

use super::support::{harness, level, ops};

#[tokio::test]
async fn admin_gets_every_operation_without_rows() {
	let h = harness().await;
	let admin = Actor::admin(UserId::generate());

	let page = h.page(None).await;
	let space = h.resource(ResourceType::Space).await;
	let proposal = h.resource(ResourceType::Proposal).await;

	for (resource_type, id) in [
		(ResourceType::Page, page.id),
		(ResourceType::Space, space.id),
		(ResourceType::Proposal, proposal.id),
	] {
		let granted = h.service.resolve(resource_type, id, &admin).await.unwrap();
		assert_eq!(granted, OperationSet::universal(), "{resource_type}");
	}
	assert!(h.service.cache().is_empty());
}

#[tokio::test]
async fn admin_bypass_still_requires_the_resource() {
	let h = harness().await;
	let err = h
		.service
		.resolve(ResourceType::Page, ResourceId::generate(), &Actor::admin(UserId::generate()))
		.await
		.unwrap_err();
	assert!(matches!(err, PermissionError::NotFound { .. }));
}

#[tokio::test]
async fn anonymous_is_denied_without_a_public_row() {
	let h = harness().await;
	let member = h.member();
	let page = h.page(None).await;
	h.grant(page.id, h.space_assignee(), PermissionLevel::FullAccess).await;
	h.grant(page.id, Assignee::User { id: member }, PermissionLevel::EditContent)
		.await;

	assert!(h.page_ops(page.id, &Actor::anonymous()).await.is_empty());

	h.grant(page.id, Assignee::Public, PermissionLevel::View).await;
	assert_eq!(
		h.page_ops(page.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
}

#[tokio::test]
async fn space_rows_require_membership() {
	let h = harness().await;
	let member = h.member();
	let outsider = UserId::generate();
	let page = h.page(None).await;
	h.grant(page.id, h.space_assignee(), PermissionLevel::Comment).await;

	assert_eq!(
		h.page_ops(page.id, &Actor::user(member)).await,
		level(PermissionLevel::Comment)
	);
	assert!(h.page_ops(page.id, &Actor::user(outsider)).await.is_empty());
}

#[tokio::test]
async fn membership_changes_apply_after_space_invalidation() {
	let h = harness().await;
	let user = UserId::generate();
	let page = h.page(None).await;
	h.grant(page.id, h.space_assignee(), PermissionLevel::View).await;

	assert!(h.page_ops(page.id, &Actor::user(user)).await.is_empty());

	h.membership.add_member(h.space, user);
	assert!(h.page_ops(page.id, &Actor::user(user)).await.is_empty());

	assert_eq!(h.service.invalidate_space(h.space), 1);
	assert_eq!(
		h.page_ops(page.id, &Actor::user(user)).await,
		ops([Operation::Read])
	);
}

#[tokio::test]
async fn can_checks_a_single_operation() {
	let h = harness().await;
	let page = h.page(None).await;
	h.grant(page.id, Assignee::Public, PermissionLevel::Comment).await;

	let visitor = Actor::anonymous();
	assert!(h
		.service
		.can(Operation::Comment, ResourceType::Page, page.id, &visitor)
		.await
		.unwrap());
	assert!(!h
		.service
		.can(Operation::EditContent, ResourceType::Page, page.id, &visitor)
		.await
		.unwrap());
}

#[tokio::test]
async fn category_permissions_do_not_inherit() {
	let h = harness().await;
	let member = h.member();
	let category = h.resource(ResourceType::ProposalCategory).await;
	h.grant(category.id, h.space_assignee(), PermissionLevel::View).await;

	let granted = h
		.service
		.resolve(ResourceType::ProposalCategory, category.id, &Actor::user(member))
		.await
		.unwrap();
	assert_eq!(granted, ops([Operation::Read]));
}

const LEVELS: [PermissionLevel; 8] = [
	PermissionLevel::View,
	PermissionLevel::Comment,
	PermissionLevel::EditContent,
	PermissionLevel::FullAccess,
	PermissionLevel::ProposalEditor,
	PermissionLevel::CategoryAdmin,
	PermissionLevel::Moderator,
	PermissionLevel::CommentVote,
];

proptest! {
	#![proptest_config(ProptestConfig::with_cases(24))]

	/// Each assignee gets one row, added in a random order. The actor is a
	/// member holding the role, so every row may match.
	#[test]
	fn adding_rows_never_removes_operations(
		levels in proptest::collection::vec(0usize..LEVELS.len(), 5),
		order in Just(vec![0usize, 1, 2, 3, 4]).prop_shuffle(),
	) {
		tokio_test::block_on(async {
			let h = harness().await;
			let user = h.member();
			let role = h.service.create_role(h.space, "Editors").await.unwrap();
			h.service.assign_role(role.id, user).await.unwrap();
			let page = h.page(None).await;
			let actor = Actor::user(user);

			let assignees = [
				Assignee::Public,
				h.space_assignee(),
				Assignee::User { id: user },
				Assignee::User { id: UserId::generate() },
				Assignee::Role { id: role.id },
			];

			let mut previous = h.page_ops(page.id, &actor).await;
			for index in &order {
				h.grant(page.id, assignees[*index], LEVELS[levels[*index]]).await;
				let current = h.page_ops(page.id, &actor).await;
				assert!(
					current.is_superset_of(&previous),
					"{:?} lost operations of {:?}",
					current,
					previous
				);
				previous = current;
			}
		});
	}
}
