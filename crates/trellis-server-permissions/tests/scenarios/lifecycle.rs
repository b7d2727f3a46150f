// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use trellis_permissions_core::{
	Actor, Assignee, Operation, PermissionError, PermissionLevel, ResourceType, UserId,
};
use trellis_server_permissions::{ErrorStatus, PermissionSource};

use super::support::{harness, level, ops};

#[tokio::test]
async fn new_post_category_is_open_to_the_space() {
	let h = harness().await;
	let member = Actor::user(h.member());
	let category = h.resource(ResourceType::PostCategory).await;

	let granted = h
		.service
		.resolve(ResourceType::PostCategory, category.id, &member)
		.await
		.unwrap();
	assert_eq!(granted, level(PermissionLevel::FullAccess));
}

#[tokio::test]
async fn new_child_page_inherits_parent_roots() {
	let h = harness().await;
	let user = UserId::generate();
	let parent = h.page(None).await;
	h.grant(parent.id, Assignee::Public, PermissionLevel::View).await;
	h.grant(parent.id, Assignee::User { id: user }, PermissionLevel::EditContent)
		.await;

	let child = h.page(Some(parent.id)).await;
	let effective = h.service.list_effective_permissions(child.id).await.unwrap();
	assert_eq!(effective.len(), 2);
	assert!(effective
		.iter()
		.all(|e| matches!(e.source, PermissionSource::Inherited { from_resource, .. } if from_resource == parent.id)));
}

#[tokio::test]
async fn moving_a_page_swaps_inherited_rows() {
	let h = harness().await;
	let editor = UserId::generate();
	let public_tree = h.page(None).await;
	let private_tree = h.page(None).await;
	h.grant(public_tree.id, Assignee::Public, PermissionLevel::View).await;
	h.grant(private_tree.id, Assignee::User { id: editor }, PermissionLevel::EditContent)
		.await;

	let page = h.page(Some(public_tree.id)).await;
	let below = h.page(Some(page.id)).await;
	assert_eq!(
		h.page_ops(below.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);

	let report = h
		.service
		.move_resource(page.id, Some(private_tree.id))
		.await
		.unwrap();
	assert_eq!(report.removed, 2);
	assert_eq!(report.created, 2);

	assert!(h.page_ops(below.id, &Actor::anonymous()).await.is_empty());
	assert_eq!(
		h.page_ops(below.id, &Actor::user(editor)).await,
		level(PermissionLevel::EditContent)
	);
}

#[tokio::test]
async fn moving_to_the_top_drops_inherited_rows() {
	let h = harness().await;
	let parent = h.page(None).await;
	h.grant(parent.id, Assignee::Public, PermissionLevel::View).await;
	let page = h.page(Some(parent.id)).await;

	h.service.move_resource(page.id, None).await.unwrap();

	assert!(h.page_ops(page.id, &Actor::anonymous()).await.is_empty());
	assert!(h
		.service
		.list_effective_permissions(page.id)
		.await
		.unwrap()
		.is_empty());
}

#[tokio::test]
async fn moving_under_a_descendant_is_rejected() {
	let h = harness().await;
	let parent = h.page(None).await;
	let child = h.page(Some(parent.id)).await;

	let err = h
		.service
		.move_resource(parent.id, Some(child.id))
		.await
		.unwrap_err();
	assert!(matches!(err, PermissionError::InvalidInput(_)));
}

#[tokio::test]
async fn deleting_a_page_removes_subtree_and_rows() {
	let h = harness().await;
	let parent = h.page(None).await;
	h.grant(parent.id, Assignee::Public, PermissionLevel::View).await;
	let child = h.page(Some(parent.id)).await;
	assert_eq!(
		h.page_ops(child.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);

	let outcome = h.service.delete_resource(parent.id).await.unwrap();
	assert_eq!(outcome.resources, vec![parent.id, child.id]);
	assert_eq!(outcome.rows_removed, 2);

	let err = h
		.service
		.resolve(ResourceType::Page, child.id, &Actor::anonymous())
		.await
		.unwrap_err();
	assert!(matches!(err, PermissionError::NotFound { .. }));
	assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_proposal_removes_step_rows() {
	let h = harness().await;
	let proposal = h.resource(ResourceType::Proposal).await;
	let step = h
		.service
		.add_evaluation_step(proposal.id, "Feedback", trellis_permissions_core::EvaluationType::Feedback)
		.await
		.unwrap();
	h.service
		.set_step_permission(step.id, Assignee::Public, PermissionLevel::Comment.into())
		.await
		.unwrap();

	let outcome = h.service.delete_resource(proposal.id).await.unwrap();
	assert_eq!(outcome.rows_removed, 1);
	assert!(h.service.evaluation_steps(proposal.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn trashed_pages_are_hidden_until_restored() {
	let h = harness().await;
	let page = h.page(None).await;
	h.grant(page.id, Assignee::Public, PermissionLevel::View).await;
	assert!(!h.page_ops(page.id, &Actor::anonymous()).await.is_empty());

	assert!(h.service.trash_resource(page.id).await.unwrap());
	let err = h
		.service
		.resolve(ResourceType::Page, page.id, &Actor::anonymous())
		.await
		.unwrap_err();
	assert!(matches!(err, PermissionError::NotFound { .. }));

	assert!(h.service.restore_resource(page.id).await.unwrap());
	assert_eq!(
		h.page_ops(page.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
}

#[tokio::test]
async fn trashed_ancestor_cuts_off_inheritance_below_it() {
	let h = harness().await;
	let top = h.page(None).await;
	h.grant(top.id, Assignee::Public, PermissionLevel::View).await;
	let middle = h.page(Some(top.id)).await;
	let leaf = h.page(Some(middle.id)).await;
	assert_eq!(
		h.page_ops(leaf.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);

	assert!(h.service.trash_resource(middle.id).await.unwrap());
	assert!(h.page_ops(leaf.id, &Actor::anonymous()).await.is_empty());
	let effective = h.service.list_effective_permissions(leaf.id).await.unwrap();
	assert!(effective.is_empty(), "{effective:?}");

	assert!(h.service.restore_resource(middle.id).await.unwrap());
	assert_eq!(
		h.page_ops(leaf.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
	let effective = h.service.list_effective_permissions(leaf.id).await.unwrap();
	assert_eq!(effective.len(), 1);
}
