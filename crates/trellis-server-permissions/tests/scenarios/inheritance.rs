// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use trellis_permissions_core::{
	Actor, Assignee, Grant, Operation, PermissionError, PermissionLevel, RootDeletionPolicy,
	UserId,
};
use trellis_server_config::PermissionsConfig;
use trellis_server_permissions::{PermissionSource, PropagationStatus};

use super::support::{harness, harness_with, ops};

#[tokio::test]
async fn child_page_override_leaves_parent_unchanged() {
	let h = harness().await;
	let member = Actor::user(h.member());
	let parent = h.page(None).await;
	h.grant(parent.id, h.space_assignee(), PermissionLevel::View).await;
	let child = h.page(Some(parent.id)).await;

	assert_eq!(h.page_ops(child.id, &member).await, ops([Operation::Read]));

	let outcome = h
		.service
		.set_permission(child.id, h.space_assignee(), PermissionLevel::Comment.into())
		.await
		.unwrap();
	assert!(!outcome.created, "the inherited row is converted, not duplicated");
	assert!(outcome.row.is_root());
	assert!(!outcome.propagation.is_deferred());

	assert_eq!(
		h.page_ops(child.id, &member).await,
		ops([Operation::Read, Operation::Comment])
	);
	assert_eq!(h.page_ops(parent.id, &member).await, ops([Operation::Read]));
}

#[tokio::test]
async fn nearest_root_wins_without_merging_levels() {
	let h = harness().await;
	let user = h.member();
	let actor = Actor::user(user);
	let a = h.page(None).await;
	let b = h.page(Some(a.id)).await;
	let c = h.page(Some(b.id)).await;

	h.grant(a.id, Assignee::User { id: user }, PermissionLevel::View).await;
	h.grant(
		b.id,
		Assignee::User { id: user },
		Grant::Operations(ops([Operation::Comment])),
	)
	.await;

	assert_eq!(h.page_ops(c.id, &actor).await, ops([Operation::Comment]));
	assert_eq!(h.page_ops(a.id, &actor).await, ops([Operation::Read]));

	let effective = h.service.list_effective_permissions(c.id).await.unwrap();
	assert_eq!(effective.len(), 1);
	assert!(matches!(
		effective[0].source,
		PermissionSource::Inherited { from_resource, .. } if from_resource == b.id
	));
}

#[tokio::test]
async fn grants_reach_pages_created_before_them() {
	let h = harness().await;
	let parent = h.page(None).await;
	let child = h.page(Some(parent.id)).await;
	let grandchild = h.page(Some(child.id)).await;

	let outcome = h
		.service
		.set_permission(parent.id, Assignee::Public, PermissionLevel::View.into())
		.await
		.unwrap();
	let report = outcome.propagation.wait().await.unwrap();
	assert_eq!(report.created, 2);
	assert!(report.touched.contains(&grandchild.id));

	assert_eq!(
		h.page_ops(grandchild.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
}

#[tokio::test]
async fn resync_is_idempotent() {
	let h = harness().await;
	let user = UserId::generate();
	let top = h.page(None).await;
	let middle = h.page(Some(top.id)).await;
	let leaf = h.page(Some(middle.id)).await;
	h.grant(top.id, Assignee::Public, PermissionLevel::View).await;
	h.grant(middle.id, Assignee::User { id: user }, PermissionLevel::EditContent)
		.await;

	let first = h.service.resync_subtree(top.id).await.unwrap();
	let rows_after_first = h.service.list_effective_permissions(leaf.id).await.unwrap();
	let second = h.service.resync_subtree(top.id).await.unwrap();
	let rows_after_second = h.service.list_effective_permissions(leaf.id).await.unwrap();

	assert!(!first.changed(), "writes already propagated");
	assert!(!second.changed());
	assert_eq!(rows_after_first, rows_after_second);
}

#[tokio::test]
async fn upgrading_a_root_updates_its_dependents() {
	let h = harness().await;
	let parent = h.page(None).await;
	let child = h.page(Some(parent.id)).await;
	h.grant(parent.id, Assignee::Public, PermissionLevel::View).await;

	let outcome = h
		.service
		.set_permission(parent.id, Assignee::Public, PermissionLevel::Comment.into())
		.await
		.unwrap();
	assert!(!outcome.created);
	assert_eq!(outcome.propagation.wait().await.unwrap().updated, 1);

	assert_eq!(
		h.page_ops(child.id, &Actor::anonymous()).await,
		ops([Operation::Read, Operation::Comment])
	);
}

#[tokio::test]
async fn large_subtrees_propagate_in_the_background() {
	let h = harness_with(PermissionsConfig {
		async_propagation_threshold: 1,
		..Default::default()
	})
	.await;
	let parent = h.page(None).await;
	let child = h.page(Some(parent.id)).await;

	let outcome = h
		.service
		.set_permission(parent.id, Assignee::Public, PermissionLevel::View.into())
		.await
		.unwrap();
	assert!(outcome.created);
	assert!(outcome.propagation.is_deferred());

	let report = outcome.propagation.wait().await.unwrap();
	assert_eq!(report.created, 1);
	assert!(matches!(
		outcome.propagation.status(),
		PropagationStatus::Completed(_)
	));
	assert_eq!(
		h.page_ops(child.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
}

#[tokio::test]
async fn revoking_a_root_detaches_dependents_by_default() {
	let h = harness().await;
	let parent = h.page(None).await;
	let child = h.page(Some(parent.id)).await;
	let outcome = h
		.service
		.set_permission(parent.id, Assignee::Public, PermissionLevel::View.into())
		.await
		.unwrap();

	let revoked = h.service.revoke_permission(outcome.row.id).await.unwrap();
	assert_eq!(revoked.revoked.detached.len(), 1);

	assert!(h.page_ops(parent.id, &Actor::anonymous()).await.is_empty());
	assert_eq!(
		h.page_ops(child.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
	let effective = h.service.list_effective_permissions(child.id).await.unwrap();
	assert_eq!(effective[0].source, PermissionSource::Direct);
}

#[tokio::test]
async fn reject_policy_refuses_roots_in_use() {
	let h = harness_with(PermissionsConfig {
		root_deletion_policy: RootDeletionPolicy::Reject,
		..Default::default()
	})
	.await;
	let parent = h.page(None).await;
	let child = h.page(Some(parent.id)).await;
	let outcome = h
		.service
		.set_permission(parent.id, Assignee::Public, PermissionLevel::View.into())
		.await
		.unwrap();

	let err = h
		.service
		.revoke_permission(outcome.row.id)
		.await
		.unwrap_err();
	assert!(matches!(
		err,
		PermissionError::InheritanceRootInUse { dependents: 1, .. }
	));
	assert_eq!(
		h.page_ops(child.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
}

#[tokio::test]
async fn revoking_the_only_local_root_falls_back_to_the_ancestor() {
	let h = harness().await;
	let top = h.page(None).await;
	let middle = h.page(Some(top.id)).await;
	let leaf = h.page(Some(middle.id)).await;
	h.grant(top.id, Assignee::Public, PermissionLevel::View).await;

	let user = UserId::generate();
	let override_row = h
		.service
		.set_permission(middle.id, Assignee::User { id: user }, PermissionLevel::Comment.into())
		.await
		.unwrap()
		.row;
	assert!(h.page_ops(leaf.id, &Actor::anonymous()).await.is_empty());

	let revoked = h.service.revoke_permission(override_row.id).await.unwrap();
	assert!(revoked.report.changed());

	// The leaf keeps the detached row and inherits the top page's grant again.
	assert_eq!(
		h.page_ops(leaf.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
	assert_eq!(
		h.page_ops(middle.id, &Actor::anonymous()).await,
		ops([Operation::Read])
	);
}
