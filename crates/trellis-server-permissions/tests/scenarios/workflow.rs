// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use trellis_permissions_core::{
	Actor, Assignee, EvaluationType, Grant, Operation, OperationSet, PermissionError,
	PermissionLevel, ResourceType, RoleId, SpaceId, StepPermissions, StepResult, UserId,
};
use trellis_server_db::{TemplatePermission, TemplateStep, WorkflowTemplate};

use super::support::{harness, level, ops, Harness};

struct Review {
	proposal: trellis_server_db::Resource,
	steps: Vec<StepPermissions>,
	author: UserId,
	reviewer: UserId,
}

fn evaluate() -> Grant {
	Grant::Operations(ops([Operation::Evaluate]))
}

fn template(author: UserId, reviewers: RoleId) -> WorkflowTemplate {
	WorkflowTemplate {
		steps: vec![
			TemplateStep {
				title: "Feedback".to_string(),
				evaluation_type: EvaluationType::Feedback,
				permissions: vec![TemplatePermission {
					assignee: Assignee::User { id: author },
					grant: PermissionLevel::Comment.into(),
				}],
			},
			TemplateStep {
				title: "Rubric".to_string(),
				evaluation_type: EvaluationType::Rubric,
				permissions: vec![TemplatePermission {
					assignee: Assignee::Role { id: reviewers },
					grant: evaluate(),
				}],
			},
		],
	}
}

async fn review(h: &Harness) -> Review {
	let author = h.member();
	let reviewer = h.member();
	let reviewers = h.service.create_role(h.space, "Reviewers").await.unwrap();
	h.service.assign_role(reviewers.id, reviewer).await.unwrap();

	let proposal = h.resource(ResourceType::Proposal).await;
	let steps = h
		.service
		.apply_workflow_template(proposal.id, &template(author, reviewers.id))
		.await
		.unwrap();

	Review {
		proposal,
		steps,
		author,
		reviewer,
	}
}

async fn proposal_ops(h: &Harness, review: &Review, user: UserId) -> OperationSet {
	h.service
		.resolve(ResourceType::Proposal, review.proposal.id, &Actor::user(user))
		.await
		.unwrap()
}

#[tokio::test]
async fn reviewers_evaluate_only_once_the_rubric_is_active() {
	let h = harness().await;
	let r = review(&h).await;
	assert_eq!(r.steps.len(), 2);

	assert!(!proposal_ops(&h, &r, r.reviewer).await.has(Operation::Evaluate));
	assert!(proposal_ops(&h, &r, r.reviewer).await.is_empty());
	assert_eq!(
		proposal_ops(&h, &r, r.author).await,
		level(PermissionLevel::Comment)
	);

	h.progression.set_current_step(r.proposal.id, 1);

	assert_eq!(
		proposal_ops(&h, &r, r.reviewer).await,
		ops([Operation::Evaluate])
	);
	// Feedback is over: the author keeps read access only.
	assert_eq!(proposal_ops(&h, &r, r.author).await, ops([Operation::Read]));
}

#[tokio::test]
async fn completed_steps_fall_back_to_view() {
	let h = harness().await;
	let r = review(&h).await;
	let rubric = r.steps[1].step.id;

	h.progression.set_current_step(r.proposal.id, 1);
	h.progression.record_result(rubric, StepResult::Pass);
	assert_eq!(proposal_ops(&h, &r, r.reviewer).await, ops([Operation::Read]));

	h.progression.appeal(rubric);
	assert!(proposal_ops(&h, &r, r.reviewer).await.has(Operation::Evaluate));

	h.progression.close_appeal(rubric);
	assert!(!proposal_ops(&h, &r, r.reviewer).await.has(Operation::Evaluate));
}

#[tokio::test]
async fn evaluation_resources_are_gated_to_their_step() {
	let h = harness().await;
	let r = review(&h).await;
	let feedback = r.steps[0].step.id;
	let rubric = r.steps[1].step.id;
	let reviewer = Actor::user(r.reviewer);

	let on_rubric = h
		.service
		.resolve(ResourceType::ProposalEvaluation, rubric.into(), &reviewer)
		.await
		.unwrap();
	assert!(on_rubric.is_empty(), "rubric has not started");

	h.progression.set_current_step(r.proposal.id, 1);
	let on_rubric = h
		.service
		.resolve(ResourceType::ProposalEvaluation, rubric.into(), &reviewer)
		.await
		.unwrap();
	assert_eq!(on_rubric, ops([Operation::Evaluate]));

	let on_feedback = h
		.service
		.resolve(ResourceType::ProposalEvaluation, feedback.into(), &reviewer)
		.await
		.unwrap();
	assert!(on_feedback.is_empty(), "reviewers held nothing on feedback");
}

#[tokio::test]
async fn step_permission_is_an_upsert() {
	let h = harness().await;
	let proposal = h.resource(ResourceType::Proposal).await;
	let step = h
		.service
		.add_evaluation_step(proposal.id, "Vote", EvaluationType::Vote)
		.await
		.unwrap();
	let voters = h.space_assignee();

	let first = h
		.service
		.set_step_permission(step.id, voters, PermissionLevel::View.into())
		.await
		.unwrap();
	let second = h
		.service
		.set_step_permission(step.id, voters, Grant::Operations(ops([Operation::Vote])))
		.await
		.unwrap();
	assert_eq!(first.id, second.id);

	let steps = h.service.evaluation_steps(proposal.id).await.unwrap();
	assert_eq!(steps[0].rows.len(), 1);

	let member = Actor::user(h.member());
	let granted = h
		.service
		.resolve(ResourceType::Proposal, proposal.id, &member)
		.await
		.unwrap();
	assert_eq!(granted, ops([Operation::Vote]));
}

#[tokio::test]
async fn templates_reject_roles_from_other_spaces() {
	let h = harness().await;
	let proposal = h.resource(ResourceType::Proposal).await;
	let foreign = h
		.service
		.create_role(SpaceId::generate(), "Reviewers")
		.await
		.unwrap();

	let err = h
		.service
		.apply_workflow_template(proposal.id, &template(UserId::generate(), foreign.id))
		.await
		.unwrap_err();
	assert!(matches!(err, PermissionError::InvalidInput(_)));
	assert!(h.service.evaluation_steps(proposal.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn step_gated_decisions_are_not_cached() {
	let h = harness().await;
	let r = review(&h).await;

	proposal_ops(&h, &r, r.reviewer).await;
	assert!(h.service.cache().is_empty());
}
