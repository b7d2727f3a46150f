// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Proposal evaluation steps.
//!
//! Steps are ordered by `step_index` within a proposal. Their permission rows
//! live in the permissions table with `resource_type = proposal_evaluation`
//! and the step id as `resource_id`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use trellis_permissions_core::{
	Assignee, EvaluationId, EvaluationStep, EvaluationType, Grant, NewPermissionRow,
	PermissionError, ResourceId, ResourceType, StepPermissions,
};

use crate::error::DbError;
use crate::permission::{fetch_rows_for, insert_row};
use crate::tree::require_resource;
use crate::types::{parse_column, Resource};

/// One step of a reusable workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStep {
	pub title: String,
	pub evaluation_type: EvaluationType,
	#[serde(default)]
	pub permissions: Vec<TemplatePermission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePermission {
	pub assignee: Assignee,
	pub grant: Grant,
}

/// Ordered steps copied onto a proposal when it enters review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
	pub steps: Vec<TemplateStep>,
}

#[async_trait]
pub trait EvaluationStepStore: Send + Sync {
	async fn add_step(
		&self,
		proposal_id: ResourceId,
		title: &str,
		evaluation_type: EvaluationType,
	) -> Result<EvaluationStep, DbError>;
	async fn get_step(&self, id: EvaluationId) -> Result<Option<EvaluationStep>, DbError>;
	async fn list_steps(&self, proposal_id: ResourceId) -> Result<Vec<EvaluationStep>, DbError>;
	async fn steps_with_permissions(
		&self,
		proposal_id: ResourceId,
	) -> Result<Vec<StepPermissions>, DbError>;
	async fn apply_workflow_template(
		&self,
		proposal_id: ResourceId,
		template: &WorkflowTemplate,
	) -> Result<Vec<StepPermissions>, DbError>;
}

/// Repository for evaluation steps.
#[derive(Clone)]
pub struct EvaluationStepRepository {
	pool: SqlitePool,
}

impl EvaluationStepRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Append a step after the proposal's last one.
	///
	/// # Errors
	/// - `NotFound` if the proposal does not exist.
	/// - `InvalidInput` if the resource is not a proposal.
	#[tracing::instrument(skip(self, title), fields(proposal_id = %proposal_id, evaluation_type = %evaluation_type))]
	pub async fn add_step(
		&self,
		proposal_id: ResourceId,
		title: &str,
		evaluation_type: EvaluationType,
	) -> Result<EvaluationStep, DbError> {
		let mut tx = self.pool.begin().await?;
		let proposal = require_proposal(&mut tx, proposal_id).await?;
		let step = insert_step(&mut tx, &proposal, title, evaluation_type).await?;
		tx.commit().await?;
		Ok(step)
	}

	#[tracing::instrument(skip(self), fields(evaluation_id = %id))]
	pub async fn get_step(&self, id: EvaluationId) -> Result<Option<EvaluationStep>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_step(&mut conn, id).await
	}

	#[tracing::instrument(skip(self), fields(proposal_id = %proposal_id))]
	pub async fn list_steps(&self, proposal_id: ResourceId) -> Result<Vec<EvaluationStep>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_steps(&mut conn, proposal_id).await
	}

	#[tracing::instrument(skip(self), fields(proposal_id = %proposal_id))]
	pub async fn steps_with_permissions(
		&self,
		proposal_id: ResourceId,
	) -> Result<Vec<StepPermissions>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_step_permissions(&mut conn, proposal_id).await
	}

	/// Copy a template's steps and their permission rows onto a proposal in
	/// one transaction. Steps are appended after any existing ones.
	#[tracing::instrument(skip(self, template), fields(proposal_id = %proposal_id, steps = template.steps.len()))]
	pub async fn apply_workflow_template(
		&self,
		proposal_id: ResourceId,
		template: &WorkflowTemplate,
	) -> Result<Vec<StepPermissions>, DbError> {
		let mut tx = self.pool.begin().await?;
		let applied = apply_template(&mut tx, proposal_id, template).await?;
		tx.commit().await?;

		tracing::info!(steps = applied.len(), "workflow template applied");
		Ok(applied)
	}
}

#[async_trait]
impl EvaluationStepStore for EvaluationStepRepository {
	async fn add_step(
		&self,
		proposal_id: ResourceId,
		title: &str,
		evaluation_type: EvaluationType,
	) -> Result<EvaluationStep, DbError> {
		self.add_step(proposal_id, title, evaluation_type).await
	}

	async fn get_step(&self, id: EvaluationId) -> Result<Option<EvaluationStep>, DbError> {
		self.get_step(id).await
	}

	async fn list_steps(&self, proposal_id: ResourceId) -> Result<Vec<EvaluationStep>, DbError> {
		self.list_steps(proposal_id).await
	}

	async fn steps_with_permissions(
		&self,
		proposal_id: ResourceId,
	) -> Result<Vec<StepPermissions>, DbError> {
		self.steps_with_permissions(proposal_id).await
	}

	async fn apply_workflow_template(
		&self,
		proposal_id: ResourceId,
		template: &WorkflowTemplate,
	) -> Result<Vec<StepPermissions>, DbError> {
		self.apply_workflow_template(proposal_id, template).await
	}
}

fn row_to_step(row: &SqliteRow) -> Result<EvaluationStep, DbError> {
	let id: String = row.get("id");
	let proposal_id: String = row.get("proposal_id");
	let space_id: String = row.get("space_id");
	let index: i64 = row.get("step_index");
	let evaluation_type: String = row.get("evaluation_type");

	Ok(EvaluationStep {
		id: parse_column(&id, "evaluation_steps.id")?,
		proposal_id: parse_column(&proposal_id, "evaluation_steps.proposal_id")?,
		space_id: parse_column(&space_id, "evaluation_steps.space_id")?,
		index: u32::try_from(index).map_err(|_| {
			PermissionError::DataIntegrity(format!("step {id} has index {index}"))
		})?,
		title: row.get("title"),
		evaluation_type: parse_column(&evaluation_type, "evaluation_steps.evaluation_type")?,
	})
}

pub async fn require_proposal(
	conn: &mut SqliteConnection,
	proposal_id: ResourceId,
) -> Result<Resource, DbError> {
	let proposal = require_resource(conn, proposal_id, false).await?;
	if proposal.resource_type != ResourceType::Proposal {
		return Err(PermissionError::invalid(format!(
			"{proposal_id} is a {}, not a proposal",
			proposal.resource_type
		))
		.into());
	}
	Ok(proposal)
}

pub async fn insert_step(
	conn: &mut SqliteConnection,
	proposal: &Resource,
	title: &str,
	evaluation_type: EvaluationType,
) -> Result<EvaluationStep, DbError> {
	let next: i64 = sqlx::query_scalar(
		"SELECT COALESCE(MAX(step_index) + 1, 0) FROM evaluation_steps WHERE proposal_id = ?",
	)
	.bind(proposal.id.to_string())
	.fetch_one(&mut *conn)
	.await?;

	let step = EvaluationStep {
		id: EvaluationId::generate(),
		proposal_id: proposal.id,
		space_id: proposal.space_id,
		index: u32::try_from(next)
			.map_err(|_| DbError::Internal(format!("step index {next} out of range")))?,
		title: title.to_string(),
		evaluation_type,
	};

	sqlx::query(
		r#"
		INSERT INTO evaluation_steps (id, proposal_id, space_id, step_index, title, evaluation_type, created_at)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(step.id.to_string())
	.bind(step.proposal_id.to_string())
	.bind(step.space_id.to_string())
	.bind(next)
	.bind(&step.title)
	.bind(step.evaluation_type.as_str())
	.bind(Utc::now().to_rfc3339())
	.execute(&mut *conn)
	.await?;

	tracing::debug!(evaluation_id = %step.id, index = step.index, "evaluation step added");
	Ok(step)
}

pub async fn fetch_step(
	conn: &mut SqliteConnection,
	id: EvaluationId,
) -> Result<Option<EvaluationStep>, DbError> {
	let row = sqlx::query(
		r#"
		SELECT id, proposal_id, space_id, step_index, title, evaluation_type
		FROM evaluation_steps
		WHERE id = ?
		"#,
	)
	.bind(id.to_string())
	.fetch_optional(&mut *conn)
	.await?;

	row.map(|r| row_to_step(&r)).transpose()
}

pub async fn fetch_steps(
	conn: &mut SqliteConnection,
	proposal_id: ResourceId,
) -> Result<Vec<EvaluationStep>, DbError> {
	let rows = sqlx::query(
		r#"
		SELECT id, proposal_id, space_id, step_index, title, evaluation_type
		FROM evaluation_steps
		WHERE proposal_id = ?
		ORDER BY step_index
		"#,
	)
	.bind(proposal_id.to_string())
	.fetch_all(&mut *conn)
	.await?;

	rows.iter().map(row_to_step).collect()
}

pub async fn fetch_step_permissions(
	conn: &mut SqliteConnection,
	proposal_id: ResourceId,
) -> Result<Vec<StepPermissions>, DbError> {
	let steps = fetch_steps(conn, proposal_id).await?;
	let mut out = Vec::with_capacity(steps.len());
	for step in steps {
		let rows = fetch_rows_for(conn, step.id.into()).await?;
		out.push(StepPermissions { step, rows });
	}
	Ok(out)
}

/// Row input for a grant on one step.
pub fn step_row(step: &EvaluationStep, assignee: Assignee, grant: Grant) -> NewPermissionRow {
	NewPermissionRow::root(
		step.id.into(),
		ResourceType::ProposalEvaluation,
		step.space_id,
		assignee,
		grant,
	)
}

pub async fn apply_template(
	conn: &mut SqliteConnection,
	proposal_id: ResourceId,
	template: &WorkflowTemplate,
) -> Result<Vec<StepPermissions>, DbError> {
	let proposal = require_proposal(conn, proposal_id).await?;
	let mut applied = Vec::with_capacity(template.steps.len());
	for template_step in &template.steps {
		let step = insert_step(
			conn,
			&proposal,
			&template_step.title,
			template_step.evaluation_type,
		)
		.await?;
		let mut rows = Vec::with_capacity(template_step.permissions.len());
		for permission in &template_step.permissions {
			rows.push(insert_row(conn, &step_row(&step, permission.assignee, permission.grant)).await?);
		}
		applied.push(StepPermissions { step, rows });
	}
	Ok(applied)
}
