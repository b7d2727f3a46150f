// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Workflow step gate.
//!
//! A proposal is reviewed through an ordered list of evaluation steps, each
//! with its own permission rows. Only the active step's rows apply. Completed
//! steps leave actors who held any row on them with read access, synthesized
//! here rather than stored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PermissionError;
use crate::levels::PermissionLevel;
use crate::row::{Grant, PermissionRow};
use crate::types::{EvaluationId, ResourceId, SpaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
	Feedback,
	Rubric,
	Vote,
	PassFail,
}

impl EvaluationType {
	pub fn as_str(&self) -> &'static str {
		match self {
			EvaluationType::Feedback => "feedback",
			EvaluationType::Rubric => "rubric",
			EvaluationType::Vote => "vote",
			EvaluationType::PassFail => "pass_fail",
		}
	}
}

impl fmt::Display for EvaluationType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EvaluationType {
	type Err = PermissionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"feedback" => Ok(EvaluationType::Feedback),
			"rubric" => Ok(EvaluationType::Rubric),
			"vote" => Ok(EvaluationType::Vote),
			"pass_fail" => Ok(EvaluationType::PassFail),
			other => Err(PermissionError::invalid(format!(
				"unknown evaluation type '{other}'"
			))),
		}
	}
}

/// Outcome recorded for a step by the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
	Pass,
	Fail,
}

/// One stage of a proposal's review workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationStep {
	pub id: EvaluationId,
	pub proposal_id: ResourceId,
	pub space_id: SpaceId,
	pub index: u32,
	pub title: String,
	pub evaluation_type: EvaluationType,
}

/// A step together with the permission rows authored for it.
#[derive(Debug, Clone)]
pub struct StepPermissions {
	pub step: EvaluationStep,
	pub rows: Vec<PermissionRow>,
}

/// Workflow facts for one step, supplied by the progression collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepState {
	pub result: Option<StepResult>,
	pub appealed: bool,
}

/// Workflow progression of one proposal at the time of resolution.
#[derive(Debug, Clone, Default)]
pub struct ProgressionSnapshot {
	pub current_index: u32,
	pub states: HashMap<EvaluationId, StepState>,
}

impl ProgressionSnapshot {
	pub fn at(current_index: u32) -> Self {
		Self {
			current_index,
			states: HashMap::new(),
		}
	}

	pub fn with_state(mut self, id: EvaluationId, state: StepState) -> Self {
		self.states.insert(id, state);
		self
	}

	fn state(&self, id: &EvaluationId) -> StepState {
		self.states.get(id).copied().unwrap_or_default()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
	/// Not reached yet; contributes nothing.
	Pending,
	/// Current or reopened; rows apply verbatim.
	Active,
	/// Finished; rows only grant read access.
	Completed,
}

pub fn step_phase(step: &EvaluationStep, progression: &ProgressionSnapshot) -> StepPhase {
	if step.index > progression.current_index {
		return StepPhase::Pending;
	}

	let state = progression.state(&step.id);
	if state.appealed {
		return StepPhase::Active;
	}

	if step.index == progression.current_index && state.result.is_none() {
		StepPhase::Active
	} else {
		StepPhase::Completed
	}
}

/// Rows selected by the gate for one proposal.
#[derive(Debug, Clone, Default)]
pub struct StepRows {
	pub active: Vec<PermissionRow>,
	pub fallback: Vec<PermissionRow>,
}

/// Splits step rows into the rows that apply verbatim and the read-only
/// fallback for completed steps.
pub fn select_step_rows(steps: &[StepPermissions], progression: &ProgressionSnapshot) -> StepRows {
	let mut selected = StepRows::default();

	for entry in steps {
		match step_phase(&entry.step, progression) {
			StepPhase::Pending => {}
			StepPhase::Active => selected.active.extend(entry.rows.iter().cloned()),
			StepPhase::Completed => selected.fallback.extend(entry.rows.iter().map(|row| PermissionRow {
				grant: Grant::Level(PermissionLevel::View),
				..row.clone()
			})),
		}
	}

	tracing::trace!(
		current_index = progression.current_index,
		active = selected.active.len(),
		fallback = selected.fallback.len(),
		"selected evaluation step rows"
	);
	selected
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::assignee::Assignee;
	use crate::operations::{Operation, OperationSet};
	use crate::types::{PermissionId, ResourceType, RoleId};
	use chrono::Utc;

	fn step(proposal_id: ResourceId, index: u32, evaluation_type: EvaluationType) -> EvaluationStep {
		EvaluationStep {
			id: EvaluationId::generate(),
			proposal_id,
			space_id: SpaceId::generate(),
			index,
			title: evaluation_type.to_string(),
			evaluation_type,
		}
	}

	fn row_for(step: &EvaluationStep, assignee: Assignee, grant: Grant) -> PermissionRow {
		let now = Utc::now();
		PermissionRow {
			id: PermissionId::generate(),
			resource_id: step.id.into(),
			resource_type: ResourceType::ProposalEvaluation,
			space_id: step.space_id,
			assignee,
			grant,
			inherited_from: None,
			created_at: now,
			updated_at: now,
		}
	}

	fn two_steps() -> Vec<StepPermissions> {
		let proposal = ResourceId::generate();
		let feedback = step(proposal, 0, EvaluationType::Feedback);
		let rubric = step(proposal, 1, EvaluationType::Rubric);
		let reviewer = Assignee::Role {
			id: RoleId::generate(),
		};
		let evaluate = Grant::operations(OperationSet::from_iter([Operation::Evaluate])).unwrap();
		vec![
			StepPermissions {
				rows: vec![row_for(&feedback, Assignee::Public, Grant::Level(PermissionLevel::Comment))],
				step: feedback,
			},
			StepPermissions {
				rows: vec![row_for(&rubric, reviewer, evaluate)],
				step: rubric,
			},
		]
	}

	#[test]
	fn first_step_active_later_steps_pending() {
		let steps = two_steps();
		let rows = select_step_rows(&steps, &ProgressionSnapshot::at(0));
		assert_eq!(rows.active.len(), 1);
		assert_eq!(rows.active[0].resource_id, ResourceId::from(steps[0].step.id));
		assert!(rows.fallback.is_empty());
	}

	#[test]
	fn completed_step_falls_back_to_view() {
		let steps = two_steps();
		let rows = select_step_rows(&steps, &ProgressionSnapshot::at(1));
		assert_eq!(rows.active.len(), 1);
		assert!(rows.active[0].operations().has(Operation::Evaluate));
		assert_eq!(rows.fallback.len(), 1);
		assert_eq!(rows.fallback[0].grant, Grant::Level(PermissionLevel::View));
		assert!(!rows.fallback[0].operations().has(Operation::Comment));
	}

	#[test]
	fn appealed_step_is_reactivated() {
		let steps = two_steps();
		let progression = ProgressionSnapshot::at(1).with_state(
			steps[0].step.id,
			StepState {
				result: Some(StepResult::Fail),
				appealed: true,
			},
		);
		let rows = select_step_rows(&steps, &progression);
		assert_eq!(rows.active.len(), 2);
		assert!(rows.fallback.is_empty());
	}

	#[test]
	fn current_step_with_result_is_completed() {
		let steps = two_steps();
		let progression = ProgressionSnapshot::at(1).with_state(
			steps[1].step.id,
			StepState {
				result: Some(StepResult::Pass),
				appealed: false,
			},
		);
		assert_eq!(step_phase(&steps[1].step, &progression), StepPhase::Completed);
		let rows = select_step_rows(&steps, &progression);
		assert!(rows.active.is_empty());
		assert_eq!(rows.fallback.len(), 2);
	}

	#[test]
	fn evaluation_type_parses() {
		assert_eq!("pass_fail".parse::<EvaluationType>().unwrap(), EvaluationType::PassFail);
		assert!("poll".parse::<EvaluationType>().is_err());
	}
}
