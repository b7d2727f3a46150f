// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Coordination around subtree propagation: whole-transaction retries,
//! per-tree locks, and tickets for propagation deferred to a background task.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use trellis_permissions_core::{PermissionError, ResourceId};
use trellis_server_db::{DbError, PropagationReport};
use uuid::Uuid;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Retries a whole transaction on transient storage errors. A failed attempt
/// is rolled back and started over, never resumed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: Duration::from_millis(50),
		}
	}
}

impl RetryPolicy {
	pub fn new(max_retries: u32, base_delay: Duration) -> Self {
		Self {
			max_retries,
			base_delay,
		}
	}

	/// Exponential backoff for the given 1-based attempt, plus up to one base
	/// delay of jitter.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
		let backoff = self.base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY);
		let jitter_ms = fastrand::u64(0..=self.base_delay.as_millis() as u64);
		backoff + Duration::from_millis(jitter_ms)
	}

	pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> Result<T, DbError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, DbError>>,
	{
		let mut attempt = 0u32;
		loop {
			match attempt_fn().await {
				Ok(value) => return Ok(value),
				Err(e) if e.is_transient() && attempt < self.max_retries => {
					attempt += 1;
					let delay = self.delay_for(attempt);
					tracing::warn!(
						operation,
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %e,
						"transient storage error, retrying transaction"
					);
					tokio::time::sleep(delay).await;
				}
				Err(e) => return Err(e),
			}
		}
	}
}

/// One async lock per top-level resource. Propagations over the same tree
/// queue behind each other; different trees run concurrently.
#[derive(Debug, Default)]
pub struct PropagationLocks {
	locks: Mutex<HashMap<ResourceId, Arc<AsyncMutex<()>>>>,
}

impl PropagationLocks {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn acquire(&self, top_level: ResourceId) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.locks.lock();
			// Entries nobody holds or waits on.
			locks.retain(|_, lock| Arc::strong_count(lock) > 1);
			locks.entry(top_level).or_default().clone()
		};
		lock.lock_owned().await
	}

	/// Acquires several tree locks in id order so that two callers needing
	/// the same pair cannot deadlock.
	pub async fn acquire_all(&self, top_levels: BTreeSet<ResourceId>) -> Vec<OwnedMutexGuard<()>> {
		let mut guards = Vec::with_capacity(top_levels.len());
		for top_level in top_levels {
			guards.push(self.acquire(top_level).await);
		}
		guards
	}

	pub fn tracked(&self) -> usize {
		self.locks.lock().len()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationStatus {
	Pending,
	Completed(PropagationReport),
	Failed(String),
}

impl PropagationStatus {
	pub fn is_pending(&self) -> bool {
		matches!(self, PropagationStatus::Pending)
	}
}

/// Handle on a propagation run.
///
/// Synchronous writes hand out a ticket that is already completed. Writes
/// whose subtree exceeds the deferral threshold commit first and propagate
/// in a background task; until that task finishes, descendants may still
/// reflect the previous grant.
#[derive(Debug, Clone)]
pub struct PropagationTicket {
	id: Uuid,
	deferred: bool,
	status: watch::Receiver<PropagationStatus>,
}

impl PropagationTicket {
	pub fn completed(report: PropagationReport) -> Self {
		let (_tx, rx) = watch::channel(PropagationStatus::Completed(report));
		Self {
			id: Uuid::new_v4(),
			deferred: false,
			status: rx,
		}
	}

	pub(crate) fn deferred() -> (Self, PropagationReporter) {
		let (tx, rx) = watch::channel(PropagationStatus::Pending);
		let id = Uuid::new_v4();
		(
			Self {
				id,
				deferred: true,
				status: rx,
			},
			PropagationReporter { id, tx },
		)
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn is_deferred(&self) -> bool {
		self.deferred
	}

	pub fn status(&self) -> PropagationStatus {
		self.status.borrow().clone()
	}

	/// Waits until the propagation has finished.
	///
	/// # Errors
	/// `Storage` if the propagation failed or its task ended without
	/// reporting.
	pub async fn wait(&self) -> Result<PropagationReport, PermissionError> {
		let mut rx = self.status.clone();
		let status = rx
			.wait_for(|status| !status.is_pending())
			.await
			.map(|status| status.clone())
			.map_err(|_| {
				PermissionError::Storage(format!(
					"propagation {} ended without reporting a result",
					self.id
				))
			})?;

		match status {
			PropagationStatus::Completed(report) => Ok(report),
			PropagationStatus::Failed(message) => Err(PermissionError::Storage(message)),
			PropagationStatus::Pending => Err(PermissionError::Storage(format!(
				"propagation {} is still pending",
				self.id
			))),
		}
	}
}

/// Sending half of a deferred ticket, owned by the background task.
pub(crate) struct PropagationReporter {
	id: Uuid,
	tx: watch::Sender<PropagationStatus>,
}

impl PropagationReporter {
	pub(crate) fn id(&self) -> Uuid {
		self.id
	}

	pub(crate) fn finish(self, outcome: Result<PropagationReport, PermissionError>) {
		let status = match outcome {
			Ok(report) => PropagationStatus::Completed(report),
			Err(e) => PropagationStatus::Failed(e.to_string()),
		};
		// Nobody waiting is fine.
		let _ = self.tx.send(status);
	}
}
