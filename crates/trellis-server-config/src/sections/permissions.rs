// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission engine tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use trellis_permissions_core::RootDeletionPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PermissionsConfigLayer {
	pub max_traversal_depth: Option<usize>,
	pub resolve_timeout_ms: Option<u64>,
	pub cache_ttl_secs: Option<u64>,
	pub cache_max_entries: Option<usize>,
	pub async_propagation_threshold: Option<usize>,
	pub propagation_max_retries: Option<u32>,
	pub propagation_base_delay_ms: Option<u64>,
	pub root_deletion_policy: Option<RootDeletionPolicy>,
}

impl PermissionsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_traversal_depth.is_some() {
			self.max_traversal_depth = other.max_traversal_depth;
		}
		if other.resolve_timeout_ms.is_some() {
			self.resolve_timeout_ms = other.resolve_timeout_ms;
		}
		if other.cache_ttl_secs.is_some() {
			self.cache_ttl_secs = other.cache_ttl_secs;
		}
		if other.cache_max_entries.is_some() {
			self.cache_max_entries = other.cache_max_entries;
		}
		if other.async_propagation_threshold.is_some() {
			self.async_propagation_threshold = other.async_propagation_threshold;
		}
		if other.propagation_max_retries.is_some() {
			self.propagation_max_retries = other.propagation_max_retries;
		}
		if other.propagation_base_delay_ms.is_some() {
			self.propagation_base_delay_ms = other.propagation_base_delay_ms;
		}
		if other.root_deletion_policy.is_some() {
			self.root_deletion_policy = other.root_deletion_policy;
		}
	}

	pub fn finalize(self) -> PermissionsConfig {
		let defaults = PermissionsConfig::default();
		PermissionsConfig {
			max_traversal_depth: self.max_traversal_depth.unwrap_or(defaults.max_traversal_depth),
			resolve_timeout_ms: self.resolve_timeout_ms.unwrap_or(defaults.resolve_timeout_ms),
			cache_ttl_secs: self.cache_ttl_secs.unwrap_or(defaults.cache_ttl_secs),
			cache_max_entries: self.cache_max_entries.unwrap_or(defaults.cache_max_entries),
			async_propagation_threshold: self
				.async_propagation_threshold
				.unwrap_or(defaults.async_propagation_threshold),
			propagation_max_retries: self
				.propagation_max_retries
				.unwrap_or(defaults.propagation_max_retries),
			propagation_base_delay_ms: self
				.propagation_base_delay_ms
				.unwrap_or(defaults.propagation_base_delay_ms),
			root_deletion_policy: self.root_deletion_policy.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionsConfig {
	/// Upper bound on ancestor and descendant walks.
	pub max_traversal_depth: usize,
	pub resolve_timeout_ms: u64,
	/// Backstop TTL for cached decisions; writes invalidate explicitly.
	pub cache_ttl_secs: u64,
	pub cache_max_entries: usize,
	/// Subtrees larger than this propagate in a background task.
	pub async_propagation_threshold: usize,
	pub propagation_max_retries: u32,
	pub propagation_base_delay_ms: u64,
	pub root_deletion_policy: RootDeletionPolicy,
}

impl PermissionsConfig {
	pub fn resolve_timeout(&self) -> Duration {
		Duration::from_millis(self.resolve_timeout_ms)
	}

	pub fn cache_ttl(&self) -> Duration {
		Duration::from_secs(self.cache_ttl_secs)
	}

	pub fn propagation_base_delay(&self) -> Duration {
		Duration::from_millis(self.propagation_base_delay_ms)
	}
}

impl Default for PermissionsConfig {
	fn default() -> Self {
		Self {
			max_traversal_depth: 256,
			resolve_timeout_ms: 2000,
			cache_ttl_secs: 30,
			cache_max_entries: 10_000,
			async_propagation_threshold: 500,
			propagation_max_retries: 3,
			propagation_base_delay_ms: 50,
			root_deletion_policy: RootDeletionPolicy::Detach,
		}
	}
}
