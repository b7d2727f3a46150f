// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Short-lived cache of resolved decisions.
//!
//! Writes invalidate the resources they touch, and role changes invalidate
//! their space. The TTL only bounds how long a decision can outlive a change
//! made outside this service, such as a membership update.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use trellis_permissions_core::{ActorKey, OperationSet, ResourceId, ResourceType, SpaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecisionKey {
	pub resource_type: ResourceType,
	pub resource_id: ResourceId,
	pub actor: ActorKey,
}

impl DecisionKey {
	pub fn new(resource_type: ResourceType, resource_id: ResourceId, actor: ActorKey) -> Self {
		Self {
			resource_type,
			resource_id,
			actor,
		}
	}
}

#[derive(Debug, Clone)]
struct CachedDecision {
	operations: OperationSet,
	space_id: SpaceId,
	expires_at: Instant,
	last_used: Instant,
}

#[derive(Debug)]
pub struct DecisionCache {
	entries: Mutex<HashMap<DecisionKey, CachedDecision>>,
	ttl: Duration,
	max_entries: usize,
}

impl DecisionCache {
	pub fn new(ttl: Duration, max_entries: usize) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			ttl,
			max_entries,
		}
	}

	/// A cache that never stores anything.
	pub fn disabled() -> Self {
		Self::new(Duration::ZERO, 0)
	}

	pub fn is_enabled(&self) -> bool {
		self.max_entries > 0 && !self.ttl.is_zero()
	}

	pub fn get(&self, key: &DecisionKey) -> Option<OperationSet> {
		let now = Instant::now();
		let mut entries = self.entries.lock();

		match entries.get_mut(key) {
			Some(entry) if entry.expires_at > now => {
				entry.last_used = now;
				Some(entry.operations)
			}
			Some(_) => {
				entries.remove(key);
				None
			}
			None => None,
		}
	}

	/// Stores a decision. Admin decisions are never stored since they do not
	/// depend on any row.
	pub fn insert(&self, key: DecisionKey, space_id: SpaceId, operations: OperationSet) {
		if !self.is_enabled() || key.actor == ActorKey::Admin {
			return;
		}

		let now = Instant::now();
		let mut entries = self.entries.lock();
		if entries.len() >= self.max_entries && !entries.contains_key(&key) {
			evict_lru(&mut entries);
		}
		entries.insert(
			key,
			CachedDecision {
				operations,
				space_id,
				expires_at: now + self.ttl,
				last_used: now,
			},
		);
	}

	/// Drops every decision about the given resources, for any actor.
	pub fn invalidate_resources<'a>(&self, resource_ids: impl IntoIterator<Item = &'a ResourceId>) -> usize {
		let mut entries = self.entries.lock();
		let before = entries.len();
		for resource_id in resource_ids {
			entries.retain(|key, _| key.resource_id != *resource_id);
		}
		let removed = before - entries.len();
		if removed > 0 {
			tracing::debug!(removed, "invalidated cached decisions");
		}
		removed
	}

	pub fn invalidate_space(&self, space_id: SpaceId) -> usize {
		let mut entries = self.entries.lock();
		let before = entries.len();
		entries.retain(|_, entry| entry.space_id != space_id);
		let removed = before - entries.len();
		if removed > 0 {
			tracing::debug!(space_id = %space_id, removed, "invalidated cached decisions for space");
		}
		removed
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	pub fn cleanup_expired(&self) {
		let now = Instant::now();
		self.entries.lock().retain(|_, entry| entry.expires_at > now);
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

fn evict_lru(entries: &mut HashMap<DecisionKey, CachedDecision>) {
	if let Some(oldest) = entries
		.iter()
		.min_by_key(|(_, entry)| entry.last_used)
		.map(|(key, _)| *key)
	{
		entries.remove(&oldest);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use trellis_permissions_core::{Operation, UserId};

	fn key(resource_id: ResourceId) -> DecisionKey {
		DecisionKey::new(ResourceType::Page, resource_id, ActorKey::User(UserId::generate()))
	}

	fn read() -> OperationSet {
		OperationSet::from_iter([Operation::Read])
	}

	#[test]
	fn test_insert_and_get() {
		let cache = DecisionCache::new(Duration::from_secs(30), 10);
		let k = key(ResourceId::generate());

		cache.insert(k, SpaceId::generate(), read());
		assert_eq!(cache.get(&k), Some(read()));
		assert_eq!(cache.get(&key(ResourceId::generate())), None);
	}

	#[test]
	fn test_admin_decisions_not_cached() {
		let cache = DecisionCache::new(Duration::from_secs(30), 10);
		let k = DecisionKey::new(ResourceType::Space, ResourceId::generate(), ActorKey::Admin);

		cache.insert(k, SpaceId::generate(), OperationSet::universal());
		assert!(cache.is_empty());
	}

	#[test]
	fn test_disabled_cache_stores_nothing() {
		let cache = DecisionCache::disabled();
		let k = key(ResourceId::generate());
		cache.insert(k, SpaceId::generate(), read());
		assert_eq!(cache.get(&k), None);
		assert!(!cache.is_enabled());
	}

	#[test]
	fn test_expired_entry_is_dropped() {
		let cache = DecisionCache::new(Duration::from_millis(5), 10);
		let k = key(ResourceId::generate());
		cache.insert(k, SpaceId::generate(), read());

		std::thread::sleep(Duration::from_millis(20));
		assert_eq!(cache.get(&k), None);
		assert!(cache.is_empty());
	}

	#[test]
	fn test_lru_eviction() {
		let cache = DecisionCache::new(Duration::from_secs(30), 2);
		let space = SpaceId::generate();
		let a = key(ResourceId::generate());
		let b = key(ResourceId::generate());
		let c = key(ResourceId::generate());

		cache.insert(a, space, read());
		std::thread::sleep(Duration::from_millis(2));
		cache.insert(b, space, read());
		std::thread::sleep(Duration::from_millis(2));
		cache.get(&a);
		cache.insert(c, space, read());

		assert_eq!(cache.len(), 2);
		assert!(cache.get(&a).is_some());
		assert!(cache.get(&b).is_none());
		assert!(cache.get(&c).is_some());
	}

	#[test]
	fn test_invalidate_resources_covers_every_actor() {
		let cache = DecisionCache::new(Duration::from_secs(30), 10);
		let space = SpaceId::generate();
		let resource = ResourceId::generate();
		let other = key(ResourceId::generate());

		cache.insert(key(resource), space, read());
		cache.insert(
			DecisionKey::new(ResourceType::Page, resource, ActorKey::Anonymous),
			space,
			OperationSet::empty(),
		);
		cache.insert(other, space, read());

		assert_eq!(cache.invalidate_resources([&resource]), 2);
		assert_eq!(cache.len(), 1);
		assert!(cache.get(&other).is_some());
	}

	#[test]
	fn test_invalidate_space() {
		let cache = DecisionCache::new(Duration::from_secs(30), 10);
		let space = SpaceId::generate();
		let kept = key(ResourceId::generate());

		cache.insert(key(ResourceId::generate()), space, read());
		cache.insert(kept, SpaceId::generate(), read());

		assert_eq!(cache.invalidate_space(space), 1);
		assert!(cache.get(&kept).is_some());
	}
}
