//! View state store: the reconciled, render-ready representation of
//! each collection.
//!
//! The store is the only mutable shared resource in the core and is
//! mutated exclusively through this API. Mutations are synchronous;
//! update notifications are sent while the write lock is held, so
//! subscribers observe updates in exactly the order they were applied.

use crate::domain::{Collection, Entity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Snapshot of one collection as the view should render it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
	pub entities: Vec<Entity>,
	/// When the last authoritative refetch replaced this collection
	pub refreshed_at: Option<DateTime<Utc>>,
}

impl ViewState {
	pub fn entity(&self, id: Uuid) -> Option<&Entity> {
		self.entities.iter().find(|e| e.id == id)
	}
}

/// Notification sent to store subscribers after each mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreUpdate {
	Replaced { collection: Collection },
	Patched { collection: Collection, id: Uuid },
	Upserted { collection: Collection, id: Uuid },
	Removed { collection: Collection, id: Uuid },
}

pub struct ViewStateStore {
	collections: RwLock<HashMap<Collection, ViewState>>,
	updates: broadcast::Sender<StoreUpdate>,
}

impl ViewStateStore {
	pub fn new(capacity: usize) -> Self {
		Self {
			collections: RwLock::new(HashMap::new()),
			updates: broadcast::channel(capacity).0,
		}
	}

	/// Current snapshot of a collection (empty if never fetched)
	pub fn snapshot(&self, collection: Collection) -> ViewState {
		self.collections
			.read()
			.unwrap()
			.get(&collection)
			.cloned()
			.unwrap_or_default()
	}

	pub fn entity(&self, collection: Collection, id: Uuid) -> Option<Entity> {
		self.collections
			.read()
			.unwrap()
			.get(&collection)
			.and_then(|state| state.entity(id).cloned())
	}

	/// Wholly replace a collection with an authoritative refetch
	/// result. Any overlays previously applied to entities present in
	/// `entities` are gone: the new data already reflects them.
	pub fn replace(&self, collection: Collection, entities: Vec<Entity>) {
		let mut collections = self.collections.write().unwrap();
		trace!(collection = %collection, count = entities.len(), "replacing collection");
		collections.insert(
			collection,
			ViewState {
				entities,
				refreshed_at: Some(Utc::now()),
			},
		);
		self.updates.send(StoreUpdate::Replaced { collection }).ok();
	}

	/// Reset a collection to empty, used when a refetch fails so the
	/// view never renders stale, misleading data
	pub fn clear(&self, collection: Collection) {
		self.replace(collection, Vec::new());
	}

	/// Merge fields into an existing entity, preserving all other
	/// fields and derived flags. Returns false if the entity is absent.
	pub fn patch(&self, collection: Collection, id: Uuid, fields: &Map<String, Value>) -> bool {
		let mut collections = self.collections.write().unwrap();
		let Some(entity) = collections
			.get_mut(&collection)
			.and_then(|state| state.entities.iter_mut().find(|e| e.id == id))
		else {
			return false;
		};
		entity.merge_fields(fields);
		self.updates
			.send(StoreUpdate::Patched { collection, id })
			.ok();
		true
	}

	/// Remove fields from an existing entity. Used by rollback to drop
	/// fields an optimistic mutation introduced. Returns false if the
	/// entity is absent.
	pub fn unset_fields(&self, collection: Collection, id: Uuid, fields: &[String]) -> bool {
		let mut collections = self.collections.write().unwrap();
		let Some(entity) = collections
			.get_mut(&collection)
			.and_then(|state| state.entities.iter_mut().find(|e| e.id == id))
		else {
			return false;
		};
		for field in fields {
			entity.fields.remove(field);
		}
		self.updates
			.send(StoreUpdate::Patched { collection, id })
			.ok();
		true
	}

	/// Insert an entity, or replace it wholesale if already present.
	/// Used for optimistic inserts and incremental feed application.
	pub fn upsert(&self, collection: Collection, entity: Entity) {
		let mut collections = self.collections.write().unwrap();
		let id = entity.id;
		let state = collections.entry(collection).or_default();
		match state.entities.iter_mut().find(|e| e.id == id) {
			Some(existing) => *existing = entity,
			None => state.entities.push(entity),
		}
		self.updates
			.send(StoreUpdate::Upserted { collection, id })
			.ok();
	}

	/// Remove an entity, returning it for snapshot capture
	pub fn remove(&self, collection: Collection, id: Uuid) -> Option<Entity> {
		let mut collections = self.collections.write().unwrap();
		let state = collections.get_mut(&collection)?;
		let index = state.entities.iter().position(|e| e.id == id)?;
		let entity = state.entities.remove(index);
		self.updates
			.send(StoreUpdate::Removed { collection, id })
			.ok();
		Some(entity)
	}

	/// Adjust a numeric counter on an entity by delta, floored at zero.
	/// Returns `(previous, new)` or None if the entity is absent.
	pub fn counter_delta(
		&self,
		collection: Collection,
		id: Uuid,
		field: &str,
		delta: i64,
	) -> Option<(i64, i64)> {
		let mut collections = self.collections.write().unwrap();
		let entity = collections
			.get_mut(&collection)
			.and_then(|state| state.entities.iter_mut().find(|e| e.id == id))?;
		let previous = entity.apply_counter_delta(field, delta);
		let new = entity.get_i64(field).unwrap_or(0);
		self.updates
			.send(StoreUpdate::Patched { collection, id })
			.ok();
		Some((previous, new))
	}

	/// Subscribe to store updates, delivered in application order
	pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
		self.updates.subscribe()
	}
}

impl Default for ViewStateStore {
	fn default() -> Self {
		Self::new(1024)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn replace_is_wholesale() {
		let store = ViewStateStore::default();
		let stale = Entity::new(Uuid::new_v4()).with_field("title", "old");
		store.replace(Collection::Events, vec![stale]);

		let fresh = Entity::new(Uuid::new_v4()).with_field("title", "new");
		store.replace(Collection::Events, vec![fresh.clone()]);

		let snapshot = store.snapshot(Collection::Events);
		assert_eq!(snapshot.entities, vec![fresh]);
		assert!(snapshot.refreshed_at.is_some());
	}

	#[test]
	fn patch_misses_absent_entities() {
		let store = ViewStateStore::default();
		assert!(!store.patch(Collection::Events, Uuid::new_v4(), &Map::new()));
	}

	#[test]
	fn updates_arrive_in_application_order() {
		let store = ViewStateStore::default();
		let mut updates = store.subscribe();

		let entity = Entity::new(Uuid::new_v4());
		store.upsert(Collection::Messages, entity.clone());
		store.remove(Collection::Messages, entity.id);

		assert_eq!(
			updates.try_recv().unwrap(),
			StoreUpdate::Upserted {
				collection: Collection::Messages,
				id: entity.id
			}
		);
		assert_eq!(
			updates.try_recv().unwrap(),
			StoreUpdate::Removed {
				collection: Collection::Messages,
				id: entity.id
			}
		);
	}

	#[test]
	fn counter_delta_floors_at_zero() {
		let store = ViewStateStore::default();
		let entity = Entity::new(Uuid::new_v4()).with_field("attendees_count", 0);
		store.upsert(Collection::Events, entity.clone());

		let (previous, new) = store
			.counter_delta(Collection::Events, entity.id, "attendees_count", -1)
			.unwrap();
		assert_eq!((previous, new), (0, 0));
	}
}
