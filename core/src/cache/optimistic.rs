//! Optimistic mutation tracker.
//!
//! A user action mutates the view state store immediately and registers
//! a pending mutation with the snapshot needed to undo it. The caller
//! issues the remote write and calls [`OptimisticTracker::confirm`] on
//! success or [`OptimisticTracker::rollback`] on failure. Authoritative
//! refetches supersede pending mutations for the ids they cover, so a
//! late confirm or rollback of superseded work is a no-op and the
//! refetch result is never double-applied.

use crate::cache::store::ViewStateStore;
use crate::domain::{Collection, Entity};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Status of a pending mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
	Pending,
	Confirmed,
	Failed,
}

/// One store effect of a mutation, as requested by the caller
#[derive(Debug, Clone)]
enum EffectKind {
	Patch { fields: Map<String, Value> },
	CounterDelta { field: String, delta: i64 },
	Insert { entity: Entity },
	Delete,
}

#[derive(Debug, Clone)]
struct Effect {
	collection: Collection,
	target: Uuid,
	kind: EffectKind,
}

/// A local state change to apply ahead of remote confirmation.
///
/// One user action builds one mutation, however many entities it
/// touches (joining an event inserts an attendance record AND bumps the
/// event's counter), so rollback is always all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct Mutation {
	effects: Vec<Effect>,
}

impl Mutation {
	pub fn new() -> Self {
		Self::default()
	}

	/// Merge fields into an existing entity
	pub fn patch(mut self, collection: Collection, target: Uuid, fields: Map<String, Value>) -> Self {
		self.effects.push(Effect {
			collection,
			target,
			kind: EffectKind::Patch { fields },
		});
		self
	}

	/// Adjust a numeric counter by delta (floored at zero on apply)
	pub fn counter_delta(
		mut self,
		collection: Collection,
		target: Uuid,
		field: impl Into<String>,
		delta: i64,
	) -> Self {
		self.effects.push(Effect {
			collection,
			target,
			kind: EffectKind::CounterDelta {
				field: field.into(),
				delta,
			},
		});
		self
	}

	/// Insert a new entity
	pub fn insert(mut self, collection: Collection, entity: Entity) -> Self {
		self.effects.push(Effect {
			collection,
			target: entity.id,
			kind: EffectKind::Insert { entity },
		});
		self
	}

	/// Remove an entity
	pub fn delete(mut self, collection: Collection, target: Uuid) -> Self {
		self.effects.push(Effect {
			collection,
			target,
			kind: EffectKind::Delete,
		});
		self
	}
}

/// What was actually done to the store, with the pre-mutation snapshot
/// needed to undo it exactly
#[derive(Debug, Clone)]
enum AppliedEffect {
	Patch {
		collection: Collection,
		target: Uuid,
		/// Prior values of exactly the fields the patch overwrote
		prior: Map<String, Value>,
		/// Fields the patch introduced (absent pre-mutation)
		introduced: Vec<String>,
	},
	CounterDelta {
		collection: Collection,
		target: Uuid,
		field: String,
		/// The delta that actually landed after flooring; reversing
		/// this can never push the counter below zero
		applied: i64,
	},
	Insert {
		collection: Collection,
		target: Uuid,
	},
	Delete {
		collection: Collection,
		snapshot: Entity,
	},
}

/// An optimistic local change not yet confirmed by the remote store
#[derive(Debug, Clone)]
pub struct PendingMutation {
	pub token: Uuid,
	pub status: MutationStatus,
	pub applied_at: DateTime<Utc>,
	applied: Vec<AppliedEffect>,
}

impl PendingMutation {
	/// Does this mutation touch the given entity of the collection?
	fn touches(&self, collection: Collection, ids: &HashSet<Uuid>) -> bool {
		self.applied.iter().any(|effect| match effect {
			AppliedEffect::Patch {
				collection: c,
				target,
				..
			}
			| AppliedEffect::CounterDelta {
				collection: c,
				target,
				..
			}
			| AppliedEffect::Insert {
				collection: c,
				target,
			} => *c == collection && ids.contains(target),
			AppliedEffect::Delete {
				collection: c,
				snapshot,
			} => *c == collection && ids.contains(&snapshot.id),
		})
	}
}

pub struct OptimisticTracker {
	store: Arc<ViewStateStore>,
	pending: Mutex<HashMap<Uuid, PendingMutation>>,
}

impl OptimisticTracker {
	pub fn new(store: Arc<ViewStateStore>) -> Self {
		Self {
			store,
			pending: Mutex::new(HashMap::new()),
		}
	}

	/// Apply a mutation to the store synchronously and register it as
	/// pending. Returns the correlation token the caller hands back to
	/// `confirm` or `rollback` once the remote write settles.
	pub fn apply(&self, mutation: Mutation) -> Uuid {
		let token = Uuid::new_v4();
		let mut applied = Vec::with_capacity(mutation.effects.len());

		for effect in mutation.effects {
			match effect.kind {
				EffectKind::Patch { fields } => {
					let Some(current) = self.store.entity(effect.collection, effect.target) else {
						continue;
					};
					let mut prior = Map::new();
					let mut introduced = Vec::new();
					for key in fields.keys() {
						match current.get(key) {
							Some(value) => {
								prior.insert(key.clone(), value.clone());
							}
							None => introduced.push(key.clone()),
						}
					}
					self.store.patch(effect.collection, effect.target, &fields);
					applied.push(AppliedEffect::Patch {
						collection: effect.collection,
						target: effect.target,
						prior,
						introduced,
					});
				}
				EffectKind::CounterDelta { field, delta } => {
					let Some((previous, new)) =
						self.store
							.counter_delta(effect.collection, effect.target, &field, delta)
					else {
						continue;
					};
					applied.push(AppliedEffect::CounterDelta {
						collection: effect.collection,
						target: effect.target,
						field,
						applied: new - previous,
					});
				}
				EffectKind::Insert { entity } => {
					self.store.upsert(effect.collection, entity);
					applied.push(AppliedEffect::Insert {
						collection: effect.collection,
						target: effect.target,
					});
				}
				EffectKind::Delete => {
					let Some(snapshot) = self.store.remove(effect.collection, effect.target)
					else {
						continue;
					};
					applied.push(AppliedEffect::Delete {
						collection: effect.collection,
						snapshot,
					});
				}
			}
		}

		self.pending.lock().unwrap().insert(
			token,
			PendingMutation {
				token,
				status: MutationStatus::Pending,
				applied_at: Utc::now(),
				applied,
			},
		);

		token
	}

	/// Mark a pending mutation as confirmed by the remote store.
	/// Idempotent: confirming twice, or confirming a token that was
	/// already rolled back or superseded, is a no-op.
	pub fn confirm(&self, token: Uuid) {
		if self.pending.lock().unwrap().remove(&token).is_some() {
			debug!(token = %token, "optimistic mutation confirmed");
		}
	}

	/// Undo a pending mutation, restoring the exact pre-mutation
	/// snapshots captured at apply time. Effects are reversed in
	/// reverse application order. Idempotent like `confirm`.
	///
	/// If a rollback target no longer exists (deleted remotely in the
	/// interim) that effect is skipped: the authoritative deletion wins.
	pub fn rollback(&self, token: Uuid) {
		let Some(mutation) = self.pending.lock().unwrap().remove(&token) else {
			return;
		};

		for effect in mutation.applied.iter().rev() {
			match effect {
				AppliedEffect::Patch {
					collection,
					target,
					prior,
					introduced,
				} => {
					if !prior.is_empty() && !self.store.patch(*collection, *target, prior) {
						debug!(target = %target, "rollback target gone, deletion wins");
						continue;
					}
					if !introduced.is_empty() {
						self.store.unset_fields(*collection, *target, introduced);
					}
				}
				AppliedEffect::CounterDelta {
					collection,
					target,
					field,
					applied,
				} => {
					self.store.counter_delta(*collection, *target, field, -applied);
				}
				AppliedEffect::Insert { collection, target } => {
					self.store.remove(*collection, *target);
				}
				AppliedEffect::Delete {
					collection,
					snapshot,
				} => {
					// Only restore if nothing re-created the entity in
					// the meantime
					if self.store.entity(*collection, snapshot.id).is_none() {
						self.store.upsert(*collection, snapshot.clone());
					}
				}
			}
		}

		debug!(token = %token, "optimistic mutation rolled back");
	}

	/// An authoritative refetch for `collection` arrived covering
	/// `ids`. Every pending mutation touching one of those ids is
	/// superseded: the refetch already reflects (or overrules) it, so
	/// its eventual confirm/rollback must become a no-op.
	pub fn supersede(&self, collection: Collection, ids: &HashSet<Uuid>) {
		let mut pending = self.pending.lock().unwrap();
		let before = pending.len();
		pending.retain(|_, mutation| !mutation.touches(collection, ids));
		let dropped = before - pending.len();
		if dropped > 0 {
			debug!(
				collection = %collection,
				dropped, "pending mutations superseded by refetch"
			);
		}
	}

	/// Status of a token, if still tracked
	pub fn status(&self, token: Uuid) -> Option<MutationStatus> {
		self.pending
			.lock()
			.unwrap()
			.get(&token)
			.map(|m| m.status)
	}

	pub fn pending_count(&self) -> usize {
		self.pending.lock().unwrap().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn store_with_event(count: i64) -> (Arc<ViewStateStore>, Uuid) {
		let store = Arc::new(ViewStateStore::default());
		let event = Entity::new(Uuid::new_v4())
			.with_field("title", "Career Fair")
			.with_field("attendees_count", count)
			.with_field("is_attending", false);
		let id = event.id;
		store.replace(Collection::Events, vec![event]);
		(store, id)
	}

	#[test]
	fn rollback_restores_exact_pre_mutation_fields() {
		let (store, event_id) = store_with_event(5);
		let tracker = OptimisticTracker::new(store.clone());

		let mut fields = Map::new();
		fields.insert("is_attending".into(), Value::from(true));
		let token = tracker.apply(
			Mutation::new()
				.patch(Collection::Events, event_id, fields)
				.counter_delta(Collection::Events, event_id, "attendees_count", 1),
		);

		let joined = store.entity(Collection::Events, event_id).unwrap();
		assert_eq!(joined.get_bool("is_attending"), Some(true));
		assert_eq!(joined.get_i64("attendees_count"), Some(6));

		tracker.rollback(token);

		let reverted = store.entity(Collection::Events, event_id).unwrap();
		assert_eq!(reverted.get_bool("is_attending"), Some(false));
		assert_eq!(reverted.get_i64("attendees_count"), Some(5));
	}

	#[test]
	fn rollback_preserves_unrelated_concurrent_updates() {
		let (store, event_id) = store_with_event(5);
		let tracker = OptimisticTracker::new(store.clone());

		let mut fields = Map::new();
		fields.insert("is_attending".into(), Value::from(true));
		let token = tracker.apply(Mutation::new().patch(Collection::Events, event_id, fields));

		// Another update lands on an unrelated field while the write is
		// in flight
		let mut concurrent = Map::new();
		concurrent.insert("title".into(), Value::from("Career Fair (moved)"));
		store.patch(Collection::Events, event_id, &concurrent);

		tracker.rollback(token);

		let entity = store.entity(Collection::Events, event_id).unwrap();
		assert_eq!(entity.get_bool("is_attending"), Some(false));
		assert_eq!(entity.get_str("title"), Some("Career Fair (moved)"));
	}

	#[test]
	fn confirm_is_idempotent() {
		let (store, event_id) = store_with_event(5);
		let tracker = OptimisticTracker::new(store.clone());

		let token = tracker.apply(Mutation::new().counter_delta(
			Collection::Events,
			event_id,
			"attendees_count",
			1,
		));

		tracker.confirm(token);
		let after_first = store.snapshot(Collection::Events);
		tracker.confirm(token);
		let after_second = store.snapshot(Collection::Events);

		assert_eq!(after_first, after_second);
		// a rollback after confirm must also be a no-op
		tracker.rollback(token);
		assert_eq!(
			store
				.entity(Collection::Events, event_id)
				.unwrap()
				.get_i64("attendees_count"),
			Some(6)
		);
	}

	#[test]
	fn counter_rollback_respects_the_floor() {
		let (store, event_id) = store_with_event(0);
		let tracker = OptimisticTracker::new(store.clone());

		// Decrement on an already-zero counter clamps to zero
		let token = tracker.apply(Mutation::new().counter_delta(
			Collection::Events,
			event_id,
			"attendees_count",
			-1,
		));
		assert_eq!(
			store
				.entity(Collection::Events, event_id)
				.unwrap()
				.get_i64("attendees_count"),
			Some(0)
		);

		// The clamped delta must not be reversed into a phantom +1
		tracker.rollback(token);
		assert_eq!(
			store
				.entity(Collection::Events, event_id)
				.unwrap()
				.get_i64("attendees_count"),
			Some(0)
		);
	}

	#[test]
	fn rollback_of_deleted_entity_is_a_no_op() {
		let (store, event_id) = store_with_event(5);
		let tracker = OptimisticTracker::new(store.clone());

		let mut fields = Map::new();
		fields.insert("is_attending".into(), Value::from(true));
		let token = tracker.apply(Mutation::new().patch(Collection::Events, event_id, fields));

		// Entity deleted remotely before the rollback
		store.remove(Collection::Events, event_id);
		tracker.rollback(token);

		assert!(store.entity(Collection::Events, event_id).is_none());
	}

	#[test]
	fn superseded_mutation_ignores_late_rollback() {
		let (store, event_id) = store_with_event(6);
		let tracker = OptimisticTracker::new(store.clone());

		// Viewer leaves: 6 -> 5
		let mut fields = Map::new();
		fields.insert("is_attending".into(), Value::from(false));
		let token = tracker.apply(
			Mutation::new()
				.patch(Collection::Events, event_id, fields)
				.counter_delta(Collection::Events, event_id, "attendees_count", -1),
		);

		// Concurrent refetch already reflects both this change and
		// another user's join: authoritative count is 7
		let refreshed = Entity::new(event_id)
			.with_field("title", "Career Fair")
			.with_field("attendees_count", 7);
		store.replace(Collection::Events, vec![refreshed]);
		tracker.supersede(Collection::Events, &HashSet::from([event_id]));

		// Late failure of the remote write must not re-apply anything
		tracker.rollback(token);
		assert_eq!(
			store
				.entity(Collection::Events, event_id)
				.unwrap()
				.get_i64("attendees_count"),
			Some(7)
		);
		assert_eq!(tracker.pending_count(), 0);
	}

	#[test]
	fn insert_rollback_removes_the_entity() {
		let store = Arc::new(ViewStateStore::default());
		let tracker = OptimisticTracker::new(store.clone());

		let message = Entity::new(Uuid::new_v4()).with_field("body", "hey");
		let token = tracker.apply(Mutation::new().insert(Collection::Messages, message.clone()));
		assert!(store.entity(Collection::Messages, message.id).is_some());

		tracker.rollback(token);
		assert!(store.entity(Collection::Messages, message.id).is_none());
	}
}
