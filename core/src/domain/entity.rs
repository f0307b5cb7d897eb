//! Generic entity records flowing between the backend, the change feed
//! and the view state store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A typed record with a stable identifier and a mapping of fields to
/// values.
///
/// Persisted fields come from the backend verbatim. Derived, view-only
/// fields (`is_attending`, `unread_count`) are written into the same map
/// by the reconciler after each authoritative refetch and are never sent
/// back to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
	pub id: Uuid,
	#[serde(default)]
	pub fields: Map<String, Value>,
}

impl Entity {
	pub fn new(id: Uuid) -> Self {
		Self {
			id,
			fields: Map::new(),
		}
	}

	/// Builder-style field setter, used heavily by ops and tests
	pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.fields.insert(key.into(), value.into());
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.fields.get(key)
	}

	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.fields.get(key).and_then(Value::as_str)
	}

	pub fn get_i64(&self, key: &str) -> Option<i64> {
		self.fields.get(key).and_then(Value::as_i64)
	}

	pub fn get_bool(&self, key: &str) -> Option<bool> {
		self.fields.get(key).and_then(Value::as_bool)
	}

	pub fn get_uuid(&self, key: &str) -> Option<Uuid> {
		self.get_str(key).and_then(|s| Uuid::parse_str(s).ok())
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.fields.insert(key.into(), value.into());
	}

	/// Merge the given fields into this entity, preserving every field
	/// not named in `fields`. This is the only write path used by
	/// `patch`, so derived flags survive targeted updates.
	pub fn merge_fields(&mut self, fields: &Map<String, Value>) {
		for (key, value) in fields {
			self.fields.insert(key.clone(), value.clone());
		}
	}

	/// Adjust a numeric counter field by `delta`, flooring at zero.
	///
	/// A missing or non-numeric field counts as zero. Returns the value
	/// the counter held before the adjustment.
	pub fn apply_counter_delta(&mut self, key: &str, delta: i64) -> i64 {
		let current = self.get_i64(key).unwrap_or(0);
		let next = (current + delta).max(0);
		self.fields.insert(key.to_string(), Value::from(next));
		current
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn merge_preserves_unrelated_fields() {
		let mut entity = Entity::new(Uuid::new_v4())
			.with_field("title", "Career Fair")
			.with_field("attendees_count", 5);

		let mut patch = Map::new();
		patch.insert("title".into(), Value::from("Spring Career Fair"));
		entity.merge_fields(&patch);

		assert_eq!(entity.get_str("title"), Some("Spring Career Fair"));
		assert_eq!(entity.get_i64("attendees_count"), Some(5));
	}

	#[test]
	fn counter_never_goes_negative() {
		let mut entity = Entity::new(Uuid::new_v4()).with_field("attendees_count", 1);
		entity.apply_counter_delta("attendees_count", -1);
		entity.apply_counter_delta("attendees_count", -1);
		assert_eq!(entity.get_i64("attendees_count"), Some(0));
	}

	#[test]
	fn counter_delta_on_missing_field_starts_at_zero() {
		let mut entity = Entity::new(Uuid::new_v4());
		let previous = entity.apply_counter_delta("unread_count", 3);
		assert_eq!(previous, 0);
		assert_eq!(entity.get_i64("unread_count"), Some(3));
	}
}
