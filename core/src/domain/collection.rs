//! Collection identifiers for the watched entity sets

use serde::{Deserialize, Serialize};

/// A named set of homogeneous entities the client keeps in sync.
///
/// Each collection maps to one backend table and one logical change feed
/// subscription.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	strum::AsRefStr,
	strum::Display,
	strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
	/// Campus events (parties, talks, career fairs)
	Events,
	/// Attendance records joining users to events
	Attendance,
	/// Direct messages between users
	Messages,
	/// Friendship edges (requests and accepted links)
	Friendships,
	/// Per-user notification items
	Notifications,
}

impl Collection {
	/// All collections the reconciler watches
	pub fn all() -> impl Iterator<Item = Collection> {
		use strum::IntoEnumIterator;
		Self::iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collection_names_are_snake_case() {
		assert_eq!(Collection::Events.as_ref(), "events");
		assert_eq!(Collection::Friendships.to_string(), "friendships");
	}

	#[test]
	fn serde_round_trip() {
		let json = serde_json::to_string(&Collection::Attendance).unwrap();
		assert_eq!(json, "\"attendance\"");
		let back: Collection = serde_json::from_str(&json).unwrap();
		assert_eq!(back, Collection::Attendance);
	}
}
