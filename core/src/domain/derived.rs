//! Derived, view-only fields recomputed from authoritative joined data.
//!
//! Nothing in this module is ever persisted remotely. The reconciler
//! re-runs these joins after every authoritative refetch so the flags
//! cannot drift from the data they are computed from.

use super::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Derived flag on event entities: is the current viewer attending
pub const IS_ATTENDING: &str = "is_attending";

/// For each event, compute the viewer's `is_attending` flag from the
/// attendance join. Returns `(event_id, flag)` pairs for every event in
/// the input, so a refetch clears flags for events the viewer left.
pub fn attending_flags(
	events: &[Entity],
	attendance: &[Entity],
	viewer: Uuid,
) -> Vec<(Uuid, bool)> {
	events
		.iter()
		.map(|event| {
			let attending = attendance.iter().any(|record| {
				record.get_uuid("event_id") == Some(event.id)
					&& record.get_uuid("user_id") == Some(viewer)
			});
			(event.id, attending)
		})
		.collect()
}

/// Render-ready summary of one conversation, derived from the messages
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
	/// The other participant
	pub peer_id: Uuid,
	/// Timestamp of the most recent message in either direction
	pub last_activity: DateTime<Utc>,
	/// Body of the most recent message
	pub last_preview: String,
	/// Messages addressed to the viewer and not yet read
	pub unread_count: u64,
}

/// Group messages into conversations for the viewer, newest first.
///
/// Unread counts only consider messages addressed to the viewer;
/// ordering considers traffic in both directions.
pub fn conversation_summaries(messages: &[Entity], viewer: Uuid) -> Vec<ConversationSummary> {
	let mut by_peer: HashMap<Uuid, ConversationSummary> = HashMap::new();

	for message in messages {
		let (Some(sender), Some(receiver)) = (
			message.get_uuid("sender_id"),
			message.get_uuid("receiver_id"),
		) else {
			continue;
		};

		let peer = if sender == viewer {
			receiver
		} else if receiver == viewer {
			sender
		} else {
			continue;
		};

		let sent_at = message
			.get_str("created_at")
			.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
			.map(|dt| dt.with_timezone(&Utc))
			.unwrap_or_default();

		let unread = receiver == viewer && !message.get_bool("read").unwrap_or(false);

		let summary = by_peer.entry(peer).or_insert_with(|| ConversationSummary {
			peer_id: peer,
			last_activity: sent_at,
			last_preview: message.get_str("body").unwrap_or_default().to_string(),
			unread_count: 0,
		});

		if sent_at >= summary.last_activity {
			summary.last_activity = sent_at;
			summary.last_preview = message.get_str("body").unwrap_or_default().to_string();
		}
		if unread {
			summary.unread_count += 1;
		}
	}

	let mut summaries: Vec<_> = by_peer.into_values().collect();
	summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
	summaries
}

/// Unseen notification count for the badge
pub fn unseen_notifications(notifications: &[Entity]) -> u64 {
	notifications
		.iter()
		.filter(|n| !n.get_bool("seen").unwrap_or(false))
		.count() as u64
}

/// Incoming friend requests awaiting the viewer's response
pub fn pending_friend_requests(friendships: &[Entity], viewer: Uuid) -> u64 {
	friendships
		.iter()
		.filter(|edge| {
			edge.get_str("status") == Some("pending")
				&& edge.get_uuid("addressee_id") == Some(viewer)
		})
		.count() as u64
}
