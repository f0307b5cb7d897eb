//! Change feed client: fan-out of row-level change notifications.
//!
//! One logical subscription per watched collection. Delivery is in
//! commit order within a single subscription (each subscriber owns a
//! dedicated channel); no ordering is guaranteed across collections.
//! A transport reconnect is delivered as [`FeedEvent::Reconnected`] and
//! MUST be treated by subscribers as "refetch now" — gapless delivery
//! cannot be assumed after a drop.

use crate::domain::{Collection, Entity};
use crate::infra::backend::{BackendError, QueryFilter};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Kind of remote mutation carried by a change event
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

/// A single row-level change pushed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub collection: Collection,
	pub kind: ChangeKind,
	/// Full entity for inserts/updates; for deletes the backend may
	/// send the id alone with an empty field map
	pub entity: Entity,
}

/// What a feed subscriber receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedEvent {
	Change(ChangeEvent),
	/// The transport dropped and re-established its connection, or the
	/// subscriber fell behind and missed events. Either way the only
	/// correct reaction is a full refetch.
	Reconnected,
}

/// Frames produced by the underlying transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
	Change(ChangeEvent),
	Reconnected,
}

/// Bidirectional channel to the backend's change feed. The transport
/// reconnects on its own; the core only observes reconnects as frames.
#[async_trait]
pub trait FeedTransport: Send + Sync {
	/// Establish the feed for the given collections. Returns a stream
	/// of frames, or an error if the subscription cannot be
	/// established (the caller then falls back to polling).
	async fn connect(
		&self,
		collections: Vec<Collection>,
	) -> Result<BoxStream<'static, TransportFrame>, BackendError>;
}

/// Filter for feed subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
	pub collection: Collection,
	#[serde(default)]
	pub filter: QueryFilter,
}

impl SubscriptionFilter {
	pub fn collection(collection: Collection) -> Self {
		Self {
			collection,
			filter: QueryFilter::All,
		}
	}

	/// Check if this filter matches the given event.
	/// Reconnects match every subscription. Deletes match on collection
	/// alone: the tombstone may carry no fields to filter on.
	pub fn matches(&self, event: &FeedEvent) -> bool {
		match event {
			FeedEvent::Reconnected => true,
			FeedEvent::Change(change) => {
				change.collection == self.collection
					&& (change.kind == ChangeKind::Delete || self.filter.matches(&change.entity))
			}
		}
	}
}

/// A filtered subscriber with its own broadcast channel
#[derive(Debug)]
struct FilteredSubscriber {
	id: Uuid,
	filter: SubscriptionFilter,
	sender: broadcast::Sender<FeedEvent>,
}

/// Fan-out bus for change feed events with optional filtering
#[derive(Debug, Clone)]
pub struct ChangeFeed {
	// Unfiltered subscriptions
	sender: broadcast::Sender<FeedEvent>,
	// Filtered subscribers, each with a dedicated channel so delivery
	// order within a subscription matches emit order
	subscribers: Arc<RwLock<Vec<FilteredSubscriber>>>,
	capacity: usize,
}

impl ChangeFeed {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self {
			sender,
			subscribers: Arc::new(RwLock::new(Vec::new())),
			capacity,
		}
	}

	/// Emit an event to all subscribers (filtered and unfiltered)
	pub fn emit(&self, event: FeedEvent) {
		self.sender.send(event.clone()).ok();

		let subscribers = self.subscribers.read().unwrap();
		for subscriber in subscribers.iter() {
			if subscriber.filter.matches(&event) {
				// A closed channel is cleaned up on unsubscribe/drop
				subscriber.sender.send(event.clone()).ok();
			}
		}
	}

	/// Subscribe to all events (unfiltered)
	pub fn subscribe(&self) -> FeedSubscriber {
		FeedSubscriber {
			receiver: self.sender.subscribe(),
			subscription_id: None,
			feed: None,
		}
	}

	/// Subscribe to one collection, optionally filtered
	pub fn subscribe_filtered(&self, filter: SubscriptionFilter) -> FeedSubscriber {
		let id = Uuid::new_v4();
		let (sender, receiver) = broadcast::channel(self.capacity);

		self.subscribers.write().unwrap().push(FilteredSubscriber {
			id,
			filter,
			sender,
		});

		debug!(subscription_id = %id, "created filtered feed subscription");

		FeedSubscriber {
			receiver,
			subscription_id: Some(id),
			feed: Some(self.clone()),
		}
	}

	/// Unsubscribe a filtered subscription
	pub fn unsubscribe(&self, subscription_id: Uuid) {
		let mut subscribers = self.subscribers.write().unwrap();
		subscribers.retain(|s| s.id != subscription_id);
		debug!(subscription_id = %subscription_id, "unsubscribed feed subscription");
	}

	/// Number of active subscribers (unfiltered + filtered)
	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count() + self.subscribers.read().unwrap().len()
	}
}

impl Default for ChangeFeed {
	fn default() -> Self {
		Self::new(1024)
	}
}

/// Receiving half of a feed subscription.
///
/// Exclusively owned by the view (or service task) that created it;
/// dropping it tears the subscription down.
#[derive(Debug)]
pub struct FeedSubscriber {
	receiver: broadcast::Receiver<FeedEvent>,
	subscription_id: Option<Uuid>,
	feed: Option<ChangeFeed>,
}

impl FeedSubscriber {
	/// Receive the next event. A lagged receiver (missed events) is
	/// collapsed into `Reconnected`: the subscriber can no longer trust
	/// its incremental view and must refetch.
	pub async fn recv(&mut self) -> Result<FeedEvent, broadcast::error::RecvError> {
		match self.receiver.recv().await {
			Ok(event) => Ok(event),
			Err(broadcast::error::RecvError::Lagged(missed)) => {
				debug!(missed, "feed subscriber lagged, forcing refetch");
				Ok(FeedEvent::Reconnected)
			}
			Err(err) => Err(err),
		}
	}

	/// Try to receive an event without blocking
	pub fn try_recv(&mut self) -> Result<FeedEvent, broadcast::error::TryRecvError> {
		self.receiver.try_recv()
	}
}

impl Drop for FeedSubscriber {
	fn drop(&mut self) {
		// Auto-unsubscribe filtered subscriptions when dropped
		if let (Some(id), Some(feed)) = (self.subscription_id, &self.feed) {
			feed.unsubscribe(id);
		}
	}
}
