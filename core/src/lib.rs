//! campus-core: the client-side real-time reconciliation engine behind
//! the Campus social network app.
//!
//! The view layer renders snapshots from the [`cache::ViewStateStore`]
//! and issues optimistic operations from [`ops`]; the backend pushes
//! row-level changes through a [`infra::feed::FeedTransport`]. In
//! between, the reconciler debounces change bursts into single
//! authoritative refetches, guards against overlapping fetches and
//! unmounted views, and reconciles refetch results against pending
//! optimistic mutations so updates are never duplicated, lost or
//! flickering.

pub mod cache;
pub mod common;
pub mod config;
pub mod context;
pub mod domain;
pub mod infra;
pub mod ops;
pub mod service;

pub use cache::{Mutation, StoreUpdate, ViewState};
pub use common::errors::{CoreError, Result};
pub use common::notice::Notice;
pub use config::CoreConfig;
pub use context::CoreContext;
pub use domain::{Collection, ConversationSummary, Entity};
pub use infra::backend::{BackendError, PersistentStore, QueryFilter};
pub use infra::feed::{ChangeEvent, ChangeKind, FeedEvent, FeedSubscriber, FeedTransport};
pub use service::{FetchOutcome, ViewHandle};

use crate::domain::derived;
use crate::infra::feed::SubscriptionFilter;
use crate::service::Reconciler;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Initialize tracing for the process. Safe to call more than once;
/// later calls are no-ops. `RUST_LOG` overrides the given directive.
pub fn init_logging(directive: &str) {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.try_init()
		.ok();
}

/// The assembled core: shared context plus the background reconciler
pub struct Core {
	pub context: Arc<CoreContext>,
	reconciler: Reconciler,
}

impl Core {
	/// Build the core for the signed-in `viewer` and start the
	/// background reconciliation tasks
	pub fn new(
		config: CoreConfig,
		viewer: Uuid,
		backend: Arc<dyn PersistentStore>,
		transport: Arc<dyn FeedTransport>,
	) -> Self {
		init_logging(&config.log_level);
		let (context, due_rx) = CoreContext::new(config, viewer, backend);
		let reconciler = Reconciler::spawn(context.clone(), transport, due_rx);
		info!(viewer = %viewer, "campus core started");
		Self {
			context,
			reconciler,
		}
	}

	// --- view state ---------------------------------------------------

	/// Render-ready snapshot of a collection
	pub fn snapshot(&self, collection: Collection) -> ViewState {
		self.context.store.snapshot(collection)
	}

	/// Conversations for the viewer, newest first, with unread counts
	pub fn conversations(&self) -> Vec<ConversationSummary> {
		let messages = self.context.store.snapshot(Collection::Messages);
		derived::conversation_summaries(&messages.entities, self.context.viewer)
	}

	/// Unseen notification badge count
	pub fn unseen_notifications(&self) -> u64 {
		let notifications = self.context.store.snapshot(Collection::Notifications);
		derived::unseen_notifications(&notifications.entities)
	}

	/// Incoming friend requests awaiting a response
	pub fn pending_friend_requests(&self) -> u64 {
		let friendships = self.context.store.snapshot(Collection::Friendships);
		derived::pending_friend_requests(&friendships.entities, self.context.viewer)
	}

	// --- subscriptions ------------------------------------------------

	/// Store updates in application order
	pub fn subscribe_store(&self) -> broadcast::Receiver<StoreUpdate> {
		self.context.store.subscribe()
	}

	/// User-facing notices (toasts)
	pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
		self.context.notifier.subscribe()
	}

	/// Raw change feed events for one collection
	pub fn subscribe_changes(&self, collection: Collection) -> FeedSubscriber {
		self.context
			.feed
			.subscribe_filtered(SubscriptionFilter::collection(collection))
	}

	// --- view lifecycle -----------------------------------------------

	/// Register a mounted view; drop the handle on unmount
	pub fn register_view(&self) -> ViewHandle {
		self.context.guard.register_view()
	}

	/// Initial load (or manual refresh) of a collection on behalf of a
	/// mounted view. The result is discarded if the view unmounts
	/// before it arrives.
	pub async fn load_for_view(
		&self,
		view: &ViewHandle,
		collection: Collection,
	) -> Result<FetchOutcome> {
		service::reconciler::fetch_for_view(&self.context, view.token(), collection).await
	}

	/// Schedule a debounced refetch, as if a change notification had
	/// arrived
	pub fn refresh(&self, collection: Collection) {
		self.context.coordinator.notify(collection);
	}

	// --- optimistic operations ----------------------------------------

	pub async fn join_event(&self, event_id: Uuid) -> Result<()> {
		ops::events::join_event(&self.context, event_id).await
	}

	pub async fn leave_event(&self, event_id: Uuid) -> Result<()> {
		ops::events::leave_event(&self.context, event_id).await
	}

	pub async fn send_message(&self, receiver: Uuid, body: impl Into<String>) -> Result<()> {
		ops::messages::send_message(&self.context, receiver, body).await
	}

	pub async fn mark_conversation_read(&self, peer: Uuid) -> Result<()> {
		ops::messages::mark_conversation_read(&self.context, peer).await
	}

	pub async fn send_friend_request(&self, addressee: Uuid) -> Result<()> {
		ops::friends::send_friend_request(&self.context, addressee).await
	}

	pub async fn accept_friend_request(&self, edge_id: Uuid) -> Result<()> {
		ops::friends::accept_friend_request(&self.context, edge_id).await
	}

	pub async fn remove_friendship(&self, edge_id: Uuid) -> Result<()> {
		ops::friends::remove_friendship(&self.context, edge_id).await
	}

	pub async fn mark_notification_seen(&self, notification_id: Uuid) -> Result<()> {
		ops::notifications::mark_notification_seen(&self.context, notification_id).await
	}

	// --- lifecycle ----------------------------------------------------

	pub fn shutdown(&self) {
		info!("campus core shutting down");
		self.reconciler.shutdown();
	}
}
