//! Shared context providing access to core application components.

use crate::cache::{OptimisticTracker, ViewStateStore};
use crate::common::notice::Notifier;
use crate::config::CoreConfig;
use crate::domain::Collection;
use crate::infra::backend::PersistentStore;
use crate::infra::feed::ChangeFeed;
use crate::service::{ConcurrencyGuard, RefetchCoordinator};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared context providing access to core application components.
#[derive(Clone)]
pub struct CoreContext {
	pub config: CoreConfig,
	/// The signed-in user all derived fields are computed for
	pub viewer: Uuid,
	pub backend: Arc<dyn PersistentStore>,
	pub store: Arc<ViewStateStore>,
	pub tracker: Arc<OptimisticTracker>,
	pub guard: Arc<ConcurrencyGuard>,
	pub coordinator: RefetchCoordinator,
	pub feed: ChangeFeed,
	pub notifier: Arc<Notifier>,
}

impl CoreContext {
	/// Build the component graph. Returns the context and the channel
	/// of due refetches the reconciler must consume.
	pub fn new(
		config: CoreConfig,
		viewer: Uuid,
		backend: Arc<dyn PersistentStore>,
	) -> (Arc<Self>, mpsc::UnboundedReceiver<Collection>) {
		let store = Arc::new(ViewStateStore::new(config.channel_capacity));
		let tracker = Arc::new(OptimisticTracker::new(store.clone()));
		let guard = Arc::new(ConcurrencyGuard::new());
		let (coordinator, due_rx) = RefetchCoordinator::new(config.debounce_window());
		let feed = ChangeFeed::new(config.channel_capacity);
		let notifier = Arc::new(Notifier::default());

		(
			Arc::new(Self {
				config,
				viewer,
				backend,
				store,
				tracker,
				guard,
				coordinator,
				feed,
				notifier,
			}),
			due_rx,
		)
	}
}
