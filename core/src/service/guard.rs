//! Concurrency guard: per-collection fetch state machine and the view
//! mount registry.
//!
//! The fetch state machine replaces scattered boolean in-flight flags:
//! a collection is either `Idle` or `Fetching`, and `try_begin_fetch`
//! is the only transition into `Fetching`. Callers that lose the race
//! skip the fetch (the refetch coordinator owns follow-up queuing).
//!
//! The mount registry backs `is_mounted`: every asynchronous result
//! must be checked against it before touching the store, so results
//! that outlive their view are discarded silently.

use crate::domain::Collection;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::trace;
use uuid::Uuid;

/// Fetch state for one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FetchState {
	#[default]
	Idle,
	Fetching,
}

#[derive(Default)]
pub struct ConcurrencyGuard {
	fetches: Mutex<HashMap<Collection, FetchState>>,
	mounted: Mutex<HashSet<Uuid>>,
}

impl ConcurrencyGuard {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attempt the `Idle -> Fetching` transition. Returns false if a
	/// fetch for this collection is already in flight; the caller must
	/// skip rather than queue.
	pub fn try_begin_fetch(&self, collection: Collection) -> bool {
		let mut fetches = self.fetches.lock().unwrap();
		let state = fetches.entry(collection).or_default();
		match state {
			FetchState::Idle => {
				*state = FetchState::Fetching;
				trace!(collection = %collection, "fetch started");
				true
			}
			FetchState::Fetching => false,
		}
	}

	/// Transition back to `Idle`, on success or failure alike
	pub fn end_fetch(&self, collection: Collection) {
		let mut fetches = self.fetches.lock().unwrap();
		fetches.insert(collection, FetchState::Idle);
		trace!(collection = %collection, "fetch ended");
	}

	pub fn is_fetching(&self, collection: Collection) -> bool {
		matches!(
			self.fetches.lock().unwrap().get(&collection),
			Some(FetchState::Fetching)
		)
	}

	/// Register a mounted view and get its RAII handle. The view stays
	/// "mounted" until the handle is dropped.
	pub fn register_view(self: &Arc<Self>) -> ViewHandle {
		let token = Uuid::new_v4();
		self.mounted.lock().unwrap().insert(token);
		ViewHandle {
			token,
			guard: Arc::clone(self),
		}
	}

	/// Must be checked before applying any asynchronous result to the
	/// view state store
	pub fn is_mounted(&self, token: Uuid) -> bool {
		self.mounted.lock().unwrap().contains(&token)
	}

	fn unmount(&self, token: Uuid) {
		self.mounted.lock().unwrap().remove(&token);
		trace!(view = %token, "view unmounted");
	}
}

/// RAII handle for a mounted view. In-flight fetches are not cancelled
/// when this drops; their results simply fail the `is_mounted` check.
pub struct ViewHandle {
	token: Uuid,
	guard: Arc<ConcurrencyGuard>,
}

impl ViewHandle {
	pub fn token(&self) -> Uuid {
		self.token
	}
}

impl Drop for ViewHandle {
	fn drop(&mut self) {
		self.guard.unmount(self.token);
	}
}
