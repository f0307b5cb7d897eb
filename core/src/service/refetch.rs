//! Debounced refetch coordinator.
//!
//! Change feeds deliver bursts (a cascade of attendee-count updates can
//! arrive within milliseconds); refetching on every event would cause
//! redundant round trips and UI flicker. Each `notify` resets that
//! collection's deadline to one quiet window out; when the deadline
//! passes without further notifies, exactly one refetch fires.
//!
//! If a refetch is already in flight when the deadline fires, the
//! executor reports it via `mark_queued` and exactly one follow-up is
//! replayed by `fetch_finished`, guaranteeing eventual consistency
//! without ever stacking duplicate fetches.

use crate::domain::Collection;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

struct Inner {
	quiet_window: Duration,
	timers: Mutex<HashMap<Collection, Instant>>,
	queued: Mutex<HashSet<Collection>>,
	fire_tx: mpsc::UnboundedSender<Collection>,
}

/// Coordinates one debounce timer per collection
#[derive(Clone)]
pub struct RefetchCoordinator {
	inner: Arc<Inner>,
}

impl RefetchCoordinator {
	/// Returns the coordinator and the channel on which due refetches
	/// are delivered, one `Collection` per required refetch.
	pub fn new(quiet_window: Duration) -> (Self, mpsc::UnboundedReceiver<Collection>) {
		let (fire_tx, fire_rx) = mpsc::unbounded_channel();
		(
			Self {
				inner: Arc::new(Inner {
					quiet_window,
					timers: Mutex::new(HashMap::new()),
					queued: Mutex::new(HashSet::new()),
					fire_tx,
				}),
			},
			fire_rx,
		)
	}

	/// A change notification arrived for `collection`: reset its timer
	/// to a full quiet window. Must be called from within a tokio
	/// runtime.
	pub fn notify(&self, collection: Collection) {
		let deadline = Instant::now() + self.inner.quiet_window;
		let mut timers = self.inner.timers.lock().unwrap();
		let already_armed = timers.insert(collection, deadline).is_some();
		drop(timers);

		trace!(collection = %collection, armed = !already_armed, "debounce timer reset");

		if !already_armed {
			let inner = Arc::clone(&self.inner);
			tokio::spawn(async move {
				loop {
					// Re-read under the lock: a later notify may have
					// pushed the deadline out while we slept
					let action = {
						let mut timers = inner.timers.lock().unwrap();
						match timers.get(&collection).copied() {
							None => None,
							Some(deadline) if Instant::now() >= deadline => {
								timers.remove(&collection);
								Some(Ok(()))
							}
							Some(deadline) => Some(Err(deadline)),
						}
					};

					match action {
						None => break,
						Some(Ok(())) => {
							debug!(collection = %collection, "quiet window elapsed, refetch due");
							inner.fire_tx.send(collection).ok();
							break;
						}
						Some(Err(deadline)) => tokio::time::sleep_until(deadline).await,
					}
				}
			});
		}
	}

	/// The executor found a fetch already in flight: remember to replay
	/// exactly one follow-up once it finishes
	pub fn mark_queued(&self, collection: Collection) {
		if self.inner.queued.lock().unwrap().insert(collection) {
			debug!(collection = %collection, "refetch queued behind in-flight fetch");
		}
	}

	/// A fetch for `collection` finished; replay the queued follow-up
	/// if there is one
	pub fn fetch_finished(&self, collection: Collection) {
		if self.inner.queued.lock().unwrap().remove(&collection) {
			debug!(collection = %collection, "replaying queued refetch");
			self.inner.fire_tx.send(collection).ok();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::time::timeout;

	#[tokio::test]
	async fn burst_of_notifies_coalesces_into_one_refetch() {
		let (coordinator, mut due) = RefetchCoordinator::new(Duration::from_millis(80));

		for _ in 0..5 {
			coordinator.notify(Collection::Events);
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		let fired = timeout(Duration::from_millis(500), due.recv())
			.await
			.expect("debounce never fired")
			.unwrap();
		assert_eq!(fired, Collection::Events);

		// nothing else is pending
		assert!(timeout(Duration::from_millis(150), due.recv()).await.is_err());
	}

	#[tokio::test]
	async fn each_notify_resets_the_quiet_window() {
		let (coordinator, mut due) = RefetchCoordinator::new(Duration::from_millis(200));

		coordinator.notify(Collection::Messages);
		tokio::time::sleep(Duration::from_millis(120)).await;
		coordinator.notify(Collection::Messages);

		// 120ms after the second notify the (reset) window is still open
		tokio::time::sleep(Duration::from_millis(120)).await;
		assert!(due.try_recv().is_err());

		let fired = timeout(Duration::from_millis(500), due.recv())
			.await
			.expect("debounce never fired")
			.unwrap();
		assert_eq!(fired, Collection::Messages);
	}

	#[tokio::test]
	async fn collections_debounce_independently() {
		let (coordinator, mut due) = RefetchCoordinator::new(Duration::from_millis(50));

		coordinator.notify(Collection::Events);
		coordinator.notify(Collection::Messages);

		let mut fired = vec![
			timeout(Duration::from_millis(500), due.recv())
				.await
				.unwrap()
				.unwrap(),
			timeout(Duration::from_millis(500), due.recv())
				.await
				.unwrap()
				.unwrap(),
		];
		fired.sort_by_key(|c| c.to_string());
		assert_eq!(fired, vec![Collection::Events, Collection::Messages]);
	}

	#[tokio::test]
	async fn queued_follow_up_replays_exactly_once() {
		let (coordinator, mut due) = RefetchCoordinator::new(Duration::from_millis(10));

		coordinator.mark_queued(Collection::Events);
		coordinator.mark_queued(Collection::Events);
		coordinator.fetch_finished(Collection::Events);

		assert_eq!(due.recv().await.unwrap(), Collection::Events);
		// the second mark_queued collapsed into the first
		coordinator.fetch_finished(Collection::Events);
		assert!(timeout(Duration::from_millis(50), due.recv()).await.is_err());
	}
}
