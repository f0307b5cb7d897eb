//! Reconciler: routes change notifications into debounced,
//! concurrency-guarded refetches and keeps derived fields current.
//!
//! Data flow: feed event -> coordinator.notify -> quiet window ->
//! guarded refetch -> store.replace -> supersede pending overlays ->
//! derived recompute. A transport reconnect (or a lagged subscriber)
//! notifies every watched collection, since gapless delivery cannot be
//! assumed. If the feed cannot be established at all, the reconciler
//! degrades to periodic polling with capped exponential backoff.

use crate::common::notice::Notice;
use crate::context::CoreContext;
use crate::domain::{derived, Collection};
use crate::infra::backend::QueryFilter;
use crate::infra::feed::{FeedEvent, FeedTransport, TransportFrame};
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a view-scoped fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
	/// Result applied to the store
	Applied,
	/// A fetch for this collection was already in flight; skipped
	AlreadyFetching,
	/// The owning view unmounted before the result arrived; the result
	/// was discarded without touching the store
	StaleDiscarded,
}

/// Background half of the core: owns the refetch loop and the feed pump
pub struct Reconciler {
	handles: Vec<JoinHandle<()>>,
}

impl Reconciler {
	/// Spawn the refetch loop and the transport pump
	pub fn spawn(
		ctx: Arc<CoreContext>,
		transport: Arc<dyn FeedTransport>,
		due_rx: mpsc::UnboundedReceiver<Collection>,
	) -> Self {
		let refetch_loop = tokio::spawn(run_refetch_loop(ctx.clone(), due_rx));
		let router = tokio::spawn(run_event_router(ctx.clone()));
		let pump = tokio::spawn(run_feed_pump(ctx, transport));

		Self {
			handles: vec![refetch_loop, router, pump],
		}
	}

	pub fn shutdown(&self) {
		for handle in &self.handles {
			handle.abort();
		}
	}
}

impl Drop for Reconciler {
	fn drop(&mut self) {
		self.shutdown();
	}
}

/// Server-side filter used when refetching a collection for the viewer
fn refetch_filter(ctx: &CoreContext, collection: Collection) -> QueryFilter {
	match collection {
		// Only the viewer's own attendance is needed for `is_attending`;
		// attendee totals come from the denormalized event counter
		Collection::Attendance => QueryFilter::field_eq("user_id", ctx.viewer.to_string()),
		Collection::Notifications => QueryFilter::field_eq("user_id", ctx.viewer.to_string()),
		// Messages and friendship edges involve the viewer in either
		// direction, which a single-field filter cannot express
		Collection::Events
		| Collection::Messages
		| Collection::Friendships => QueryFilter::All,
	}
}

/// Consume due refetches from the coordinator. Each refetch runs in its
/// own task so one slow collection cannot delay the others.
async fn run_refetch_loop(ctx: Arc<CoreContext>, mut due_rx: mpsc::UnboundedReceiver<Collection>) {
	while let Some(collection) = due_rx.recv().await {
		let ctx = ctx.clone();
		tokio::spawn(async move {
			refetch_collection(&ctx, collection).await;
		});
	}
}

/// Route feed events into the debounce coordinator
async fn run_event_router(ctx: Arc<CoreContext>) {
	let mut subscriber = ctx.feed.subscribe();
	loop {
		match subscriber.recv().await {
			Ok(FeedEvent::Change(change)) => {
				ctx.coordinator.notify(change.collection);
			}
			Ok(FeedEvent::Reconnected) => {
				debug!("feed reconnected, scheduling refetch of all collections");
				for collection in Collection::all() {
					ctx.coordinator.notify(collection);
				}
			}
			Err(_) => break,
		}
	}
}

/// Keep the transport connected, forwarding frames onto the feed bus.
/// Connection failures degrade to polling: every watched collection is
/// re-notified at the poll interval, backing off exponentially up to
/// the configured cap while the transport stays down.
async fn run_feed_pump(ctx: Arc<CoreContext>, transport: Arc<dyn FeedTransport>) {
	use backoff::backoff::Backoff;

	let mut backoff = backoff::ExponentialBackoff {
		initial_interval: ctx.config.poll_interval(),
		max_interval: ctx.config.max_poll_backoff(),
		max_elapsed_time: None,
		..Default::default()
	};
	backoff.reset();
	let mut degraded = false;

	loop {
		match transport.connect(Collection::all().collect()).await {
			Ok(mut stream) => {
				backoff.reset();
				if degraded {
					info!("change feed restored, leaving degraded polling mode");
					ctx.notifier.emit(Notice::info("Live updates restored"));
					degraded = false;
				}
				// Every (re)connect means missed events: force refetch
				ctx.feed.emit(FeedEvent::Reconnected);

				while let Some(frame) = stream.next().await {
					match frame {
						TransportFrame::Change(change) => {
							ctx.feed.emit(FeedEvent::Change(change));
						}
						TransportFrame::Reconnected => {
							ctx.feed.emit(FeedEvent::Reconnected);
						}
					}
				}

				warn!("change feed stream ended, reconnecting");
			}
			Err(err) => {
				if !degraded {
					warn!(error = %err, "change feed unavailable, falling back to polling");
					ctx.notifier
						.emit(Notice::error("Live updates unavailable, refreshing periodically"));
					degraded = true;
				}
				// Poll: schedule a refetch pass through the normal
				// debounced path
				for collection in Collection::all() {
					ctx.coordinator.notify(collection);
				}
			}
		}

		let delay = backoff.next_backoff().unwrap_or(ctx.config.max_poll_backoff());
		tokio::time::sleep(delay).await;
	}
}

/// Run one authoritative refetch for a collection.
///
/// Skips (and queues a follow-up) if a fetch is already in flight. On
/// success the result wholesale-replaces the collection, supersedes any
/// pending optimistic overlays it covers, and derived fields are
/// recomputed. On failure the collection is reset to empty so the view
/// never renders stale data, and a notice is surfaced.
pub async fn refetch_collection(ctx: &CoreContext, collection: Collection) {
	if !ctx.guard.try_begin_fetch(collection) {
		ctx.coordinator.mark_queued(collection);
		return;
	}

	let started = std::time::Instant::now();
	let filter = refetch_filter(ctx, collection);
	let result = timeout(
		ctx.config.fetch_timeout(),
		ctx.backend.query(collection, &filter),
	)
	.await;

	match result {
		Ok(Ok(entities)) => {
			let ids: HashSet<Uuid> = entities.iter().map(|e| e.id).collect();
			ctx.store.replace(collection, entities);
			ctx.tracker.supersede(collection, &ids);
			recompute_derived(ctx, collection);
			debug!(
				collection = %collection,
				count = ids.len(),
				duration_ms = started.elapsed().as_millis() as u64,
				"refetch completed"
			);
		}
		Ok(Err(err)) => {
			warn!(collection = %collection, error = %err, "refetch failed, resetting collection");
			ctx.store.clear(collection);
			ctx.notifier
				.emit(Notice::error(format!("Couldn't refresh {collection}")));
		}
		Err(_) => {
			warn!(
				collection = %collection,
				timeout_ms = ctx.config.fetch_timeout_ms,
				"refetch timed out, resetting collection"
			);
			ctx.store.clear(collection);
			ctx.notifier
				.emit(Notice::error(format!("Couldn't refresh {collection}")));
		}
	}

	ctx.guard.end_fetch(collection);
	ctx.coordinator.fetch_finished(collection);
}

/// Fetch a collection on behalf of a mounted view (initial load or
/// manual refresh). The result is applied only if the view is still
/// mounted when it arrives; stale results are discarded silently.
pub async fn fetch_for_view(
	ctx: &CoreContext,
	view: Uuid,
	collection: Collection,
) -> crate::common::errors::Result<FetchOutcome> {
	if !ctx.guard.try_begin_fetch(collection) {
		return Ok(FetchOutcome::AlreadyFetching);
	}

	let filter = refetch_filter(ctx, collection);
	let result = timeout(
		ctx.config.fetch_timeout(),
		ctx.backend.query(collection, &filter),
	)
	.await;

	let outcome = match result {
		_ if !ctx.guard.is_mounted(view) => {
			debug!(collection = %collection, view = %view, "discarding stale fetch result");
			Ok(FetchOutcome::StaleDiscarded)
		}
		Ok(Ok(entities)) => {
			let ids: HashSet<Uuid> = entities.iter().map(|e| e.id).collect();
			ctx.store.replace(collection, entities);
			ctx.tracker.supersede(collection, &ids);
			recompute_derived(ctx, collection);
			Ok(FetchOutcome::Applied)
		}
		Ok(Err(err)) => {
			ctx.store.clear(collection);
			ctx.notifier
				.emit(Notice::error(format!("Couldn't load {collection}")));
			Err(err.into())
		}
		Err(_) => {
			ctx.store.clear(collection);
			ctx.notifier
				.emit(Notice::error(format!("Couldn't load {collection}")));
			Err(crate::common::errors::CoreError::FetchTimeout(
				collection,
				ctx.config.fetch_timeout(),
			))
		}
	};

	ctx.guard.end_fetch(collection);
	ctx.coordinator.fetch_finished(collection);
	outcome
}

/// Recompute derived flags affected by a refetch of `collection`.
/// Only the events/attendance join materializes into the store; the
/// other derived values are computed on demand from snapshots.
fn recompute_derived(ctx: &CoreContext, collection: Collection) {
	if !matches!(collection, Collection::Events | Collection::Attendance) {
		return;
	}

	let events = ctx.store.snapshot(Collection::Events);
	let attendance = ctx.store.snapshot(Collection::Attendance);
	let flags = derived::attending_flags(&events.entities, &attendance.entities, ctx.viewer);

	for (event_id, attending) in flags {
		let mut fields = Map::new();
		fields.insert(derived::IS_ATTENDING.to_string(), Value::from(attending));
		ctx.store.patch(Collection::Events, event_id, &fields);
	}
}
