//! Shared fixtures for integration tests: an in-memory backend and a
//! scriptable change feed transport.

#![allow(dead_code)]

use async_trait::async_trait;
use campus_core::{
	BackendError, Collection, Entity, FeedTransport, PersistentStore, QueryFilter,
};
use campus_core::infra::feed::TransportFrame;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// In-memory `PersistentStore` with failure and latency injection
#[derive(Default)]
pub struct MemoryBackend {
	data: Mutex<HashMap<Collection, Vec<Entity>>>,
	query_counts: Mutex<HashMap<Collection, usize>>,
	fail_queries: AtomicBool,
	fail_writes: AtomicBool,
	query_delay: Mutex<Option<Duration>>,
	write_delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn seed(&self, collection: Collection, entities: Vec<Entity>) {
		self.data.lock().unwrap().insert(collection, entities);
	}

	/// Overwrite one entity in place (simulates another client's write)
	pub fn put(&self, collection: Collection, entity: Entity) {
		let mut data = self.data.lock().unwrap();
		let rows = data.entry(collection).or_default();
		match rows.iter_mut().find(|e| e.id == entity.id) {
			Some(existing) => *existing = entity,
			None => rows.push(entity),
		}
	}

	pub fn query_count(&self, collection: Collection) -> usize {
		*self
			.query_counts
			.lock()
			.unwrap()
			.get(&collection)
			.unwrap_or(&0)
	}

	pub fn set_fail_queries(&self, fail: bool) {
		self.fail_queries.store(fail, Ordering::SeqCst);
	}

	pub fn set_fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	pub fn set_query_delay(&self, delay: Option<Duration>) {
		*self.query_delay.lock().unwrap() = delay;
	}

	pub fn set_write_delay(&self, delay: Option<Duration>) {
		*self.write_delay.lock().unwrap() = delay;
	}

	async fn maybe_sleep(delay: Option<Duration>) {
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
	}
}

#[async_trait]
impl PersistentStore for MemoryBackend {
	async fn query(
		&self,
		collection: Collection,
		filter: &QueryFilter,
	) -> Result<Vec<Entity>, BackendError> {
		let delay = *self.query_delay.lock().unwrap();
		Self::maybe_sleep(delay).await;

		*self
			.query_counts
			.lock()
			.unwrap()
			.entry(collection)
			.or_insert(0) += 1;

		if self.fail_queries.load(Ordering::SeqCst) {
			return Err(BackendError::new("unavailable", "backend down"));
		}

		Ok(self
			.data
			.lock()
			.unwrap()
			.get(&collection)
			.map(|rows| rows.iter().filter(|e| filter.matches(e)).cloned().collect())
			.unwrap_or_default())
	}

	async fn insert(
		&self,
		collection: Collection,
		entity: Entity,
	) -> Result<Entity, BackendError> {
		let delay = *self.write_delay.lock().unwrap();
		Self::maybe_sleep(delay).await;

		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(BackendError::new("unavailable", "write failed"));
		}

		self.data
			.lock()
			.unwrap()
			.entry(collection)
			.or_default()
			.push(entity.clone());
		Ok(entity)
	}

	async fn update(
		&self,
		collection: Collection,
		id: Uuid,
		fields: Map<String, Value>,
	) -> Result<Entity, BackendError> {
		let delay = *self.write_delay.lock().unwrap();
		Self::maybe_sleep(delay).await;

		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(BackendError::new("unavailable", "write failed"));
		}

		let mut data = self.data.lock().unwrap();
		let entity = data
			.get_mut(&collection)
			.and_then(|rows| rows.iter_mut().find(|e| e.id == id))
			.ok_or_else(|| BackendError::new("not_found", "no such row"))?;
		entity.merge_fields(&fields);
		Ok(entity.clone())
	}

	async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), BackendError> {
		let delay = *self.write_delay.lock().unwrap();
		Self::maybe_sleep(delay).await;

		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(BackendError::new("unavailable", "write failed"));
		}

		let mut data = self.data.lock().unwrap();
		if let Some(rows) = data.get_mut(&collection) {
			rows.retain(|e| e.id != id);
		}
		Ok(())
	}
}

/// Transport the test drives by pushing frames through a channel.
/// The first `connect` consumes the channel; later reconnects get a
/// silent stream that never yields.
pub struct ScriptedTransport {
	frames: Mutex<Option<mpsc::UnboundedReceiver<TransportFrame>>>,
}

impl ScriptedTransport {
	pub fn pair() -> (Self, mpsc::UnboundedSender<TransportFrame>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(
			Self {
				frames: Mutex::new(Some(rx)),
			},
			tx,
		)
	}
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
	async fn connect(
		&self,
		_collections: Vec<Collection>,
	) -> Result<BoxStream<'static, TransportFrame>, BackendError> {
		match self.frames.lock().unwrap().take() {
			Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
			None => Ok(futures::stream::pending().boxed()),
		}
	}
}

/// Transport that can never establish a subscription, forcing the core
/// into degraded polling mode
pub struct UnavailableTransport;

#[async_trait]
impl FeedTransport for UnavailableTransport {
	async fn connect(
		&self,
		_collections: Vec<Collection>,
	) -> Result<BoxStream<'static, TransportFrame>, BackendError> {
		Err(BackendError::new("unavailable", "feed refused"))
	}
}

/// Config with timers short enough for tests
pub fn test_config() -> campus_core::CoreConfig {
	campus_core::CoreConfig {
		debounce_window_ms: 60,
		fetch_timeout_ms: 2_000,
		poll_interval_ms: 50,
		max_poll_backoff_ms: 200,
		..Default::default()
	}
}

/// An event entity as the backend would return it
pub fn event_entity(id: Uuid, title: &str, attendees: i64) -> Entity {
	Entity::new(id)
		.with_field("title", title)
		.with_field("attendees_count", attendees)
		.with_field("starts_at", "2026-04-10T18:00:00Z")
}

/// The viewer's attendance record for an event
pub fn attendance_entity(event_id: Uuid, user_id: Uuid) -> Entity {
	Entity::new(Uuid::new_v4())
		.with_field("event_id", event_id.to_string())
		.with_field("user_id", user_id.to_string())
		.with_field("joined_at", "2026-04-01T12:00:00Z")
}
