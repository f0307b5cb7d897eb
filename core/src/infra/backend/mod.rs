//! Contract for the managed persistent store.
//!
//! The backend is an external collaborator: the core only sees
//! `query`/`insert`/`update`/`delete` and never reaches its storage
//! engine directly. Implementations wrap whatever wire protocol the
//! deployment uses; tests use an in-memory implementation.

use crate::domain::{Collection, Entity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Error surfaced by the backend as a `{code, message}` pair
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("backend error {code}: {message}")]
pub struct BackendError {
	pub code: String,
	pub message: String,
}

impl BackendError {
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
		}
	}
}

impl From<BackendError> for crate::common::errors::CoreError {
	fn from(err: BackendError) -> Self {
		Self::Backend {
			code: err.code,
			message: err.message,
		}
	}
}

/// Row filter applied server-side on query and feed subscriptions,
/// e.g. "messages where receiver_id = me"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum QueryFilter {
	#[default]
	All,
	FieldEq {
		field: String,
		value: Value,
	},
}

impl QueryFilter {
	pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::FieldEq {
			field: field.into(),
			value: value.into(),
		}
	}

	pub fn matches(&self, entity: &Entity) -> bool {
		match self {
			Self::All => true,
			Self::FieldEq { field, value } => entity.get(field) == Some(value),
		}
	}
}

/// Operations the core issues against the managed store
#[async_trait]
pub trait PersistentStore: Send + Sync {
	async fn query(
		&self,
		collection: Collection,
		filter: &QueryFilter,
	) -> Result<Vec<Entity>, BackendError>;

	async fn insert(&self, collection: Collection, entity: Entity)
		-> Result<Entity, BackendError>;

	async fn update(
		&self,
		collection: Collection,
		id: Uuid,
		fields: Map<String, Value>,
	) -> Result<Entity, BackendError>;

	async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), BackendError>;
}
