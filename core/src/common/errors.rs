//! Unified error handling for the core

use crate::domain::Collection;
use std::time::Duration;
use thiserror::Error;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
	/// Network or backend failure during a refetch or mutation.
	/// Surfaced to the view as a notice; never propagated uncaught.
	#[error("backend error {code}: {message}")]
	Backend { code: String, message: String },

	#[error("fetch for {0} timed out after {1:?}")]
	FetchTimeout(Collection, Duration),

	/// Result arrived after the owning view was torn down. Internal,
	/// silently discarded, never user-visible.
	#[error("view was unmounted before the result arrived")]
	StaleView,

	/// An optimistic rollback target no longer matches the store shape
	/// (the entity was deleted remotely in the interim). The deletion
	/// from the authoritative data wins and the rollback is a no-op.
	#[error("rollback target no longer present, remote deletion wins")]
	ReconciliationConflict,

	#[error("config error: {0}")]
	Config(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Other error: {0}")]
	Other(#[from] anyhow::Error),
}

impl CoreError {
	/// Whether this error should be shown to the user at all.
	/// Stale results and reconciliation conflicts resolve silently.
	pub fn is_user_visible(&self) -> bool {
		!matches!(
			self,
			CoreError::StaleView | CoreError::ReconciliationConflict
		)
	}
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
