//! Optimistic domain operations.
//!
//! Each operation applies its local effects through the optimistic
//! mutation tracker, issues the remote write, and confirms on success
//! or rolls back on failure. Rollback logic lives in the tracker, not
//! here: an op only declares its effects.

pub mod events;
pub mod friends;
pub mod messages;
pub mod notifications;

use crate::common::errors::CoreError;
use crate::common::notice::Notice;
use crate::context::CoreContext;
use crate::infra::backend::BackendError;
use std::future::Future;
use tracing::warn;
use uuid::Uuid;

/// Apply the configured timeout to a remote write
pub(crate) async fn remote_write<T>(
	ctx: &CoreContext,
	fut: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
	match tokio::time::timeout(ctx.config.fetch_timeout(), fut).await {
		Ok(result) => result,
		Err(_) => Err(BackendError::new("timeout", "remote write timed out")),
	}
}

/// Roll back an optimistic mutation after a failed remote write and
/// surface the failure as a toast-style notice
pub(crate) fn fail_mutation(
	ctx: &CoreContext,
	token: Uuid,
	what: &str,
	err: BackendError,
) -> CoreError {
	warn!(error = %err, "{what}, rolling back optimistic update");
	ctx.tracker.rollback(token);
	ctx.notifier.emit(Notice::error(format!("{what}")));
	err.into()
}
