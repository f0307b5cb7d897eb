//! Notification operations

use super::{fail_mutation, remote_write};
use crate::cache::Mutation;
use crate::common::errors::Result;
use crate::context::CoreContext;
use crate::domain::Collection;
use serde_json::{Map, Value};
use uuid::Uuid;

fn seen_patch() -> Map<String, Value> {
	let mut fields = Map::new();
	fields.insert("seen".to_string(), Value::from(true));
	fields
}

/// Mark a notification as seen, dropping it from the badge count
/// immediately
pub async fn mark_notification_seen(ctx: &CoreContext, notification_id: Uuid) -> Result<()> {
	let token = ctx.tracker.apply(Mutation::new().patch(
		Collection::Notifications,
		notification_id,
		seen_patch(),
	));

	match remote_write(
		ctx,
		ctx.backend
			.update(Collection::Notifications, notification_id, seen_patch()),
	)
	.await
	{
		Ok(_) => {
			ctx.tracker.confirm(token);
			Ok(())
		}
		Err(err) => Err(fail_mutation(ctx, token, "Couldn't update notifications", err)),
	}
}
