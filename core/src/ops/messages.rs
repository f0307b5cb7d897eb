//! Messaging operations

use super::{fail_mutation, remote_write};
use crate::cache::Mutation;
use crate::common::errors::Result;
use crate::context::CoreContext;
use crate::domain::{Collection, Entity};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Send a direct message. The message appears in local state (and in
/// the sender's conversation ordering) immediately.
pub async fn send_message(ctx: &CoreContext, receiver: Uuid, body: impl Into<String>) -> Result<()> {
	let message = Entity::new(Uuid::new_v4())
		.with_field("sender_id", ctx.viewer.to_string())
		.with_field("receiver_id", receiver.to_string())
		.with_field("body", body.into())
		.with_field("created_at", Utc::now().to_rfc3339())
		.with_field("read", false);

	let token = ctx
		.tracker
		.apply(Mutation::new().insert(Collection::Messages, message.clone()));

	match remote_write(ctx, ctx.backend.insert(Collection::Messages, message)).await {
		Ok(_) => {
			ctx.tracker.confirm(token);
			Ok(())
		}
		Err(err) => Err(fail_mutation(ctx, token, "Couldn't send message", err)),
	}
}

/// Mark every unread message from `peer` as read, zeroing the
/// conversation's unread badge immediately
pub async fn mark_conversation_read(ctx: &CoreContext, peer: Uuid) -> Result<()> {
	let messages = ctx.store.snapshot(Collection::Messages);
	let unread: Vec<Uuid> = messages
		.entities
		.iter()
		.filter(|message| {
			message.get_uuid("sender_id") == Some(peer)
				&& message.get_uuid("receiver_id") == Some(ctx.viewer)
				&& !message.get_bool("read").unwrap_or(false)
		})
		.map(|message| message.id)
		.collect();

	if unread.is_empty() {
		return Ok(());
	}

	let mut read_patch = Map::new();
	read_patch.insert("read".to_string(), Value::from(true));

	let mut mutation = Mutation::new();
	for id in &unread {
		mutation = mutation.patch(Collection::Messages, *id, read_patch.clone());
	}
	let token = ctx.tracker.apply(mutation);

	for id in &unread {
		if let Err(err) = remote_write(
			ctx,
			ctx.backend
				.update(Collection::Messages, *id, read_patch.clone()),
		)
		.await
		{
			// All-or-nothing: one failed write rolls the whole batch back
			return Err(fail_mutation(ctx, token, "Couldn't mark messages read", err));
		}
	}

	debug!(peer = %peer, count = unread.len(), "conversation marked read");
	ctx.tracker.confirm(token);
	Ok(())
}
