//! Friendship edge operations

use super::{fail_mutation, remote_write};
use crate::cache::Mutation;
use crate::common::errors::Result;
use crate::context::CoreContext;
use crate::domain::{Collection, Entity};
use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

fn status_patch(status: &str) -> Map<String, Value> {
	let mut fields = Map::new();
	fields.insert("status".to_string(), Value::from(status));
	fields
}

/// Send a friend request to another user
pub async fn send_friend_request(ctx: &CoreContext, addressee: Uuid) -> Result<()> {
	let edge = Entity::new(Uuid::new_v4())
		.with_field("requester_id", ctx.viewer.to_string())
		.with_field("addressee_id", addressee.to_string())
		.with_field("status", "pending")
		.with_field("created_at", Utc::now().to_rfc3339());

	let token = ctx
		.tracker
		.apply(Mutation::new().insert(Collection::Friendships, edge.clone()));

	match remote_write(ctx, ctx.backend.insert(Collection::Friendships, edge)).await {
		Ok(_) => {
			ctx.tracker.confirm(token);
			Ok(())
		}
		Err(err) => Err(fail_mutation(ctx, token, "Couldn't send friend request", err)),
	}
}

/// Accept an incoming friend request
pub async fn accept_friend_request(ctx: &CoreContext, edge_id: Uuid) -> Result<()> {
	let token = ctx.tracker.apply(Mutation::new().patch(
		Collection::Friendships,
		edge_id,
		status_patch("accepted"),
	));

	match remote_write(
		ctx,
		ctx.backend
			.update(Collection::Friendships, edge_id, status_patch("accepted")),
	)
	.await
	{
		Ok(_) => {
			ctx.tracker.confirm(token);
			Ok(())
		}
		Err(err) => Err(fail_mutation(ctx, token, "Couldn't accept friend request", err)),
	}
}

/// Remove a friendship edge (unfriend, or withdraw/decline a request)
pub async fn remove_friendship(ctx: &CoreContext, edge_id: Uuid) -> Result<()> {
	let token = ctx
		.tracker
		.apply(Mutation::new().delete(Collection::Friendships, edge_id));

	match remote_write(ctx, ctx.backend.delete(Collection::Friendships, edge_id)).await {
		Ok(()) => {
			ctx.tracker.confirm(token);
			Ok(())
		}
		Err(err) => Err(fail_mutation(ctx, token, "Couldn't update friends", err)),
	}
}
