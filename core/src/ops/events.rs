//! Join/leave operations for campus events.
//!
//! Joining inserts an attendance record and bumps the event's attendee
//! counter; the `is_attending` flag and counter move immediately, ahead
//! of the remote write.

use super::{fail_mutation, remote_write};
use crate::cache::Mutation;
use crate::common::errors::Result;
use crate::context::CoreContext;
use crate::domain::{derived, Collection, Entity};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

fn attending_patch(attending: bool) -> Map<String, Value> {
	let mut fields = Map::new();
	fields.insert(derived::IS_ATTENDING.to_string(), Value::from(attending));
	fields
}

/// The viewer joins an event
pub async fn join_event(ctx: &CoreContext, event_id: Uuid) -> Result<()> {
	let attendance = Entity::new(Uuid::new_v4())
		.with_field("event_id", event_id.to_string())
		.with_field("user_id", ctx.viewer.to_string())
		.with_field("joined_at", Utc::now().to_rfc3339());

	let token = ctx.tracker.apply(
		Mutation::new()
			.insert(Collection::Attendance, attendance.clone())
			.patch(Collection::Events, event_id, attending_patch(true))
			.counter_delta(Collection::Events, event_id, "attendees_count", 1),
	);

	match remote_write(ctx, ctx.backend.insert(Collection::Attendance, attendance)).await {
		Ok(_) => {
			debug!(event = %event_id, "join confirmed");
			ctx.tracker.confirm(token);
			Ok(())
		}
		Err(err) => Err(fail_mutation(ctx, token, "Couldn't join event", err)),
	}
}

/// The viewer leaves an event they previously joined
pub async fn leave_event(ctx: &CoreContext, event_id: Uuid) -> Result<()> {
	// Find the viewer's attendance record in local state; if there is
	// none the viewer is not attending and there is nothing to do
	let attendance = ctx.store.snapshot(Collection::Attendance);
	let Some(record) = attendance.entities.iter().find(|record| {
		record.get_uuid("event_id") == Some(event_id)
			&& record.get_uuid("user_id") == Some(ctx.viewer)
	}) else {
		return Ok(());
	};
	let record_id = record.id;

	let token = ctx.tracker.apply(
		Mutation::new()
			.delete(Collection::Attendance, record_id)
			.patch(Collection::Events, event_id, attending_patch(false))
			.counter_delta(Collection::Events, event_id, "attendees_count", -1),
	);

	match remote_write(ctx, ctx.backend.delete(Collection::Attendance, record_id)).await {
		Ok(()) => {
			debug!(event = %event_id, "leave confirmed");
			ctx.tracker.confirm(token);
			Ok(())
		}
		Err(err) => Err(fail_mutation(ctx, token, "Couldn't leave event", err)),
	}
}
