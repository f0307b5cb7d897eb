//! User-facing notices (toast-style messages surfaced by the view layer)

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
	Info,
	Warning,
	Error,
}

/// A short message the view renders as a toast. All network-facing
/// errors end up here instead of propagating into the render path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
	pub level: NoticeLevel,
	pub message: String,
}

impl Notice {
	pub fn error(message: impl Into<String>) -> Self {
		Self {
			level: NoticeLevel::Error,
			message: message.into(),
		}
	}

	pub fn info(message: impl Into<String>) -> Self {
		Self {
			level: NoticeLevel::Info,
			message: message.into(),
		}
	}
}

/// Fan-out channel for notices
pub struct Notifier {
	chan: broadcast::Sender<Notice>,
}

impl Notifier {
	pub fn new(capacity: usize) -> Self {
		Self {
			chan: broadcast::channel(capacity).0,
		}
	}

	pub fn emit(&self, notice: Notice) {
		if self.chan.receiver_count() > 0 {
			self.chan.send(notice).ok();
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
		self.chan.subscribe()
	}
}

impl Default for Notifier {
	fn default() -> Self {
		Self::new(64)
	}
}
