//! Core configuration

use crate::common::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Tunables for the reconciliation core, loaded from `campus-core.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
	/// Quiet window for the debounced refetch coordinator
	pub debounce_window_ms: u64,

	/// Timeout applied to every remote read/write
	pub fetch_timeout_ms: u64,

	/// Poll interval when the change feed cannot be established
	pub poll_interval_ms: u64,

	/// Cap for the exponential backoff between failed polls
	pub max_poll_backoff_ms: u64,

	/// Capacity of the feed and store broadcast channels
	pub channel_capacity: usize,

	/// Logging level directive (overridden by RUST_LOG)
	pub log_level: String,
}

impl Default for CoreConfig {
	fn default() -> Self {
		Self {
			debounce_window_ms: 1_000,
			fetch_timeout_ms: 15_000,
			poll_interval_ms: 30_000,
			max_poll_backoff_ms: 300_000,
			channel_capacity: 1024,
			log_level: "info".to_string(),
		}
	}
}

impl CoreConfig {
	pub fn debounce_window(&self) -> Duration {
		Duration::from_millis(self.debounce_window_ms)
	}

	pub fn fetch_timeout(&self) -> Duration {
		Duration::from_millis(self.fetch_timeout_ms)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn max_poll_backoff(&self) -> Duration {
		Duration::from_millis(self.max_poll_backoff_ms)
	}

	/// Load configuration from `campus-core.toml` in the given
	/// directory, creating the default file if it does not exist
	pub fn load_or_create(dir: &Path) -> Result<Self> {
		let path = dir.join("campus-core.toml");

		if path.exists() {
			info!("Loading config from {:?}", path);
			let raw = fs::read_to_string(&path)?;
			let config: CoreConfig =
				toml::from_str(&raw).map_err(|e| CoreError::Config(e.to_string()))?;
			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", path);
			let config = Self::default();
			config.save_to(dir)?;
			Ok(config)
		}
	}

	pub fn save_to(&self, dir: &Path) -> Result<()> {
		let path = dir.join("campus-core.toml");
		let raw = toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
		fs::write(path, raw)?;
		Ok(())
	}
}
