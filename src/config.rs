#![allow(dead_code)]

//! Unified configuration for the sync engine.
//!
//! Consolidates every task-independent runtime knob into a single struct
//! (state directory, dispatcher tuning, hash algorithm/budget, transport
//! timeouts, host-key policy, logging). Per-task settings — mode, endpoints,
//! filters, per-task overrides — are not part of this struct; they live in
//! the persisted `TaskDef` and are loaded per task by the Task Manager.
//!
//! Priority chain: built-in defaults (`Config::default()`) → config file
//! (TOML, optionally JSON5) → `SYNCR_CONFIG`/`SYNCR_LOG` environment
//! overrides → CLI flags.

use crate::types::{HashAlgo, HostKeyPolicy};
use crate::watch::HashBudget;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// RUNTIME & STATE MANAGEMENT
	// ========================================================================
	/// Directory holding the embedded state store and any working files.
	pub state_dir: PathBuf,

	// ========================================================================
	// BATCH DISPATCHER DEFAULTS
	// ========================================================================
	/// Default wait before a batch drains, overridable per task (§4.10).
	pub batch_delay_secs: f64,

	/// Additional coalescing wait after the batch delay wakes.
	pub batch_quantum_secs: f64,

	/// Concurrent workers per task's dispatcher, clamped to 4-8.
	pub batch_max_parallel: usize,

	// ========================================================================
	// DEFAULT RETENTION & POLLING
	// ========================================================================
	/// Default poll interval for tasks that don't override it.
	pub default_poll_interval_secs: f64,

	/// Default trash directory name.
	pub default_trash_dir: String,

	/// Default backup directory name.
	pub default_backup_dir: String,

	/// Default trash retention, in days.
	pub default_trash_retention_days: u32,

	/// Default backup retention, in days.
	pub default_backup_retention_days: u32,

	/// How often the retention cleanup timer fires, in seconds.
	pub cleanup_interval_secs: u64,

	// ========================================================================
	// CONTENT IDENTITY
	// ========================================================================
	/// Default content-hash algorithm.
	pub hash_algo: HashAlgo,

	/// Budget spent per remote poll tick on coarse-mtime compensation (§4.6).
	pub hash_budget_max_hashes: u32,

	/// Largest file, in bytes, eligible for compensation hashing.
	pub hash_budget_max_file_bytes: u64,

	// ========================================================================
	// REMOTE TRANSPORT
	// ========================================================================
	/// Host-key validation policy for remote endpoints.
	pub host_key_policy: HostKeyPolicy,

	/// `ssh -o UserKnownHostsFile=...` path; `auto`/`warn` accept and persist
	/// newly seen keys here, `reject` only trusts keys already present.
	pub ssh_known_hosts_path: PathBuf,

	/// Connect/handshake timeout, in seconds.
	pub transport_connect_timeout_secs: u64,

	/// Per-operation timeout, in seconds.
	pub transport_request_timeout_secs: u64,

	/// Name of the binary exec'd on the remote side (`ssh <host> <bin>
	/// serve-remote <path>`); usually this binary's own name.
	pub remote_bin: String,

	// ========================================================================
	// LOGGING
	// ========================================================================
	/// Default `tracing` filter when `RUST_LOG` is unset.
	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			state_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".tongbu"))
				.unwrap_or_else(|| PathBuf::from(".tongbu")),

			batch_delay_secs: 0.5,
			batch_quantum_secs: 0.1,
			batch_max_parallel: 4,

			default_poll_interval_secs: 5.0,
			default_trash_dir: ".tongbu_trash".to_string(),
			default_backup_dir: ".tongbu_backup".to_string(),
			default_trash_retention_days: 7,
			default_backup_retention_days: 7,
			cleanup_interval_secs: 3600,

			hash_algo: HashAlgo::Md5,
			hash_budget_max_hashes: 50,
			hash_budget_max_file_bytes: 2 * 1024 * 1024,

			host_key_policy: HostKeyPolicy::Reject,
			ssh_known_hosts_path: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".tongbu").join("known_hosts"))
				.unwrap_or_else(|| PathBuf::from(".tongbu/known_hosts")),
			transport_connect_timeout_secs: 10,
			transport_request_timeout_secs: 30,
			remote_bin: "tongbu".to_string(),

			log_level: "info".to_string(),
		}
	}
}

impl Config {
	pub fn hash_budget(&self) -> HashBudget {
		HashBudget { max_hashes: self.hash_budget_max_hashes, max_file_bytes: self.hash_budget_max_file_bytes }
	}

	/// Load from `path`, falling back to defaults for any field the file
	/// omits. TOML is the primary format; a `.json5` extension is read as
	/// JSON5 instead, for hand-edited configs with comments.
	pub fn load(path: &std::path::Path) -> Result<Self, crate::error::SyncError> {
		let text = std::fs::read_to_string(path).map_err(crate::error::SyncError::from)?;
		if path.extension().and_then(|e| e.to_str()) == Some("json5") {
			json5::from_str(&text).map_err(|e| crate::error::SyncError::ConfigInvalid { message: e.to_string() })
		} else {
			toml::from_str(&text).map_err(|e| crate::error::SyncError::ConfigInvalid { message: e.to_string() })
		}
	}

	/// Resolve the config path: `SYNCR_CONFIG` env var if set, else the
	/// caller-supplied default (e.g. the CLI's `-c` flag or its own default).
	pub fn resolve_path(cli_path: Option<PathBuf>) -> PathBuf {
		std::env::var("SYNCR_CONFIG")
			.map(PathBuf::from)
			.ok()
			.or(cli_path)
			.unwrap_or_else(|| PathBuf::from("tongbu.toml"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_has_sane_dispatch_and_hash_defaults() {
		let config = Config::default();
		assert_eq!(config.batch_max_parallel, 4);
		assert_eq!(config.hash_algo, HashAlgo::Md5);
		assert_eq!(config.hash_budget().max_hashes, 50);
	}

	#[test]
	fn config_roundtrips_through_toml() {
		let config = Config::default();
		let text = toml::to_string(&config).unwrap();
		let parsed: Config = toml::from_str(&text).unwrap();
		assert_eq!(parsed.state_dir, config.state_dir);
		assert_eq!(parsed.remote_bin, config.remote_bin);
	}

	#[test]
	fn resolve_path_prefers_env_override() {
		std::env::set_var("SYNCR_CONFIG", "/tmp/from-env.toml");
		let resolved = Config::resolve_path(Some(PathBuf::from("/tmp/from-cli.toml")));
		std::env::remove_var("SYNCR_CONFIG");
		assert_eq!(resolved, PathBuf::from("/tmp/from-env.toml"));
	}
}

// vim: ts=4
