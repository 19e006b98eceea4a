//! Core data model: task definitions, endpoint descriptors, file meta/state, sync log entries.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Symbolic name of an endpoint in a two-way task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
	A,
	B,
}

impl Side {
	pub fn other(self) -> Side {
		match self {
			Side::A => Side::B,
			Side::B => Side::A,
		}
	}
}

impl std::fmt::Display for Side {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Side::A => write!(f, "a"),
			Side::B => write!(f, "b"),
		}
	}
}

/// Sync mode for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
	OneWay,
	TwoWay,
}

/// EOL translation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EolPolicy {
	Lf,
	Crlf,
	Keep,
}

impl Default for EolPolicy {
	fn default() -> Self {
		EolPolicy::Keep
	}
}

/// Content-hash algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgo {
	Md5,
	Blake3,
}

impl Default for HashAlgo {
	fn default() -> Self {
		HashAlgo::Md5
	}
}

/// Host-key validation policy for remote endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
	Auto,
	Warn,
	Reject,
}

impl Default for HostKeyPolicy {
	fn default() -> Self {
		HostKeyPolicy::Reject
	}
}

/// A credential reference for a remote endpoint. The core receives plaintext
/// at task-load time; encryption at rest is the control plane's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
	Password(String),
	KeyFile(PathBuf),
}

/// Endpoint descriptor as persisted in `sync_endpoints` / embedded in a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
	pub path: PathBuf,
	pub remote: Option<RemoteDescriptor>,
	pub trash_dir: Option<String>,
	pub backup_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
	pub host: String,
	pub port: u16,
	pub username: String,
	pub credential: Credential,
}

impl EndpointDescriptor {
	pub fn local(path: impl Into<PathBuf>) -> Self {
		EndpointDescriptor { path: path.into(), remote: None, trash_dir: None, backup_dir: None }
	}

	pub fn is_remote(&self) -> bool {
		self.remote.is_some()
	}

	pub fn trash_dir_name(&self) -> &str {
		self.trash_dir.as_deref().unwrap_or(".tongbu_trash")
	}

	pub fn backup_dir_name(&self) -> &str {
		self.backup_dir.as_deref().unwrap_or(".tongbu_backup")
	}
}

/// A task definition as persisted in `sync_tasks` + `sync_task_settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
	pub id: u64,
	pub name: String,
	pub mode: SyncMode,
	/// For one-way: `a` is the source, `b` is the target. For two-way both are peers.
	pub a: EndpointDescriptor,
	pub b: EndpointDescriptor,
	pub exclude_patterns: Vec<String>,
	pub allowed_extensions: Vec<String>,
	pub eol_policy: EolPolicy,
	pub enabled: bool,
	pub auto_start: bool,
	pub poll_interval_secs: f64,
	pub trash_retention_days: u32,
	pub backup_retention_days: u32,
	pub log_successful_events: bool,
}

/// File content-identity metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
	pub size: u64,
	pub mtime: f64,
	pub hash: Option<[u8; 32]>,
}

impl FileMeta {
	pub fn with_hash(mut self, hash: [u8; 32]) -> Self {
		self.hash = Some(hash);
		self
	}
}

/// Per-side bilateral file state, keyed by `(task_id, rel_path)` in the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileState {
	pub a_meta: Option<FileMeta>,
	pub b_meta: Option<FileMeta>,
	pub a_deleted: bool,
	pub b_deleted: bool,
	pub a_seen_at: f64,
	pub b_seen_at: f64,
	pub last_winner: Option<Side>,
	pub last_sync_at: f64,
	pub updated_at: f64,
}

impl FileState {
	pub fn meta(&self, side: Side) -> &Option<FileMeta> {
		match side {
			Side::A => &self.a_meta,
			Side::B => &self.b_meta,
		}
	}

	pub fn set_meta(&mut self, side: Side, meta: Option<FileMeta>) {
		match side {
			Side::A => self.a_meta = meta,
			Side::B => self.b_meta = meta,
		}
	}

	pub fn deleted(&self, side: Side) -> bool {
		match side {
			Side::A => self.a_deleted,
			Side::B => self.b_deleted,
		}
	}

	pub fn set_deleted(&mut self, side: Side, deleted: bool) {
		match side {
			Side::A => self.a_deleted = deleted,
			Side::B => self.b_deleted = deleted,
		}
	}

	pub fn seen_at(&self, side: Side) -> f64 {
		match side {
			Side::A => self.a_seen_at,
			Side::B => self.b_seen_at,
		}
	}

	pub fn set_seen_at(&mut self, side: Side, ts: f64) {
		match side {
			Side::A => self.a_seen_at = ts,
			Side::B => self.b_seen_at = ts,
		}
	}

	/// Has this side made an observation unreflected by the last sync? (Invariant 2.)
	pub fn changed(&self, side: Side) -> bool {
		self.seen_at(side) > self.last_sync_at
	}

	/// Both sides tombstoned and both observations reflected: eligible for GC (Invariant 3).
	pub fn gc_eligible(&self) -> bool {
		self.a_deleted
			&& self.b_deleted
			&& self.a_seen_at <= self.last_sync_at
			&& self.b_seen_at <= self.last_sync_at
	}
}

/// Outcome of a single sync action, appended to `sync_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
	Success,
	Failed,
	Skipped,
}

/// The kind of filesystem event a watcher/poller observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
	Created,
	Modified,
	Deleted,
	Moved,
}

/// An append-only sync log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
	pub id: u64,
	pub task_id: u64,
	pub event_type: EventKind,
	pub file_path: String,
	pub dest_path: Option<String>,
	pub status: SyncStatus,
	pub error_message: Option<String>,
	pub sync_time: f64,
}

/// Current time as fractional seconds since the Unix epoch.
pub fn now_secs() -> f64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Format a local-time `YYYYMMDD_HHMMSS` token for a trash/backup directory
/// root, per §6's on-disk convention.
#[allow(unsafe_code)]
pub fn ts_token(epoch_secs: f64) -> String {
	let secs = epoch_secs as libc::time_t;
	// SAFETY: `localtime_r` writes into our own stack buffer and has no
	// other side effects.
	let tmbuf = unsafe {
		let mut tmbuf: libc::tm = std::mem::zeroed();
		libc::localtime_r(&secs, &mut tmbuf);
		tmbuf
	};
	format!(
		"{:04}{:02}{:02}_{:02}{:02}{:02}",
		tmbuf.tm_year + 1900,
		tmbuf.tm_mon + 1,
		tmbuf.tm_mday,
		tmbuf.tm_hour,
		tmbuf.tm_min,
		tmbuf.tm_sec,
	)
}

/// Parse a `YYYYMMDD_HHMMSS` token back into epoch seconds. Returns `None`
/// for any string that doesn't match the format (cleanup then falls back to
/// directory mtime, per §4.3/§6).
#[allow(unsafe_code)]
pub fn parse_ts_token(s: &str) -> Option<f64> {
	if s.len() != 15 || s.as_bytes().get(8) != Some(&b'_') {
		return None;
	}
	let year: i32 = s.get(0..4)?.parse().ok()?;
	let month: u32 = s.get(4..6)?.parse().ok()?;
	let day: u32 = s.get(6..8)?.parse().ok()?;
	let hour: u32 = s.get(9..11)?.parse().ok()?;
	let minute: u32 = s.get(11..13)?.parse().ok()?;
	let second: u32 = s.get(13..15)?.parse().ok()?;

	// SAFETY: `mktime` only reads/writes our own stack-local `tm`.
	let t = unsafe {
		let mut tmbuf: libc::tm = std::mem::zeroed();
		tmbuf.tm_year = year - 1900;
		tmbuf.tm_mon = month as i32 - 1;
		tmbuf.tm_mday = day as i32;
		tmbuf.tm_hour = hour as i32;
		tmbuf.tm_min = minute as i32;
		tmbuf.tm_sec = second as i32;
		tmbuf.tm_isdst = -1;
		libc::mktime(&mut tmbuf)
	};
	if t == -1 {
		None
	} else {
		Some(t as f64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn side_other_flips() {
		assert_eq!(Side::A.other(), Side::B);
		assert_eq!(Side::B.other(), Side::A);
	}

	#[test]
	fn file_state_changed_reflects_seen_vs_last_sync() {
		let mut st = FileState::default();
		st.a_seen_at = 10.0;
		st.last_sync_at = 5.0;
		assert!(st.changed(Side::A));
		assert!(!st.changed(Side::B));
	}

	#[test]
	fn gc_eligible_requires_both_tombstoned_and_reflected() {
		let mut st = FileState::default();
		st.a_deleted = true;
		st.b_deleted = true;
		st.a_seen_at = 1.0;
		st.b_seen_at = 1.0;
		st.last_sync_at = 2.0;
		assert!(st.gc_eligible());

		st.b_seen_at = 3.0; // unreflected observation on B
		assert!(!st.gc_eligible());
	}

	#[test]
	fn endpoint_descriptor_default_dir_names() {
		let ep = EndpointDescriptor::local("/tmp/x");
		assert_eq!(ep.trash_dir_name(), ".tongbu_trash");
		assert_eq!(ep.backup_dir_name(), ".tongbu_backup");
		assert!(!ep.is_remote());
	}

	#[test]
	fn ts_token_roundtrips_through_parse() {
		let now = (now_secs() as i64) as f64; // truncate to whole seconds
		let token = ts_token(now);
		assert_eq!(token.len(), 15);
		assert_eq!(token.as_bytes()[8], b'_');
		let parsed = parse_ts_token(&token).unwrap();
		assert_eq!(parsed, now);
	}

	#[test]
	fn parse_ts_token_rejects_malformed_input() {
		assert!(parse_ts_token("not-a-token").is_none());
		assert!(parse_ts_token("20260101-000000").is_none());
	}

	#[test]
	fn file_state_set_get_roundtrip_per_side() {
		let mut st = FileState::default();
		let meta = FileMeta { size: 10, mtime: 1.0, hash: None };
		st.set_meta(Side::B, Some(meta));
		st.set_deleted(Side::A, true);
		st.set_seen_at(Side::B, 42.0);

		assert_eq!(*st.meta(Side::B), Some(meta));
		assert!(st.deleted(Side::A));
		assert_eq!(st.seen_at(Side::B), 42.0);
	}
}

// vim: ts=4
