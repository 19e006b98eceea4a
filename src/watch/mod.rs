//! Change detection (C5 Local Watcher, C6 Remote Watcher): turns filesystem
//! activity into lightweight [`RawEvent`]s fed through an mpsc channel into
//! whatever consumes them (Reconciler or One-Way Syncer). Per SPEC_FULL §9's
//! design note, a watcher holds only the sending half of this channel, never
//! a back-reference to its consumer.

pub mod local;
pub mod remote;

use crate::types::EventKind;
use tokio::sync::mpsc::UnboundedSender;

/// A single filesystem change, already translated to an endpoint-relative
/// POSIX path with directory events dropped. Carries no content: the
/// consumer is responsible for calling `stat`/`read` to resolve it, keeping
/// watcher callbacks themselves free of I/O (§4.5).
#[derive(Debug, Clone)]
pub struct RawEvent {
	pub rel_path: String,
	pub dest_rel_path: Option<String>,
	pub kind: EventKind,
}

pub type EventSender = UnboundedSender<RawEvent>;

/// Bounded work allowed per remote poll-loop tick for coarse-mtime
/// compensation (§4.6): at most `max_hashes` files hashed, none larger than
/// `max_file_bytes`.
#[derive(Debug, Clone, Copy)]
pub struct HashBudget {
	pub max_hashes: u32,
	pub max_file_bytes: u64,
}

impl Default for HashBudget {
	fn default() -> Self {
		HashBudget { max_hashes: 50, max_file_bytes: 2 * 1024 * 1024 }
	}
}

/// Convert a platform path to an endpoint-relative POSIX-style string.
pub fn to_posix_rel(path: &std::path::Path) -> String {
	path.components()
		.map(|c| c.as_os_str().to_string_lossy().into_owned())
		.collect::<Vec<_>>()
		.join("/")
}

// vim: ts=4
