//! Local Watcher (C5): recursive filesystem-event stream for a Local endpoint.

use super::{to_posix_rel, EventSender, RawEvent};
use crate::filter::PathFilter;
use crate::logging::*;
use crate::types::EventKind;
use notify::{
	event::{ModifyKind, RenameMode},
	Event, EventKind as NotifyEventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns the underlying OS watch handle; dropping it stops the subscription.
pub struct LocalWatcher {
	_watcher: RecommendedWatcher,
}

impl LocalWatcher {
	/// Start watching `root` recursively, forwarding translated [`RawEvent`]s
	/// into `tx`. The notify callback never performs I/O itself (§4.5) — it
	/// only classifies the event kind and pushes onto the channel.
	pub fn start(root: PathBuf, filter: Arc<PathFilter>, tx: EventSender) -> notify::Result<Self> {
		let root_for_cb = root.clone();

		let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
			let event = match res {
				Ok(e) => e,
				Err(e) => {
					warn!(error = %e, "local watcher error event");
					return;
				}
			};

			for raw in translate(&event, &root_for_cb, &filter) {
				if tx.send(raw).is_err() {
					// Receiver dropped: watcher is being torn down.
					return;
				}
			}
		})?;

		watcher.watch(&root, RecursiveMode::Recursive)?;
		info!(root = %root.display(), "local watcher started");
		Ok(LocalWatcher { _watcher: watcher })
	}
}

fn rel_of(root: &Path, abs: &Path) -> Option<String> {
	abs.strip_prefix(root).ok().map(to_posix_rel)
}

/// Translate one notify event into zero or more [`RawEvent`]s, dropping
/// directory events and paths the filter excludes.
fn translate(event: &Event, root: &Path, filter: &PathFilter) -> Vec<RawEvent> {
	let mut out = Vec::new();

	let included = |rel: &str| !filter.is_excluded(Path::new(rel));

	match &event.kind {
		NotifyEventKind::Create(_) => {
			if let Some(abs) = event.paths.first() {
				if !abs.is_dir() {
					if let Some(rel) = rel_of(root, abs) {
						if included(&rel) {
							out.push(RawEvent { rel_path: rel, dest_rel_path: None, kind: EventKind::Created });
						}
					}
				}
			}
		}
		NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
			if let (Some(from), Some(to)) = (event.paths.first(), event.paths.get(1)) {
				if let (Some(from_rel), Some(to_rel)) = (rel_of(root, from), rel_of(root, to)) {
					let from_ok = included(&from_rel);
					let to_ok = included(&to_rel);
					if from_ok || to_ok {
						out.push(RawEvent {
							rel_path: from_rel,
							dest_rel_path: if to_ok { Some(to_rel) } else { None },
							kind: EventKind::Moved,
						});
					}
				}
			}
		}
		NotifyEventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
			if let Some(abs) = event.paths.first() {
				if let Some(rel) = rel_of(root, abs) {
					if included(&rel) {
						out.push(RawEvent { rel_path: rel, dest_rel_path: None, kind: EventKind::Deleted });
					}
				}
			}
		}
		NotifyEventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
			if let Some(abs) = event.paths.first() {
				if !abs.is_dir() {
					if let Some(rel) = rel_of(root, abs) {
						if included(&rel) {
							out.push(RawEvent { rel_path: rel, dest_rel_path: None, kind: EventKind::Created });
						}
					}
				}
			}
		}
		NotifyEventKind::Modify(_) => {
			if let Some(abs) = event.paths.first() {
				if !abs.is_dir() {
					if let Some(rel) = rel_of(root, abs) {
						if included(&rel) {
							out.push(RawEvent { rel_path: rel, dest_rel_path: None, kind: EventKind::Modified });
						}
					}
				}
			}
		}
		NotifyEventKind::Remove(_) => {
			if let Some(abs) = event.paths.first() {
				if let Some(rel) = rel_of(root, abs) {
					if included(&rel) {
						out.push(RawEvent { rel_path: rel, dest_rel_path: None, kind: EventKind::Deleted });
					}
				}
			}
		}
		_ => {}
	}

	out
}


// vim: ts=4
