//! One-Way Syncer (C9): applies source events to a target endpoint, with a
//! tail-scan repair loop and a full-sync walk for the paths watchers miss.

use crate::dispatch::BatchDispatcher;
use crate::endpoint::Endpoint;
use crate::error::SyncError;
use crate::logging::*;
use crate::store::Store;
use crate::types::{now_secs, EventKind, FileMeta, SyncLogEntry, SyncStatus};
use crate::watch::RawEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TAIL_SCAN_INTERVAL: Duration = Duration::from_secs(5);

pub struct OneWaySyncer {
	task_id: u64,
	store: Arc<Store>,
	source: Endpoint,
	target: Endpoint,
	dispatcher: Arc<BatchDispatcher>,
	log_successful_events: bool,
	last_mtime: Mutex<HashMap<String, f64>>,
}

impl OneWaySyncer {
	pub fn new(
		task_id: u64,
		store: Arc<Store>,
		source: Endpoint,
		target: Endpoint,
		dispatcher: Arc<BatchDispatcher>,
		log_successful_events: bool,
	) -> Self {
		OneWaySyncer {
			task_id,
			store,
			source,
			target,
			dispatcher,
			log_successful_events,
			last_mtime: Mutex::new(HashMap::new()),
		}
	}

	pub fn target(&self) -> &Endpoint {
		&self.target
	}

	/// Consume watcher/poller events: a `moved` event is applied immediately
	/// (it carries the (from, to) pair the dispatcher's path-keyed queue
	/// would otherwise lose); everything else is handed to the dispatcher
	/// for batched, deduplicated application.
	pub async fn run_event_loop(&self, mut rx: tokio::sync::mpsc::UnboundedReceiver<RawEvent>) {
		while let Some(event) = rx.recv().await {
			match event.kind {
				EventKind::Moved => {
					let to = event.dest_rel_path.clone().unwrap_or_else(|| event.rel_path.clone());
					let result = self.apply_move(&event.rel_path, &to).await;
					self.log_result(&to, EventKind::Moved, &result);
				}
				_ => self.dispatcher.enqueue(event.rel_path),
			}
		}
	}

	/// Dispatcher handler: re-derives the correct action from the source's
	/// current state rather than trusting a coalesced event kind.
	pub async fn sync_path(&self, rel_path: &str) -> Result<(), SyncError> {
		let result = self.apply(rel_path).await;
		self.log_result(rel_path, EventKind::Modified, &result);
		result
	}

	async fn apply(&self, rel_path: &str) -> Result<(), SyncError> {
		match self.source.stat(rel_path).await? {
			Some(_) => {
				let bytes = self.source.read(rel_path).await?;
				self.target.write(rel_path, &bytes).await?;
				if let Some(src_root) = self.source.local_root() {
					self.target.carry_over_permissions(&src_root.join(rel_path), rel_path).await;
				}
			}
			None => {
				if self.target.stat(rel_path).await?.is_some() {
					self.target.remove(rel_path).await?;
				}
			}
		}
		Ok(())
	}

	async fn apply_move(&self, from_rel: &str, to_rel: &str) -> Result<(), SyncError> {
		if self.target.stat(from_rel).await?.is_some() {
			self.target.rename(from_rel, to_rel).await?;
		} else {
			self.apply(to_rel).await?;
		}
		Ok(())
	}

	fn log_result(&self, rel_path: &str, event_type: EventKind, result: &Result<(), SyncError>) {
		let (status, error_message) = match result {
			Ok(()) => (SyncStatus::Success, None),
			Err(e) => (SyncStatus::Failed, Some(e.to_string())),
		};
		if status == SyncStatus::Success && !self.log_successful_events {
			if let Err(e) = result {
				warn!(rel_path, error = %e, "one-way sync failed");
			}
			return;
		}
		let _ = self.store.append_log(SyncLogEntry {
			id: 0,
			task_id: self.task_id,
			event_type,
			file_path: rel_path.to_string(),
			dest_path: None,
			status,
			error_message,
			sync_time: now_secs(),
		});
	}

	/// Periodic repair loop (§4.9): diff the source against a cached
	/// `last_mtime` snapshot, synthesizing events for anything a watcher
	/// missed (atomic renames, batch checkouts). Runs until `stop` fires.
	pub async fn tail_scan_loop(&self, stop: Arc<tokio::sync::Notify>) {
		loop {
			tokio::select! {
				_ = stop.notified() => return,
				_ = tokio::time::sleep(TAIL_SCAN_INTERVAL) => {}
			}

			if let Err(e) = self.tail_scan_once().await {
				warn!(error = %e, "tail scan failed");
			}
		}
	}

	async fn tail_scan_once(&self) -> Result<(), SyncError> {
		let current: HashMap<String, FileMeta> = self.source.iterate().await?.into_iter().collect();
		let mut cache = self.last_mtime.lock().unwrap();

		for (rel_path, meta) in &current {
			match cache.get(rel_path) {
				None => self.dispatcher.enqueue(rel_path.clone()),
				Some(prev_mtime) if *prev_mtime != meta.mtime => self.dispatcher.enqueue(rel_path.clone()),
				_ => {}
			}
		}

		let vanished: Vec<String> =
			cache.keys().filter(|p| !current.contains_key(*p)).cloned().collect();
		for rel_path in &vanished {
			self.dispatcher.enqueue(rel_path.clone());
		}

		*cache = current.into_iter().map(|(p, m)| (p, m.mtime)).collect();
		Ok(())
	}

	/// Full-sync walk: re-apply every path the source currently has.
	/// Failures are logged but never abort the walk (§4.9).
	pub async fn full_sync(&self) -> Result<(), SyncError> {
		for (rel_path, _) in self.source.iterate().await? {
			if let Err(e) = self.apply(&rel_path).await {
				warn!(rel_path = %rel_path, error = %e, "full sync failed for path, continuing");
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::endpoint::local::LocalEndpoint;
	use crate::filter::PathFilter;
	use crate::types::{EolPolicy, HashAlgo};
	use tempfile::TempDir;

	fn filter() -> PathFilter {
		PathFilter::new(&[], &[], &[".tongbu_trash".into(), ".tongbu_backup".into()]).unwrap()
	}

	fn local(root: std::path::PathBuf) -> Endpoint {
		Endpoint::Local(LocalEndpoint::new(root, filter(), EolPolicy::Lf, HashAlgo::Md5))
	}

	fn syncer(store: Arc<Store>, src: std::path::PathBuf, dst: std::path::PathBuf) -> OneWaySyncer {
		let dispatcher = Arc::new(BatchDispatcher::new(4));
		OneWaySyncer::new(1, store, local(src), local(dst), dispatcher, true)
	}

	#[tokio::test]
	async fn apply_copies_and_normalizes_eol_from_source() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src");
		let dst = tmp.path().join("dst");
		tokio::fs::create_dir_all(&src).await.unwrap();
		tokio::fs::create_dir_all(&dst).await.unwrap();
		tokio::fs::write(src.join("a.txt"), b"Line 1\r\nLine 2\r\n").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let s = syncer(store, src, dst.clone());
		s.apply("a.txt").await.unwrap();

		assert_eq!(tokio::fs::read(dst.join("a.txt")).await.unwrap(), b"Line 1\nLine 2\n");
	}

	#[tokio::test]
	async fn apply_removes_target_when_source_is_gone() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src");
		let dst = tmp.path().join("dst");
		tokio::fs::create_dir_all(&src).await.unwrap();
		tokio::fs::create_dir_all(&dst).await.unwrap();
		tokio::fs::write(dst.join("gone.txt"), b"x").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let s = syncer(store, src, dst.clone());
		s.apply("gone.txt").await.unwrap();

		assert!(!dst.join("gone.txt").exists());
	}

	#[tokio::test]
	async fn apply_move_renames_existing_target_file() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src");
		let dst = tmp.path().join("dst");
		tokio::fs::create_dir_all(&src).await.unwrap();
		tokio::fs::create_dir_all(&dst).await.unwrap();
		tokio::fs::write(dst.join("old.txt"), b"content").await.unwrap();
		tokio::fs::write(src.join("new.txt"), b"content").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let s = syncer(store, src, dst.clone());
		s.apply_move("old.txt", "new.txt").await.unwrap();

		assert!(!dst.join("old.txt").exists());
		assert_eq!(tokio::fs::read(dst.join("new.txt")).await.unwrap(), b"content");
	}

	#[tokio::test]
	async fn tail_scan_detects_new_file_without_watcher_event() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src");
		let dst = tmp.path().join("dst");
		tokio::fs::create_dir_all(&src).await.unwrap();
		tokio::fs::create_dir_all(&dst).await.unwrap();
		tokio::fs::write(src.join("new.txt"), b"data").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let s = syncer(store, src, dst);
		s.tail_scan_once().await.unwrap();

		assert!(s.last_mtime.lock().unwrap().contains_key("new.txt"));
	}
}

// vim: ts=4
