//! Reconciler (C8): the two-way sync state machine. Turns change notices
//! into committed [`FileState`] rows and, via the Batch Dispatcher, into
//! filesystem actions that bring the loser side in line with the winner.

use crate::dispatch::BatchDispatcher;
use crate::endpoint::Endpoint;
use crate::error::{ReconcileError, SyncError};
use crate::logging::*;
use crate::store::Store;
use crate::types::{now_secs, FileMeta, FileState, SyncLogEntry, SyncStatus};
use crate::types::{EventKind, Side};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Suppression window: a side's own write must not be observed as an
/// incoming change (§4.8 "Suppression window").
const SUPPRESSION_WINDOW: Duration = Duration::from_secs(2);

fn meta_changed(old: &Option<FileMeta>, new: &FileMeta) -> bool {
	match old {
		None => true,
		Some(old) => match (old.hash, new.hash) {
			(Some(a), Some(b)) => a != b,
			_ => old.size != new.size || old.mtime != new.mtime,
		},
	}
}

pub struct Reconciler {
	task_id: u64,
	store: Arc<Store>,
	a: Endpoint,
	b: Endpoint,
	dispatcher: Arc<BatchDispatcher>,
	/// Serializes every mutation of a task's state rows and the filesystem
	/// actions that follow from them (§4.8's "under the per-task
	/// reconciliation lock").
	lock: AsyncMutex<()>,
	suppressed: Mutex<HashMap<(Side, String), Instant>>,
	log_successful_events: bool,
}

impl Reconciler {
	pub fn new(
		task_id: u64,
		store: Arc<Store>,
		a: Endpoint,
		b: Endpoint,
		dispatcher: Arc<BatchDispatcher>,
		log_successful_events: bool,
	) -> Self {
		Reconciler {
			task_id,
			store,
			a,
			b,
			dispatcher,
			lock: AsyncMutex::new(()),
			suppressed: Mutex::new(HashMap::new()),
			log_successful_events,
		}
	}

	/// Access one side's endpoint, used by the Task Runner to wire up a
	/// remote watcher/poller against the same endpoint the reconciler syncs.
	pub fn endpoint(&self, side: Side) -> &Endpoint {
		match side {
			Side::A => &self.a,
			Side::B => &self.b,
		}
	}

	fn mark_suppressed(&self, side: Side, rel_path: &str) {
		self.suppressed.lock().unwrap().insert((side, rel_path.to_string()), Instant::now());
	}

	fn is_suppressed(&self, side: Side, rel_path: &str) -> bool {
		let mut guard = self.suppressed.lock().unwrap();
		match guard.get(&(side, rel_path.to_string())) {
			Some(marked) if marked.elapsed() < SUPPRESSION_WINDOW => true,
			Some(_) => {
				guard.remove(&(side, rel_path.to_string()));
				false
			}
			None => false,
		}
	}

	/// Observation entry point (§4.8 steps 1-4): a watcher/poller reported a
	/// change on `side` for `rel_path`. Stats the corresponding endpoint,
	/// commits the resulting state row, and enqueues the path for the
	/// dispatcher to decide and act on.
	pub async fn observe(&self, side: Side, rel_path: &str, observed_at: f64) -> Result<(), SyncError> {
		if self.is_suppressed(side, rel_path) {
			return Ok(());
		}

		let current = self.endpoint(side).stat(rel_path).await?;
		self.observe_meta(side, rel_path, current, observed_at).await
	}

	/// Same as [`Self::observe`] but takes an already-known `FileMeta`
	/// (hash-free), used by the baseline/full-sync walks which have just
	/// enumerated the endpoint and don't want a second stat round-trip.
	async fn observe_meta(
		&self,
		side: Side,
		rel_path: &str,
		current: Option<FileMeta>,
		observed_at: f64,
	) -> Result<(), SyncError> {
		let _guard = self.lock.lock().await;

		let mut row = self.store.get_file_state(self.task_id, rel_path)?.unwrap_or_default();

		match &current {
			None => {
				if row.deleted(side) && row.meta(side).is_none() {
					return Ok(());
				}
			}
			Some(meta) => {
				if !meta_changed(row.meta(side), meta) {
					// Coarse-mtime compensation for remote endpoints is
					// performed upstream by the poller itself (it only
					// synthesizes a Modified RawEvent once a hash mismatch
					// is already confirmed), so by the time we reach this
					// branch there is genuinely nothing new to commit.
					return Ok(());
				}

				let new_hash = self.endpoint(side).hash_of(rel_path).await?;
				if row.meta(side).map(|m| m.hash) == Some(Some(new_hash)) {
					row.set_seen_at(side, observed_at);
					self.store.put_file_state(self.task_id, rel_path, &row)?;
					return Ok(());
				}

				let mut meta = *meta;
				meta.hash = Some(new_hash);
				row.set_meta(side, Some(meta));
				row.set_deleted(side, false);
				row.set_seen_at(side, observed_at);
				row.updated_at = observed_at;
				self.store.put_file_state(self.task_id, rel_path, &row)?;
				self.dispatcher.enqueue(rel_path);
				return Ok(());
			}
		}

		row.set_meta(side, None);
		row.set_deleted(side, true);
		row.set_seen_at(side, observed_at);
		row.updated_at = observed_at;
		self.store.put_file_state(self.task_id, rel_path, &row)?;
		self.dispatcher.enqueue(rel_path);
		Ok(())
	}

	/// Decision-rule worker (§4.8 "Decision rule"): examine the committed
	/// row under the lock, pick a winner, and apply the action table. This
	/// is the closure handed to the [`BatchDispatcher`].
	pub async fn decide_and_sync(&self, rel_path: &str) -> Result<(), SyncError> {
		let _guard = self.lock.lock().await;

		let Some(mut row) = self.store.get_file_state(self.task_id, rel_path)? else {
			return Ok(());
		};

		let a_changed = row.seen_at(Side::A) > row.last_sync_at;
		let b_changed = row.seen_at(Side::B) > row.last_sync_at;

		if !a_changed && !b_changed {
			return Ok(());
		}

		let winner = if a_changed && b_changed {
			if row.seen_at(Side::A) >= row.seen_at(Side::B) { Side::A } else { Side::B }
		} else if a_changed {
			Side::A
		} else {
			Side::B
		};
		let loser = winner.other();

		let result = self.apply_action(&mut row, rel_path, winner, loser).await;

		let now = now_secs();
		row.last_winner = Some(winner);
		row.last_sync_at = now;
		row.updated_at = now;
		self.store.put_file_state(self.task_id, rel_path, &row)?;

		let (status, error_message) = match &result {
			Ok(()) => (SyncStatus::Success, None),
			Err(e) => (SyncStatus::Failed, Some(e.to_string())),
		};

		if status == SyncStatus::Success && !self.log_successful_events {
			return result;
		}

		let _ = self.store.append_log(SyncLogEntry {
			id: 0,
			task_id: self.task_id,
			event_type: EventKind::Modified,
			file_path: rel_path.to_string(),
			dest_path: None,
			status,
			error_message,
			sync_time: now,
		});

		result
	}

	async fn apply_action(
		&self,
		row: &mut FileState,
		rel_path: &str,
		winner: Side,
		loser: Side,
	) -> Result<(), SyncError> {
		let winner_deleted = row.deleted(winner);
		let loser_present = !row.deleted(loser) && row.meta(loser).is_some();

		if winner_deleted {
			if loser_present {
				self.mark_suppressed(loser, rel_path);
				let ts = crate::endpoint::fresh_ts_token();
				self.endpoint(loser).move_to_trash(rel_path, &ts).await?;
				row.set_deleted(loser, true);
				row.set_meta(loser, None);
				row.set_seen_at(loser, now_secs());
			}
			return Ok(());
		}

		if !loser_present {
			self.mark_suppressed(loser, rel_path);
			let bytes = self.endpoint(winner).read(rel_path).await?;
			self.endpoint(loser).write(rel_path, &bytes).await?;
		} else {
			let winner_hash = self.endpoint(winner).hash_of(rel_path).await?;
			let loser_hash = self.endpoint(loser).hash_of(rel_path).await?;
			if winner_hash == loser_hash {
				// content-equivalent: refresh loser meta only, no write.
			} else {
				self.mark_suppressed(loser, rel_path);
				let ts = crate::endpoint::fresh_ts_token();
				self.endpoint(loser).backup(rel_path, &ts).await?;
				let bytes = self.endpoint(winner).read(rel_path).await?;
				self.endpoint(loser).write(rel_path, &bytes).await?;
			}
		}

		let refreshed = self.endpoint(loser).stat_with_hash(rel_path).await?;
		row.set_meta(loser, refreshed);
		row.set_deleted(loser, refreshed.is_none());
		row.set_seen_at(loser, now_secs());
		Ok(())
	}

	/// Enumerate both endpoints and seed baseline state rows for the first
	/// ever run of a two-way task (§4.8 "Initial baseline"): hash-free, so a
	/// large pre-existing tree doesn't stall startup on content hashing.
	pub async fn baseline(&self) -> Result<(), SyncError> {
		let a_entries: HashMap<String, FileMeta> = self.a.iterate().await?.into_iter().collect();
		let b_entries: HashMap<String, FileMeta> = self.b.iterate().await?.into_iter().collect();

		let mut all_paths: Vec<&String> = a_entries.keys().chain(b_entries.keys()).collect();
		all_paths.sort();
		all_paths.dedup();

		let now = now_secs();
		for rel_path in all_paths {
			let a_meta = a_entries.get(rel_path).copied();
			let b_meta = b_entries.get(rel_path).copied();
			let mut row = FileState::default();

			match (a_meta, b_meta) {
				(Some(a), None) => {
					row.set_meta(Side::A, Some(a));
					row.set_seen_at(Side::A, now);
					row.set_deleted(Side::B, true);
					self.store.put_file_state(self.task_id, rel_path, &row)?;
					self.dispatcher.enqueue(rel_path.clone());
				}
				(None, Some(b)) => {
					row.set_meta(Side::B, Some(b));
					row.set_seen_at(Side::B, now);
					row.set_deleted(Side::A, true);
					self.store.put_file_state(self.task_id, rel_path, &row)?;
					self.dispatcher.enqueue(rel_path.clone());
				}
				(Some(a), Some(b)) => {
					row.set_meta(Side::A, Some(a));
					row.set_meta(Side::B, Some(b));
					row.last_sync_at = now;
					row.updated_at = now;
					self.store.put_file_state(self.task_id, rel_path, &row)?;
				}
				(None, None) => unreachable!("path sourced from one of the two maps"),
			}
		}

		info!(task_id = self.task_id, paths = all_paths_len(&a_entries, &b_entries), "baseline sync complete");
		Ok(())
	}

	/// A user-triggered full sync: re-enumerate both sides and re-run
	/// observation for every path, through the same lock and suppression
	/// window as event-driven reconciliation (§4.8 "Concurrency with
	/// user-triggered full sync").
	pub async fn full_sync(&self) -> Result<(), SyncError> {
		let now = now_secs();
		for (rel_path, meta) in self.a.iterate().await? {
			self.observe_meta(Side::A, &rel_path, Some(meta), now)
				.await
				.map_err(|e| ReconcileError::new(rel_path.clone(), std::io::Error::other(e.to_string())))?;
		}
		for (rel_path, meta) in self.b.iterate().await? {
			self.observe_meta(Side::B, &rel_path, Some(meta), now)
				.await
				.map_err(|e| ReconcileError::new(rel_path.clone(), std::io::Error::other(e.to_string())))?;
		}
		Ok(())
	}
}

fn all_paths_len(a: &HashMap<String, FileMeta>, b: &HashMap<String, FileMeta>) -> usize {
	let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
	keys.sort();
	keys.dedup();
	keys.len()
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

	fn local_endpoint(root: std::path::PathBuf) -> Endpoint {
		Endpoint::Local(LocalEndpoint::new(root, filter(), EolPolicy::Keep, HashAlgo::Md5))
	}

	fn reconciler(task_id: u64, store: Arc<Store>, a: std::path::PathBuf, b: std::path::PathBuf) -> Reconciler {
		let dispatcher = Arc::new(BatchDispatcher::new(4));
		Reconciler::new(task_id, store, local_endpoint(a), local_endpoint(b), dispatcher, true)
	}

	#[tokio::test]
	async fn baseline_seeds_one_way_propagation_for_a_only_file() {
		let tmp = TempDir::new().unwrap();
		let dir_a = tmp.path().join("a");
		let dir_b = tmp.path().join("b");
		tokio::fs::create_dir_all(&dir_a).await.unwrap();
		tokio::fs::create_dir_all(&dir_b).await.unwrap();
		tokio::fs::write(dir_a.join("only_a.txt"), b"hello").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let r = reconciler(1, store.clone(), dir_a, dir_b);
		r.baseline().await.unwrap();

		let row = store.get_file_state(1, "only_a.txt").unwrap().unwrap();
		assert!(row.meta(Side::A).is_some());
		assert!(row.deleted(Side::B));
	}

	#[tokio::test]
	async fn baseline_seeds_both_present_without_enqueue_and_without_hash() {
		let tmp = TempDir::new().unwrap();
		let dir_a = tmp.path().join("a");
		let dir_b = tmp.path().join("b");
		tokio::fs::create_dir_all(&dir_a).await.unwrap();
		tokio::fs::create_dir_all(&dir_b).await.unwrap();
		tokio::fs::write(dir_a.join("shared.txt"), b"hello").await.unwrap();
		tokio::fs::write(dir_b.join("shared.txt"), b"hello").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let r = reconciler(1, store.clone(), dir_a, dir_b);
		r.baseline().await.unwrap();

		let row = store.get_file_state(1, "shared.txt").unwrap().unwrap();
		assert!(row.meta(Side::A).unwrap().hash.is_none());
		assert!(row.meta(Side::B).unwrap().hash.is_none());
		assert!(row.last_sync_at > 0.0);
	}

	#[tokio::test]
	async fn decide_and_sync_writes_winner_to_absent_loser() {
		let tmp = TempDir::new().unwrap();
		let dir_a = tmp.path().join("a");
		let dir_b = tmp.path().join("b");
		tokio::fs::create_dir_all(&dir_a).await.unwrap();
		tokio::fs::create_dir_all(&dir_b).await.unwrap();
		tokio::fs::write(dir_a.join("new.txt"), b"content").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let r = reconciler(1, store.clone(), dir_a.clone(), dir_b.clone());

		r.observe(Side::A, "new.txt", now_secs()).await.unwrap();
		r.decide_and_sync("new.txt").await.unwrap();

		let copied = tokio::fs::read(dir_b.join("new.txt")).await.unwrap();
		assert_eq!(copied, b"content");
	}

	#[tokio::test]
	async fn suppression_window_drops_self_inflicted_observation() {
		let tmp = TempDir::new().unwrap();
		let dir_a = tmp.path().join("a");
		let dir_b = tmp.path().join("b");
		tokio::fs::create_dir_all(&dir_a).await.unwrap();
		tokio::fs::create_dir_all(&dir_b).await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let r = reconciler(1, store.clone(), dir_a, dir_b);
		r.mark_suppressed(Side::B, "x.txt");
		r.observe(Side::B, "x.txt", now_secs()).await.unwrap();

		assert!(store.get_file_state(1, "x.txt").unwrap().is_none());
	}
}

// vim: ts=4
