//! State Store (C7): durable per-task key-value store for task definitions,
//! settings, endpoints, bilateral file state, and the append-only sync log.
//!
//! Backed by `redb`, following the same `TableDefinition<&str, &[u8]>` +
//! serde-serialized-value pattern the teacher's file-metadata cache used for
//! a single table, extended here to the five tables named in the external
//! interface contract.

use crate::error::StateError;
use crate::types::{SyncLogEntry, TaskDef};
use redb::{ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const TASKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("sync_tasks");
const FILE_STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_file_state");
const LOGS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("sync_logs");

fn to_state_error(e: impl std::error::Error + Send + Sync + 'static) -> StateError {
	StateError::LoadFailed { source: Box::new(e) }
}

/// Composite key for the file-state table: `(task_id, rel_path)` flattened to
/// a single string key since `redb`'s typed keys are single-column.
fn file_state_key(task_id: u64, rel_path: &str) -> String {
	format!("{}\0{}", task_id, rel_path)
}

/// Durable store backing the Task Manager and every Task Runner's state cache.
///
/// One `redb::Database` per process, shared across all tasks; each task's
/// rows are namespaced by `task_id` within the shared tables. Mutations are
/// committed synchronously (a `redb` write transaction fsyncs on commit),
/// satisfying §4.7's "crash recovery never invents sync events" requirement.
pub struct Store {
	db: redb::Database,
	next_log_id: AtomicU64,
}

impl Store {
	pub fn open(db_path: &Path) -> Result<Self, StateError> {
		let db = redb::Database::create(db_path).map_err(to_state_error)?;
		let next_log_id = {
			let write_txn = db.begin_write().map_err(to_state_error)?;
			{
				let _ = write_txn.open_table(TASKS_TABLE).map_err(to_state_error)?;
				let _ = write_txn.open_table(FILE_STATE_TABLE).map_err(to_state_error)?;
				let _ = write_txn.open_table(LOGS_TABLE).map_err(to_state_error)?;
			}
			let read_txn = db.begin_read().map_err(to_state_error)?;
			let logs = read_txn.open_table(LOGS_TABLE).map_err(to_state_error)?;
			let max = logs
				.iter()
				.map_err(to_state_error)?
				.last()
				.transpose()
				.map_err(to_state_error)?
				.map(|(k, _)| k.value())
				.unwrap_or(0);
			write_txn.commit().map_err(to_state_error)?;
			AtomicU64::new(max + 1)
		};

		Ok(Store { db, next_log_id })
	}

	// -- sync_tasks --------------------------------------------------------

	pub fn put_task(&self, task: &TaskDef) -> Result<(), StateError> {
		let bytes = serde_json::to_vec(task).map_err(to_state_error)?;
		let write_txn = self.db.begin_write().map_err(to_state_error)?;
		{
			let mut table = write_txn.open_table(TASKS_TABLE).map_err(to_state_error)?;
			table.insert(task.id, bytes.as_slice()).map_err(to_state_error)?;
		}
		write_txn.commit().map_err(to_state_error)?;
		Ok(())
	}

	pub fn get_task(&self, task_id: u64) -> Result<Option<TaskDef>, StateError> {
		let read_txn = self.db.begin_read().map_err(to_state_error)?;
		let table = read_txn.open_table(TASKS_TABLE).map_err(to_state_error)?;
		match table.get(task_id).map_err(to_state_error)? {
			Some(v) => {
				let task = serde_json::from_slice(v.value()).map_err(to_state_error)?;
				Ok(Some(task))
			}
			None => Ok(None),
		}
	}

	pub fn all_tasks(&self) -> Result<Vec<TaskDef>, StateError> {
		let read_txn = self.db.begin_read().map_err(to_state_error)?;
		let table = read_txn.open_table(TASKS_TABLE).map_err(to_state_error)?;
		let mut out = Vec::new();
		for entry in table.iter().map_err(to_state_error)? {
			let (_, v) = entry.map_err(to_state_error)?;
			out.push(serde_json::from_slice(v.value()).map_err(to_state_error)?);
		}
		Ok(out)
	}

	pub fn delete_task(&self, task_id: u64) -> Result<(), StateError> {
		let write_txn = self.db.begin_write().map_err(to_state_error)?;
		{
			let mut table = write_txn.open_table(TASKS_TABLE).map_err(to_state_error)?;
			table.remove(task_id).map_err(to_state_error)?;
		}
		write_txn.commit().map_err(to_state_error)?;
		Ok(())
	}

	// -- sync_file_state -----------------------------------------------------

	pub fn get_file_state(
		&self,
		task_id: u64,
		rel_path: &str,
	) -> Result<Option<crate::types::FileState>, StateError> {
		let key = file_state_key(task_id, rel_path);
		let read_txn = self.db.begin_read().map_err(to_state_error)?;
		let table = read_txn.open_table(FILE_STATE_TABLE).map_err(to_state_error)?;
		match table.get(key.as_str()).map_err(to_state_error)? {
			Some(v) => Ok(Some(serde_json::from_slice(v.value()).map_err(to_state_error)?)),
			None => Ok(None),
		}
	}

	pub fn put_file_state(
		&self,
		task_id: u64,
		rel_path: &str,
		state: &crate::types::FileState,
	) -> Result<(), StateError> {
		let key = file_state_key(task_id, rel_path);
		let bytes = serde_json::to_vec(state).map_err(to_state_error)?;
		let write_txn = self.db.begin_write().map_err(to_state_error)?;
		{
			let mut table = write_txn.open_table(FILE_STATE_TABLE).map_err(to_state_error)?;
			table.insert(key.as_str(), bytes.as_slice()).map_err(to_state_error)?;
		}
		write_txn.commit().map_err(to_state_error)?;
		Ok(())
	}

	pub fn delete_file_state(&self, task_id: u64, rel_path: &str) -> Result<(), StateError> {
		let key = file_state_key(task_id, rel_path);
		let write_txn = self.db.begin_write().map_err(to_state_error)?;
		{
			let mut table = write_txn.open_table(FILE_STATE_TABLE).map_err(to_state_error)?;
			table.remove(key.as_str()).map_err(to_state_error)?;
		}
		write_txn.commit().map_err(to_state_error)?;
		Ok(())
	}

	/// All `(rel_path, state)` rows for one task, for baseline/GC scans.
	pub fn all_file_states(
		&self,
		task_id: u64,
	) -> Result<Vec<(String, crate::types::FileState)>, StateError> {
		let prefix = format!("{}\0", task_id);
		let read_txn = self.db.begin_read().map_err(to_state_error)?;
		let table = read_txn.open_table(FILE_STATE_TABLE).map_err(to_state_error)?;
		let mut out = Vec::new();
		for entry in table.iter().map_err(to_state_error)? {
			let (k, v) = entry.map_err(to_state_error)?;
			let key = k.value();
			if let Some(rel_path) = key.strip_prefix(&prefix) {
				let state = serde_json::from_slice(v.value()).map_err(to_state_error)?;
				out.push((rel_path.to_string(), state));
			}
		}
		Ok(out)
	}

	// -- sync_logs -------------------------------------------------------------

	pub fn append_log(&self, mut entry: SyncLogEntry) -> Result<u64, StateError> {
		let id = self.next_log_id.fetch_add(1, Ordering::SeqCst);
		entry.id = id;
		let bytes = serde_json::to_vec(&entry).map_err(to_state_error)?;
		let write_txn = self.db.begin_write().map_err(to_state_error)?;
		{
			let mut table = write_txn.open_table(LOGS_TABLE).map_err(to_state_error)?;
			table.insert(id, bytes.as_slice()).map_err(to_state_error)?;
		}
		write_txn.commit().map_err(to_state_error)?;
		Ok(id)
	}

	pub fn logs_for_task(&self, task_id: u64, limit: usize) -> Result<Vec<SyncLogEntry>, StateError> {
		let read_txn = self.db.begin_read().map_err(to_state_error)?;
		let table = read_txn.open_table(LOGS_TABLE).map_err(to_state_error)?;
		let mut out = Vec::new();
		for entry in table.iter().map_err(to_state_error)?.rev() {
			let (_, v) = entry.map_err(to_state_error)?;
			let log: SyncLogEntry = serde_json::from_slice(v.value()).map_err(to_state_error)?;
			if log.task_id == task_id {
				out.push(log);
				if out.len() >= limit {
					break;
				}
			}
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{EndpointDescriptor, EolPolicy, EventKind, FileState, Side, SyncMode, SyncStatus};
	use tempfile::TempDir;

	fn sample_task(id: u64) -> TaskDef {
		TaskDef {
			id,
			name: "t".into(),
			mode: SyncMode::TwoWay,
			a: EndpointDescriptor::local("/tmp/a"),
			b: EndpointDescriptor::local("/tmp/b"),
			exclude_patterns: vec![],
			allowed_extensions: vec![],
			eol_policy: EolPolicy::Lf,
			enabled: true,
			auto_start: true,
			poll_interval_secs: 1.5,
			trash_retention_days: 7,
			backup_retention_days: 7,
			log_successful_events: true,
		}
	}

	#[test]
	fn put_and_get_task_roundtrips() {
		let tmp = TempDir::new().unwrap();
		let store = Store::open(&tmp.path().join("s.redb")).unwrap();
		let task = sample_task(1);
		store.put_task(&task).unwrap();
		let fetched = store.get_task(1).unwrap().unwrap();
		assert_eq!(fetched.name, "t");
	}

	#[test]
	fn delete_task_removes_it() {
		let tmp = TempDir::new().unwrap();
		let store = Store::open(&tmp.path().join("s.redb")).unwrap();
		store.put_task(&sample_task(1)).unwrap();
		store.delete_task(1).unwrap();
		assert!(store.get_task(1).unwrap().is_none());
	}

	#[test]
	fn file_state_roundtrips_and_is_namespaced_by_task() {
		let tmp = TempDir::new().unwrap();
		let store = Store::open(&tmp.path().join("s.redb")).unwrap();
		let mut st = FileState::default();
		st.set_seen_at(Side::A, 1.0);
		store.put_file_state(1, "a/b.txt", &st).unwrap();
		store.put_file_state(2, "a/b.txt", &FileState::default()).unwrap();

		let fetched = store.get_file_state(1, "a/b.txt").unwrap().unwrap();
		assert_eq!(fetched.seen_at(Side::A), 1.0);

		let all = store.all_file_states(1).unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].0, "a/b.txt");
	}

	#[test]
	fn append_log_assigns_increasing_ids() {
		let tmp = TempDir::new().unwrap();
		let store = Store::open(&tmp.path().join("s.redb")).unwrap();
		let entry = SyncLogEntry {
			id: 0,
			task_id: 1,
			event_type: EventKind::Modified,
			file_path: "a.txt".into(),
			dest_path: None,
			status: SyncStatus::Success,
			error_message: None,
			sync_time: 1.0,
		};
		let id1 = store.append_log(entry.clone()).unwrap();
		let id2 = store.append_log(entry).unwrap();
		assert!(id2 > id1);
	}

	#[test]
	fn logs_for_task_filters_by_task_id_most_recent_first() {
		let tmp = TempDir::new().unwrap();
		let store = Store::open(&tmp.path().join("s.redb")).unwrap();
		for task_id in [1, 2, 1] {
			store
				.append_log(SyncLogEntry {
					id: 0,
					task_id,
					event_type: EventKind::Created,
					file_path: "x".into(),
					dest_path: None,
					status: SyncStatus::Success,
					error_message: None,
					sync_time: 0.0,
				})
				.unwrap();
		}
		let logs = store.logs_for_task(1, 10).unwrap();
		assert_eq!(logs.len(), 2);
		assert!(logs.iter().all(|l| l.task_id == 1));
	}

	#[test]
	fn persisted_store_survives_reopen() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("s.redb");
		{
			let store = Store::open(&path).unwrap();
			store.put_task(&sample_task(7)).unwrap();
		}
		let store = Store::open(&path).unwrap();
		assert!(store.get_task(7).unwrap().is_some());
	}
}

// vim: ts=4
