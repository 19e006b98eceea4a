//! Task Manager (C12): owns the registry of running tasks, explicitly
//! constructed and passed around rather than a process-wide singleton
//! (SPEC_FULL §9). Grounded on `task_manager.py::TaskManager`.

use crate::error::SyncError;
use crate::logging::*;
use crate::runner::{RunnerStatus, TaskRunner};
use crate::store::Store;
use crate::transport::RemoteOptions;
use crate::types::TaskDef;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Status of one task as reported to callers (CLI, HTTP surface, etc.).
#[derive(Debug, Clone)]
pub struct TaskStatus {
	pub task_id: u64,
	pub name: String,
	pub enabled: bool,
	pub running: bool,
	pub runner_status: Option<RunnerStatus>,
}

pub struct TaskManager {
	store: Arc<Store>,
	remote: RemoteOptions,
	batch_max_parallel: usize,
	runners: Mutex<HashMap<u64, Arc<TaskRunner>>>,
}

impl TaskManager {
	pub fn new(store: Arc<Store>, remote: RemoteOptions, batch_max_parallel: usize) -> Self {
		TaskManager { store, remote, batch_max_parallel, runners: Mutex::new(HashMap::new()) }
	}

	/// Load every enabled task flagged `auto_start` and start it. Failures
	/// are logged per task rather than aborting the whole load (§4.11).
	pub async fn auto_start(&self) -> Result<(), SyncError> {
		for task in self.store.all_tasks()? {
			if task.enabled && task.auto_start {
				if let Err(e) = self.start_task(task.id).await {
					error!(task_id = task.id, name = %task.name, error = %e, "auto-start failed");
				}
			}
		}
		Ok(())
	}

	/// Start a task by id, loading its definition from the store. A no-op
	/// with a warning if the task is already running.
	pub async fn start_task(&self, task_id: u64) -> Result<(), SyncError> {
		let mut runners = self.runners.lock().await;
		if runners.contains_key(&task_id) {
			warn!(task_id, "task already running");
			return Ok(());
		}

		let def = self.store.get_task(task_id)?.ok_or_else(|| SyncError::NotFound { path: format!("task {}", task_id) })?;
		if !def.enabled {
			return Err(SyncError::ConfigInvalid { message: format!("task {} is disabled", def.name) });
		}

		let runner = Arc::new(TaskRunner::new(def.clone(), self.store.clone(), &self.remote, self.batch_max_parallel)?);
		runner.start().await?;
		runners.insert(task_id, runner);
		info!(task_id, name = %def.name, "task started");
		Ok(())
	}

	/// Stop a running task. A no-op with a warning if it isn't running.
	pub async fn stop_task(&self, task_id: u64) -> Result<(), SyncError> {
		let runner = self.runners.lock().await.remove(&task_id);
		match runner {
			Some(runner) => {
				runner.stop().await;
				info!(task_id, "task stopped");
				Ok(())
			}
			None => {
				warn!(task_id, "task not running");
				Ok(())
			}
		}
	}

	pub async fn restart_task(&self, task_id: u64) -> Result<(), SyncError> {
		self.stop_task(task_id).await?;
		self.start_task(task_id).await
	}

	/// Force a full sync on a task: uses the running instance if there is
	/// one, otherwise spins up a throwaway runner for the single pass and
	/// tears it down immediately, mirroring `sync_task_all`'s fallback path.
	pub async fn full_sync(&self, task_id: u64) -> Result<(), SyncError> {
		if let Some(runner) = self.runners.lock().await.get(&task_id).cloned() {
			return runner.full_sync().await;
		}

		let def = self.store.get_task(task_id)?.ok_or_else(|| SyncError::NotFound { path: format!("task {}", task_id) })?;
		let runner = TaskRunner::new(def, self.store.clone(), &self.remote, self.batch_max_parallel)?;
		runner.full_sync().await
	}

	pub async fn status(&self, task_id: u64) -> Result<TaskStatus, SyncError> {
		let def = self.store.get_task(task_id)?.ok_or_else(|| SyncError::NotFound { path: format!("task {}", task_id) })?;
		let runners = self.runners.lock().await;
		let runner = runners.get(&task_id);
		Ok(TaskStatus {
			task_id: def.id,
			name: def.name,
			enabled: def.enabled,
			running: runner.is_some(),
			runner_status: runner.map(|r| r.status()),
		})
	}

	pub async fn all_statuses(&self) -> Result<Vec<TaskStatus>, SyncError> {
		let runners = self.runners.lock().await;
		let mut out = Vec::new();
		for def in self.store.all_tasks()? {
			let runner = runners.get(&def.id);
			out.push(TaskStatus {
				task_id: def.id,
				name: def.name,
				enabled: def.enabled,
				running: runner.is_some(),
				runner_status: runner.map(|r| r.status()),
			});
		}
		Ok(out)
	}

	pub fn create_task(&self, def: &TaskDef) -> Result<(), SyncError> {
		self.store.put_task(def)?;
		Ok(())
	}

	/// Stop every running task, in the order they happen to iterate.
	pub async fn stop_all(&self) {
		info!("stopping all tasks");
		let task_ids: Vec<u64> = self.runners.lock().await.keys().copied().collect();
		for task_id in task_ids {
			if let Err(e) = self.stop_task(task_id).await {
				error!(task_id, error = %e, "failed to stop task during shutdown");
			}
		}
		info!("all tasks stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{EndpointDescriptor, EolPolicy, SyncMode};
	use tempfile::TempDir;

	fn test_remote_options() -> RemoteOptions {
		RemoteOptions {
			bin: "tongbu".into(),
			host_key_policy: crate::types::HostKeyPolicy::Reject,
			known_hosts_path: std::path::PathBuf::from("/tmp/tongbu-test-known-hosts"),
		}
	}

	fn task_def(id: u64, a: std::path::PathBuf, b: std::path::PathBuf) -> TaskDef {
		TaskDef {
			id,
			name: format!("task-{}", id),
			mode: SyncMode::OneWay,
			a: EndpointDescriptor::local(a),
			b: EndpointDescriptor::local(b),
			exclude_patterns: vec![],
			allowed_extensions: vec![],
			eol_policy: EolPolicy::Lf,
			enabled: true,
			auto_start: true,
			poll_interval_secs: 1.0,
			trash_retention_days: 7,
			backup_retention_days: 7,
			log_successful_events: true,
		}
	}

	#[tokio::test]
	async fn start_stop_restart_tracks_running_state() {
		let tmp = TempDir::new().unwrap();
		let a = tmp.path().join("a");
		let b = tmp.path().join("b");
		tokio::fs::create_dir_all(&a).await.unwrap();
		tokio::fs::create_dir_all(&b).await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let def = task_def(1, a, b);
		store.put_task(&def).unwrap();

		let manager = TaskManager::new(store, test_remote_options(), 4);
		manager.start_task(1).await.unwrap();
		assert!(manager.status(1).await.unwrap().running);

		manager.stop_task(1).await.unwrap();
		assert!(!manager.status(1).await.unwrap().running);

		manager.restart_task(1).await.unwrap();
		assert!(manager.status(1).await.unwrap().running);
		manager.stop_task(1).await.unwrap();
	}

	#[tokio::test]
	async fn auto_start_skips_disabled_tasks() {
		let tmp = TempDir::new().unwrap();
		let a = tmp.path().join("a");
		let b = tmp.path().join("b");
		tokio::fs::create_dir_all(&a).await.unwrap();
		tokio::fs::create_dir_all(&b).await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let mut def = task_def(2, a, b);
		def.enabled = false;
		store.put_task(&def).unwrap();

		let manager = TaskManager::new(store, test_remote_options(), 4);
		manager.auto_start().await.unwrap();
		assert!(!manager.status(2).await.unwrap().running);
	}

	#[tokio::test]
	async fn start_task_rejects_unknown_id() {
		let tmp = TempDir::new().unwrap();
		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let manager = TaskManager::new(store, test_remote_options(), 4);
		let err = manager.start_task(999).await.unwrap_err();
		assert!(matches!(err, SyncError::NotFound { .. }));
	}
}

// vim: ts=4
