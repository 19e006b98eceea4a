//! End-to-end one-way sync: a rename on the watched source propagates as a
//! rename at the target rather than a delete-plus-recreate.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tongbu::runner::TaskRunner;
use tongbu::store::Store;
use tongbu::types::{EndpointDescriptor, EolPolicy, SyncMode, TaskDef};

fn task_def(id: u64, a: std::path::PathBuf, b: std::path::PathBuf) -> TaskDef {
	TaskDef {
		id,
		name: "rename".into(),
		mode: SyncMode::OneWay,
		a: EndpointDescriptor::local(a),
		b: EndpointDescriptor::local(b),
		exclude_patterns: vec![],
		allowed_extensions: vec![],
		eol_policy: EolPolicy::Keep,
		enabled: true,
		auto_start: true,
		poll_interval_secs: 1.0,
		trash_retention_days: 7,
		backup_retention_days: 7,
		log_successful_events: true,
	}
}

#[tokio::test]
async fn renamed_source_file_is_renamed_at_target_not_duplicated() {
	let tmp = TempDir::new().unwrap();
	let a = tmp.path().join("a");
	let b = tmp.path().join("b");
	tokio::fs::create_dir_all(&a).await.unwrap();
	tokio::fs::create_dir_all(&b).await.unwrap();
	tokio::fs::write(a.join("old.txt"), b"payload").await.unwrap();

	let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
	let runner = TaskRunner::new(task_def(1, a.clone(), b.clone()), store, "tongbu", 4).unwrap();
	runner.start().await.unwrap();
	runner.full_sync().await.unwrap();
	assert!(b.join("old.txt").exists());

	tokio::fs::rename(a.join("old.txt"), a.join("new.txt")).await.unwrap();
	// Give the watcher a window to observe the rename and the dispatcher to
	// coalesce and apply it; the tail scan is a 5s backstop if the watcher misses it.
	tokio::time::sleep(Duration::from_millis(800)).await;

	assert!(!b.join("old.txt").exists(), "stale target name should be gone after rename propagates");
	assert_eq!(tokio::fs::read(b.join("new.txt")).await.unwrap(), b"payload");

	runner.stop().await;
}
