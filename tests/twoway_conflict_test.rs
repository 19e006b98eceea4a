//! End-to-end two-way sync: concurrent edits on both sides resolve to the
//! later-observed writer, with the losing side's prior content backed up
//! rather than silently discarded.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tongbu::runner::TaskRunner;
use tongbu::store::Store;
use tongbu::types::{EndpointDescriptor, EolPolicy, SyncMode, TaskDef};

fn task_def(id: u64, a: std::path::PathBuf, b: std::path::PathBuf) -> TaskDef {
	TaskDef {
		id,
		name: "conflict".into(),
		mode: SyncMode::TwoWay,
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
async fn later_writer_wins_and_loser_content_is_backed_up() {
	let tmp = TempDir::new().unwrap();
	let a = tmp.path().join("a");
	let b = tmp.path().join("b");
	tokio::fs::create_dir_all(&a).await.unwrap();
	tokio::fs::create_dir_all(&b).await.unwrap();
	tokio::fs::write(a.join("shared.txt"), b"original").await.unwrap();
	tokio::fs::write(b.join("shared.txt"), b"original").await.unwrap();

	let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
	let runner = TaskRunner::new(task_def(1, a.clone(), b.clone()), store, "tongbu", 4).unwrap();
	runner.start().await.unwrap();

	// Let the baseline pass settle on the already-equal pre-existing file
	// before introducing a real conflict.
	tokio::time::sleep(Duration::from_millis(400)).await;

	tokio::fs::write(a.join("shared.txt"), b"edited on a").await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	tokio::fs::write(b.join("shared.txt"), b"edited on b").await.unwrap();

	tokio::time::sleep(Duration::from_millis(800)).await;

	assert_eq!(tokio::fs::read(a.join("shared.txt")).await.unwrap(), b"edited on b");
	assert_eq!(tokio::fs::read(b.join("shared.txt")).await.unwrap(), b"edited on b");

	let backup_dir = a.join(".tongbu_backup");
	let mut found_backup = false;
	let mut roots = tokio::fs::read_dir(&backup_dir).await.unwrap();
	while let Some(root) = roots.next_entry().await.unwrap() {
		let candidate = root.path().join("shared.txt");
		if let Ok(contents) = tokio::fs::read(&candidate).await {
			if contents == b"edited on a" {
				found_backup = true;
			}
		}
	}
	assert!(found_backup, "a's overwritten content should have been backed up before being replaced");

	runner.stop().await;
}
