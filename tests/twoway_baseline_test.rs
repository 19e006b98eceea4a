//! End-to-end two-way sync: files that already exist on only one side at
//! startup get seeded onto the other side by the initial baseline pass.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tongbu::runner::TaskRunner;
use tongbu::store::Store;
use tongbu::types::{EndpointDescriptor, EolPolicy, SyncMode, TaskDef};

fn task_def(id: u64, a: std::path::PathBuf, b: std::path::PathBuf) -> TaskDef {
	TaskDef {
		id,
		name: "baseline".into(),
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
async fn disjoint_pre_existing_files_converge_onto_both_sides() {
	let tmp = TempDir::new().unwrap();
	let a = tmp.path().join("a");
	let b = tmp.path().join("b");
	tokio::fs::create_dir_all(&a).await.unwrap();
	tokio::fs::create_dir_all(&b).await.unwrap();
	tokio::fs::write(a.join("only_on_a.txt"), b"from a").await.unwrap();
	tokio::fs::write(b.join("only_on_b.txt"), b"from b").await.unwrap();

	let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
	let runner = TaskRunner::new(task_def(1, a.clone(), b.clone()), store, "tongbu", 4).unwrap();
	runner.start().await.unwrap();

	tokio::time::sleep(Duration::from_millis(800)).await;

	assert_eq!(tokio::fs::read(b.join("only_on_a.txt")).await.unwrap(), b"from a");
	assert_eq!(tokio::fs::read(a.join("only_on_b.txt")).await.unwrap(), b"from b");

	runner.stop().await;
}
