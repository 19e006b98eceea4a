//! Task Runner (C11): owns one task's endpoints, watchers, dispatcher, and
//! background maintenance. One instance per running task; two-phase startup
//! keeps the fast path free of tree walks (§4.11).

use crate::dispatch::BatchDispatcher;
use crate::endpoint::{Endpoint, LocalEndpoint, RemoteEndpoint};
use crate::error::SyncError;
use crate::filter::PathFilter;
use crate::logging::*;
use crate::oneway::OneWaySyncer;
use crate::reconcile::Reconciler;
use crate::store::Store;
use crate::transport::{RemoteOptions, RemoteTransport};
use crate::types::{EndpointDescriptor, EolPolicy, HashAlgo, Side, SyncMode, TaskDef};
use crate::watch::local::LocalWatcher;
use crate::watch::remote::{self, Poller, SubscriptionWatcher};
use crate::watch::{HashBudget, RawEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const SHUTDOWN_SETTLE: Duration = Duration::from_millis(50);
const RETENTION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Lifecycle states named in §3 "Lifecycles".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
	Stopped,
	Running,
	Stopping,
}

fn build_filter(def: &TaskDef, internal_dirs: &[String]) -> Result<PathFilter, SyncError> {
	PathFilter::new(&def.exclude_patterns, &def.allowed_extensions, internal_dirs)
		.map_err(|e| SyncError::ConfigInvalid { message: e.to_string() })
}

fn build_endpoint(
	descriptor: &EndpointDescriptor,
	filter: PathFilter,
	eol_policy: EolPolicy,
	hash_algo: HashAlgo,
	remote: &RemoteOptions,
) -> Result<Endpoint, SyncError> {
	match &descriptor.remote {
		None => Ok(Endpoint::Local(
			LocalEndpoint::new(descriptor.path.clone(), filter, eol_policy, hash_algo).with_dirs(
				descriptor.trash_dir_name().to_string(),
				descriptor.backup_dir_name().to_string(),
			),
		)),
		Some(remote_desc) => {
			let host = if remote_desc.username.is_empty() {
				remote_desc.host.clone()
			} else {
				format!("{}@{}", remote_desc.username, remote_desc.host)
			};
			let transport = Arc::new(RemoteTransport::new(host, descriptor.path.display().to_string(), remote));
			transport.spawn_keepalive();
			Ok(Endpoint::Remote(
				RemoteEndpoint::new(transport, descriptor.path.display().to_string(), filter, eol_policy, hash_algo)
					.with_dirs(descriptor.trash_dir_name().to_string(), descriptor.backup_dir_name().to_string()),
			))
		}
	}
}

/// Internal directory names (trash/backup) excluded from sync regardless of
/// task filter configuration, derived from the task's own settings.
fn internal_dirs_for(def: &TaskDef) -> Vec<String> {
	let mut dirs = vec![
		def.a.trash_dir_name().to_string(),
		def.a.backup_dir_name().to_string(),
		def.b.trash_dir_name().to_string(),
		def.b.backup_dir_name().to_string(),
	];
	dirs.sort();
	dirs.dedup();
	dirs
}

/// One running task. Variant-specific state (reconciler vs one-way syncer,
/// one vs two watchers) lives behind the enum; lifecycle operations are
/// uniform across both modes.
pub enum TaskRunner {
	OneWay(OneWayRunner),
	TwoWay(TwoWayRunner),
}

impl TaskRunner {
	pub fn new(def: TaskDef, store: Arc<Store>, remote: &RemoteOptions, batch_max_parallel: usize) -> Result<Self, SyncError> {
		if matches!(def.mode, SyncMode::TwoWay) && def.a == def.b {
			return Err(SyncError::ConfigInvalid { message: "two-way task requires distinct endpoints".into() });
		}
		match def.mode {
			SyncMode::OneWay => {
				Ok(TaskRunner::OneWay(OneWayRunner::new(def, store, remote, batch_max_parallel)?))
			}
			SyncMode::TwoWay => {
				Ok(TaskRunner::TwoWay(TwoWayRunner::new(def, store, remote, batch_max_parallel)?))
			}
		}
	}

	pub fn task_id(&self) -> u64 {
		match self {
			TaskRunner::OneWay(r) => r.task_id,
			TaskRunner::TwoWay(r) => r.task_id,
		}
	}

	pub fn status(&self) -> RunnerStatus {
		match self {
			TaskRunner::OneWay(r) => *r.status.lock().unwrap(),
			TaskRunner::TwoWay(r) => *r.status.lock().unwrap(),
		}
	}

	pub async fn start(&self) -> Result<(), SyncError> {
		match self {
			TaskRunner::OneWay(r) => r.start().await,
			TaskRunner::TwoWay(r) => r.start().await,
		}
	}

	pub async fn stop(&self) {
		match self {
			TaskRunner::OneWay(r) => r.stop().await,
			TaskRunner::TwoWay(r) => r.stop().await,
		}
	}

	/// User-triggered forced full sync (§4.8 "Concurrency with user-triggered
	/// full sync" / §4.9 "A full sync operation").
	pub async fn full_sync(&self) -> Result<(), SyncError> {
		match self {
			TaskRunner::OneWay(r) => r.syncer.full_sync().await,
			TaskRunner::TwoWay(r) => r.reconciler.full_sync().await,
		}
	}
}

fn set_status(status: &std::sync::Mutex<RunnerStatus>, new: RunnerStatus) {
	*status.lock().unwrap() = new;
}

// ---------------------------------------------------------------------------
// One-way
// ---------------------------------------------------------------------------

pub struct OneWayRunner {
	task_id: u64,
	def: TaskDef,
	dispatcher: Arc<BatchDispatcher>,
	syncer: Arc<OneWaySyncer>,
	source_is_local: bool,
	stop: Arc<Notify>,
	status: Arc<std::sync::Mutex<RunnerStatus>>,
	watcher: std::sync::Mutex<Option<LocalWatcher>>,
}

impl OneWayRunner {
	fn new(def: TaskDef, store: Arc<Store>, remote: &RemoteOptions, batch_max_parallel: usize) -> Result<Self, SyncError> {
		let internal_dirs = internal_dirs_for(&def);
		let source_filter = build_filter(&def, &internal_dirs)?;
		let target_filter = build_filter(&def, &internal_dirs)?;
		let source = build_endpoint(&def.a, source_filter, def.eol_policy, HashAlgo::Md5, remote)?;
		let target = build_endpoint(&def.b, target_filter, def.eol_policy, HashAlgo::Md5, remote)?;
		let source_is_local = !def.a.is_remote();

		let dispatcher = Arc::new(BatchDispatcher::new(batch_max_parallel));
		let syncer = Arc::new(OneWaySyncer::new(
			def.id,
			store.clone(),
			source,
			target,
			dispatcher.clone(),
			def.log_successful_events,
		));

		Ok(OneWayRunner {
			task_id: def.id,
			def,
			dispatcher,
			syncer,
			source_is_local,
			stop: Arc::new(Notify::new()),
			status: Arc::new(std::sync::Mutex::new(RunnerStatus::Stopped)),
			watcher: std::sync::Mutex::new(None),
		})
	}

	/// Fast path (§4.11 phase 1): start the local watcher if the source is
	/// local, flip to running. No tree walk here — the tail-scan loop and
	/// (for a remote source) the watcher's own poll cadence handle the rest.
	async fn start(&self) -> Result<(), SyncError> {
		let (tx, rx) = mpsc::unbounded_channel();

		if self.source_is_local {
			let root = self.def.a.path.clone();
			let filter = Arc::new(build_filter(&self.def, &internal_dirs_for(&self.def))?);
			let watcher = LocalWatcher::start(root, filter, tx)
				.map_err(|e| SyncError::Other { message: format!("failed to start local watcher: {}", e) })?;
			*self.watcher.lock().unwrap() = Some(watcher);
		}

		set_status(&self.status, RunnerStatus::Running);
		info!(task_id = self.task_id, "one-way task started (fast path)");

		self.spawn_background(rx);
		Ok(())
	}

	/// Background path (§4.11 phase 2): event loop, dispatcher loop,
	/// tail-scan repair loop (which, for a remote source, is also the
	/// change-detection mechanism since no watcher was started above),
	/// retention cleanup timer.
	fn spawn_background(&self, rx: mpsc::UnboundedReceiver<RawEvent>) {
		let stop = self.stop.clone();
		let syncer = self.syncer.clone();

		tokio::spawn({
			let syncer = syncer.clone();
			async move { syncer.run_event_loop(rx).await }
		});

		tokio::spawn({
			let dispatcher = self.dispatcher.clone();
			let syncer = syncer.clone();
			let stop = stop.clone();
			async move {
				let handler: crate::dispatch::Handler = Arc::new(move |path: String| {
					let syncer = syncer.clone();
					Box::pin(async move { syncer.sync_path(&path).await })
				});
				dispatcher.run(handler, stop).await;
			}
		});

		tokio::spawn({
			let syncer = syncer.clone();
			let stop = stop.clone();
			async move { syncer.tail_scan_loop(stop).await }
		});

		tokio::spawn({
			let task_id = self.task_id;
			let syncer = syncer.clone();
			let trash_days = self.def.trash_retention_days;
			let backup_days = self.def.backup_retention_days;
			let stop = stop.clone();
			async move { run_cleanup_timer_one_way(task_id, syncer, trash_days, backup_days, stop).await }
		});
	}

	async fn stop(&self) {
		set_status(&self.status, RunnerStatus::Stopping);
		*self.watcher.lock().unwrap() = None;
		self.stop.notify_waiters();
		tokio::time::sleep(SHUTDOWN_SETTLE).await;
		set_status(&self.status, RunnerStatus::Stopped);
		info!(task_id = self.task_id, "one-way task stopped");
	}
}

/// Hourly retention sweep for one-way tasks: only the target accumulates
/// trash/backup writes, so only its endpoint is aged out.
async fn run_cleanup_timer_one_way(task_id: u64, syncer: Arc<OneWaySyncer>, trash_days: u32, backup_days: u32, stop: Arc<Notify>) {
	loop {
		tokio::select! {
			_ = stop.notified() => return,
			_ = tokio::time::sleep(RETENTION_CLEANUP_INTERVAL) => {}
		}
		if let Err(e) = syncer.target().cleanup(trash_days, backup_days).await {
			warn!(task_id, error = %e, "target retention cleanup failed");
		}
	}
}

// ---------------------------------------------------------------------------
// Two-way
// ---------------------------------------------------------------------------

pub struct TwoWayRunner {
	task_id: u64,
	def: TaskDef,
	store: Arc<Store>,
	remote_bin: String,
	dispatcher: Arc<BatchDispatcher>,
	reconciler: Arc<Reconciler>,
	a_is_remote: bool,
	b_is_remote: bool,
	stop: Arc<Notify>,
	status: Arc<std::sync::Mutex<RunnerStatus>>,
	watchers: std::sync::Mutex<Vec<LocalWatcher>>,
	subscriptions: std::sync::Mutex<Vec<SubscriptionWatcher>>,
}

impl TwoWayRunner {
	fn new(def: TaskDef, store: Arc<Store>, remote: &RemoteOptions, batch_max_parallel: usize) -> Result<Self, SyncError> {
		let internal_dirs = internal_dirs_for(&def);
		let filter_a = build_filter(&def, &internal_dirs)?;
		let filter_b = build_filter(&def, &internal_dirs)?;
		let a = build_endpoint(&def.a, filter_a, def.eol_policy, HashAlgo::Md5, remote)?;
		let b = build_endpoint(&def.b, filter_b, def.eol_policy, HashAlgo::Md5, remote)?;
		let a_is_remote = def.a.is_remote();
		let b_is_remote = def.b.is_remote();

		let dispatcher = Arc::new(BatchDispatcher::new(batch_max_parallel));
		let reconciler = Arc::new(Reconciler::new(
			def.id,
			store.clone(),
			a,
			b,
			dispatcher.clone(),
			def.log_successful_events,
		));

		Ok(TwoWayRunner {
			task_id: def.id,
			def,
			store,
			remote_bin: remote.bin.clone(),
			dispatcher,
			reconciler,
			a_is_remote,
			b_is_remote,
			stop: Arc::new(Notify::new()),
			status: Arc::new(std::sync::Mutex::new(RunnerStatus::Stopped)),
			watchers: std::sync::Mutex::new(Vec::new()),
			subscriptions: std::sync::Mutex::new(Vec::new()),
		})
	}

	/// Fast path: start whichever local watchers apply, connect remote
	/// transports implicitly (the first RPC call does it via
	/// `ensure_connected`), flip to running.
	async fn start(&self) -> Result<(), SyncError> {
		let (tx, rx) = mpsc::unbounded_channel::<(Side, RawEvent)>();

		if !self.a_is_remote {
			self.start_local_watcher(Side::A, &self.def.a.path, tx.clone())?;
		}
		if !self.b_is_remote {
			self.start_local_watcher(Side::B, &self.def.b.path, tx.clone())?;
		}

		set_status(&self.status, RunnerStatus::Running);
		info!(task_id = self.task_id, "two-way task started (fast path)");

		self.spawn_background(rx, tx).await;
		Ok(())
	}

	fn start_local_watcher(
		&self,
		side: Side,
		root: &std::path::Path,
		tx: mpsc::UnboundedSender<(Side, RawEvent)>,
	) -> Result<(), SyncError> {
		let (side_tx, side_rx) = mpsc::unbounded_channel();
		let filter = Arc::new(build_filter(&self.def, &internal_dirs_for(&self.def))?);
		let watcher = LocalWatcher::start(root.to_path_buf(), filter, side_tx)
			.map_err(|e| SyncError::Other { message: format!("failed to start local watcher for {}: {}", side, e) })?;
		self.watchers.lock().unwrap().push(watcher);
		tokio::spawn(forward_side(side, side_rx, tx));
		Ok(())
	}

	/// Background path (§4.11 phase 2): remote watcher/poller for each
	/// remote side, dispatcher loop, retention cleanup timer, and the
	/// initial baseline pass when the state cache is empty.
	async fn spawn_background(&self, mut rx: mpsc::UnboundedReceiver<(Side, RawEvent)>, tx: mpsc::UnboundedSender<(Side, RawEvent)>) {
		let reconciler = self.reconciler.clone();
		let stop = self.stop.clone();

		tokio::spawn({
			let reconciler = reconciler.clone();
			let stop = stop.clone();
			async move {
				loop {
					tokio::select! {
						_ = stop.notified() => return,
						event = rx.recv() => {
							let Some((side, raw)) = event else { return };
							let observed_at = crate::types::now_secs();
							if let Err(e) = reconciler.observe(side, &raw.rel_path, observed_at).await {
								warn!(rel_path = %raw.rel_path, error = %e, "observation failed");
							}
						}
					}
				}
			}
		});

		tokio::spawn({
			let dispatcher = self.dispatcher.clone();
			let reconciler = reconciler.clone();
			let stop = stop.clone();
			async move {
				let handler: crate::dispatch::Handler = Arc::new(move |path: String| {
					let reconciler = reconciler.clone();
					Box::pin(async move { reconciler.decide_and_sync(&path).await })
				});
				dispatcher.run(handler, stop).await;
			}
		});

		if self.a_is_remote {
			self.spawn_remote_side(Side::A, tx.clone()).await;
		}
		if self.b_is_remote {
			self.spawn_remote_side(Side::B, tx.clone()).await;
		}

		tokio::spawn({
			let task_id = self.task_id;
			let store = self.store.clone();
			let reconciler = reconciler.clone();
			let trash_days = self.def.trash_retention_days;
			let backup_days = self.def.backup_retention_days;
			let stop = stop.clone();
			async move { run_cleanup_timer(task_id, store, reconciler, trash_days, backup_days, stop).await }
		});

		tokio::spawn({
			let reconciler = reconciler.clone();
			let task_id = self.task_id;
			let store = self.store.clone();
			async move {
				match store.all_file_states(task_id) {
					Ok(rows) if rows.is_empty() => {
						if let Err(e) = reconciler.baseline().await {
							warn!(task_id, error = %e, "baseline sync failed");
						}
					}
					Ok(_) => {}
					Err(e) => warn!(task_id, error = %e, "failed to check existing state for baseline"),
				}
			}
		});
	}

	/// Probe the remote side once; either park a [`SubscriptionWatcher`] for
	/// the task's lifetime (tracked on `self` so `stop()` can tear it down) or
	/// fall back to a [`Poller`] loop at the task's configured interval.
	async fn spawn_remote_side(&self, side: Side, tx: mpsc::UnboundedSender<(Side, RawEvent)>) {
		let Endpoint::Remote(remote_ep) = self.reconciler.endpoint(side) else {
			return;
		};
		let host = remote_ep.transport.host().to_string();
		let remote_path = remote_ep.root.clone();

		let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<RawEvent>();
		tokio::spawn(async move {
			while let Some(raw) = raw_rx.recv().await {
				if tx.send((side, raw)).is_err() {
					return;
				}
			}
		});

		let available = remote::probe_available(&remote_ep.transport, &self.remote_bin).await;
		if available {
			let sub = SubscriptionWatcher::start(host, self.remote_bin.clone(), remote_path, raw_tx);
			self.subscriptions.lock().unwrap().push(sub);
			return;
		}

		let task_id = self.task_id;
		let store = self.store.clone();
		let poll_interval = Duration::from_secs_f64(self.def.poll_interval_secs.max(0.1));
		let hash_budget = HashBudget::default();
		let stop = self.stop.clone();
		let reconciler = self.reconciler.clone();
		tokio::spawn(async move {
			let mut poller = Poller::new(side, task_id, store);
			loop {
				tokio::select! {
					_ = stop.notified() => return,
					_ = tokio::time::sleep(poll_interval) => {}
				}
				let Endpoint::Remote(ep) = reconciler.endpoint(side) else { return };
				if let Err(e) = poller.poll_once(ep, hash_budget, &raw_tx).await {
					warn!(task_id, side = %side, error = %e, "remote poll failed");
				}
			}
		});
	}

	async fn stop(&self) {
		set_status(&self.status, RunnerStatus::Stopping);
		self.watchers.lock().unwrap().clear();
		for sub in self.subscriptions.lock().unwrap().drain(..) {
			sub.stop();
		}
		self.stop.notify_waiters();
		tokio::time::sleep(SHUTDOWN_SETTLE).await;
		set_status(&self.status, RunnerStatus::Stopped);
		info!(task_id = self.task_id, "two-way task stopped");
	}
}

async fn forward_side(side: Side, mut rx: mpsc::UnboundedReceiver<RawEvent>, tx: mpsc::UnboundedSender<(Side, RawEvent)>) {
	while let Some(event) = rx.recv().await {
		if tx.send((side, event)).is_err() {
			return;
		}
	}
}

/// Hourly (by default) retention sweep for two-way tasks: ages out trash and
/// backup directories on both endpoints, then GCs fully-reflected tombstones.
async fn run_cleanup_timer(task_id: u64, store: Arc<Store>, reconciler: Arc<Reconciler>, trash_days: u32, backup_days: u32, stop: Arc<Notify>) {
	loop {
		tokio::select! {
			_ = stop.notified() => return,
			_ = tokio::time::sleep(RETENTION_CLEANUP_INTERVAL) => {}
		}
		if let Err(e) = reconciler.endpoint(Side::A).cleanup(trash_days, backup_days).await {
			warn!(task_id, side = "a", error = %e, "retention cleanup failed");
		}
		if let Err(e) = reconciler.endpoint(Side::B).cleanup(trash_days, backup_days).await {
			warn!(task_id, side = "b", error = %e, "retention cleanup failed");
		}
		if let Err(e) = gc_tombstoned_rows(task_id, &store) {
			warn!(task_id, error = %e, "tombstone GC sweep failed");
		}
	}
}

/// Open Question 2 resolution (SPEC_FULL §9): permitted-not-required GC of
/// rows where both sides are tombstoned and reflected.
fn gc_tombstoned_rows(task_id: u64, store: &Store) -> Result<(), SyncError> {
	for (rel_path, row) in store.all_file_states(task_id)? {
		if row.gc_eligible() {
			store.delete_file_state(task_id, &rel_path)?;
		}
	}
	Ok(())
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

	fn task_def(id: u64, mode: SyncMode, a: std::path::PathBuf, b: std::path::PathBuf) -> TaskDef {
		TaskDef {
			id,
			name: "t".into(),
			mode,
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
	async fn one_way_runner_starts_and_stops_cleanly() {
		let tmp = TempDir::new().unwrap();
		let a = tmp.path().join("a");
		let b = tmp.path().join("b");
		tokio::fs::create_dir_all(&a).await.unwrap();
		tokio::fs::create_dir_all(&b).await.unwrap();
		tokio::fs::write(a.join("x.txt"), b"hello").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let runner = TaskRunner::new(task_def(1, SyncMode::OneWay, a, b.clone()), store, &test_remote_options(), 4).unwrap();
		runner.start().await.unwrap();
		assert_eq!(runner.status(), RunnerStatus::Running);

		runner.full_sync().await.unwrap();
		assert_eq!(tokio::fs::read(b.join("x.txt")).await.unwrap(), b"hello");

		runner.stop().await;
		assert_eq!(runner.status(), RunnerStatus::Stopped);
	}

	#[tokio::test]
	async fn two_way_runner_rejects_identical_endpoints() {
		let tmp = TempDir::new().unwrap();
		let a = tmp.path().join("a");
		tokio::fs::create_dir_all(&a).await.unwrap();
		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let err = TaskRunner::new(task_def(1, SyncMode::TwoWay, a.clone(), a), store, &test_remote_options(), 4).unwrap_err();
		assert!(matches!(err, SyncError::ConfigInvalid { .. }));
	}

	#[tokio::test]
	async fn two_way_runner_baseline_propagates_on_start() {
		let tmp = TempDir::new().unwrap();
		let a = tmp.path().join("a");
		let b = tmp.path().join("b");
		tokio::fs::create_dir_all(&a).await.unwrap();
		tokio::fs::create_dir_all(&b).await.unwrap();
		tokio::fs::write(a.join("seed.txt"), b"data").await.unwrap();

		let store = Arc::new(Store::open(&tmp.path().join("s.redb")).unwrap());
		let runner = TaskRunner::new(task_def(1, SyncMode::TwoWay, a, b.clone()), store, &test_remote_options(), 4).unwrap();
		runner.start().await.unwrap();

		tokio::time::sleep(Duration::from_millis(200)).await;
		runner.stop().await;

		assert_eq!(tokio::fs::read(b.join("seed.txt")).await.unwrap(), b"data");
	}
}

// vim: ts=4
