//! Batch Dispatcher (C10): coalesces enqueued paths arriving within a short
//! window, de-duplicates by path, and executes the batch across a bounded
//! worker pool. Shared by the Reconciler (§4.8) and the One-Way Syncer
//! (§4.9) — both hand it a path and a handler closure; the dispatcher itself
//! has no opinion about what "processing" a path means.

use crate::logging::*;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinSet;

const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(500);
const COALESCE_QUANTUM: Duration = Duration::from_millis(100);

pub type Handler = Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<(), crate::error::SyncError>> + Send>> + Send + Sync>;

/// Bounded set of pending relative paths awaiting the next batch, keyed so a
/// path enqueued multiple times between drains collapses to one entry.
struct Queue {
	pending: Mutex<HashMap<String, ()>>,
	signal: Notify,
}

impl Queue {
	fn new() -> Self {
		Queue { pending: Mutex::new(HashMap::new()), signal: Notify::new() }
	}

	fn push(&self, rel_path: String) {
		self.pending.lock().unwrap().insert(rel_path, ());
		self.signal.notify_one();
	}

	fn drain(&self) -> Vec<String> {
		let mut guard = self.pending.lock().unwrap();
		guard.drain().map(|(k, _)| k).collect()
	}
}

/// Runs the coalesce-then-dispatch loop for one task. `syncing` is exposed so
/// pollers can skip a tick while a batch is in flight, per §4.10.
pub struct BatchDispatcher {
	queue: Arc<Queue>,
	syncing: Arc<AtomicBool>,
	batch_delay: Duration,
	max_parallel: usize,
}

impl BatchDispatcher {
	pub fn new(max_parallel: usize) -> Self {
		BatchDispatcher {
			queue: Arc::new(Queue::new()),
			syncing: Arc::new(AtomicBool::new(false)),
			batch_delay: DEFAULT_BATCH_DELAY,
			max_parallel: max_parallel.clamp(4, 8),
		}
	}

	pub fn with_batch_delay(mut self, delay: Duration) -> Self {
		self.batch_delay = delay;
		self
	}

	/// Enqueue a path for the next batch. Cheap, synchronous, safe to call
	/// from a watcher callback.
	pub fn enqueue(&self, rel_path: impl Into<String>) {
		self.queue.push(rel_path.into());
	}

	pub fn is_syncing(&self) -> bool {
		self.syncing.load(Ordering::SeqCst)
	}

	pub fn syncing_flag(&self) -> Arc<AtomicBool> {
		self.syncing.clone()
	}

	/// Run until `stop` is notified. Each wake drains the queue, dedupes (a
	/// `HashMap` insert already keeps only the latest occurrence per path),
	/// and fans the batch out across `max_parallel` workers.
	pub async fn run(&self, handler: Handler, stop: Arc<Notify>) {
		loop {
			tokio::select! {
				_ = stop.notified() => return,
				_ = tokio::time::sleep(self.batch_delay) => {}
				_ = self.queue.signal.notified() => {}
			}

			tokio::time::sleep(COALESCE_QUANTUM).await;

			let batch = self.queue.drain();
			if batch.is_empty() {
				continue;
			}

			self.syncing.store(true, Ordering::SeqCst);
			let started = Instant::now();
			let size = batch.len();

			let mut success = 0u32;
			let mut failed = 0u32;
			let mut joins = JoinSet::new();

			for rel_path in batch {
				if joins.len() >= self.max_parallel {
					if let Some(res) = joins.join_next().await {
						tally(res, &mut success, &mut failed);
					}
				}
				let handler = handler.clone();
				joins.spawn(async move { handler(rel_path).await });
			}

			while let Some(res) = joins.join_next().await {
				tally(res, &mut success, &mut failed);
			}

			self.syncing.store(false, Ordering::SeqCst);

			info!(
				size, success, failed,
				elapsed_ms = started.elapsed().as_millis() as u64,
				"batch complete"
			);
		}
	}
}

fn tally(
	res: Result<Result<(), crate::error::SyncError>, tokio::task::JoinError>,
	success: &mut u32,
	failed: &mut u32,
) {
	match res {
		Ok(Ok(())) => *success += 1,
		Ok(Err(e)) => {
			*failed += 1;
			warn!(error = %e, "batch worker failed");
		}
		Err(e) => {
			*failed += 1;
			warn!(error = %e, "batch worker panicked");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicU32;

	fn counting_handler(counter: Arc<AtomicU32>) -> Handler {
		Arc::new(move |_path: String| {
			let counter = counter.clone();
			Box::pin(async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Ok(())
			})
		})
	}

	#[tokio::test]
	async fn enqueued_paths_are_deduplicated_and_processed() {
		let dispatcher = BatchDispatcher::new(4).with_batch_delay(Duration::from_millis(20));
		let counter = Arc::new(AtomicU32::new(0));
		let stop = Arc::new(Notify::new());

		dispatcher.enqueue("a.txt");
		dispatcher.enqueue("a.txt");
		dispatcher.enqueue("b.txt");

		let handler = counting_handler(counter.clone());
		let stop_for_run = stop.clone();
		let run = tokio::spawn(async move {
			dispatcher.run(handler, stop_for_run).await;
		});

		tokio::time::sleep(Duration::from_millis(150)).await;
		stop.notify_waiters();
		let _ = run.await;

		assert_eq!(counter.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn failed_handler_is_tallied_without_stopping_the_loop() {
		let dispatcher = BatchDispatcher::new(4).with_batch_delay(Duration::from_millis(20));
		let stop = Arc::new(Notify::new());
		let handler: Handler = Arc::new(|_path: String| {
			Box::pin(async move { Err(crate::error::SyncError::Other { message: "boom".into() }) })
		});

		dispatcher.enqueue("a.txt");
		let stop_for_run = stop.clone();
		let run = tokio::spawn(async move {
			dispatcher.run(handler, stop_for_run).await;
		});

		tokio::time::sleep(Duration::from_millis(100)).await;
		stop.notify_waiters();
		let _ = run.await;
	}
}

// vim: ts=4
