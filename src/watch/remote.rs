//! Remote Watcher (C6): preferred persistent kernel-notification subscription
//! over its own SSH channel, falling back permanently to a periodic
//! recursive scan (with coarse-mtime compensation) when the remote host has
//! no notification helper installed.

use super::{EventSender, HashBudget, RawEvent};
use crate::endpoint::remote::RemoteEndpoint;
use crate::logging::*;
use crate::store::Store;
use crate::transport::RemoteTransport;
use crate::types::{EventKind, FileMeta, Side};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;

const HEARTBEAT_EVERY_TICKS: u32 = 12;

/// Maps a helper's raw event name onto our [`EventKind`], per §4.6's
/// `close-write -> modified`, `move-from -> deleted`, `move-to -> created`.
fn map_helper_event(name: &str) -> Option<EventKind> {
	match name {
		"create" => Some(EventKind::Created),
		"modify" | "close-write" | "close_write" => Some(EventKind::Modified),
		"delete" | "move-from" | "moved_from" => Some(EventKind::Deleted),
		"move-to" | "moved_to" => Some(EventKind::Created),
		_ => None,
	}
}

/// Parse one `path|events` line, splitting a compound event set into one
/// logical [`RawEvent`] per mapped kind.
fn parse_notify_line(line: &str) -> Vec<RawEvent> {
	let Some((path, events)) = line.split_once('|') else { return Vec::new() };
	events
		.split(',')
		.filter_map(|e| map_helper_event(e.trim()))
		.map(|kind| RawEvent { rel_path: path.to_string(), dest_rel_path: None, kind })
		.collect()
}

/// Probe once at startup; failures permanently select the poll fallback for
/// this endpoint's lifetime rather than retrying (§4.6). The "helper" is this
/// same binary's `notify-stream` subcommand, so the probe just checks that
/// `bin` resolves on the remote `$PATH` rather than a separately named tool.
pub async fn probe_available(transport: &RemoteTransport, bin: &str) -> bool {
	match transport.probe_helper(bin).await {
		Ok(found) => found,
		Err(e) => {
			warn!(host = %transport.host(), error = %e, "notification helper probe failed, using poll fallback");
			false
		}
	}
}

/// Persistent subscription: spawns its own `ssh host <helper> <path>` child,
/// independent of the endpoint's RPC session so polling/RPC traffic is never
/// blocked behind a long-lived stream.
pub struct SubscriptionWatcher {
	stop: Arc<Notify>,
}

impl SubscriptionWatcher {
	pub fn start(host: String, bin: String, remote_path: String, tx: EventSender) -> Self {
		let stop = Arc::new(Notify::new());
		let stop_rx = stop.clone();

		tokio::spawn(async move {
			loop {
				let spawned = Command::new("ssh")
					.arg(&host)
					.arg(&bin)
					.arg("notify-stream")
					.arg(&remote_path)
					.stdin(Stdio::null())
					.stdout(Stdio::piped())
					.stderr(Stdio::null())
					.spawn();

				let mut child = match spawned {
					Ok(c) => c,
					Err(e) => {
						warn!(host = %host, error = %e, "failed to spawn notification stream, retrying");
						tokio::time::sleep(Duration::from_secs(5)).await;
						continue;
					}
				};

				let stdout = match child.stdout.take() {
					Some(s) => s,
					None => continue,
				};
				let mut lines = BufReader::new(stdout).lines();

				loop {
					tokio::select! {
						_ = stop_rx.notified() => {
							let _ = child.kill().await;
							return;
						}
						line = lines.next_line() => {
							match line {
								Ok(Some(line)) => {
									for event in parse_notify_line(&line) {
										if tx.send(event).is_err() {
											let _ = child.kill().await;
											return;
										}
									}
								}
								Ok(None) => break, // stream closed; reconnect
								Err(e) => {
									warn!(host = %host, error = %e, "notification stream read error");
									break;
								}
							}
						}
					}
				}

				let _ = child.kill().await;
				warn!(host = %host, "notification stream disconnected, reconnecting");
				tokio::time::sleep(Duration::from_secs(2)).await;
			}
		});

		SubscriptionWatcher { stop }
	}

	pub fn stop(&self) {
		self.stop.notify_waiters();
	}
}

/// Periodic recursive scan fallback, with budgeted coarse-mtime compensation.
pub struct Poller {
	side: Side,
	task_id: u64,
	store: Arc<Store>,
	last_seen: HashMap<String, FileMeta>,
	ticks: u32,
}

impl Poller {
	pub fn new(side: Side, task_id: u64, store: Arc<Store>) -> Self {
		Poller { side, task_id, store, last_seen: HashMap::new(), ticks: 0 }
	}

	/// One scan: diff against the previous tick's snapshot, emit RawEvents
	/// for additions/removals/changes, and spend a bounded hash budget on
	/// files whose `(size, mtime)` look unchanged but whose counterpart side
	/// disagrees in the state store (§4.6).
	pub async fn poll_once(
		&mut self,
		endpoint: &RemoteEndpoint,
		budget: HashBudget,
		tx: &EventSender,
	) -> Result<(), crate::error::SyncError> {
		let started = std::time::Instant::now();
		let current = endpoint.iterate().await?;
		let current_map: HashMap<String, FileMeta> = current.into_iter().collect();

		let mut missing = 0u32;
		let mut hashes_spent = 0u32;

		for (rel_path, meta) in &current_map {
			match self.last_seen.get(rel_path) {
				None => {
					tx_send(tx, rel_path, None, EventKind::Created);
				}
				Some(prev) => {
					if prev.size != meta.size || prev.mtime != meta.mtime {
						tx_send(tx, rel_path, None, EventKind::Modified);
					} else if hashes_spent < budget.max_hashes && meta.size <= budget.max_file_bytes {
						if self.needs_compensation(rel_path).await? {
							hashes_spent += 1;
							tx_send(tx, rel_path, None, EventKind::Modified);
						}
					}
				}
			}
		}

		for rel_path in self.last_seen.keys() {
			if !current_map.contains_key(rel_path) {
				missing += 1;
				tx_send(tx, rel_path, None, EventKind::Deleted);
			}
		}

		self.last_seen = current_map;
		self.ticks += 1;

		if self.ticks % HEARTBEAT_EVERY_TICKS == 0 {
			info!(
				scanned = self.last_seen.len(),
				missing, cost_ms = started.elapsed().as_millis() as u64,
				"remote poller heartbeat"
			);
		}

		Ok(())
	}

	/// True if the counterpart side's recorded meta disagrees with ours,
	/// i.e. we should spend budget to hash-compare even though size/mtime
	/// look unchanged. `Store` transactions are synchronous, so this needs
	/// no `.await` of its own.
	async fn needs_compensation(&self, rel_path: &str) -> Result<bool, crate::error::SyncError> {
		let row = self.store.get_file_state(self.task_id, rel_path)?;
		let Some(row) = row else { return Ok(false) };
		let ours = row.meta(self.side);
		let theirs = row.meta(self.side.other());
		Ok(match (ours, theirs) {
			(Some(a), Some(b)) => a.hash.is_some() && b.hash.is_some() && a.hash != b.hash,
			_ => false,
		})
	}
}

fn tx_send(tx: &EventSender, rel_path: &str, dest: Option<String>, kind: EventKind) {
	let _ = tx.send(RawEvent { rel_path: rel_path.to_string(), dest_rel_path: dest, kind });
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_notify_line_splits_compound_events() {
		let events = parse_notify_line("a/b.txt|close-write,modify");
		assert_eq!(events.len(), 2);
		assert!(events.iter().all(|e| e.rel_path == "a/b.txt"));
		assert_eq!(events[0].kind, EventKind::Modified);
	}

	#[test]
	fn parse_notify_line_maps_move_from_to_deleted() {
		let events = parse_notify_line("old.txt|move-from");
		assert_eq!(events[0].kind, EventKind::Deleted);
	}

	#[test]
	fn parse_notify_line_maps_move_to_to_created() {
		let events = parse_notify_line("new.txt|move-to");
		assert_eq!(events[0].kind, EventKind::Created);
	}

	#[test]
	fn malformed_line_yields_no_events() {
		assert!(parse_notify_line("no-pipe-here").is_empty());
	}
}

// vim: ts=4
