//! Remote-side subcommands: `serve-remote` answers the framed
//! stat/read/write/list/trash/backup/cleanup protocol a `RemoteTransport`
//! speaks over this process's stdin/stdout; `notify-stream` turns a local
//! `notify` subscription into the `path|events` lines a `SubscriptionWatcher`
//! reads over its own SSH channel.
//!
//! Both write protocol data to stdout and nothing else — all logging here
//! goes to stderr (`logging::init_tracing`) so it never desyncs the framed
//! stream the parent side is parsing line by line.

use crate::error::SyncError;
use crate::logging::*;
use crate::transport::{RemoteEntry, RemoteRequest, RemoteResponse};
use crate::types::parse_ts_token;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn abs(root: &Path, rel_path: &str) -> PathBuf {
	root.join(rel_path)
}

async fn handle(root: &Path, req: RemoteRequest) -> RemoteResponse {
	match dispatch(root, req).await {
		Ok(resp) => resp,
		Err(e) => RemoteResponse::Err { kind: kind_of(&e), message: e.to_string() },
	}
}

fn kind_of(e: &SyncError) -> String {
	match e {
		SyncError::NotFound { .. } => "not_found",
		SyncError::PermissionDenied { .. } => "permission_denied",
		SyncError::IoFailed { .. } => "io_failed",
		_ => "error",
	}
	.to_string()
}

async fn dispatch(root: &Path, req: RemoteRequest) -> Result<RemoteResponse, SyncError> {
	match req {
		RemoteRequest::Ping => Ok(RemoteResponse::Ok),

		RemoteRequest::Stat { rel_path } => {
			let path = abs(root, &rel_path);
			match tokio::fs::metadata(&path).await {
				Ok(md) => Ok(RemoteResponse::Stat(Some(entry_of(&rel_path, &md)?))),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RemoteResponse::Stat(None)),
				Err(e) => Err(e.into()),
			}
		}

		RemoteRequest::Read { rel_path } => {
			let bytes = tokio::fs::read(abs(root, &rel_path)).await.map_err(SyncError::from)?;
			Ok(RemoteResponse::Read(bytes))
		}

		RemoteRequest::Write { rel_path, data, mtime } => {
			let dest = abs(root, &rel_path);
			if let Some(parent) = dest.parent() {
				tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
			}
			tokio::fs::write(&dest, &data).await.map_err(SyncError::from)?;
			set_mtime(&dest, mtime).await;
			Ok(RemoteResponse::Ok)
		}

		RemoteRequest::List { rel_path } => {
			let dir = abs(root, &rel_path);
			let mut out = Vec::new();
			let mut entries = match tokio::fs::read_dir(&dir).await {
				Ok(e) => e,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					return Ok(RemoteResponse::Entries(out));
				}
				Err(e) => return Err(e.into()),
			};
			while let Some(entry) = entries.next_entry().await.map_err(SyncError::from)? {
				let name = entry.file_name().to_string_lossy().to_string();
				let md = entry.metadata().await.map_err(SyncError::from)?;
				out.push(entry_of(&name, &md)?);
			}
			Ok(RemoteResponse::Entries(out))
		}

		RemoteRequest::Remove { rel_path } => {
			match tokio::fs::remove_file(abs(root, &rel_path)).await {
				Ok(()) => {}
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
				Err(e) => return Err(e.into()),
			}
			Ok(RemoteResponse::Ok)
		}

		// `trash_dir`/`backup_dir` already carry the composed "<dir>/<token>"
		// subpath (§4.3); this side just relocates/copies under it.
		RemoteRequest::MoveToTrash { rel_path, trash_dir } => {
			relocate(root, &rel_path, &root.join(&trash_dir).join(&rel_path)).await?;
			Ok(RemoteResponse::Ok)
		}

		RemoteRequest::Backup { rel_path, backup_dir } => {
			let dest = root.join(&backup_dir).join(&rel_path);
			if let Some(parent) = dest.parent() {
				tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
			}
			tokio::fs::copy(abs(root, &rel_path), &dest).await.map_err(SyncError::from)?;
			Ok(RemoteResponse::Ok)
		}

		RemoteRequest::Cleanup { dir_name, retention_days } => {
			cleanup_dir(root, &dir_name, retention_days).await?;
			Ok(RemoteResponse::Ok)
		}

		RemoteRequest::ProbeHelper { name } => Ok(RemoteResponse::Probe(which(&name).await)),
	}
}

fn entry_of(rel_path: &str, md: &std::fs::Metadata) -> Result<RemoteEntry, SyncError> {
	let mtime = md.modified().map_err(SyncError::from)?;
	let mtime_secs = mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
	Ok(RemoteEntry { rel_path: rel_path.to_string(), is_dir: md.is_dir(), size: md.len(), mtime: mtime_secs })
}

async fn set_mtime(path: &Path, mtime: f64) {
	let path = path.to_path_buf();
	let _ = tokio::task::spawn_blocking(move || {
		let target = UNIX_EPOCH + Duration::from_secs_f64(mtime.max(0.0));
		let ft = filetime::FileTime::from_system_time(target);
		filetime::set_file_mtime(&path, ft)
	})
	.await;
}

fn is_cross_device(e: &std::io::Error) -> bool {
	e.raw_os_error() == Some(libc::EXDEV)
}

/// Atomic rename first, falling back to copy+remove across filesystem
/// boundaries, matching `LocalEndpoint`'s relocate discipline (§4.3).
async fn relocate(root: &Path, rel_path: &str, dest: &Path) -> Result<(), SyncError> {
	let src = abs(root, rel_path);
	if let Some(parent) = dest.parent() {
		tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
	}
	match tokio::fs::rename(&src, dest).await {
		Ok(()) => Ok(()),
		Err(e) if is_cross_device(&e) => {
			tokio::fs::copy(&src, dest).await.map_err(SyncError::from)?;
			tokio::fs::remove_file(&src).await.map_err(SyncError::from)?;
			Ok(())
		}
		Err(e) => Err(e.into()),
	}
}

/// Delete `<dir_name>/<token>/...` roots older than `retention_days`, falling
/// back to directory mtime when the token doesn't parse (§4.3/§6).
async fn cleanup_dir(root: &Path, dir_name: &str, retention_days: u32) -> Result<(), SyncError> {
	let base = root.join(dir_name);
	let mut entries = match tokio::fs::read_dir(&base).await {
		Ok(e) => e,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e.into()),
	};

	let cutoff = SystemTime::now()
		.checked_sub(Duration::from_secs(retention_days as u64 * 86_400))
		.unwrap_or(UNIX_EPOCH);

	while let Some(entry) = entries.next_entry().await.map_err(SyncError::from)? {
		let name = entry.file_name().to_string_lossy().to_string();
		let aged = match parse_ts_token(&name) {
			Some(epoch) => UNIX_EPOCH + Duration::from_secs_f64(epoch.max(0.0)) < cutoff,
			None => match entry.metadata().await.ok().and_then(|m| m.modified().ok()) {
				Some(mtime) => mtime < cutoff,
				None => false,
			},
		};
		if aged {
			let path = entry.path();
			if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
				let _ = tokio::fs::remove_dir_all(&path).await;
			} else {
				let _ = tokio::fs::remove_file(&path).await;
			}
		}
	}
	Ok(())
}

async fn which(name: &str) -> bool {
	let name = name.to_string();
	tokio::task::spawn_blocking(move || {
		std::env::var_os("PATH")
			.map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(&name).is_file()))
			.unwrap_or(false)
	})
	.await
	.unwrap_or(false)
}

/// `tongbu serve-remote <root>`: read one JSON `RemoteRequest` per line from
/// stdin, answer with one JSON `RemoteResponse` per line on stdout, until EOF.
pub async fn serve_remote(root: PathBuf) -> Result<(), SyncError> {
	info!(root = %root.display(), "serve-remote listening on stdin/stdout");
	let stdin = tokio::io::stdin();
	let mut lines = BufReader::new(stdin).lines();
	let mut stdout = tokio::io::stdout();

	while let Some(line) = lines.next_line().await.map_err(SyncError::from)? {
		if line.trim().is_empty() {
			continue;
		}
		let resp = match serde_json::from_str::<RemoteRequest>(&line) {
			Ok(req) => handle(&root, req).await,
			Err(e) => RemoteResponse::Err { kind: "protocol_error".into(), message: e.to_string() },
		};
		let mut encoded = serde_json::to_string(&resp).map_err(|e| SyncError::Other { message: e.to_string() })?;
		encoded.push('\n');
		stdout.write_all(encoded.as_bytes()).await.map_err(SyncError::from)?;
		stdout.flush().await.map_err(SyncError::from)?;
	}
	Ok(())
}

/// `tongbu notify-stream <root>`: print `rel_path|event[,event...]` lines to
/// stdout as the kernel reports filesystem changes under `root`, until the
/// process is killed. Consumed by [`crate::watch::remote::SubscriptionWatcher`].
pub async fn notify_stream(root: PathBuf) -> Result<(), SyncError> {
	use notify::{Event, RecursiveMode, Watcher};
	use std::sync::mpsc::channel;

	let (tx, rx) = channel::<notify::Result<Event>>();
	let mut watcher = notify::recommended_watcher(move |res| {
		let _ = tx.send(res);
	})
	.map_err(|e| SyncError::Other { message: e.to_string() })?;
	watcher.watch(&root, RecursiveMode::Recursive).map_err(|e| SyncError::Other { message: e.to_string() })?;

	info!(root = %root.display(), "notify-stream watching");
	let stdout = std::io::stdout();

	loop {
		let event = match tokio::task::block_in_place(|| rx.recv()) {
			Ok(Ok(e)) => e,
			Ok(Err(e)) => {
				warn!(error = %e, "notify-stream watch error");
				continue;
			}
			Err(_) => break,
		};

		let Some((rel, token)) = line_for(&event, &root) else { continue };
		let mut out = stdout.lock();
		let _ = writeln!(out, "{}|{}", rel, token);
		let _ = out.flush();
	}
	Ok(())
}

fn line_for(event: &notify::Event, root: &Path) -> Option<(String, &'static str)> {
	use notify::event::{ModifyKind, RenameMode};
	use notify::EventKind as NotifyEventKind;

	let rel = |p: &Path| p.strip_prefix(root).ok().map(|r| r.to_string_lossy().replace('\\', "/"));

	match &event.kind {
		NotifyEventKind::Create(_) => event.paths.first().and_then(|p| rel(p)).map(|r| (r, "create")),
		NotifyEventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
			event.paths.first().and_then(|p| rel(p)).map(|r| (r, "move-from"))
		}
		NotifyEventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
			event.paths.first().and_then(|p| rel(p)).map(|r| (r, "move-to"))
		}
		NotifyEventKind::Modify(_) => event.paths.first().and_then(|p| rel(p)).map(|r| (r, "close-write")),
		NotifyEventKind::Remove(_) => event.paths.first().and_then(|p| rel(p)).map(|r| (r, "delete")),
		_ => None,
	}
}


// vim: ts=4
