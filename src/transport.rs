//! Remote Transport (C4): the `ssh`-spawned child process session an
//! `endpoint::remote::RemoteEndpoint` drives, and the framed request/response
//! protocol it speaks to the same binary running `tongbu serve-remote` on the
//! far side.

use crate::error::TransportError;
use crate::logging::*;
use crate::types::HostKeyPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Notify};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Remote-connection knobs threaded down from [`crate::config::Config`],
/// grouped since every caller that needs one needs all three.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
	/// Name of the binary exec'd on the remote side.
	pub bin: String,
	pub host_key_policy: HostKeyPolicy,
	/// Passed to `ssh` as `UserKnownHostsFile`.
	pub known_hosts_path: PathBuf,
}

/// One entry returned by a remote directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
	pub rel_path: String,
	pub is_dir: bool,
	pub size: u64,
	pub mtime: f64,
}

/// A request frame sent to the remote `serve-remote` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteRequest {
	Stat { rel_path: String },
	Read { rel_path: String },
	Write { rel_path: String, data: Vec<u8>, mtime: f64 },
	List { rel_path: String },
	Remove { rel_path: String },
	MoveToTrash { rel_path: String, trash_dir: String },
	Backup { rel_path: String, backup_dir: String },
	Cleanup { dir_name: String, retention_days: u32 },
	/// Probe whether a named helper binary is on the remote `$PATH`, used by
	/// the Remote Watcher (§4.6) to decide kernel-notification vs poll mode.
	ProbeHelper { name: String },
	Ping,
}

/// A response frame from the remote `serve-remote` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteResponse {
	Stat(Option<RemoteEntry>),
	Read(Vec<u8>),
	Entries(Vec<RemoteEntry>),
	Ok,
	Probe(bool),
	Err { kind: String, message: String },
}

fn to_transport_error(e: impl std::error::Error + Send + Sync + 'static) -> TransportError {
	TransportError::ProtocolError { message: e.to_string() }
}

/// A live session to one remote host. All request/response pairs are
/// serialized through a single mutex: the underlying pipe is a single
/// request-at-a-time channel, mirroring the teacher's connection handle
/// (one `ChildStdin`/`ChildStdout` pair per node, no multiplexing).
pub struct RemoteTransport {
	host: String,
	remote_path: String,
	bin: String,
	host_key_policy: HostKeyPolicy,
	known_hosts_path: PathBuf,
	inner: Mutex<Option<Session>>,
	stop: Notify,
}

struct Session {
	child: Child,
	stdin: ChildStdin,
	stdout: BufReader<ChildStdout>,
}

impl RemoteTransport {
	pub fn new(host: impl Into<String>, remote_path: impl Into<String>, opts: &RemoteOptions) -> Self {
		RemoteTransport {
			host: host.into(),
			remote_path: remote_path.into(),
			bin: opts.bin.clone(),
			host_key_policy: opts.host_key_policy,
			known_hosts_path: opts.known_hosts_path.clone(),
			inner: Mutex::new(None),
			stop: Notify::new(),
		}
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	/// OpenSSH client flags for the configured host-key policy (§4.4), mirroring
	/// paramiko's `AutoAddPolicy`/`RejectPolicy`/`WarningPolicy` trio: `auto` and
	/// `warn` both accept-and-persist newly seen keys (ssh itself appends to
	/// `UserKnownHostsFile` under `accept-new`), `reject` never does.
	fn strict_host_key_checking(&self) -> &'static str {
		match self.host_key_policy {
			HostKeyPolicy::Reject => "yes",
			HostKeyPolicy::Auto | HostKeyPolicy::Warn => "accept-new",
		}
	}

	async fn spawn(&self) -> Result<Session, TransportError> {
		if let Some(parent) = self.known_hosts_path.parent() {
			let _ = tokio::fs::create_dir_all(parent).await;
		}
		if matches!(self.host_key_policy, HostKeyPolicy::Warn) {
			warn!(host = %self.host, "host-key policy is 'warn': accepting new keys without strict verification");
		}

		let strict = self.strict_host_key_checking();
		let known_hosts = self.known_hosts_path.display().to_string();
		let cmd_desc = format!("ssh {} {} serve-remote {}", self.host, self.bin, self.remote_path);
		let mut child = Command::new("ssh")
			.arg("-o")
			.arg(format!("StrictHostKeyChecking={}", strict))
			.arg("-o")
			.arg(format!("UserKnownHostsFile={}", known_hosts))
			.arg(&self.host)
			.arg(&self.bin)
			.arg("serve-remote")
			.arg(&self.remote_path)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|e| TransportError::SpawnFailed { cmd: cmd_desc, source: e })?;

		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| TransportError::ProtocolError { message: "missing child stdin".into() })?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| TransportError::ProtocolError { message: "missing child stdout".into() })?;
		let stderr = child
			.stderr
			.take()
			.ok_or_else(|| TransportError::ProtocolError { message: "missing child stderr".into() })?;

		let mut session = Session { child, stdin, stdout: BufReader::new(stdout) };

		let connect = tokio::time::timeout(CONNECT_TIMEOUT, send_recv(&mut session, &RemoteRequest::Ping)).await;
		match connect {
			Ok(Ok(_)) => {}
			Ok(Err(e)) => {
				let cause = TransportError::ConnectFailed { host: self.host.clone(), source: Box::new(e) };
				return Err(self.classify_connect_failure(stderr, cause).await);
			}
			Err(_) => return Err(TransportError::Timeout { op: "connect".into() }),
		}

		info!(host = %self.host, "remote transport connected");
		Ok(session)
	}

	/// `ssh` writes a human-readable refusal to stderr and exits before our
	/// framed protocol ever starts; distinguish that case from an ordinary
	/// connect failure so callers see `HostKeyUnknown` instead of a generic
	/// protocol error.
	async fn classify_connect_failure(&self, mut stderr: ChildStderr, cause: TransportError) -> TransportError {
		let mut buf = String::new();
		let _ = tokio::time::timeout(Duration::from_millis(200), stderr.read_to_string(&mut buf)).await;
		if buf.contains("Host key verification failed") || buf.contains("REMOTE HOST IDENTIFICATION HAS CHANGED") {
			let fingerprint = buf
				.split_whitespace()
				.find(|w| w.starts_with("SHA256:"))
				.unwrap_or("unknown")
				.trim_end_matches('.')
				.to_string();
			TransportError::HostKeyUnknown { host: self.host.clone(), fingerprint }
		} else {
			cause
		}
	}

	/// Ensure a live session exists, (re)connecting if it's missing or dead.
	async fn ensure_connected<'a>(
		&'a self,
		guard: &mut tokio::sync::MutexGuard<'a, Option<Session>>,
	) -> Result<(), TransportError> {
		let needs_reconnect = match guard.as_mut() {
			Some(session) => session.child.try_wait().ok().flatten().is_some(),
			None => true,
		};
		if needs_reconnect {
			warn!(host = %self.host, "(re)connecting remote transport");
			let session = tokio::time::timeout(RECONNECT_TIMEOUT, self.spawn())
				.await
				.map_err(|_| TransportError::Timeout { op: "reconnect".into() })??;
			**guard = Some(session);
		}
		Ok(())
	}

	async fn call(&self, req: RemoteRequest) -> Result<RemoteResponse, TransportError> {
		let mut guard = self.inner.lock().await;
		self.ensure_connected(&mut guard).await?;
		let session = guard.as_mut().expect("just ensured connected");

		match tokio::time::timeout(REQUEST_TIMEOUT, send_recv(session, &req)).await {
			Ok(Ok(resp)) => Ok(resp),
			Ok(Err(e)) => {
				*guard = None;
				Err(e)
			}
			Err(_) => {
				*guard = None;
				Err(TransportError::Timeout { op: format!("{:?}", req) })
			}
		}
	}

	/// Spawn the session's 30s keep-alive loop (§4.4), translating the
	/// Python original's `transport.set_keepalive(30)`: since the session here
	/// is a plain `ssh` child process rather than a raw transport handle, the
	/// equivalent is an application-level `Ping` sent through the same `call`
	/// path real requests use. Runs until `disconnect` or the `Arc` is dropped.
	pub fn spawn_keepalive(self: &Arc<Self>) {
		let transport = self.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = transport.stop.notified() => return,
					_ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {}
				}
				if let Err(e) = transport.call(RemoteRequest::Ping).await {
					warn!(host = %transport.host, error = %e, "keep-alive ping failed");
				}
			}
		});
	}

	pub async fn stat(&self, rel_path: &str) -> Result<Option<RemoteEntry>, TransportError> {
		match self.call(RemoteRequest::Stat { rel_path: rel_path.into() }).await? {
			RemoteResponse::Stat(entry) => Ok(entry),
			resp => Err(unexpected(resp)),
		}
	}

	pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>, TransportError> {
		match self.call(RemoteRequest::Read { rel_path: rel_path.into() }).await? {
			RemoteResponse::Read(bytes) => Ok(bytes),
			resp => Err(unexpected(resp)),
		}
	}

	pub async fn write(&self, rel_path: &str, data: Vec<u8>, mtime: f64) -> Result<(), TransportError> {
		match self.call(RemoteRequest::Write { rel_path: rel_path.into(), data, mtime }).await? {
			RemoteResponse::Ok => Ok(()),
			resp => Err(unexpected(resp)),
		}
	}

	pub async fn list(&self, rel_path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
		match self.call(RemoteRequest::List { rel_path: rel_path.into() }).await? {
			RemoteResponse::Entries(entries) => Ok(entries),
			resp => Err(unexpected(resp)),
		}
	}

	pub async fn remove(&self, rel_path: &str) -> Result<(), TransportError> {
		match self.call(RemoteRequest::Remove { rel_path: rel_path.into() }).await? {
			RemoteResponse::Ok => Ok(()),
			resp => Err(unexpected(resp)),
		}
	}

	pub async fn move_to_trash(&self, rel_path: &str, trash_dir: &str) -> Result<(), TransportError> {
		match self
			.call(RemoteRequest::MoveToTrash { rel_path: rel_path.into(), trash_dir: trash_dir.into() })
			.await?
		{
			RemoteResponse::Ok => Ok(()),
			resp => Err(unexpected(resp)),
		}
	}

	pub async fn backup(&self, rel_path: &str, backup_dir: &str) -> Result<(), TransportError> {
		match self
			.call(RemoteRequest::Backup { rel_path: rel_path.into(), backup_dir: backup_dir.into() })
			.await?
		{
			RemoteResponse::Ok => Ok(()),
			resp => Err(unexpected(resp)),
		}
	}

	pub async fn cleanup(&self, dir_name: &str, retention_days: u32) -> Result<(), TransportError> {
		match self.call(RemoteRequest::Cleanup { dir_name: dir_name.into(), retention_days }).await? {
			RemoteResponse::Ok => Ok(()),
			resp => Err(unexpected(resp)),
		}
	}

	/// Probe whether a helper binary (e.g. a kernel-notification CLI) is on
	/// the remote `$PATH`, consulted once at Remote Watcher startup (§4.6).
	pub async fn probe_helper(&self, name: &str) -> Result<bool, TransportError> {
		match self.call(RemoteRequest::ProbeHelper { name: name.into() }).await? {
			RemoteResponse::Probe(found) => Ok(found),
			resp => Err(unexpected(resp)),
		}
	}

	/// Tear down the child process, if any, for a clean shutdown.
	pub async fn disconnect(&self) {
		self.stop.notify_waiters();
		let mut guard = self.inner.lock().await;
		if let Some(mut session) = guard.take() {
			let _ = session.stdin.shutdown().await;
			let _ = session.child.kill().await;
		}
	}
}

fn unexpected(resp: RemoteResponse) -> TransportError {
	match resp {
		RemoteResponse::Err { kind, message } => TransportError::ProtocolError {
			message: format!("remote returned {}: {}", kind, message),
		},
		other => TransportError::ProtocolError { message: format!("unexpected response: {:?}", other) },
	}
}

async fn send_recv(session: &mut Session, req: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
	let mut line = serde_json::to_string(req).map_err(to_transport_error)?;
	line.push('\n');
	session.stdin.write_all(line.as_bytes()).await?;
	session.stdin.flush().await?;

	let mut reply = String::new();
	let n = session.stdout.read_line(&mut reply).await?;
	if n == 0 {
		return Err(TransportError::Disconnected);
	}
	serde_json::from_str(reply.trim_end()).map_err(to_transport_error)
}

/// Absolute path on the remote side, relative to the session's root.
pub fn remote_abs(root: &str, rel_path: &str) -> PathBuf {
	PathBuf::from(root).join(rel_path)
}


// vim: ts=4
