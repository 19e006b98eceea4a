//! Error types for the sync engine

use std::error::Error;
use std::fmt;
use std::io;

/// Helper function to reduce `Box::new()` boilerplate when wrapping errors
/// into `Box<dyn Error + Send + Sync>` for error variant fields.
#[inline]
pub fn boxed_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
	Box::new(e)
}

/// Unified error type for sync operations.
///
/// Carries the error kinds named in the core's error handling design
/// (`NotFound`, `PermissionDenied`, `IoFailed`, `RemoteDisconnected`,
/// `HostKeyUnknown`, `ConfigInvalid`, `AbortedByUser`) plus nested
/// domain-specific errors for the transport and state-store layers.
#[derive(Debug)]
pub enum SyncError {
	/// stat/read found no such path; treated as deletion evidence by the reconciler.
	NotFound { path: String },

	/// Filesystem ACL or remote EACCES denied an operation.
	PermissionDenied { path: String },

	/// Unexpected short read/write, disk full, or similar.
	IoFailed { source: io::Error },

	/// Remote transport is dead; the caller may retry after reconnect.
	RemoteDisconnected { endpoint: String },

	/// Strict host-key policy rejected an unknown key.
	HostKeyUnknown { host: String, fingerprint: String },

	/// Task configuration is invalid (e.g. missing endpoints for two-way mode).
	ConfigInvalid { message: String },

	/// A stop signal interrupted the operation; not a failure.
	AbortedByUser,

	/// Transport-layer error (connect/handshake/protocol).
	Transport(TransportError),

	/// State-store error (load/save/lock/corruption).
	State(StateError),

	/// Reconciliation failed mid-decision for a specific path.
	Reconcile(ReconcileError),

	/// Operation unsupported by this endpoint variant.
	Unsupported { what: String },

	/// Generic error message, used sparingly at the boundaries.
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::NotFound { path } => write!(f, "not found: {}", path),
			SyncError::PermissionDenied { path } => write!(f, "permission denied: {}", path),
			SyncError::IoFailed { source } => write!(f, "I/O failed: {}", source),
			SyncError::RemoteDisconnected { endpoint } => {
				write!(f, "remote endpoint disconnected: {}", endpoint)
			}
			SyncError::HostKeyUnknown { host, fingerprint } => {
				write!(f, "unknown host key for {}: {}", host, fingerprint)
			}
			SyncError::ConfigInvalid { message } => write!(f, "invalid configuration: {}", message),
			SyncError::AbortedByUser => write!(f, "aborted by user"),
			SyncError::Transport(e) => write!(f, "transport error: {}", e),
			SyncError::State(e) => write!(f, "state store error: {}", e),
			SyncError::Reconcile(e) => write!(f, "reconciliation error: {}", e),
			SyncError::Unsupported { what } => write!(f, "unsupported: {}", what),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		match e.kind() {
			io::ErrorKind::NotFound => SyncError::NotFound { path: e.to_string() },
			io::ErrorKind::PermissionDenied => SyncError::PermissionDenied { path: e.to_string() },
			_ => SyncError::IoFailed { source: e },
		}
	}
}

impl From<TransportError> for SyncError {
	fn from(e: TransportError) -> Self {
		match e {
			TransportError::HostKeyUnknown { host, fingerprint } => SyncError::HostKeyUnknown { host, fingerprint },
			other => SyncError::Transport(other),
		}
	}
}

impl From<StateError> for SyncError {
	fn from(e: StateError) -> Self {
		SyncError::State(e)
	}
}

impl From<ReconcileError> for SyncError {
	fn from(e: ReconcileError) -> Self {
		SyncError::Reconcile(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

/// Remote transport errors (C4).
#[derive(Debug)]
pub enum TransportError {
	/// Failed to spawn the `ssh` child process.
	SpawnFailed { cmd: String, source: io::Error },

	/// SSH/handshake failed to establish a session.
	ConnectFailed { host: String, source: Box<dyn Error + Send + Sync> },

	/// The child process exited unexpectedly.
	Disconnected,

	/// A framed request/response failed to parse.
	ProtocolError { message: String },

	/// An operation exceeded its timeout.
	Timeout { op: String },

	/// The remote host presented an unrecognized key under a strict policy.
	HostKeyUnknown { host: String, fingerprint: String },
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::SpawnFailed { cmd, source } => {
				write!(f, "failed to spawn '{}': {}", cmd, source)
			}
			TransportError::ConnectFailed { host, source } => {
				write!(f, "failed to connect to {}: {}", host, source)
			}
			TransportError::Disconnected => write!(f, "connection disconnected unexpectedly"),
			TransportError::ProtocolError { message } => write!(f, "protocol error: {}", message),
			TransportError::Timeout { op } => write!(f, "timeout during {}", op),
			TransportError::HostKeyUnknown { host, fingerprint } => {
				write!(f, "unknown host key for {}: {}", host, fingerprint)
			}
		}
	}
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::ConnectFailed { host: String::new(), source: boxed_error(e) }
	}
}

/// State-store errors (C7).
#[derive(Debug)]
pub enum StateError {
	LoadFailed { source: Box<dyn Error + Send + Sync> },
	SaveFailed { source: Box<dyn Error + Send + Sync> },
	LockFailed { message: String },
	Corrupted { message: String },
	InvalidDirectory { path: String },
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StateError::LoadFailed { source } => write!(f, "failed to load state: {}", source),
			StateError::SaveFailed { source } => write!(f, "failed to save state: {}", source),
			StateError::LockFailed { message } => write!(f, "lock failed: {}", message),
			StateError::Corrupted { message } => write!(f, "state corrupted: {}", message),
			StateError::InvalidDirectory { path } => write!(f, "invalid state directory: {}", path),
		}
	}
}

impl Error for StateError {}

/// Reconciliation errors, carrying enough context for a `sync_logs` row.
#[derive(Debug)]
pub struct ReconcileError {
	pub rel_path: String,
	pub cause: Box<dyn Error + Send + Sync>,
}

impl fmt::Display for ReconcileError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "reconciling '{}': {}", self.rel_path, self.cause)
	}
}

impl Error for ReconcileError {}

impl ReconcileError {
	pub fn new(rel_path: impl Into<String>, cause: impl Error + Send + Sync + 'static) -> Self {
		ReconcileError { rel_path: rel_path.into(), cause: boxed_error(cause) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn not_found_displays_path() {
		let e = SyncError::NotFound { path: "a/b.txt".into() };
		assert_eq!(e.to_string(), "not found: a/b.txt");
	}

	#[test]
	fn io_error_not_found_maps_to_not_found_variant() {
		let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
		let e: SyncError = io_err.into();
		assert!(matches!(e, SyncError::NotFound { .. }));
	}

	#[test]
	fn io_error_permission_denied_maps_variant() {
		let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "no");
		let e: SyncError = io_err.into();
		assert!(matches!(e, SyncError::PermissionDenied { .. }));
	}

	#[test]
	fn io_error_other_kind_maps_to_io_failed() {
		let io_err = io::Error::new(io::ErrorKind::Other, "boom");
		let e: SyncError = io_err.into();
		assert!(matches!(e, SyncError::IoFailed { .. }));
	}

	#[test]
	fn reconcile_error_wraps_cause() {
		let cause = io::Error::new(io::ErrorKind::Other, "disk full");
		let e = ReconcileError::new("x/y.txt", cause);
		assert!(e.to_string().contains("x/y.txt"));
		assert!(e.to_string().contains("disk full"));
	}

	#[test]
	fn transport_error_converts_into_sync_error() {
		let te = TransportError::Disconnected;
		let e: SyncError = te.into();
		assert!(matches!(e, SyncError::Transport(TransportError::Disconnected)));
	}
}

// vim: ts=4
