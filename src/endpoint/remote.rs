//! Remote endpoint: drives a [`RemoteTransport`] session to perform the same
//! operation set as [`super::local::LocalEndpoint`] against a directory tree
//! on the far side of an SSH-spawned session.

use crate::error::{SyncError, TransportError};
use crate::filter::PathFilter;
use crate::transport::RemoteTransport;
use crate::types::{EolPolicy, FileMeta, HashAlgo};
use std::path::Path;
use std::sync::Arc;

pub struct RemoteEndpoint {
	pub transport: Arc<RemoteTransport>,
	pub root: String,
	pub filter: PathFilter,
	pub eol_policy: EolPolicy,
	pub hash_algo: HashAlgo,
	pub trash_dir: String,
	pub backup_dir: String,
}

impl RemoteEndpoint {
	pub fn new(
		transport: Arc<RemoteTransport>,
		root: impl Into<String>,
		filter: PathFilter,
		eol_policy: EolPolicy,
		hash_algo: HashAlgo,
	) -> Self {
		RemoteEndpoint {
			transport,
			root: root.into(),
			filter,
			eol_policy,
			hash_algo,
			trash_dir: ".tongbu_trash".to_string(),
			backup_dir: ".tongbu_backup".to_string(),
		}
	}

	pub fn with_dirs(mut self, trash_dir: String, backup_dir: String) -> Self {
		self.trash_dir = trash_dir;
		self.backup_dir = backup_dir;
		self
	}

	fn map_err(&self, e: TransportError) -> SyncError {
		match e {
			TransportError::Disconnected => {
				SyncError::RemoteDisconnected { endpoint: self.transport.host().to_string() }
			}
			TransportError::HostKeyUnknown { host, fingerprint } => SyncError::HostKeyUnknown { host, fingerprint },
			other => SyncError::Transport(other),
		}
	}

	fn rel_join(parent: &str, name: &str) -> String {
		if parent.is_empty() {
			name.to_string()
		} else {
			format!("{}/{}", parent, name)
		}
	}

	/// Iterative, explicit-stack recursive listing (§4.4), one non-recursive
	/// `List` request per directory so a huge tree is never materialized at once.
	pub async fn iterate(&self) -> Result<Vec<(String, FileMeta)>, SyncError> {
		let mut out = Vec::new();
		let mut stack = vec![String::new()];

		while let Some(dir) = stack.pop() {
			let entries = self.transport.list(&dir).await.map_err(|e| self.map_err(e))?;
			for entry in entries {
				let rel_path = Self::rel_join(&dir, &entry.rel_path);
				if self.filter.is_excluded(Path::new(&rel_path)) {
					continue;
				}
				if entry.is_dir {
					stack.push(rel_path);
				} else {
					out.push((rel_path, FileMeta { size: entry.size, mtime: entry.mtime, hash: None }));
				}
			}
		}

		Ok(out)
	}

	pub async fn stat(&self, rel_path: &str) -> Result<Option<FileMeta>, SyncError> {
		let entry = self.transport.stat(rel_path).await.map_err(|e| self.map_err(e))?;
		Ok(entry.map(|e| FileMeta { size: e.size, mtime: e.mtime, hash: None }))
	}

	pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>, SyncError> {
		self.transport.read(rel_path).await.map_err(|e| self.map_err(e))
	}

	pub async fn write(&self, rel_path: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
		let mtime = crate::types::now_secs();
		self.transport.write(rel_path, bytes, mtime).await.map_err(|e| self.map_err(e))
	}

	/// Optimization for when the caller already has the bytes on the local
	/// disk: avoids an intermediate copy into a buffer held by the caller.
	pub async fn upload(&self, local_abs: &Path, rel_path: &str) -> Result<(), SyncError> {
		let bytes = tokio::fs::read(local_abs).await.map_err(SyncError::from)?;
		self.write(rel_path, bytes).await
	}

	pub async fn download(&self, rel_path: &str, local_abs: &Path) -> Result<(), SyncError> {
		let bytes = self.read(rel_path).await?;
		if let Some(parent) = local_abs.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
		}
		tokio::fs::write(local_abs, bytes).await.map_err(Into::into)
	}

	/// Unconditional delete, used by the one-way syncer's target cleanup
	/// (§4.9) — unlike two-way's `move_to_trash`, there is no tombstone.
	pub async fn remove(&self, rel_path: &str) -> Result<(), SyncError> {
		self.transport.remove(rel_path).await.map_err(|e| self.map_err(e))
	}

	/// The remote protocol has no native rename; a move is a read of the
	/// old path, a write at the new one, then removal of the old path.
	pub async fn rename(&self, from_rel: &str, to_rel: &str) -> Result<(), SyncError> {
		let bytes = self.read(from_rel).await?;
		self.write(to_rel, bytes).await?;
		self.remove(from_rel).await
	}

	pub async fn move_to_trash(&self, rel_path: &str, ts_token: &str) -> Result<(), SyncError> {
		let trash_dir = format!("{}/{}", self.trash_dir, ts_token);
		self.transport.move_to_trash(rel_path, &trash_dir).await.map_err(|e| self.map_err(e))
	}

	pub async fn backup(&self, rel_path: &str, ts_token: &str) -> Result<(), SyncError> {
		let backup_dir = format!("{}/{}", self.backup_dir, ts_token);
		self.transport.backup(rel_path, &backup_dir).await.map_err(|e| self.map_err(e))
	}

	pub async fn cleanup(&self, trash_days: u32, backup_days: u32) -> Result<(), SyncError> {
		self.transport.cleanup(&self.trash_dir, trash_days).await.map_err(|e| self.map_err(e))?;
		self.transport.cleanup(&self.backup_dir, backup_days).await.map_err(|e| self.map_err(e))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rel_join_handles_root_and_nested() {
		assert_eq!(RemoteEndpoint::rel_join("", "a.txt"), "a.txt");
		assert_eq!(RemoteEndpoint::rel_join("sub", "a.txt"), "sub/a.txt");
	}
}

// vim: ts=4
