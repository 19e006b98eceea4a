//! Endpoint (C3): uniform file operations over {Local, Remote}.
//!
//! Per SPEC_FULL §9's design note, this is realized as a capability set
//! dispatched over a tagged enum rather than a trait-object hierarchy: both
//! variants expose the same operation set, and [`Endpoint`] simply matches on
//! which one it holds.

pub mod local;
pub mod remote;

use crate::error::SyncError;
use crate::eol::{self, is_text};
use crate::filter::PathFilter;
use crate::types::{now_secs, EolPolicy, FileMeta, HashAlgo};
use std::path::Path;

pub use local::LocalEndpoint;
pub use remote::RemoteEndpoint;

/// One half of a sync relationship: a rooted file tree plus its access
/// transport, per the GLOSSARY definition.
pub enum Endpoint {
	Local(LocalEndpoint),
	Remote(RemoteEndpoint),
}

impl Endpoint {
	pub fn is_remote(&self) -> bool {
		matches!(self, Endpoint::Remote(_))
	}

	pub fn label(&self) -> String {
		match self {
			Endpoint::Local(ep) => ep.root.display().to_string(),
			Endpoint::Remote(ep) => format!("{}:{}", ep.transport.host(), ep.root),
		}
	}

	/// Enumerate every synchronized `(rel_path, meta)` pair, skipping
	/// filtered paths and internal trash/backup directories.
	pub async fn iterate(&self) -> Result<Vec<(String, FileMeta)>, SyncError> {
		match self {
			Endpoint::Local(ep) => ep.iterate().await,
			Endpoint::Remote(ep) => ep.iterate().await,
		}
	}

	pub async fn stat(&self, rel_path: &str) -> Result<Option<FileMeta>, SyncError> {
		match self {
			Endpoint::Local(ep) => ep.stat(rel_path).await,
			Endpoint::Remote(ep) => ep.stat(rel_path).await,
		}
	}

	pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>, SyncError> {
		match self {
			Endpoint::Local(ep) => ep.read(rel_path).await,
			Endpoint::Remote(ep) => ep.read(rel_path).await,
		}
	}

	/// Write `bytes` to `rel_path`, EOL-normalizing first when the path is
	/// text and the task's policy isn't `keep` (§4.2/§4.8 "winner → loser").
	pub async fn write(&self, rel_path: &str, bytes: &[u8]) -> Result<(), SyncError> {
		let payload = self.normalize_for_write(rel_path, bytes);
		match self {
			Endpoint::Local(ep) => ep.write(rel_path, &payload).await,
			Endpoint::Remote(ep) => ep.write(rel_path, payload).await,
		}
	}

	fn normalize_for_write(&self, rel_path: &str, bytes: &[u8]) -> Vec<u8> {
		let policy = self.eol_policy();
		if matches!(policy, EolPolicy::Keep) || !is_text(Path::new(rel_path), Some(&bytes[..bytes.len().min(8192)])) {
			bytes.to_vec()
		} else {
			eol::normalize(bytes, policy)
		}
	}

	pub async fn copy_in(&self, src_abs: &Path, rel_path: &str) -> Result<(), SyncError> {
		match self {
			Endpoint::Local(ep) => ep.copy_in(src_abs, rel_path).await,
			Endpoint::Remote(ep) => {
				let bytes = tokio::fs::read(src_abs).await.map_err(SyncError::from)?;
				let bytes = self.normalize_for_write(rel_path, &bytes);
				ep.write(rel_path, bytes).await
			}
		}
	}

	/// Unconditional delete with no tombstone, used by the one-way syncer
	/// (§4.9); two-way deletions go through [`Self::move_to_trash`] instead.
	pub async fn remove(&self, rel_path: &str) -> Result<(), SyncError> {
		match self {
			Endpoint::Local(ep) => ep.remove(rel_path).await,
			Endpoint::Remote(ep) => ep.remove(rel_path).await,
		}
	}

	/// Rename in place when the endpoint supports it; otherwise copy the
	/// bytes to the new path and remove the old one (§4.9 "moved" handling).
	pub async fn rename(&self, from_rel: &str, to_rel: &str) -> Result<(), SyncError> {
		match self {
			Endpoint::Local(ep) => ep.rename(from_rel, to_rel).await,
			Endpoint::Remote(ep) => ep.rename(from_rel, to_rel).await,
		}
	}

	/// `Some(local_root)` when this endpoint is local, used by the one-way
	/// syncer to carry over permission bits on a best-effort basis — a
	/// no-op for remote targets, whose protocol doesn't transmit mode bits.
	pub fn local_root(&self) -> Option<&Path> {
		match self {
			Endpoint::Local(ep) => Some(&ep.root),
			Endpoint::Remote(_) => None,
		}
	}

	/// Best-effort: copy `src_abs`'s permission bits onto `rel_path` in this
	/// endpoint, when both the carrier and this endpoint are local and the
	/// platform tracks Unix mode bits. Silently does nothing otherwise.
	pub async fn carry_over_permissions(&self, src_abs: &Path, rel_path: &str) {
		#[cfg(unix)]
		{
			if let Endpoint::Local(ep) = self {
				let _ = ep.copy_permissions_from(src_abs, rel_path).await;
			}
		}
		#[cfg(not(unix))]
		{
			let _ = (src_abs, rel_path);
		}
	}

	pub async fn move_to_trash(&self, rel_path: &str, ts_token: &str) -> Result<(), SyncError> {
		match self {
			Endpoint::Local(ep) => ep.move_to_trash(rel_path, ts_token).await,
			Endpoint::Remote(ep) => ep.move_to_trash(rel_path, ts_token).await,
		}
	}

	pub async fn backup(&self, rel_path: &str, ts_token: &str) -> Result<(), SyncError> {
		match self {
			Endpoint::Local(ep) => ep.backup(rel_path, ts_token).await,
			Endpoint::Remote(ep) => ep.backup(rel_path, ts_token).await,
		}
	}

	pub async fn cleanup(&self, trash_days: u32, backup_days: u32) -> Result<(), SyncError> {
		match self {
			Endpoint::Local(ep) => ep.cleanup(trash_days, backup_days).await,
			Endpoint::Remote(ep) => ep.cleanup(trash_days, backup_days).await,
		}
	}

	pub fn filter(&self) -> &PathFilter {
		match self {
			Endpoint::Local(ep) => &ep.filter,
			Endpoint::Remote(ep) => &ep.filter,
		}
	}

	pub fn eol_policy(&self) -> EolPolicy {
		match self {
			Endpoint::Local(ep) => ep.eol_policy,
			Endpoint::Remote(ep) => ep.eol_policy,
		}
	}

	pub fn hash_algo(&self) -> HashAlgo {
		match self {
			Endpoint::Local(ep) => ep.hash_algo,
			Endpoint::Remote(ep) => ep.hash_algo,
		}
	}

	/// Content hash of `rel_path` as it currently stands, per the task's EOL
	/// policy and hash algorithm.
	pub async fn hash_of(&self, rel_path: &str) -> Result<[u8; 32], SyncError> {
		let bytes = self.read(rel_path).await?;
		Ok(eol::content_hash(Path::new(rel_path), &bytes, self.eol_policy(), self.hash_algo()))
	}

	/// Stat + lazily hash, producing a fully-populated [`FileMeta`].
	pub async fn stat_with_hash(&self, rel_path: &str) -> Result<Option<FileMeta>, SyncError> {
		match self.stat(rel_path).await? {
			None => Ok(None),
			Some(meta) => {
				let hash = self.hash_of(rel_path).await?;
				Ok(Some(meta.with_hash(hash)))
			}
		}
	}
}

/// Fresh timestamp token for a trash/backup directory root, per §6.
pub fn fresh_ts_token() -> String {
	crate::types::ts_token(now_secs())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::filter::PathFilter;
	use tempfile::TempDir;

	fn filter() -> PathFilter {
		PathFilter::new(&[], &[], &[".tongbu_trash".into(), ".tongbu_backup".into()]).unwrap()
	}

	#[tokio::test]
	async fn local_endpoint_write_then_read_roundtrips() {
		let tmp = TempDir::new().unwrap();
		let ep = Endpoint::Local(LocalEndpoint::new(
			tmp.path().to_path_buf(),
			filter(),
			EolPolicy::Lf,
			HashAlgo::Md5,
		));
		ep.write("a/b.txt", b"hello\r\nworld\r\n").await.unwrap();
		let bytes = ep.read("a/b.txt").await.unwrap();
		assert_eq!(bytes, b"hello\nworld\n");
	}

	#[tokio::test]
	async fn stat_with_hash_populates_hash_field() {
		let tmp = TempDir::new().unwrap();
		let ep = Endpoint::Local(LocalEndpoint::new(
			tmp.path().to_path_buf(),
			filter(),
			EolPolicy::Keep,
			HashAlgo::Md5,
		));
		ep.write("a.txt", b"content").await.unwrap();
		let meta = ep.stat_with_hash("a.txt").await.unwrap().unwrap();
		assert!(meta.hash.is_some());
	}
}

// vim: ts=4
