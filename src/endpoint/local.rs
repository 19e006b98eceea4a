//! Local endpoint: direct filesystem operations on a rooted directory tree.

use crate::error::SyncError;
use crate::filter::PathFilter;
use crate::types::{parse_ts_token, EolPolicy, FileMeta, HashAlgo};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct LocalEndpoint {
	pub root: PathBuf,
	pub filter: PathFilter,
	pub eol_policy: EolPolicy,
	pub hash_algo: HashAlgo,
	pub trash_dir: String,
	pub backup_dir: String,
}

impl LocalEndpoint {
	pub fn new(root: PathBuf, filter: PathFilter, eol_policy: EolPolicy, hash_algo: HashAlgo) -> Self {
		LocalEndpoint {
			root,
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

	fn abs(&self, rel_path: &str) -> PathBuf {
		self.root.join(rel_path)
	}

	fn to_rel(&self, abs: &Path) -> Option<String> {
		abs.strip_prefix(&self.root).ok().map(|p| p.to_string_lossy().replace('\\', "/"))
	}

	/// Recursive walk via an explicit stack, matching §4.4's "iterative, not
	/// recursive" enumeration discipline even though this is the local side.
	pub async fn iterate(&self) -> Result<Vec<(String, FileMeta)>, SyncError> {
		let mut out = Vec::new();
		let mut stack = vec![self.root.clone()];

		while let Some(dir) = stack.pop() {
			let mut entries = match tokio::fs::read_dir(&dir).await {
				Ok(e) => e,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
				Err(e) => return Err(e.into()),
			};

			while let Some(entry) = entries.next_entry().await.map_err(SyncError::from)? {
				let path = entry.path();
				let file_type = entry.file_type().await.map_err(SyncError::from)?;

				let rel_path = match self.to_rel(&path) {
					Some(r) => r,
					None => continue,
				};

				if self.filter.is_excluded(Path::new(&rel_path)) {
					continue;
				}

				if file_type.is_dir() {
					stack.push(path);
				} else if file_type.is_file() {
					if let Some(meta) = self.stat(&rel_path).await? {
						out.push((rel_path, meta));
					}
				}
			}
		}

		Ok(out)
	}

	pub async fn stat(&self, rel_path: &str) -> Result<Option<FileMeta>, SyncError> {
		match tokio::fs::metadata(self.abs(rel_path)).await {
			Ok(md) => {
				let mtime = md.modified().map_err(SyncError::from)?;
				let mtime_secs = mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
				Ok(Some(FileMeta { size: md.len(), mtime: mtime_secs, hash: None }))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>, SyncError> {
		tokio::fs::read(self.abs(rel_path)).await.map_err(Into::into)
	}

	pub async fn write(&self, rel_path: &str, bytes: &[u8]) -> Result<(), SyncError> {
		let dest = self.abs(rel_path);
		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
		}
		tokio::fs::write(&dest, bytes).await.map_err(Into::into)
	}

	pub async fn copy_in(&self, src_abs: &Path, rel_path: &str) -> Result<(), SyncError> {
		let dest = self.abs(rel_path);
		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
		}
		tokio::fs::copy(src_abs, &dest).await.map_err(SyncError::from)?;
		Ok(())
	}

	/// Unconditional delete, used by the one-way syncer's target cleanup
	/// (§4.9) — unlike two-way's `move_to_trash`, there is no tombstone.
	pub async fn remove(&self, rel_path: &str) -> Result<(), SyncError> {
		match tokio::fs::remove_file(self.abs(rel_path)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Rename within the endpoint when possible, otherwise copy-then-remove;
	/// used by the one-way syncer to apply a `moved` event without a full
	/// re-transfer (§4.9).
	pub async fn rename(&self, from_rel: &str, to_rel: &str) -> Result<(), SyncError> {
		let dest = self.abs(to_rel);
		self.relocate(from_rel, &dest).await
	}

	/// Best-effort permission carryover from one rel_path to another within
	/// this endpoint; failures are swallowed by the caller (§4.9 "on a
	/// best-effort basis").
	#[cfg(unix)]
	pub async fn copy_permissions_from(&self, src_abs: &Path, rel_path: &str) -> Result<(), SyncError> {
		use std::os::unix::fs::PermissionsExt;
		let mode = tokio::fs::metadata(src_abs).await.map_err(SyncError::from)?.permissions().mode();
		tokio::fs::set_permissions(self.abs(rel_path), std::fs::Permissions::from_mode(mode))
			.await
			.map_err(Into::into)
	}

	/// Atomic rename first; fall back to copy+remove across filesystem
	/// boundaries, per §4.3.
	async fn relocate(&self, rel_path: &str, dest: &Path) -> Result<(), SyncError> {
		let src = self.abs(rel_path);
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

	pub async fn move_to_trash(&self, rel_path: &str, ts_token: &str) -> Result<(), SyncError> {
		let dest = self.root.join(&self.trash_dir).join(ts_token).join(rel_path);
		self.relocate(rel_path, &dest).await
	}

	pub async fn backup(&self, rel_path: &str, ts_token: &str) -> Result<(), SyncError> {
		let dest = self.root.join(&self.backup_dir).join(ts_token).join(rel_path);
		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
		}
		tokio::fs::copy(self.abs(rel_path), &dest).await.map_err(SyncError::from)?;
		Ok(())
	}

	/// Delete `<dir>/<token>/...` roots older than `retention_days`, falling
	/// back to directory mtime when the token doesn't parse (§4.3/§6).
	pub async fn cleanup(&self, trash_days: u32, backup_days: u32) -> Result<(), SyncError> {
		self.cleanup_dir(&self.trash_dir.clone(), trash_days).await?;
		self.cleanup_dir(&self.backup_dir.clone(), backup_days).await?;
		Ok(())
	}

	async fn cleanup_dir(&self, dir_name: &str, retention_days: u32) -> Result<(), SyncError> {
		let base = self.root.join(dir_name);
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
			let age_cutoff_exceeded = match parse_ts_token(&name) {
				Some(epoch) => {
					let token_time = UNIX_EPOCH + Duration::from_secs_f64(epoch.max(0.0));
					token_time < cutoff
				}
				None => match entry.metadata().await.ok().and_then(|m| m.modified().ok()) {
					Some(mtime) => mtime < cutoff,
					None => false,
				},
			};

			if age_cutoff_exceeded {
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
}

fn is_cross_device(e: &std::io::Error) -> bool {
	e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::filter::PathFilter;
	use filetime::{set_file_mtime, FileTime};
	use tempfile::TempDir;

	fn ep(tmp: &TempDir) -> LocalEndpoint {
		LocalEndpoint::new(
			tmp.path().to_path_buf(),
			PathFilter::new(&[], &[], &[".tongbu_trash".into(), ".tongbu_backup".into()]).unwrap(),
			EolPolicy::Keep,
			HashAlgo::Md5,
		)
	}

	#[tokio::test]
	async fn write_creates_parent_dirs_and_reads_back() {
		let tmp = TempDir::new().unwrap();
		let e = ep(&tmp);
		e.write("a/b/c.txt", b"hi").await.unwrap();
		assert_eq!(e.read("a/b/c.txt").await.unwrap(), b"hi");
	}

	#[tokio::test]
	async fn stat_missing_file_returns_none() {
		let tmp = TempDir::new().unwrap();
		let e = ep(&tmp);
		assert!(e.stat("nope.txt").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn iterate_skips_internal_dirs_and_lists_files() {
		let tmp = TempDir::new().unwrap();
		let e = ep(&tmp);
		e.write("a.txt", b"1").await.unwrap();
		e.write("sub/b.txt", b"2").await.unwrap();
		e.write(".tongbu_trash/20260101_000000/x.txt", b"trashed").await.unwrap();

		let mut found: Vec<_> = e.iterate().await.unwrap().into_iter().map(|(p, _)| p).collect();
		found.sort();
		assert_eq!(found, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
	}

	#[tokio::test]
	async fn move_to_trash_relocates_file_under_token_dir() {
		let tmp = TempDir::new().unwrap();
		let e = ep(&tmp);
		e.write("a.txt", b"data").await.unwrap();
		e.move_to_trash("a.txt", "20260101_120000").await.unwrap();

		assert!(e.stat("a.txt").await.unwrap().is_none());
		let trashed = e.read(".tongbu_trash/20260101_120000/a.txt").await.unwrap();
		assert_eq!(trashed, b"data");
	}

	#[tokio::test]
	async fn backup_copies_without_removing_original() {
		let tmp = TempDir::new().unwrap();
		let e = ep(&tmp);
		e.write("a.txt", b"data").await.unwrap();
		e.backup("a.txt", "20260101_120000").await.unwrap();

		assert!(e.stat("a.txt").await.unwrap().is_some());
		let backed_up = e.read(".tongbu_backup/20260101_120000/a.txt").await.unwrap();
		assert_eq!(backed_up, b"data");
	}

	#[tokio::test]
	async fn cleanup_removes_aged_trash_roots_by_token_and_keeps_fresh_ones() {
		let tmp = TempDir::new().unwrap();
		let e = ep(&tmp);
		e.write(".tongbu_trash/20000101_000000/old.txt", b"old").await.unwrap();
		e.write(".tongbu_trash/20991231_235959/new.txt", b"new").await.unwrap();

		e.cleanup(7, 7).await.unwrap();

		assert!(e.read(".tongbu_trash/20000101_000000/old.txt").await.is_err());
		assert!(e.read(".tongbu_trash/20991231_235959/new.txt").await.is_ok());
	}

	#[tokio::test]
	async fn cleanup_falls_back_to_mtime_for_unparseable_token() {
		let tmp = TempDir::new().unwrap();
		let e = ep(&tmp);
		e.write(".tongbu_backup/not-a-token/old.txt", b"old").await.unwrap();
		let dir = tmp.path().join(".tongbu_backup/not-a-token");
		set_file_mtime(&dir, FileTime::from_unix_time(0, 0)).unwrap();

		e.cleanup(7, 7).await.unwrap();

		assert!(e.read(".tongbu_backup/not-a-token/old.txt").await.is_err());
	}
}

// vim: ts=4
