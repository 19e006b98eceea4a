//! Path Filter (C1): decides whether a relative path participates in sync.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Errors building a [`PathFilter`] from task configuration.
#[derive(Debug)]
pub enum FilterError {
	InvalidPattern(String),
}

impl std::fmt::Display for FilterError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FilterError::InvalidPattern(msg) => write!(f, "invalid exclusion pattern: {}", msg),
		}
	}
}

impl std::error::Error for FilterError {}

/// Decides inclusion/exclusion of relative paths per spec §4.1: internal
/// directories first, then exclude-pattern match, then extension allowlist.
pub struct PathFilter {
	exclude_set: GlobSet,
	exclude_segments: Vec<String>,
	allowed_extensions: Vec<String>,
	internal_dirs: Vec<String>,
}

impl PathFilter {
	pub fn new(
		exclude_patterns: &[String],
		allowed_extensions: &[String],
		internal_dirs: &[String],
	) -> Result<Self, FilterError> {
		let mut builder = GlobSetBuilder::new();
		let mut exclude_segments = Vec::new();

		for pattern in exclude_patterns {
			// A pattern with no glob metacharacters also matches as a literal
			// path segment anywhere in the tree (spec §4.1 rule b).
			if !pattern.contains(['*', '?', '[']) {
				exclude_segments.push(pattern.clone());
			}
			let glob = Glob::new(pattern)
				.map_err(|e| FilterError::InvalidPattern(format!("{}: {}", pattern, e)))?;
			builder.add(glob);
		}

		let exclude_set = builder
			.build()
			.map_err(|e| FilterError::InvalidPattern(format!("failed to build pattern set: {}", e)))?;

		let allowed_extensions =
			allowed_extensions.iter().map(|e| e.to_ascii_lowercase()).collect();

		Ok(PathFilter {
			exclude_set,
			exclude_segments,
			allowed_extensions,
			internal_dirs: internal_dirs.to_vec(),
		})
	}

	/// True if `rel_path` must not be synchronized.
	pub fn is_excluded(&self, rel_path: &Path) -> bool {
		// (a) internal directory segment
		for component in rel_path.components() {
			let seg = component.as_os_str().to_string_lossy();
			if self.internal_dirs.iter().any(|d| d == seg.as_ref()) {
				return true;
			}
		}

		// (b) exclude pattern: basename glob, verbatim segment, or whole-path glob
		if self.exclude_set.is_match(rel_path) {
			return true;
		}
		if let Some(basename) = rel_path.file_name() {
			let basename = basename.to_string_lossy();
			if self.exclude_set.is_match(Path::new(basename.as_ref())) {
				return true;
			}
		}
		for component in rel_path.components() {
			let seg = component.as_os_str().to_string_lossy();
			if self.exclude_segments.iter().any(|s| s == seg.as_ref()) {
				return true;
			}
		}

		// (c) allowed-extension allowlist, case-insensitive
		if !self.allowed_extensions.is_empty() {
			let ext_ok = rel_path
				.extension()
				.map(|e| {
					let suffix = format!(".{}", e.to_string_lossy().to_ascii_lowercase());
					self.allowed_extensions.iter().any(|a| a == &suffix || a == &e.to_string_lossy().to_ascii_lowercase())
				})
				.unwrap_or(false);
			if !ext_ok {
				return true;
			}
		}

		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn filter(exclude: &[&str], exts: &[&str], internal: &[&str]) -> PathFilter {
		PathFilter::new(
			&exclude.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
			&exts.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
			&internal.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
		)
		.unwrap()
	}

	#[test]
	fn internal_dir_segment_excluded_anywhere() {
		let f = filter(&[], &[], &[".tongbu_trash", ".tongbu_backup"]);
		assert!(f.is_excluded(Path::new(".tongbu_trash/20260101_000000/a.txt")));
		assert!(f.is_excluded(Path::new("deep/.tongbu_backup/x")));
		assert!(!f.is_excluded(Path::new("src/main.rs")));
	}

	#[test]
	fn glob_pattern_excludes_by_basename_or_path() {
		let f = filter(&["*.log", "node_modules/**"], &[], &[]);
		assert!(f.is_excluded(Path::new("deep/file.log")));
		assert!(f.is_excluded(Path::new("node_modules/pkg/index.js")));
		assert!(!f.is_excluded(Path::new("src/main.rs")));
	}

	#[test]
	fn literal_segment_excludes_anywhere_in_tree() {
		let f = filter(&[".git"], &[], &[]);
		assert!(f.is_excluded(Path::new(".git/HEAD")));
		assert!(f.is_excluded(Path::new("a/b/.git/config")));
	}

	#[test]
	fn allowed_extensions_allowlist_is_case_insensitive() {
		let f = filter(&[], &[".txt", ".MD"], &[]);
		assert!(!f.is_excluded(Path::new("a.txt")));
		assert!(!f.is_excluded(Path::new("a.TXT")));
		assert!(!f.is_excluded(Path::new("b.md")));
		assert!(f.is_excluded(Path::new("c.rs")));
	}

	#[test]
	fn empty_allowlist_means_no_extension_restriction() {
		let f = filter(&[], &[], &[]);
		assert!(!f.is_excluded(Path::new("anything.bin")));
	}
}

// vim: ts=4
