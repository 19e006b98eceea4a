//! EOL Normalizer (C2): text/binary classification, line-ending translation, content hashing.

use crate::types::{EolPolicy, HashAlgo};
use std::path::Path;

const TEXT_EXTENSIONS: &[&str] = &[
	"txt", "md", "rst", "log", "csv", "tsv", "json", "json5", "yaml", "yml", "toml", "ini", "cfg",
	"conf", "xml", "html", "htm", "css", "scss", "sass", "less", "js", "jsx", "ts", "tsx", "py",
	"rb", "go", "rs", "c", "cpp", "cc", "h", "hpp", "java", "kt", "swift", "sh", "bash", "zsh",
	"ps1", "sql", "gitignore", "gitattributes", "env", "properties",
];

const BINARY_EXTENSIONS: &[&str] = &[
	"png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "mp3", "mp4", "avi", "mov", "mkv",
	"wav", "flac", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "exe", "dll", "so", "dylib", "bin",
	"pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "ttf", "otf", "woff", "woff2", "class",
	"jar", "pyc", "o", "a",
];

const WELL_KNOWN_TEXT_NAMES: &[&str] = &["Makefile", "Dockerfile", "Jenkinsfile", "README", "LICENSE"];

/// Classify a path as text vs binary per spec §4.2.
///
/// `sample` is the first up-to-8-KiB of the file's contents, used only when
/// the extension/name heuristics are inconclusive.
pub fn is_text(path: &Path, sample: Option<&[u8]>) -> bool {
	if let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()) {
		if BINARY_EXTENSIONS.contains(&ext.as_str()) {
			return false;
		}
		if TEXT_EXTENSIONS.contains(&ext.as_str()) {
			return true;
		}
	}

	if let Some(name) = path.file_name().map(|n| n.to_string_lossy()) {
		if WELL_KNOWN_TEXT_NAMES.contains(&name.as_ref()) {
			return true;
		}
	}

	match sample {
		None => true,
		Some(bytes) => {
			if bytes.is_empty() {
				true
			} else {
				!bytes.contains(&0u8)
			}
		}
	}
}

/// Fold CRLF/CR to LF, then optionally expand LF to CRLF.
///
/// `keep` passes bytes through unchanged; `lf` folds only; `crlf` folds then expands.
pub fn normalize(bytes: &[u8], policy: EolPolicy) -> Vec<u8> {
	if matches!(policy, EolPolicy::Keep) {
		return bytes.to_vec();
	}

	let mut folded = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		match bytes[i] {
			b'\r' => {
				folded.push(b'\n');
				if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
					i += 2;
				} else {
					i += 1;
				}
			}
			b => {
				folded.push(b);
				i += 1;
			}
		}
	}

	if matches!(policy, EolPolicy::Crlf) {
		let mut expanded = Vec::with_capacity(folded.len());
		for &b in &folded {
			if b == b'\n' {
				expanded.push(b'\r');
			}
			expanded.push(b);
		}
		expanded
	} else {
		folded
	}
}

/// Hash `bytes` with the task's chosen algorithm, normalizing first when the
/// path is text and the policy is not `keep`.
pub fn content_hash(path: &Path, bytes: &[u8], policy: EolPolicy, algo: HashAlgo) -> [u8; 32] {
	let should_normalize =
		!matches!(policy, EolPolicy::Keep) && is_text(path, Some(&bytes[..bytes.len().min(8192)]));

	let normalized;
	let to_hash: &[u8] = if should_normalize {
		normalized = normalize(bytes, policy);
		&normalized
	} else {
		bytes
	};

	hash_bytes(to_hash, algo)
}

/// Hash a buffer directly, padding non-32-byte digests (MD5) into the
/// 32-byte storage slot used by [`crate::types::FileMeta`].
pub fn hash_bytes(bytes: &[u8], algo: HashAlgo) -> [u8; 32] {
	match algo {
		HashAlgo::Blake3 => *blake3::hash(bytes).as_bytes(),
		HashAlgo::Md5 => {
			let digest = md5::compute(bytes);
			let mut out = [0u8; 32];
			out[..16].copy_from_slice(&digest.0);
			out
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_by_extension() {
		assert!(is_text(Path::new("a.rs"), None));
		assert!(!is_text(Path::new("a.png"), None));
	}

	#[test]
	fn classifies_well_known_names_without_extension() {
		assert!(is_text(Path::new("Makefile"), None));
		assert!(is_text(Path::new("LICENSE"), None));
	}

	#[test]
	fn binary_extension_overrides_content_sniffing() {
		// a .png file filled with plain ASCII is still binary by extension
		assert!(!is_text(Path::new("a.png"), Some(b"hello world")));
	}

	#[test]
	fn unknown_extension_sniffs_nul_byte() {
		assert!(!is_text(Path::new("a.unknownext"), Some(b"\x00\x01\x02")));
		assert!(is_text(Path::new("a.unknownext"), Some(b"hello")));
	}

	#[test]
	fn empty_sample_is_text() {
		assert!(is_text(Path::new("a.unknownext"), Some(b"")));
	}

	#[test]
	fn normalize_folds_crlf_and_lone_cr_to_lf() {
		let input = b"a\r\nb\rc\nd";
		let out = normalize(input, EolPolicy::Lf);
		assert_eq!(out, b"a\nb\nc\nd");
	}

	#[test]
	fn normalize_expands_lf_to_crlf_when_requested() {
		let input = b"a\r\nb\nc";
		let out = normalize(input, EolPolicy::Crlf);
		assert_eq!(out, b"a\r\nb\r\nc");
	}

	#[test]
	fn normalize_keep_is_passthrough() {
		let input = b"a\r\nb";
		assert_eq!(normalize(input, EolPolicy::Keep), input);
	}

	#[test]
	fn normalize_is_idempotent() {
		let input = b"a\r\nb\rc\nd\r\n";
		let once = normalize(input, EolPolicy::Crlf);
		let twice = normalize(&once, EolPolicy::Crlf);
		assert_eq!(once, twice);
	}

	#[test]
	fn content_hash_equal_for_equivalent_line_endings() {
		let a = b"line1\r\nline2\r\n";
		let b = b"line1\nline2\n";
		let ha = content_hash(Path::new("a.txt"), a, EolPolicy::Lf, HashAlgo::Md5);
		let hb = content_hash(Path::new("a.txt"), b, EolPolicy::Lf, HashAlgo::Md5);
		assert_eq!(ha, hb);
	}

	#[test]
	fn content_hash_differs_under_keep_policy_for_different_eol() {
		let a = b"line1\r\nline2\r\n";
		let b = b"line1\nline2\n";
		let ha = content_hash(Path::new("a.txt"), a, EolPolicy::Keep, HashAlgo::Md5);
		let hb = content_hash(Path::new("a.txt"), b, EolPolicy::Keep, HashAlgo::Md5);
		assert_ne!(ha, hb);
	}

	#[test]
	fn md5_and_blake3_are_deterministic() {
		let data = b"the quick brown fox";
		assert_eq!(hash_bytes(data, HashAlgo::Md5), hash_bytes(data, HashAlgo::Md5));
		assert_eq!(hash_bytes(data, HashAlgo::Blake3), hash_bytes(data, HashAlgo::Blake3));
		assert_ne!(hash_bytes(data, HashAlgo::Md5), hash_bytes(data, HashAlgo::Blake3));
	}
}

// vim: ts=4
