use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream `path` and return its lowercase hex SHA-256 digest.
///
/// Returns `None` on read error; callers that need a comparison treat `None`
/// as "never equal" via [`checksums_equal`].
pub fn sha256_of(path: &Path) -> Option<String> {
	let mut file = File::open(path).ok()?;
	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; CHUNK_SIZE];
	loop {
		let n = file.read(&mut buf).ok()?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Some(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, for callers that already hold the bytes.
pub fn sha256_of_bytes(data: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(data);
	hex::encode(hasher.finalize())
}

/// `a == b`, but `None` (a failed read) never compares equal to anything.
pub fn checksums_equal(a: &Option<String>, b: &Option<String>) -> bool {
	match (a, b) {
		(Some(a), Some(b)) => a == b,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	#[test]
	fn same_content_same_hash() {
		let mut f1 = NamedTempFile::new().unwrap();
		let mut f2 = NamedTempFile::new().unwrap();
		f1.write_all(b"the quick brown fox").unwrap();
		f2.write_all(b"the quick brown fox").unwrap();
		let h1 = sha256_of(f1.path());
		let h2 = sha256_of(f2.path());
		assert!(checksums_equal(&h1, &h2));
	}

	#[test]
	fn different_content_different_hash() {
		let mut f1 = NamedTempFile::new().unwrap();
		let mut f2 = NamedTempFile::new().unwrap();
		f1.write_all(b"aaa").unwrap();
		f2.write_all(b"bbb").unwrap();
		let h1 = sha256_of(f1.path());
		let h2 = sha256_of(f2.path());
		assert!(!checksums_equal(&h1, &h2));
	}

	#[test]
	fn missing_file_never_equal() {
		let missing = Path::new("/nonexistent/path/for/sure");
		let h1 = sha256_of(missing);
		assert!(h1.is_none());
		assert!(!checksums_equal(&h1, &h1));
	}
}
