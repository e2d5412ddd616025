use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::Result;

/// An 8-character alphanumeric one-time password, matching the original
/// implementation's `generate_otp()` used to protect `zip_pw` archives.
pub fn generate_otp() -> String {
	const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
	let mut rng = rand::thread_rng();
	(0..8).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

/// Zip `src_dir`'s file tree into `output_dir/backup_<timestamp>.zip`. Runs
/// alongside the plain copy, not instead of it: the original sync compresses
/// the source tree into each backup directory as a separate artifact after
/// the copy pass completes.
pub fn compress_directory(src_dir: &Path, output_dir: &Path, timestamp: &str, password: Option<&str>) -> Result<PathBuf> {
	fs::create_dir_all(output_dir)?;
	let zip_path = output_dir.join(format!("backup_{timestamp}.zip"));
	let file = fs::File::create(&zip_path)?;
	let mut writer = ZipWriter::new(file);

	for entry in walkdir::WalkDir::new(src_dir).into_iter().filter_map(|e| e.ok()) {
		if !entry.file_type().is_file() {
			continue;
		}
		let relative = entry.path().strip_prefix(src_dir).unwrap_or(entry.path());
		let name = relative.to_string_lossy().replace('\\', "/");

		let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
		let options = match password {
			Some(pw) => options.with_deprecated_encryption(pw.as_bytes()),
			None => options,
		};
		writer.start_file(name, options)?;
		std::io::Write::write_all(&mut writer, &fs::read(entry.path())?)?;
	}

	writer.finish()?;
	Ok(zip_path)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn compresses_all_files_into_single_archive() {
		let src = tempdir().unwrap();
		let out = tempdir().unwrap();
		fs::write(src.path().join("a.txt"), b"aaa").unwrap();
		fs::create_dir_all(src.path().join("sub")).unwrap();
		fs::write(src.path().join("sub/b.txt"), b"bbb").unwrap();

		let zip_path = compress_directory(src.path(), out.path(), "20200101_000000", None).unwrap();
		assert!(zip_path.exists());

		let file = fs::File::open(&zip_path).unwrap();
		let archive = zip::ZipArchive::new(file).unwrap();
		assert_eq!(archive.len(), 2);
	}

	#[test]
	fn otp_is_eight_alphanumeric_characters() {
		let otp = generate_otp();
		assert_eq!(otp.len(), 8);
		assert!(otp.chars().all(|c| c.is_ascii_alphanumeric()));
	}
}
