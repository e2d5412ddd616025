use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::BackupMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopiedEntry {
	pub path: String,
	pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedEntry {
	pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
	pub path: String,
	pub reason: String,
}

/// The wire format written to `backup_manifest_<timestamp>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDocument {
	pub timestamp: String,
	pub mode: BackupMode,
	pub duration_seconds: f64,
	pub files_copied: usize,
	pub files_skipped: usize,
	pub files_failed: usize,
	pub total_bytes: u64,
	pub copied: Vec<CopiedEntry>,
	pub skipped: Vec<SkippedEntry>,
	pub failed: Vec<FailedEntry>,
}

impl ManifestDocument {
	/// The path set this document says it produced, as of write time.
	pub fn copied_paths(&self) -> impl Iterator<Item = &str> {
		self.copied.iter().map(|e| e.path.as_str())
	}
}

struct Inner {
	mode: BackupMode,
	start: Instant,
	copied: Vec<CopiedEntry>,
	skipped: Vec<SkippedEntry>,
	failed: Vec<FailedEntry>,
	total_bytes: u64,
	/// Timestamp and duration as of the first `save()` call. One run
	/// produces one manifest document; every destination gets the same
	/// timestamp/duration rather than a fresh one per `save()` call.
	frozen: Option<(String, f64)>,
}

/// Per-run append-only record. Safe to share across copy workers: every
/// mutating operation takes the single internal mutex.
pub struct Manifest {
	inner: Mutex<Inner>,
}

impl Manifest {
	pub fn new(mode: BackupMode) -> Self {
		Self {
			inner: Mutex::new(Inner {
				mode,
				start: Instant::now(),
				copied: Vec::new(),
				skipped: Vec::new(),
				failed: Vec::new(),
				total_bytes: 0,
				frozen: None,
			}),
		}
	}

	pub fn record_copy(&self, path: impl Into<String>, size: u64) {
		let mut inner = self.inner.lock().expect("manifest mutex poisoned");
		inner.copied.push(CopiedEntry {
			path: path.into(),
			size,
		});
		inner.total_bytes += size;
	}

	pub fn record_skip(&self, path: impl Into<String>) {
		let mut inner = self.inner.lock().expect("manifest mutex poisoned");
		inner.skipped.push(SkippedEntry { path: path.into() });
	}

	pub fn record_failure(&self, path: impl Into<String>, reason: impl Into<String>) {
		let mut inner = self.inner.lock().expect("manifest mutex poisoned");
		inner.failed.push(FailedEntry {
			path: path.into(),
			reason: reason.into(),
		});
	}

	pub fn counts(&self) -> (usize, usize, usize) {
		let inner = self.inner.lock().expect("manifest mutex poisoned");
		(inner.copied.len(), inner.skipped.len(), inner.failed.len())
	}

	/// The run timestamp this manifest will use (freezing it on first access,
	/// same as `save`), for sibling artifacts produced for the same run, e.g.
	/// a `compress_type` archive, that should share its filename timestamp.
	pub fn timestamp(&self) -> String {
		let mut inner = self.inner.lock().expect("manifest mutex poisoned");
		let elapsed = inner.start.elapsed().as_secs_f64();
		inner
			.frozen
			.get_or_insert_with(|| (Local::now().format("%Y%m%d_%H%M%S").to_string(), elapsed))
			.0
			.clone()
	}

	/// Write the manifest to `dir/backup_manifest_<ts>.json`. The timestamp
	/// and duration are computed on the first call across the whole run and
	/// reused by every later call, so multiple destinations share one
	/// run-level document rather than each getting its own filename and
	/// elapsed time.
	pub fn save(&self, dir: &Path) -> Result<PathBuf> {
		let mut inner = self.inner.lock().expect("manifest mutex poisoned");
		let elapsed = inner.start.elapsed().as_secs_f64();
		let (timestamp, duration_seconds) = inner
			.frozen
			.get_or_insert_with(|| (Local::now().format("%Y%m%d_%H%M%S").to_string(), elapsed))
			.clone();
		let doc = ManifestDocument {
			timestamp: timestamp.clone(),
			mode: inner.mode,
			duration_seconds,
			files_copied: inner.copied.len(),
			files_skipped: inner.skipped.len(),
			files_failed: inner.failed.len(),
			total_bytes: inner.total_bytes,
			copied: inner.copied.clone(),
			skipped: inner.skipped.clone(),
			failed: inner.failed.clone(),
		};

		std::fs::create_dir_all(dir)?;
		let path = dir.join(format!("backup_manifest_{timestamp}.json"));
		let file = std::fs::File::create(&path)?;
		serde_json::to_writer_pretty(file, &doc)?;
		Ok(path)
	}
}

fn manifest_paths_sorted(dir: &Path) -> Vec<PathBuf> {
	let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
		.into_iter()
		.flatten()
		.filter_map(|e| e.ok())
		.map(|e| e.path())
		.filter(|p| {
			p.file_name()
				.and_then(|n| n.to_str())
				.map(|n| n.starts_with("backup_manifest_") && n.ends_with(".json"))
				.unwrap_or(false)
		})
		.collect();
	// filenames embed a lexically-sortable timestamp
	paths.sort();
	paths
}

/// Returns whether `name` identifies a manifest document, for callers that
/// must skip them while walking a destination tree (dedup, restore, crypto).
pub fn is_manifest_name(name: &str) -> bool {
	name.starts_with("backup_manifest_") && name.ends_with(".json")
}

/// Newest manifest in `dir`, by filename order (which matches timestamp
/// order).
pub fn load_latest(dir: &Path) -> Result<Option<ManifestDocument>> {
	let Some(path) = manifest_paths_sorted(dir).pop() else {
		return Ok(None);
	};
	let contents = std::fs::read_to_string(path)?;
	Ok(Some(serde_json::from_str(&contents)?))
}

/// All manifests in `dir` whose embedded timestamp is `<= cutoff`, oldest
/// first.
pub fn load_up_to(dir: &Path, cutoff: &str) -> Result<Vec<ManifestDocument>> {
	let mut docs = Vec::new();
	for path in manifest_paths_sorted(dir) {
		let ts = path
			.file_stem()
			.and_then(|s| s.to_str())
			.and_then(|s| s.strip_prefix("backup_manifest_"))
			.unwrap_or_default();
		if ts <= cutoff {
			let contents = std::fs::read_to_string(&path)?;
			docs.push(serde_json::from_str(&contents)?);
		}
	}
	Ok(docs)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn records_partition_considered_set() {
		let m = Manifest::new(BackupMode::Full);
		m.record_copy("a.txt", 3);
		m.record_skip("b.txt");
		m.record_failure("c.txt", "permission denied");
		let (copied, skipped, failed) = m.counts();
		assert_eq!((copied, skipped, failed), (1, 1, 1));
	}

	#[test]
	fn save_and_load_latest_roundtrip() {
		let dir = tempdir().unwrap();
		let m = Manifest::new(BackupMode::Incremental);
		m.record_copy("new.txt", 10);
		m.record_skip("a.txt");
		m.save(dir.path()).unwrap();

		let loaded = load_latest(dir.path()).unwrap().unwrap();
		assert_eq!(loaded.files_copied, 1);
		assert_eq!(loaded.files_skipped, 1);
		assert_eq!(loaded.copied[0].path, "new.txt");
	}

	#[test]
	fn load_up_to_respects_cutoff_and_order() {
		let dir = tempdir().unwrap();
		for (ts, path) in [("20200101_000000", "x"), ("20200102_000000", "y"), ("20200103_000000", "z")] {
			let doc = ManifestDocument {
				timestamp: ts.to_string(),
				mode: BackupMode::Full,
				duration_seconds: 0.0,
				files_copied: 1,
				files_skipped: 0,
				files_failed: 0,
				total_bytes: 1,
				copied: vec![CopiedEntry {
					path: path.to_string(),
					size: 1,
				}],
				skipped: vec![],
				failed: vec![],
			};
			let file = std::fs::File::create(dir.path().join(format!("backup_manifest_{ts}.json"))).unwrap();
			serde_json::to_writer(file, &doc).unwrap();
		}

		let docs = load_up_to(dir.path(), "20200102_000000").unwrap();
		assert_eq!(docs.len(), 2);
		assert_eq!(docs[0].copied[0].path, "x");
		assert_eq!(docs[1].copied[0].path, "y");
	}
}
