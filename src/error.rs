use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type.
///
/// Per-file outcomes (checksum mismatch, single copy/PUT failure) are not
/// represented here: they are recorded into the manifest as values
/// ([`crate::copy::CopyOutcome`]) and never unwind the stack.
#[derive(Debug, Error)]
pub enum Error {
	#[error("configuration error in {section}.{key}: {message}")]
	Config {
		section: String,
		key: String,
		message: String,
	},

	#[error("lock held by live process {pid} ({path})")]
	LockConflict { pid: u32, path: PathBuf },

	#[error("network error talking to {host}: {source}")]
	TransientNetwork {
		host: String,
		#[source]
		source: Box<Error>,
	},

	#[error("authentication failed for {host}: {message}")]
	Auth { host: String, message: String },

	#[error("{phase} hook failed with status {status:?}")]
	HookFailure { phase: &'static str, status: Option<i32> },

	#[error("encryption error: {0}")]
	Encryption(String),

	#[error("invalid restore source: {0}")]
	InvalidRestoreSource(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error("ssh error: {0}")]
	Ssh(#[from] ssh2::Error),

	#[error("object store error: {0}")]
	ObjectStore(String),

	#[error("zip error: {0}")]
	Zip(#[from] zip::result::ZipError),

	#[error("{0}")]
	Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
