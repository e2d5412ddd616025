use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ssh2::{Session, Sftp};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manifest::{is_manifest_name, Manifest};
use crate::model::{BackupMode, SourceEntry, SshAuth};
use crate::retry::{retry, RetryPolicy};

const CHUNK_SIZE: usize = 32 * 1024;

/// A connected SSH session plus its single SFTP channel, confined to one
/// host-worker and never shared across threads.
pub struct SftpConnection {
	#[allow(dead_code)] // kept alive for the duration of the channel
	session: Session,
	sftp: Sftp,
	host: String,
}

impl SftpConnection {
	pub fn connect(host: &str, port: u16, user: &str, auth: &SshAuth) -> Result<Self> {
		let tcp = TcpStream::connect((host, port))
			.map_err(|e| Error::TransientNetwork {
				host: host.to_string(),
				source: Box::new(Error::Io(e)),
			})?;

		let mut session = Session::new()?;
		session.set_tcp_stream(tcp);
		session.handshake().map_err(|e| Error::TransientNetwork {
			host: host.to_string(),
			source: Box::new(Error::Ssh(e)),
		})?;

		// Warning-level host-key policy: we do not maintain a known_hosts
		// store here, so an unrecognised key is accepted with a log warning
		// rather than rejected outright; a hard mismatch still surfaces as
		// an authentication failure from the server.
		warn!(host, "accepting host key without verification (warning-level policy)");

		match auth {
			SshAuth::Password(password) => {
				session
					.userauth_password(user, password)
					.map_err(|e| Error::Auth {
						host: host.to_string(),
						message: e.to_string(),
					})?;
			}
			SshAuth::PrivateKey { path, passphrase } => {
				session
					.userauth_pubkey_file(user, None, path, passphrase.as_deref())
					.map_err(|e| Error::Auth {
						host: host.to_string(),
						message: e.to_string(),
					})?;
			}
		}

		let sftp = session.sftp().map_err(|e| Error::TransientNetwork {
			host: host.to_string(),
			source: Box::new(Error::Ssh(e)),
		})?;

		Ok(Self {
			session,
			sftp,
			host: host.to_string(),
		})
	}

	/// Walk from `remote_dir` upward collecting nonexistent components, then
	/// create from the deepest missing ancestor downward. "Already exists"
	/// from a racing creator is tolerated; any other failure aborts.
	pub fn mkdir_p(&self, remote_dir: &Path) -> Result<()> {
		let mut missing = Vec::new();
		let mut cursor = Some(remote_dir.to_path_buf());
		while let Some(dir) = cursor {
			if self.sftp.stat(&dir).is_ok() {
				break;
			}
			missing.push(dir.clone());
			cursor = dir.parent().map(|p| p.to_path_buf());
		}

		for dir in missing.into_iter().rev() {
			match self.sftp.mkdir(&dir, 0o755) {
				Ok(()) => {}
				Err(_) if self.sftp.stat(&dir).is_ok() => {
					// someone else created it concurrently, or it already existed
				}
				Err(err) => return Err(Error::Ssh(err)),
			}
		}
		Ok(())
	}

	/// PUT `local` to `remote`. `bandwidth_kbps == 0` streams without
	/// shaping; otherwise writes fixed 32 KiB chunks, sleeping after each to
	/// match the requested throughput.
	pub fn put_file(&self, local: &Path, remote: &Path, bandwidth_kbps: u64) -> Result<u64> {
		if let Some(parent) = remote.parent() {
			self.mkdir_p(parent)?;
		}

		let mut src = std::fs::File::open(local)?;
		let mut dst = self.sftp.create(remote)?;

		if bandwidth_kbps == 0 {
			let written = std::io::copy(&mut src, &mut dst)?;
			return Ok(written);
		}

		let target_bytes_per_sec = (bandwidth_kbps * 1024) as f64;
		let mut buf = vec![0u8; CHUNK_SIZE];
		let mut total = 0u64;
		loop {
			let start = Instant::now();
			let n = src.read(&mut buf)?;
			if n == 0 {
				break;
			}
			dst.write_all(&buf[..n])?;
			total += n as u64;

			let target_duration = Duration::from_secs_f64(n as f64 / target_bytes_per_sec);
			let elapsed = start.elapsed();
			if elapsed < target_duration {
				std::thread::sleep(target_duration - elapsed);
			}
		}
		Ok(total)
	}

	/// `remote`'s mtime as epoch seconds, or `None` if it does not exist.
	fn remote_mtime(&self, remote: &Path) -> Option<u64> {
		self.sftp.stat(remote).ok().and_then(|st| st.mtime)
	}

	/// Upload every entry in `entries`, applying the mode predicate per file,
	/// and in `full` mode only, remove remote files absent from the local
	/// set afterwards.
	pub fn upload_tree(
		&self,
		local_root: &Path,
		remote_root: &Path,
		mode: BackupMode,
		cutoff_epoch: u64,
		entries: &[SourceEntry],
		bandwidth_kbps: u64,
		manifest: &Manifest,
	) -> Result<()> {
		self.mkdir_p(remote_root)?;
		let mut local_relatives: HashSet<PathBuf> = HashSet::new();

		for entry in entries {
			local_relatives.insert(entry.relative_path.clone());
			let local = local_root.join(&entry.relative_path);
			let remote = remote_root.join(&entry.relative_path);
			let rel = entry.relative_path.to_string_lossy().into_owned();

			let should_put = match mode {
				BackupMode::Full => true,
				BackupMode::Incremental | BackupMode::Differential => {
					match self.remote_mtime(&remote) {
						None => true,
						Some(remote_mtime) => {
							let local_epoch = crate::model::epoch_secs(entry.mtime);
							local_epoch > remote_mtime
						}
					}
				}
			};
			let _ = cutoff_epoch; // the remote-mtime comparison subsumes the cutoff here

			if !should_put {
				manifest.record_skip(rel);
				continue;
			}

			match self.put_file(&local, &remote, bandwidth_kbps) {
				Ok(size) => {
					debug!(host = %self.host, remote = %remote.display(), size, "uploaded");
					manifest.record_copy(rel, size);
				}
				Err(err) => {
					manifest.record_failure(rel, err.to_string());
				}
			}
		}

		if mode == BackupMode::Full {
			if let Err(err) = self.cleanup_extra_files(remote_root, &local_relatives) {
				warn!(host = %self.host, %err, "remote cleanup failed");
			}
		}

		Ok(())
	}

	/// Recursively download `remote_root` into `local_root`, used by the
	/// restore engine to materialize an SSH source before the local restore
	/// path runs.
	pub fn download_tree(&self, remote_root: &Path, local_root: &Path) -> Result<()> {
		let mut stack = vec![remote_root.to_path_buf()];
		while let Some(dir) = stack.pop() {
			let entries = self.sftp.readdir(&dir)?;
			for (path, stat) in entries {
				let Ok(rel) = path.strip_prefix(remote_root) else {
					continue;
				};
				if stat.is_dir() {
					stack.push(path.clone());
					continue;
				}
				let dest = local_root.join(rel);
				if let Some(parent) = dest.parent() {
					std::fs::create_dir_all(parent)?;
				}
				let mut remote_file = self.sftp.open(&path)?;
				let mut local_file = std::fs::File::create(&dest)?;
				std::io::copy(&mut remote_file, &mut local_file)?;
			}
		}
		Ok(())
	}

	/// Full-mode-only: remove remote regular files whose relative path is
	/// not present in `local_relatives`. Does not remove empty directories
	/// left behind (matching the original behaviour exactly).
	fn cleanup_extra_files(&self, remote_root: &Path, local_relatives: &HashSet<PathBuf>) -> Result<()> {
		let mut stack = vec![remote_root.to_path_buf()];
		while let Some(dir) = stack.pop() {
			let entries = match self.sftp.readdir(&dir) {
				Ok(entries) => entries,
				Err(_) => continue,
			};
			for (path, stat) in entries {
				if stat.is_dir() {
					stack.push(path);
					continue;
				}
				let Ok(rel) = path.strip_prefix(remote_root) else {
					continue;
				};
				let name = rel.file_name().and_then(|n| n.to_str()).unwrap_or("");
				if is_manifest_name(name) {
					continue;
				}
				if !local_relatives.contains(rel) {
					if let Err(err) = self.sftp.unlink(&path) {
						warn!(path = %path.display(), %err, "failed to remove extra remote file");
					}
				}
			}
		}
		Ok(())
	}
}

/// Connect, run [`SftpConnection::upload_tree`], and always close the
/// connection, retrying the whole attempt up to `policy.attempts` times.
pub fn sync_server(
	host: &str,
	port: u16,
	user: &str,
	auth: &SshAuth,
	remote_root: &Path,
	local_root: &Path,
	mode: BackupMode,
	cutoff_epoch: u64,
	entries: &[SourceEntry],
	bandwidth_kbps: u64,
	manifest: &Manifest,
	policy: RetryPolicy,
) -> Result<()> {
	info!(host, "starting sftp sync");
	retry(policy, || {
		let conn = SftpConnection::connect(host, port, user, auth)?;
		conn.upload_tree(
			local_root,
			remote_root,
			mode,
			cutoff_epoch,
			entries,
			bandwidth_kbps,
			manifest,
		)
	})
}

/// Dispatch [`sync_server`] across `servers` concurrently, capped at 10
/// workers. A per-host failure is logged; the dispatcher continues with the
/// remaining hosts.
pub fn sync_servers_concurrently(
	servers: &[crate::model::SftpTarget],
	local_root: &Path,
	mode: BackupMode,
	cutoff_epoch: u64,
	entries: &[SourceEntry],
	manifest: &Manifest,
	policy: RetryPolicy,
) {
	let workers = servers.len().min(10).max(1);
	let (tx, rx) = crossbeam_channel::unbounded();
	for server in servers {
		tx.send(server.clone()).expect("channel not closed");
	}
	drop(tx);

	std::thread::scope(|scope| {
		for _ in 0..workers {
			let rx = rx.clone();
			scope.spawn(|| {
				while let Ok(server) = rx.recv() {
					if let Err(err) = sync_server(
						&server.host,
						server.port,
						&server.user,
						&server.auth,
						&server.remote_root,
						local_root,
						mode,
						cutoff_epoch,
						entries,
						server.bandwidth_limit_kbps,
						manifest,
						policy,
					) {
						warn!(host = %server.host, %err, "sftp host abandoned after retries exhausted");
					}
				}
			});
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bandwidth_pacing_math_is_sane() {
		// 32 KiB at 32 KiB/s should take about one second; this is a sanity
		// check of the formula, not a live-network test.
		let target_bytes_per_sec = 32.0 * 1024.0;
		let target_duration = Duration::from_secs_f64(CHUNK_SIZE as f64 / target_bytes_per_sec);
		assert!(target_duration.as_millis() >= 900 && target_duration.as_millis() <= 1100);
	}
}
