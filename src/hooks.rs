use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Run `command` via the shell, waiting up to `timeout`. A non-zero exit (or
/// a timeout) is an error tagged with `phase` so callers and logs can tell
/// pre-hook, post-hook, and db-dump failures apart; callers decide fatality
/// (pre-hook aborts the run, post-hook and db-dump only warn).
fn run_command(phase: &'static str, command: &str, timeout: Duration) -> Result<()> {
	info!(command, phase, "running hook");
	let mut child = Command::new("sh").arg("-c").arg(command).spawn()?;

	let start = std::time::Instant::now();
	loop {
		if let Some(status) = child.try_wait()? {
			return if status.success() {
				Ok(())
			} else {
				Err(Error::HookFailure {
					phase,
					status: status.code(),
				})
			};
		}
		if start.elapsed() > timeout {
			let _ = child.kill();
			return Err(Error::HookFailure { phase, status: None });
		}
		std::thread::sleep(Duration::from_millis(100));
	}
}

/// Pre-backup hook: a non-zero exit aborts the run before any files are
/// touched.
pub fn run_pre_hook(command: &str) -> Result<()> {
	run_command("pre-backup", command, Duration::from_secs(3600))
}

/// Post-backup hook: failure is warned, not fatal, since the backup itself
/// already succeeded.
pub fn run_post_hook(command: &str) {
	if let Err(err) = run_command("post-backup", command, Duration::from_secs(3600)) {
		warn!(%err, "post-backup hook failed (non-fatal)");
	}
}

/// External database-dump collaborator, wired the same way as pre/post hooks
/// but with its own one-hour wall-clock timeout, matching the original
/// implementation's `mysqldump` subprocess contract. A nonzero exit is
/// reported but does not abort the run; the dump is a separate artifact from
/// the file-tree being backed up.
pub fn run_db_dump(command: &str) {
	if let Err(err) = run_command("db-dump", command, Duration::from_secs(3600)) {
		warn!(%err, "database dump hook failed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn successful_command_returns_ok() {
		assert!(run_pre_hook("true").is_ok());
	}

	#[test]
	fn failing_command_is_an_error() {
		assert!(run_pre_hook("false").is_err());
	}

	#[test]
	fn post_hook_never_panics_on_failure() {
		run_post_hook("false");
	}
}
