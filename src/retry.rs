use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// An explicit retry policy value, consumed by a small helper, replacing a
/// stateful retry decorator.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub attempts: u32,
	pub delay: Duration,
}

impl RetryPolicy {
	pub const fn new(attempts: u32, delay: Duration) -> Self {
		Self { attempts, delay }
	}
}

/// The policy the SFTP engine uses: 3 attempts, 2 second fixed spacing.
pub const SFTP_DEFAULT: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));

/// Call `f` up to `policy.attempts` times, sleeping `policy.delay` between
/// attempts, returning the first success or the final failure.
pub fn retry<T>(policy: RetryPolicy, mut f: impl FnMut() -> Result<T>) -> Result<T> {
	let mut last_err = None;
	for attempt in 1..=policy.attempts.max(1) {
		match f() {
			Ok(value) => return Ok(value),
			Err(err) => {
				debug!(attempt, attempts = policy.attempts, %err, "attempt failed");
				last_err = Some(err);
				if attempt < policy.attempts {
					std::thread::sleep(policy.delay);
				}
			}
		}
	}
	Err(last_err.expect("attempts.max(1) guarantees at least one iteration"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;
	use std::time::Duration as StdDuration;

	#[test]
	fn succeeds_on_second_attempt() {
		let calls = Cell::new(0);
		let policy = RetryPolicy::new(3, StdDuration::from_millis(1));
		let result: Result<u32> = retry(policy, || {
			let n = calls.get() + 1;
			calls.set(n);
			if n < 2 {
				Err(crate::error::Error::Other("transient".into()))
			} else {
				Ok(42)
			}
		});
		assert_eq!(result.unwrap(), 42);
		assert_eq!(calls.get(), 2);
	}

	#[test]
	fn exhausts_attempts_and_returns_last_error() {
		let calls = Cell::new(0);
		let policy = RetryPolicy::new(3, StdDuration::from_millis(1));
		let result: Result<()> = retry(policy, || {
			calls.set(calls.get() + 1);
			Err(crate::error::Error::Other("always fails".into()))
		});
		assert!(result.is_err());
		assert_eq!(calls.get(), 3);
	}
}
