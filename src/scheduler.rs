use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, Timelike};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::timestamps::TimestampStore;

/// How often the tick loop wakes up to check scheduled times.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// A scheduled time counts as "arrived" within this many seconds either
/// side of its HH:MM:00.
const TOLERANCE_SECS: i64 = 30;

/// Install a `Ctrl-C`/terminate handler that flips a shared flag instead of
/// exiting the process, so the current tick can finish before the loop
/// exits.
pub fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
	let shutdown = Arc::new(AtomicBool::new(false));
	let flag = shutdown.clone();
	ctrlc::set_handler(move || {
		info!("shutdown signal received, finishing current tick then exiting");
		flag.store(true, Ordering::SeqCst);
	})
	.map_err(|err| Error::Other(format!("failed to install signal handler: {err}")))?;
	Ok(shutdown)
}

/// Parse an `HH:MM` string from `SCHEDULE.times`. Invalid entries are a
/// configuration error naming the offending value.
fn parse_hhmm(spec: &str) -> Result<NaiveTime> {
	NaiveTime::parse_from_str(spec, "%H:%M").map_err(|_| Error::Config {
		section: "SCHEDULE".into(),
		key: "times".into(),
		message: format!("invalid HH:MM time '{spec}'"),
	})
}

/// Whether `now` is within [`TOLERANCE_SECS`] of today's occurrence of
/// `scheduled`.
fn within_tolerance(now: chrono::DateTime<Local>, scheduled: NaiveTime) -> bool {
	let today_scheduled = now
		.date_naive()
		.and_hms_opt(scheduled.hour(), scheduled.minute(), 0)
		.expect("hour/minute from a valid NaiveTime are always valid");
	let diff = (now.naive_local() - today_scheduled).num_seconds();
	diff.abs() <= TOLERANCE_SECS
}

/// Run the scheduler's tick loop until `shutdown` is set.
///
/// Every [`TICK_INTERVAL`], for each configured `HH:MM`, fires a backup run
/// if the wall clock is within [`TOLERANCE_SECS`] of it. A tick that takes
/// longer than the tolerance window can cause a slot to fire twice, or not
/// at all if a previous tick overran past it; this mirrors the reference
/// behaviour (see SPEC_FULL's open question on this) rather than trying to
/// de-duplicate fires across ticks.
pub async fn run_loop(config: &Config, timestamps: TimestampStore, shutdown: Arc<AtomicBool>) -> Result<()> {
	let mut times = Vec::with_capacity(config.schedule_times.len());
	for spec in &config.schedule_times {
		times.push((spec.clone(), parse_hhmm(spec)?));
	}

	if times.is_empty() {
		warn!("no SCHEDULE.times configured, scheduler will idle until shut down");
	}

	info!(times = ?config.schedule_times, "scheduler started");

	while !shutdown.load(Ordering::SeqCst) {
		let now = Local::now();
		for (spec, scheduled) in &times {
			if within_tolerance(now, *scheduled) {
				info!(time = spec, "scheduled time arrived, firing backup run");
				let orchestrator = Orchestrator::new(config, timestamps.clone());
				match orchestrator.run(false).await {
					Ok(manifest) => {
						let (copied, skipped, failed) = manifest.counts();
						info!(copied, skipped, failed, "scheduled run finished");
					}
					Err(err) => warn!(%err, "scheduled run failed"),
				}
			}
		}

		tokio::time::sleep(TICK_INTERVAL).await;
	}

	info!("scheduler shutting down");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn parses_valid_hhmm() {
		assert!(parse_hhmm("09:30").is_ok());
		assert!(parse_hhmm("23:59").is_ok());
	}

	#[test]
	fn rejects_invalid_hhmm() {
		assert!(parse_hhmm("25:00").is_err());
		assert!(parse_hhmm("not-a-time").is_err());
	}

	#[test]
	fn exact_match_is_within_tolerance() {
		let scheduled = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
		let now = Local.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
		assert!(within_tolerance(now, scheduled));
	}

	#[test]
	fn just_inside_window_matches() {
		let scheduled = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
		let now = Local.with_ymd_and_hms(2024, 1, 1, 9, 0, 29).unwrap();
		assert!(within_tolerance(now, scheduled));
	}

	#[test]
	fn outside_window_does_not_match() {
		let scheduled = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
		let now = Local.with_ymd_and_hms(2024, 1, 1, 9, 2, 0).unwrap();
		assert!(!within_tolerance(now, scheduled));
	}
}
