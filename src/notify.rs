use tracing::{info, warn};

use crate::error::Result;

/// A notable event during a run, handed to every configured sink.
#[derive(Debug, Clone)]
pub enum RunEvent {
	Started { mode: &'static str },
	Finished {
		mode: &'static str,
		copied: usize,
		skipped: usize,
		failed: usize,
	},
	SinkFailed { sink: String, reason: String },
}

/// Capability-set replacement for ad-hoc notification if-branching: the
/// orchestrator holds only this interface, never a concrete delivery client.
pub trait NotificationSink: Send + Sync {
	fn notify(&self, event: &RunEvent) -> Result<()>;
}

/// The only concrete sink shipped: structured logging. Email and chat-bot
/// delivery are external collaborators per the scope notes; they would
/// implement this same trait.
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
	fn notify(&self, event: &RunEvent) -> Result<()> {
		match event {
			RunEvent::Started { mode } => info!(mode, "backup run started"),
			RunEvent::Finished {
				mode,
				copied,
				skipped,
				failed,
			} => info!(mode, copied, skipped, failed, "backup run finished"),
			RunEvent::SinkFailed { sink, reason } => warn!(sink, reason, "destination sink failed"),
		}
		Ok(())
	}
}

pub fn default_sinks() -> Vec<Box<dyn NotificationSink>> {
	vec![Box::new(LogNotificationSink)]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn log_sink_accepts_every_event_kind() {
		let sink = LogNotificationSink;
		assert!(sink.notify(&RunEvent::Started { mode: "full" }).is_ok());
		assert!(sink
			.notify(&RunEvent::Finished {
				mode: "full",
				copied: 1,
				skipped: 0,
				failed: 0
			})
			.is_ok());
		assert!(sink
			.notify(&RunEvent::SinkFailed {
				sink: "sftp:host".into(),
				reason: "timeout".into()
			})
			.is_ok());
	}
}
