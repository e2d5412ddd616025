use clap::Subcommand;
use miette::Result;

pub use context::Context;
pub mod context;

pub mod backup;
pub mod dedup;
pub mod restore;
pub mod schedule;
pub mod status;
pub mod verify;

use crate::args::Args;

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
	/// Run a one-shot backup
	Backup(backup::BackupArgs),
	/// Run the scheduler daemon against the loaded configuration
	Schedule(schedule::ScheduleArgs),
	/// Print last-backup times, manifest summaries, and destination sizes
	Status(status::StatusArgs),
	/// Restore files from a local, SSH, or object-store backup source
	Restore(restore::RestoreArgs),
	/// Verify backup integrity against the latest manifest
	Verify(verify::VerifyArgs),
	/// Deduplicate configured local destinations via hardlinking
	Dedup(dedup::DedupArgs),
}

pub async fn run(args: Args) -> Result<()> {
	let ctx = Context::new().with_top(args);
	let action = ctx.args_top.action.clone();
	match action {
		Action::Backup(sub) => backup::run(ctx.with_sub(sub)).await,
		Action::Schedule(sub) => schedule::run(ctx.with_sub(sub)).await,
		Action::Status(sub) => status::run(ctx.with_sub(sub)).await,
		Action::Restore(sub) => restore::run(ctx.with_sub(sub)).await,
		Action::Verify(sub) => verify::run(ctx.with_sub(sub)).await,
		Action::Dedup(sub) => dedup::run(ctx.with_sub(sub)).await,
	}
}
