use clap::Args as ClapArgs;
use miette::{IntoDiagnostic, Result};
use tracing::info;

use crate::args::Args;
use crate::config::Config;
use crate::lock::{lock_file_path, LockFile};
use crate::scheduler;
use crate::timestamps::TimestampStore;

use super::Context;

#[derive(Debug, Clone, ClapArgs)]
pub struct ScheduleArgs {}

pub async fn run(ctx: Context<Args, ScheduleArgs>) -> Result<()> {
	let config = Config::load(&ctx.args_top.config_path()).into_diagnostic()?;
	let project_root = ctx.args_top.project_root();

	let lock = LockFile::acquire(lock_file_path(&project_root)).into_diagnostic()?;
	info!("scheduler lock acquired, entering tick loop");

	let shutdown = scheduler::install_shutdown_handler().into_diagnostic()?;
	let timestamps = TimestampStore::new(project_root.clone());

	let result = scheduler::run_loop(&config, timestamps, shutdown).await;

	lock.release();
	result.into_diagnostic()
}
