use clap::Args as ClapArgs;
use miette::{IntoDiagnostic, Result};

use crate::args::Args;
use crate::config::Config;
use crate::dedup::deduplicate_backup_dirs;

use super::Context;

#[derive(Debug, Clone, ClapArgs)]
pub struct DedupArgs {}

pub async fn run(ctx: Context<Args, DedupArgs>) -> Result<()> {
	let config = Config::load(&ctx.args_top.config_path()).into_diagnostic()?;

	let summary = deduplicate_backup_dirs(&config.backup_dirs);

	println!(
		"dedup complete: {} files checked, {} duplicates found, {} bytes saved",
		summary.files_checked, summary.duplicates_found, summary.bytes_saved
	);

	Ok(())
}
