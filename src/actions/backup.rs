use std::path::PathBuf;

use clap::{Args as ClapArgs, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing::info;

use crate::args::Args;
use crate::config::Config;
use crate::model::{BackupMode, CompressType};
use crate::orchestrator::Orchestrator;
use crate::timestamps::TimestampStore;

use super::Context;

#[derive(Debug, Clone, ClapArgs)]
pub struct BackupArgs {
	/// Override the configured backup mode for this run
	#[arg(long, value_enum)]
	pub mode: Option<CliBackupMode>,

	/// Override the configured compression mode for this run
	#[arg(long, value_enum)]
	pub compress: Option<CliCompressType>,

	/// Enumerate and plan the run without copying or uploading anything
	#[arg(long)]
	pub dry_run: bool,

	/// Override the configured source directory
	#[arg(long, value_hint = clap::ValueHint::DirPath)]
	pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum CliBackupMode {
	Full,
	Incremental,
	Differential,
}

impl From<CliBackupMode> for BackupMode {
	fn from(mode: CliBackupMode) -> Self {
		match mode {
			CliBackupMode::Full => BackupMode::Full,
			CliBackupMode::Incremental => BackupMode::Incremental,
			CliBackupMode::Differential => BackupMode::Differential,
		}
	}
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum CliCompressType {
	None,
	Zip,
	ZipPw,
}

impl From<CliCompressType> for CompressType {
	fn from(compress: CliCompressType) -> Self {
		match compress {
			CliCompressType::None => CompressType::None,
			CliCompressType::Zip => CompressType::Zip,
			CliCompressType::ZipPw => CompressType::ZipPw,
		}
	}
}

pub async fn run(ctx: Context<Args, BackupArgs>) -> Result<()> {
	let mut config = Config::load(&ctx.args_top.config_path()).into_diagnostic()?;

	if let Some(mode) = ctx.args_sub.mode {
		config.mode = mode.into();
	}
	if let Some(compress) = ctx.args_sub.compress {
		config.compress_type = compress.into();
	}
	if let Some(source) = &ctx.args_sub.source {
		config.source_dir = source.clone();
	}

	let timestamps = TimestampStore::new(ctx.args_top.project_root());
	let orchestrator = Orchestrator::new(&config, timestamps);

	let manifest = orchestrator.run(ctx.args_sub.dry_run).await.into_diagnostic()?;
	let (copied, skipped, failed) = manifest.counts();

	info!(copied, skipped, failed, dry_run = ctx.args_sub.dry_run, "backup run complete");
	println!("backup complete: {copied} copied, {skipped} skipped, {failed} failed");

	if failed > 0 {
		std::process::exit(1);
	}

	Ok(())
}
