use std::path::PathBuf;

use clap::Args as ClapArgs;
use miette::{miette, IntoDiagnostic, Result};

use crate::args::Args;
use crate::config::Config;
use crate::crypto::Credential;
use crate::verify_engine::verify_backup_integrity;

use super::Context;

#[derive(Debug, Clone, ClapArgs)]
pub struct VerifyArgs {
	/// Decrypt `.enc` files with this key file before comparing sizes
	#[arg(long, value_hint = clap::ValueHint::FilePath, conflicts_with = "passphrase")]
	pub key_file: Option<PathBuf>,

	/// Decrypt `.enc` files with this passphrase before comparing sizes
	#[arg(long)]
	pub passphrase: Option<String>,
}

pub async fn run(ctx: Context<Args, VerifyArgs>) -> Result<()> {
	let config = Config::load(&ctx.args_top.config_path()).into_diagnostic()?;

	let credential = if let Some(path) = &ctx.args_sub.key_file {
		Some(Credential::from_key_file(path).into_diagnostic()?)
	} else {
		ctx.args_sub.passphrase.clone().map(Credential::Passphrase)
	};

	let report = verify_backup_integrity(&config.backup_dirs, credential.as_ref()).into_diagnostic()?;

	for dir_report in &report.directories {
		println!("{}:", dir_report.directory.display());
		println!(
			"  verified={} missing={} corrupted={} errors={}",
			dir_report.counts.verified, dir_report.counts.missing, dir_report.counts.corrupted, dir_report.counts.errors
		);
		for line in &dir_report.details {
			println!("  {line}");
		}
	}

	println!(
		"\noverall: verified={} missing={} corrupted={} errors={}",
		report.overall.verified, report.overall.missing, report.overall.corrupted, report.overall.errors
	);

	if report.overall.missing > 0 || report.overall.corrupted > 0 || report.overall.errors > 0 {
		return Err(miette!("backup verification found problems"));
	}

	Ok(())
}
