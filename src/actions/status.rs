use clap::Args as ClapArgs;
use miette::{IntoDiagnostic, Result};

use crate::args::Args;
use crate::config::Config;
use crate::manifest::load_latest;
use crate::orchestrator::destination_size;
use crate::timestamps::TimestampStore;

use super::Context;

#[derive(Debug, Clone, ClapArgs)]
pub struct StatusArgs {}

pub async fn run(ctx: Context<Args, StatusArgs>) -> Result<()> {
	let config = Config::load(&ctx.args_top.config_path()).into_diagnostic()?;
	let timestamps = TimestampStore::new(ctx.args_top.project_root());

	println!("mode: {:?}", config.mode);
	println!("last backup: {}", format_epoch(timestamps.get_last_backup()));
	println!("last full backup: {}", format_epoch(timestamps.get_last_full_backup()));

	for dir in &config.backup_dirs {
		let size = destination_size(dir);
		println!("\ndestination: {}", dir.display());
		println!("  size on disk: {size} bytes");

		match load_latest(dir).into_diagnostic()? {
			Some(doc) => {
				println!(
					"  latest manifest: {} ({} copied, {} skipped, {} failed, {} bytes)",
					doc.timestamp, doc.files_copied, doc.files_skipped, doc.files_failed, doc.total_bytes,
				);
			}
			None => println!("  no manifest found"),
		}
	}

	if config.run_ssh {
		println!("\n{} SSH destination(s) configured", config.ssh_targets.len());
	}
	if config.run_s3 {
		if let Some(bucket) = &config.object_bucket {
			println!("object store destination: s3://{}/{}", bucket.bucket, bucket.prefix);
		}
	}

	Ok(())
}

fn format_epoch(epoch: u64) -> String {
	if epoch == 0 {
		return "never".to_string();
	}
	match chrono::DateTime::from_timestamp(epoch as i64, 0) {
		Some(dt) => dt.with_timezone(&chrono::Local).to_rfc3339(),
		None => epoch.to_string(),
	}
}
