use std::path::PathBuf;

use clap::Args as ClapArgs;
use miette::{miette, IntoDiagnostic, Result};

use crate::args::Args;
use crate::crypto::Credential;
use crate::model::{ObjectBucket, SshAuth};
use crate::objectstore;
use crate::restore_engine::{parse_restore_spec, restore, RestoreSource};

use super::Context;

#[derive(Debug, Clone, ClapArgs)]
pub struct RestoreArgs {
	/// Backup source: a directory, a .zip file, 'user@host:/path', or
	/// 's3://bucket/prefix'
	#[arg(long)]
	pub from: String,

	/// Directory to restore files into
	#[arg(long, value_hint = clap::ValueHint::DirPath)]
	pub to: PathBuf,

	/// Restore to this point in time (manifest timestamp), instead of the
	/// full latest tree
	#[arg(long)]
	pub at: Option<String>,

	/// Password for an SSH restore source
	#[arg(long)]
	pub ssh_password: Option<String>,

	/// Private key file for an SSH restore source
	#[arg(long, value_hint = clap::ValueHint::FilePath)]
	pub ssh_key: Option<PathBuf>,

	/// Passphrase for --ssh-key, if it is encrypted
	#[arg(long)]
	pub ssh_key_passphrase: Option<String>,

	/// Decrypt `.enc` files with this key file after materializing the source
	#[arg(long, value_hint = clap::ValueHint::FilePath)]
	pub decrypt_key_file: Option<PathBuf>,

	/// Decrypt `.enc` files with this passphrase after materializing the source
	#[arg(long)]
	pub decrypt_passphrase: Option<String>,
}

fn ssh_auth(args: &RestoreArgs) -> Result<Option<SshAuth>> {
	if let Some(path) = &args.ssh_key {
		return Ok(Some(SshAuth::PrivateKey {
			path: path.clone(),
			passphrase: args.ssh_key_passphrase.clone(),
		}));
	}
	if let Some(password) = &args.ssh_password {
		return Ok(Some(SshAuth::Password(password.clone())));
	}
	Ok(None)
}

fn decrypt_credential(args: &RestoreArgs) -> Result<Option<Credential>> {
	if let Some(path) = &args.decrypt_key_file {
		return Ok(Some(Credential::from_key_file(path).into_diagnostic()?));
	}
	Ok(args.decrypt_passphrase.clone().map(Credential::Passphrase))
}

pub async fn run(ctx: Context<Args, RestoreArgs>) -> Result<()> {
	let args = &ctx.args_sub;
	let source = parse_restore_spec(&args.from).into_diagnostic()?;
	let auth = ssh_auth(args)?;
	let credential = decrypt_credential(args)?;

	let scratch = tempfile::tempdir().into_diagnostic()?;

	// The restore engine's core is synchronous; object-store sources need an
	// async client, so we materialize them here and hand the engine a plain
	// local directory to restore from.
	let effective_source = if let RestoreSource::ObjectStore { bucket, prefix } = &source {
		let object_bucket = ObjectBucket {
			bucket: bucket.clone(),
			prefix: prefix.clone(),
			region: None,
			access_key: None,
			secret_key: None,
		};
		let client = objectstore::client_for(&object_bucket).await;
		objectstore::download_tree(&client, bucket, prefix, scratch.path())
			.await
			.into_diagnostic()?;
		RestoreSource::LocalDir(scratch.path().to_path_buf())
	} else {
		source
	};

	let restore_scratch = scratch.path().join("_restore_work");
	let ok = restore(
		&effective_source,
		&args.to,
		&restore_scratch,
		args.at.as_deref(),
		auth.as_ref(),
		credential.as_ref(),
	)
	.into_diagnostic()?;

	if !ok {
		return Err(miette!("restore completed with one or more verification failures"));
	}

	println!("restore complete: {}", args.to.display());
	Ok(())
}
