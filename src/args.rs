use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Multi-destination file-tree backup engine.
#[derive(Debug, Clone, Parser)]
#[command(
	author,
	version,
	after_help = "Want more detail? Try the long '--help' flag!",
	after_long_help = "Didn't expect this much output? Use the short '-h' flag to get short help.",
)]
#[cfg_attr(debug_assertions, command(before_help = "⚠ DEBUG BUILD ⚠"))]
pub struct Args {
	/// When to use terminal colours
	#[arg(long, default_value = "auto", value_name = "MODE", alias = "colour")]
	pub color: ColourMode,

	/// Set diagnostic log level
	///
	/// This enables diagnostic logging, which is useful for investigating bugs. Use multiple
	/// times to increase verbosity. Goes up to '-vvvvv'.
	///
	/// You may want to use with '--log-file' to avoid polluting your terminal.
	///
	/// Setting $RUST_LOG also works, and takes precedence, but is not recommended unless you know
	/// what you're doing.
	#[arg(
		long,
		short,
		action = ArgAction::Count,
		num_args = 0,
		global = true,
	)]
	pub verbose: Option<u8>,

	/// Write diagnostic logs to a file, in JSON format, instead of the terminal
	#[arg(
		long,
		num_args = 0..=1,
		default_missing_value = ".",
		value_hint = ValueHint::AnyPath,
		value_name = "PATH",
		global = true,
	)]
	pub log_file: Option<PathBuf>,

	/// Path to the INI configuration file
	///
	/// Defaults to './vaultkeep.ini', then '$XDG_CONFIG_HOME/vaultkeep/vaultkeep.ini'.
	#[arg(long, short, value_hint = ValueHint::FilePath, global = true)]
	pub config: Option<PathBuf>,

	/// What to do
	#[command(subcommand)]
	pub action: crate::actions::Action,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ColourMode {
	Auto,
	Always,
	Never,
}

impl Args {
	/// Resolve the configuration file path: the explicit `--config` flag, or
	/// `./vaultkeep.ini`, or `$XDG_CONFIG_HOME/vaultkeep/vaultkeep.ini`.
	pub fn config_path(&self) -> PathBuf {
		if let Some(path) = &self.config {
			return path.clone();
		}

		let local = PathBuf::from("vaultkeep.ini");
		if local.is_file() {
			return local;
		}

		if let Some(config_dir) = dirs::config_dir() {
			return config_dir.join("vaultkeep").join("vaultkeep.ini");
		}

		local
	}

	/// Directory the lock file and other run-scoped state live under: the
	/// parent of the resolved config file, or the current directory.
	pub fn project_root(&self) -> PathBuf {
		self.config_path()
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.map(|p| p.to_path_buf())
			.unwrap_or_else(|| PathBuf::from("."))
	}
}

/// Parse CLI arguments and initialise tracing. Returns the guard that keeps
/// a non-blocking file writer alive for the program's lifetime.
pub fn get_args() -> miette::Result<(Args, Option<WorkerGuard>)> {
	debug!("parsing arguments");
	let args = Args::parse();

	let level = match args.verbose.unwrap_or(0) {
		0 if args.log_file.is_some() => "info,vaultkeep=debug",
		0 => "warn,vaultkeep=info",
		1 => "info,vaultkeep=debug",
		2 => "debug",
		3 => "debug,vaultkeep=trace",
		_ => "trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

	let guard = if let Some(path) = &args.log_file {
		let (dir, prefix) = if path.is_dir() || path.as_os_str() == "." {
			(path.clone(), "vaultkeep.log".to_string())
		} else {
			(
				path.parent().map(|p| p.to_path_buf()).unwrap_or_default(),
				path.file_name()
					.map(|n| n.to_string_lossy().into_owned())
					.unwrap_or_else(|| "vaultkeep.log".to_string()),
			)
		};
		let file_appender = tracing_appender::rolling::never(dir, prefix);
		let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
		tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
			.init();
		Some(guard)
	} else {
		let ansi = match args.color {
			ColourMode::Auto => atty_stdout(),
			ColourMode::Always => true,
			ColourMode::Never => false,
		};
		tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().with_ansi(ansi))
			.init();
		None
	};

	debug!(?args, "got arguments");
	Ok((args, guard))
}

fn atty_stdout() -> bool {
	use std::io::IsTerminal;
	std::io::stdout().is_terminal()
}

#[test]
fn verify_cli() {
	use clap::CommandFactory;
	Args::command().debug_assert()
}
