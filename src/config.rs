use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::{Error, Result};
use crate::model::{BackupMode, CompressType, ObjectBucket, SftpTarget, SshAuth};

#[derive(Debug, Clone)]
pub struct Config {
	pub source_dir: PathBuf,
	pub mode: BackupMode,
	pub compress_type: CompressType,
	pub exclude_patterns: Vec<String>,
	pub parallel_copies: usize,

	pub backup_dirs: Vec<PathBuf>,
	pub ssh_targets: Vec<SftpTarget>,
	pub object_bucket: Option<ObjectBucket>,

	pub run_local: bool,
	pub run_ssh: bool,
	pub run_s3: bool,
	pub run_db: bool,
	pub db_dump_command: Option<String>,

	pub schedule_times: Vec<String>,

	pub max_age_days: u64,
	pub max_count: usize,

	pub encryption_enabled: bool,
	pub key_file: Option<PathBuf>,
	pub passphrase: Option<String>,

	pub pre_backup_hook: Option<String>,
	pub post_backup_hook: Option<String>,

	pub dedup_enabled: bool,
}

impl Config {
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path)?;
		let substituted = substitute_env_vars(&raw)?;
		let ini = Ini::load_from_str(&substituted).map_err(|e| Error::Config {
			section: "(file)".into(),
			key: "(parse)".into(),
			message: e.to_string(),
		})?;

		let default = ini.section(Some("DEFAULT"));
		let source_dir = get_required(&ini, "DEFAULT", "source_dir")?;

		let mode = match default.and_then(|s| s.get("mode")).unwrap_or("full") {
			"full" => BackupMode::Full,
			"incremental" => BackupMode::Incremental,
			"differential" => BackupMode::Differential,
			other => {
				return Err(Error::Config {
					section: "DEFAULT".into(),
					key: "mode".into(),
					message: format!("unknown mode '{other}'"),
				})
			}
		};

		let compress_type = match default.and_then(|s| s.get("compress_type")).unwrap_or("none") {
			"none" => CompressType::None,
			"zip" => CompressType::Zip,
			"zip_pw" => CompressType::ZipPw,
			other => {
				return Err(Error::Config {
					section: "DEFAULT".into(),
					key: "compress_type".into(),
					message: format!("unknown compress_type '{other}'"),
				})
			}
		};

		let exclude_patterns = default
			.and_then(|s| s.get("exclude_patterns"))
			.map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
			.unwrap_or_default();

		let parallel_copies = default
			.and_then(|s| s.get("parallel_copies"))
			.map(|s| s.parse::<usize>())
			.transpose()
			.map_err(|_| Error::Config {
				section: "DEFAULT".into(),
				key: "parallel_copies".into(),
				message: "must be a positive integer".into(),
			})?
			.unwrap_or(1)
			.max(1);

		let backup_dirs = ini
			.section(Some("BACKUPS"))
			.and_then(|s| s.get("backup_dirs"))
			.map(|s| s.split(',').map(|p| PathBuf::from(p.trim())).filter(|p| !p.as_os_str().is_empty()).collect())
			.unwrap_or_default();

		let ssh_targets = parse_ssh_section(&ini, Path::new(&source_dir))?;
		let object_bucket = parse_s3_section(&ini);

		let modes = ini.section(Some("MODES"));
		let run_local = modes.and_then(|s| s.get("local")).map(parse_bool).unwrap_or(true);
		let run_ssh = modes.and_then(|s| s.get("ssh")).map(parse_bool).unwrap_or(false);
		let run_s3 = modes.and_then(|s| s.get("s3")).map(parse_bool).unwrap_or(false);
		let run_db = modes.and_then(|s| s.get("db")).map(parse_bool).unwrap_or(false);

		let schedule_times = ini
			.section(Some("SCHEDULE"))
			.and_then(|s| s.get("times"))
			.map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
			.unwrap_or_default();

		let retention = ini.section(Some("RETENTION"));
		let max_age_days = retention
			.and_then(|s| s.get("max_age_days"))
			.and_then(|s| s.parse().ok())
			.unwrap_or(0);
		let max_count = retention
			.and_then(|s| s.get("max_count"))
			.and_then(|s| s.parse().ok())
			.unwrap_or(0);

		let encryption = ini.section(Some("ENCRYPTION"));
		let encryption_enabled = encryption.and_then(|s| s.get("enabled")).map(parse_bool).unwrap_or(false);
		let key_file = encryption.and_then(|s| s.get("key_file")).map(PathBuf::from);
		let passphrase = encryption.and_then(|s| s.get("passphrase")).map(|s| s.to_string());

		let hooks = ini.section(Some("HOOKS"));
		let pre_backup_hook = hooks.and_then(|s| s.get("pre_backup")).map(|s| s.to_string());
		let post_backup_hook = hooks.and_then(|s| s.get("post_backup")).map(|s| s.to_string());
		let db_dump_command = hooks.and_then(|s| s.get("db_dump")).map(|s| s.to_string());

		let dedup_enabled = default.and_then(|s| s.get("dedup")).map(parse_bool).unwrap_or(false);

		for email in ini
			.section(Some("NOTIFICATIONS"))
			.and_then(|s| s.get("receiver_emails"))
			.map(|s| s.split(',').map(|e| e.trim().to_string()).filter(|e| !e.is_empty()).collect::<Vec<_>>())
			.unwrap_or_default()
		{
			if !is_valid_email(&email) {
				return Err(Error::Config {
					section: "NOTIFICATIONS".into(),
					key: "receiver_emails".into(),
					message: format!("invalid email address '{email}'"),
				});
			}
		}

		Ok(Config {
			source_dir: PathBuf::from(source_dir),
			mode,
			compress_type,
			exclude_patterns,
			parallel_copies,
			backup_dirs,
			ssh_targets,
			object_bucket,
			run_local,
			run_ssh,
			run_s3,
			run_db,
			db_dump_command,
			schedule_times,
			max_age_days,
			max_count,
			encryption_enabled,
			key_file,
			passphrase,
			pre_backup_hook,
			post_backup_hook,
			dedup_enabled,
		})
	}
}

fn get_required(ini: &Ini, section: &str, key: &str) -> Result<String> {
	ini.section(Some(section))
		.and_then(|s| s.get(key))
		.map(|s| s.to_string())
		.ok_or_else(|| Error::Config {
			section: section.into(),
			key: key.into(),
			message: "required but missing".into(),
		})
}

fn parse_bool(s: &str) -> bool {
	matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Derives each SFTP target's remote root: an explicit `SSH.remote_root`
/// override if configured, otherwise the local `source_dir` mirrored
/// verbatim onto the remote host (matching the original implementation's
/// `remote_path = source_dir`, not a bare `/`).
fn parse_ssh_section(ini: &Ini, source_dir: &Path) -> Result<Vec<SftpTarget>> {
	let Some(section) = ini.section(Some("SSH")) else {
		return Ok(Vec::new());
	};
	let Some(servers) = section.get("ssh_servers") else {
		return Ok(Vec::new());
	};

	let username = section.get("username").unwrap_or("").to_string();
	let password = section.get("password").map(|s| s.to_string());
	let bandwidth = section
		.get("bandwidth_limit")
		.and_then(|s| s.parse().ok())
		.unwrap_or(0u64);
	let remote_root = section
		.get("remote_root")
		.map(PathBuf::from)
		.unwrap_or_else(|| source_dir.to_path_buf());

	let mut targets = Vec::new();
	for server in servers.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
		let (host, port) = server.split_once(':').map(|(h, p)| (h, p.parse().unwrap_or(22))).unwrap_or((server, 22));
		let auth = match &password {
			Some(pw) => SshAuth::Password(pw.clone()),
			None => {
				return Err(Error::Config {
					section: "SSH".into(),
					key: "password".into(),
					message: "no password or private key configured".into(),
				})
			}
		};
		targets.push(SftpTarget {
			host: host.to_string(),
			port,
			user: username.clone(),
			auth,
			remote_root: remote_root.clone(),
			bandwidth_limit_kbps: bandwidth,
		});
	}
	Ok(targets)
}

fn parse_s3_section(ini: &Ini) -> Option<ObjectBucket> {
	let section = ini.section(Some("S3"))?;
	let bucket = section.get("bucket")?.to_string();
	Some(ObjectBucket {
		bucket,
		prefix: section.get("prefix").unwrap_or("").to_string(),
		region: section.get("region").map(|s| s.to_string()),
		access_key: section.get("access_key").map(|s| s.to_string()),
		secret_key: section.get("secret_key").map(|s| s.to_string()),
	})
}

/// Substitute every `${ENV_VAR}` placeholder from the process environment.
/// An unresolved variable is a startup failure naming the variable.
fn substitute_env_vars(input: &str) -> Result<String> {
	let mut out = String::with_capacity(input.len());
	let mut rest = input;
	while let Some(start) = rest.find("${") {
		out.push_str(&rest[..start]);
		let after = &rest[start + 2..];
		let Some(end) = after.find('}') else {
			out.push_str(&rest[start..]);
			break;
		};
		let var_name = &after[..end];
		let value = std::env::var(var_name).map_err(|_| Error::Config {
			section: "(env)".into(),
			key: var_name.into(),
			message: "referenced environment variable is not set".into(),
		})?;
		out.push_str(&value);
		rest = &after[end + 1..];
	}
	out.push_str(rest);
	Ok(out)
}

/// A deliberately small RFC-lite email check, matching the shape of the
/// original implementation's validation without pulling in a dedicated
/// email-address crate for one predicate.
fn is_valid_email(address: &str) -> bool {
	let Some((local, domain)) = address.split_once('@') else {
		return false;
	};
	!local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}
