use std::fs;
use std::path::{Path, PathBuf};

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::model::{BackupMode, ObjectBucket, SourceEntry};

/// Build an S3 client from an [`ObjectBucket`]'s static credentials, or fall
/// back to ambient credentials/region when none are given.
pub async fn client_for(bucket: &ObjectBucket) -> S3Client {
	let mut loader = aws_config::defaults(BehaviorVersion::v2023_11_09());

	if let (Some(key), Some(secret)) = (&bucket.access_key, &bucket.secret_key) {
		loader = loader.credentials_provider(Credentials::from_keys(key, secret, None));
	}
	if let Some(region) = &bucket.region {
		loader = loader.region(Region::new(region.clone()));
	}

	let config = loader.load().await;
	S3Client::new(&config)
}

/// `prefix + "/" + relpath`, normalised to forward slashes regardless of
/// host OS.
pub fn object_key(prefix: &str, relative: &Path) -> String {
	let rel = relative.to_string_lossy().replace('\\', "/");
	let prefix = prefix.trim_end_matches('/');
	if prefix.is_empty() {
		rel
	} else {
		format!("{prefix}/{rel}")
	}
}

async fn should_upload(client: &S3Client, bucket: &str, key: &str, mode: BackupMode, local_epoch: u64) -> UploadDecision {
	if mode == BackupMode::Full {
		return UploadDecision::Upload;
	}

	match client.head_object().bucket(bucket).key(key).send().await {
		Ok(head) => {
			let remote_epoch = head
				.last_modified()
				.and_then(|t| t.secs().try_into().ok())
				.unwrap_or(0);
			if local_epoch > remote_epoch {
				UploadDecision::Upload
			} else {
				UploadDecision::Skip
			}
		}
		Err(err) => {
			if is_not_found(&err) {
				UploadDecision::Upload
			} else {
				UploadDecision::Error(err.to_string())
			}
		}
	}
}

enum UploadDecision {
	Upload,
	Skip,
	Error(String),
}

fn is_not_found<E: std::fmt::Debug>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
	// Service errors surface the HTTP status; a 404-class response means
	// "object does not exist yet", which is an upload decision, not a
	// failure. Anything else (auth, network, 5xx) is a real per-file error.
	match err {
		aws_sdk_s3::error::SdkError::ServiceError(service_err) => {
			service_err.raw().status().as_u16() == 404
		}
		_ => false,
	}
}

/// Upload every entry under `local_root` to `bucket`, applying the mode
/// predicate via [`should_upload`] and recording each outcome into
/// `manifest`. Uploads run sequentially against one client (one uploader per
/// sink; the SDK pools connections internally).
pub async fn sync_to_object_store(
	client: &S3Client,
	bucket: &ObjectBucket,
	local_root: &Path,
	mode: BackupMode,
	entries: &[SourceEntry],
	manifest: &Manifest,
) {
	for entry in entries {
		let rel = entry.relative_path.to_string_lossy().into_owned();
		let key = object_key(&bucket.prefix, &entry.relative_path);
		let local_epoch = crate::model::epoch_secs(entry.mtime);

		match should_upload(client, &bucket.bucket, &key, mode, local_epoch).await {
			UploadDecision::Skip => {
				manifest.record_skip(rel);
				continue;
			}
			UploadDecision::Error(reason) => {
				manifest.record_failure(rel, reason);
				continue;
			}
			UploadDecision::Upload => {}
		}

		let path = local_root.join(&entry.relative_path);
		let body = match ByteStream::from_path(&path).await {
			Ok(body) => body,
			Err(err) => {
				manifest.record_failure(rel, err.to_string());
				continue;
			}
		};

		debug!(bucket = %bucket.bucket, key, "uploading object");
		match client
			.put_object()
			.bucket(&bucket.bucket)
			.key(&key)
			.body(body)
			.send()
			.await
		{
			Ok(_) => manifest.record_copy(rel, entry.size),
			Err(err) => {
				warn!(bucket = %bucket.bucket, key, %err, "put_object failed");
				manifest.record_failure(rel, err.to_string());
			}
		}
	}
}

/// Download every object under `prefix` in `bucket` into `local_root`,
/// recreating the key's path structure relative to the prefix. Used by the
/// restore path, which needs an async client the engine's sync core can't
/// hold.
pub async fn download_tree(client: &S3Client, bucket: &str, prefix: &str, local_root: &Path) -> Result<()> {
	let prefix_with_slash = if prefix.is_empty() || prefix.ends_with('/') {
		prefix.to_string()
	} else {
		format!("{prefix}/")
	};

	let mut continuation_token: Option<String> = None;
	loop {
		let mut request = client.list_objects_v2().bucket(bucket).prefix(prefix_with_slash.as_str());
		if let Some(token) = &continuation_token {
			request = request.continuation_token(token.as_str());
		}
		let response = request
			.send()
			.await
			.map_err(|err| Error::ObjectStore(err.to_string()))?;

		for object in response.contents() {
			let Some(key) = object.key() else { continue };
			let relative = key.strip_prefix(&prefix_with_slash).unwrap_or(key);
			if relative.is_empty() {
				continue;
			}

			let dest: PathBuf = local_root.join(relative);
			if let Some(parent) = dest.parent() {
				fs::create_dir_all(parent)?;
			}

			debug!(bucket, key, "downloading object");
			let object_output = client
				.get_object()
				.bucket(bucket)
				.key(key)
				.send()
				.await
				.map_err(|err| Error::ObjectStore(err.to_string()))?;
			let bytes = object_output
				.body
				.collect()
				.await
				.map_err(|err| Error::ObjectStore(err.to_string()))?
				.into_bytes();
			fs::write(&dest, &bytes)?;
		}

		if response.is_truncated().unwrap_or(false) {
			continuation_token = response.next_continuation_token().map(str::to_string);
		} else {
			break;
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	#[test]
	fn object_key_joins_with_forward_slash() {
		let key = object_key("backups/daily", &PathBuf::from("b/c.txt"));
		assert_eq!(key, "backups/daily/b/c.txt");
	}

	#[test]
	fn object_key_handles_empty_prefix() {
		let key = object_key("", &PathBuf::from("a.txt"));
		assert_eq!(key, "a.txt");
	}

	#[test]
	fn object_key_strips_trailing_slash_from_prefix() {
		let key = object_key("backups/", &PathBuf::from("a.txt"));
		assert_eq!(key, "backups/a.txt");
	}
}
