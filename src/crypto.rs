use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::Hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::manifest::is_manifest_name;
use crate::secrets::SecretStore;

pub const SALT_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;
pub const KEY_SIZE: usize = 32;
const PBKDF2_ITERATIONS: u32 = 600_000;

/// A credential for encryption/decryption: either a passphrase (salted with
/// a fresh random salt per file) or a raw 32-byte key (salt field zero-filled
/// and ignored on decrypt).
#[derive(Clone)]
pub enum Credential {
	Passphrase(String),
	RawKey([u8; KEY_SIZE]),
}

impl Credential {
	pub fn from_key_file(path: &Path) -> Result<Self> {
		let bytes = fs::read(path)?;
		if bytes.len() != KEY_SIZE {
			return Err(Error::Encryption(format!(
				"key file must be exactly {KEY_SIZE} bytes, got {}",
				bytes.len()
			)));
		}
		let mut key = [0u8; KEY_SIZE];
		key.copy_from_slice(&bytes);
		Ok(Credential::RawKey(key))
	}

	/// Build a passphrase credential from a [`SecretStore`] lookup rather
	/// than a raw string, so a CLI-supplied passphrase passes through the
	/// same secret-handling path as a `--key-file` credential's bytes.
	pub fn from_secret_store(store: &dyn SecretStore, id: &str) -> Option<Self> {
		store.get(id).map(|secret| Credential::Passphrase(secret.expose().to_string()))
	}
}

/// PBKDF2-HMAC-SHA256, 600,000 iterations, 32-byte output.
pub fn derive_key(passphrase: &str, salt: &[u8; SALT_SIZE]) -> [u8; KEY_SIZE] {
	let mut key = [0u8; KEY_SIZE];
	pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key)
		.expect("HMAC can be initialised with any key length");
	key
}

fn key_and_salt(credential: &Credential) -> ([u8; KEY_SIZE], [u8; SALT_SIZE]) {
	match credential {
		Credential::RawKey(key) => (*key, [0u8; SALT_SIZE]),
		Credential::Passphrase(passphrase) => {
			let mut salt = [0u8; SALT_SIZE];
			rand::thread_rng().fill_bytes(&mut salt);
			(derive_key(passphrase, &salt), salt)
		}
	}
}

/// Encrypt `path` in place: writes `path.enc` with layout
/// `salt(16) || nonce(12) || ciphertext||tag`, then deletes the plaintext
/// original only after the `.enc` write succeeds.
pub fn encrypt_file(path: &Path, credential: &Credential) -> Result<PathBuf> {
	let plaintext = fs::read(path)?;
	let (key, salt) = key_and_salt(credential);

	let mut nonce_bytes = [0u8; NONCE_SIZE];
	rand::thread_rng().fill_bytes(&mut nonce_bytes);

	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
	let nonce = Nonce::from_slice(&nonce_bytes);
	let ciphertext = cipher
		.encrypt(nonce, plaintext.as_ref())
		.map_err(|e| Error::Encryption(e.to_string()))?;

	let mut out = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
	out.extend_from_slice(&salt);
	out.extend_from_slice(&nonce_bytes);
	out.extend_from_slice(&ciphertext);

	let dest = enc_path(path);
	fs::write(&dest, out)?;
	fs::remove_file(path)?;
	Ok(dest)
}

/// Inverse of [`encrypt_file`]. Strips the `.enc` suffix to name the output.
pub fn decrypt_file(path: &Path, credential: &Credential) -> Result<PathBuf> {
	decrypt_file_to(path, credential, &plain_path(path))
}

/// Like [`decrypt_file`] but writes to an explicit destination, used by the
/// verify engine to decrypt into a scratch location without disturbing the
/// backup tree.
pub fn decrypt_file_to(path: &Path, credential: &Credential, dest: &Path) -> Result<PathBuf> {
	let data = fs::read(path)?;
	if data.len() < SALT_SIZE + NONCE_SIZE {
		return Err(Error::Encryption("encrypted file too short".into()));
	}
	let (salt_bytes, rest) = data.split_at(SALT_SIZE);
	let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

	let key = match credential {
		Credential::RawKey(key) => *key,
		Credential::Passphrase(passphrase) => {
			let mut salt = [0u8; SALT_SIZE];
			salt.copy_from_slice(salt_bytes);
			derive_key(passphrase, &salt)
		}
	};

	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
	let nonce = Nonce::from_slice(nonce_bytes);
	let plaintext = cipher
		.decrypt(nonce, ciphertext)
		.map_err(|e| Error::Encryption(e.to_string()))?;

	if let Some(parent) = dest.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(dest, plaintext)?;
	Ok(dest.to_path_buf())
}

/// Decrypt `path` and remove the `.enc` file, matching [`encrypt_file`]'s
/// delete-original-after-success behaviour.
pub fn decrypt_file_in_place(path: &Path, credential: &Credential) -> Result<PathBuf> {
	let dest = decrypt_file(path, credential)?;
	fs::remove_file(path)?;
	Ok(dest)
}

fn enc_path(path: &Path) -> PathBuf {
	let mut name = path.as_os_str().to_os_string();
	name.push(".enc");
	PathBuf::from(name)
}

fn plain_path(path: &Path) -> PathBuf {
	match path.extension() {
		Some(ext) if ext == "enc" => path.with_extension(""),
		_ => path.to_path_buf(),
	}
}

/// Walk `dir` encrypting every regular file, skipping `.enc` files and
/// manifest documents.
pub fn encrypt_directory(dir: &Path, credential: &Credential) -> Result<Vec<PathBuf>> {
	let mut out = Vec::new();
	for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
		if !entry.file_type().is_file() {
			continue;
		}
		if should_skip_for_crypto(entry.path()) {
			continue;
		}
		out.push(encrypt_file(entry.path(), credential)?);
	}
	Ok(out)
}

pub fn decrypt_directory(dir: &Path, credential: &Credential) -> Result<Vec<PathBuf>> {
	let mut out = Vec::new();
	for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
		if !entry.file_type().is_file() {
			continue;
		}
		if entry.path().extension().map(|e| e == "enc").unwrap_or(false) {
			out.push(decrypt_file_in_place(entry.path(), credential)?);
		}
	}
	Ok(out)
}

fn should_skip_for_crypto(path: &Path) -> bool {
	let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
	name.ends_with(".enc") || is_manifest_name(name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::secrets::{MemorySecretStore, SecretString};
	use tempfile::tempdir;

	#[test]
	fn from_secret_store_builds_passphrase_credential() {
		let mut store = MemorySecretStore::default();
		store.put("encryption-passphrase", SecretString::new("hunter2"));
		let credential = Credential::from_secret_store(&store, "encryption-passphrase").unwrap();
		assert!(matches!(credential, Credential::Passphrase(p) if p == "hunter2"));
	}

	#[test]
	fn from_secret_store_missing_id_returns_none() {
		let store = MemorySecretStore::default();
		assert!(Credential::from_secret_store(&store, "nope").is_none());
	}

	#[test]
	fn roundtrip_with_passphrase() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("secret.txt");
		fs::write(&path, b"hello, world").unwrap();

		let credential = Credential::Passphrase("correct horse battery staple".into());
		let enc_path = encrypt_file(&path, &credential).unwrap();
		assert!(!path.exists());
		assert!(enc_path.exists());

		let plain_out = decrypt_file_in_place(&enc_path, &credential).unwrap();
		assert_eq!(fs::read(&plain_out).unwrap(), b"hello, world");
		assert!(!enc_path.exists());
	}

	#[test]
	fn roundtrip_with_raw_key() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("secret.bin");
		fs::write(&path, b"binary data here").unwrap();

		let credential = Credential::RawKey([7u8; KEY_SIZE]);
		let enc = encrypt_file(&path, &credential).unwrap();
		let data = fs::read(&enc).unwrap();
		assert_eq!(&data[..SALT_SIZE], &[0u8; SALT_SIZE]);

		let plain = decrypt_file(&enc, &credential).unwrap();
		assert_eq!(fs::read(&plain).unwrap(), b"binary data here");
	}

	#[test]
	fn two_encryptions_produce_distinct_ciphertext() {
		let dir = tempdir().unwrap();
		let a = dir.path().join("a.txt");
		let b = dir.path().join("b.txt");
		fs::write(&a, b"identical content").unwrap();
		fs::write(&b, b"identical content").unwrap();

		let credential = Credential::RawKey([1u8; KEY_SIZE]);
		let enc_a = encrypt_file(&a, &credential).unwrap();
		let enc_b = encrypt_file(&b, &credential).unwrap();

		assert_ne!(fs::read(&enc_a).unwrap(), fs::read(&enc_b).unwrap());
	}

	#[test]
	fn encrypt_directory_skips_manifests_and_enc() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("data.txt"), b"plain").unwrap();
		fs::write(dir.path().join("backup_manifest_20200101_000000.json"), b"{}").unwrap();

		let credential = Credential::RawKey([2u8; KEY_SIZE]);
		let produced = encrypt_directory(dir.path(), &credential).unwrap();
		assert_eq!(produced.len(), 1);
		assert!(dir.path().join("backup_manifest_20200101_000000.json").exists());
	}
}
