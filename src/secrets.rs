use std::collections::HashMap;

/// A credential handed around by value rather than a `String`, so it does
/// not print in `{:?}` formatting of surrounding structs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Debug for SecretString {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("SecretString(..)")
	}
}

/// Replaces direct coupling to the OS keyring: a single `put`/`get` pair.
/// The in-memory implementation below is what tests and non-interactive runs
/// use; a keyring-backed implementation would satisfy the same trait.
pub trait SecretStore {
	fn put(&mut self, id: &str, secret: SecretString);
	fn get(&self, id: &str) -> Option<&SecretString>;
}

#[derive(Default)]
pub struct MemorySecretStore {
	secrets: HashMap<String, SecretString>,
}

impl SecretStore for MemorySecretStore {
	fn put(&mut self, id: &str, secret: SecretString) {
		self.secrets.insert(id.to_string(), secret);
	}

	fn get(&self, id: &str) -> Option<&SecretString> {
		self.secrets.get(id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn put_then_get_roundtrips() {
		let mut store = MemorySecretStore::default();
		store.put("encryption-passphrase", SecretString::new("hunter2"));
		assert_eq!(store.get("encryption-passphrase").unwrap().expose(), "hunter2");
	}

	#[test]
	fn missing_id_returns_none() {
		let store = MemorySecretStore::default();
		assert!(store.get("nope").is_none());
	}

	#[test]
	fn debug_does_not_print_secret() {
		let secret = SecretString::new("super-secret-value");
		let rendered = format!("{secret:?}");
		assert!(!rendered.contains("super-secret-value"));
	}
}
