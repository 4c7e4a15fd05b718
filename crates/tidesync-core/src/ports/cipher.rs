//! Encryption indirection port
//!
//! When content encryption is active, both object keys and object content
//! are transformed before they reach the remote, and stored sizes differ
//! from plain sizes. The engine only needs the narrow interface below.

use crate::domain::mixed_state::MixedState;

/// Key and content transformation applied at the remote boundary
pub trait Cipher: Send + Sync {
    /// Whether this cipher leaves keys and content unchanged
    fn is_passthrough(&self) -> bool;

    /// Maps a plain key to its remote object key
    fn encrypt_key(&self, key: &str) -> anyhow::Result<String>;

    /// Maps a remote object key back to the plain key
    fn decrypt_key(&self, remote_key: &str) -> anyhow::Result<String>;

    fn encrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Stored size of `plain_size` bytes of content after encryption
    fn encrypted_size(&self, plain_size: u64) -> u64;
}

/// Cipher used when content encryption is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl Cipher for PassthroughCipher {
    fn is_passthrough(&self) -> bool {
        true
    }

    fn encrypt_key(&self, key: &str) -> anyhow::Result<String> {
        Ok(key.to_string())
    }

    fn decrypt_key(&self, remote_key: &str) -> anyhow::Result<String> {
        Ok(remote_key.to_string())
    }

    fn encrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn encrypted_size(&self, plain_size: u64) -> u64 {
        plain_size
    }
}

/// Full remote object key of a record under `prefix`
///
/// Records listed from the remote carry their stored key; new records get
/// their key encrypted on the fly.
pub fn remote_object_key(
    prefix: &str,
    cipher: &dyn Cipher,
    state: &MixedState,
) -> anyhow::Result<String> {
    let key = match &state.remote_encrypted_key {
        Some(stored) => stored.clone(),
        None => cipher.encrypt_key(state.key.as_str())?,
    };
    Ok(format!("{prefix}{key}"))
}
