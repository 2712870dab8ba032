// =============================================================================
// Key Vault — at-rest encryption for broker credentials
// =============================================================================
//
// AES-128-GCM keyed by the `ENCRYPTION_KEY` environment variable (16 bytes,
// hex-encoded). Credentials are encrypted before storage and decrypted only
// at order execution time. The ciphertext format is hex(nonce) || hex(body),
// where the GCM tag rides inside the body.
// =============================================================================

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};

/// GCM nonce size in bytes.
const NONCE_LEN: usize = 12;

fn cipher_from_hex(key_hex: &str) -> Result<Aes128Gcm> {
    let key_bytes = hex::decode(key_hex.trim()).context("ENCRYPTION_KEY is not valid hex")?;
    if key_bytes.len() != 16 {
        bail!(
            "ENCRYPTION_KEY must be 16 bytes (32 hex chars), got {}",
            key_bytes.len()
        );
    }
    Aes128Gcm::new_from_slice(&key_bytes).map_err(|_| anyhow!("invalid AES key length"))
}

fn vault_key() -> Result<String> {
    let key = std::env::var("ENCRYPTION_KEY").unwrap_or_default();
    if key.is_empty() {
        bail!("ENCRYPTION_KEY is not set — generate 16 random bytes and export them as hex");
    }
    Ok(key)
}

/// Encrypt a plaintext credential with an explicit hex key.
pub fn encrypt_with_key(key_hex: &str, plaintext: &str) -> Result<String> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }

    let cipher = cipher_from_hex(key_hex)?;
    let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
    let body = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| anyhow!("encryption failed"))?;

    Ok(format!("{}{}", hex::encode(nonce), hex::encode(body)))
}

/// Decrypt a credential previously produced by [`encrypt_with_key`].
///
/// Fails when the ciphertext is malformed, was produced under a different
/// key, or was tampered with (GCM authentication).
pub fn decrypt_with_key(key_hex: &str, ciphertext: &str) -> Result<String> {
    if ciphertext.is_empty() {
        return Ok(String::new());
    }

    let raw = hex::decode(ciphertext.trim()).context("ciphertext is not valid hex")?;
    if raw.len() <= NONCE_LEN {
        bail!("ciphertext too short");
    }

    let cipher = cipher_from_hex(key_hex)?;
    let (nonce_bytes, body) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, body)
        .map_err(|_| anyhow!("failed to decrypt credential — wrong key or corrupted data"))?;

    String::from_utf8(plaintext).context("decrypted credential is not UTF-8")
}

/// Encrypt a credential with the key from `ENCRYPTION_KEY`.
pub fn encrypt_key(plaintext: &str) -> Result<String> {
    encrypt_with_key(&vault_key()?, plaintext)
}

/// Decrypt a credential with the key from `ENCRYPTION_KEY`.
pub fn decrypt_key(ciphertext: &str) -> Result<String> {
    decrypt_with_key(&vault_key()?, ciphertext)
}

/// Mask a credential for safe display: only the last 4 characters survive.
pub fn mask_key(key: &str) -> String {
    if key.len() < 5 {
        return "****".to_string();
    }
    format!("****{}", &key[key.len() - 4..])
}

// =============================================================================
// Tests
// =============================================================================
