use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Result, anyhow};
use base64::Engine;
use hmac::Mac;
use rusqlite::{Connection, OptionalExtension};
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::Mutex;

type HmacSha256 = hmac::Hmac<Sha256>;

/// Vault key under which the PKCS#8 PEM used for keypair JWTs is stored.
pub const RSA_PRIVATE_KEY: &str = "rsa_private_key";

const NONCE_LEN: usize = 12;

/// Encrypted key/value secrets stored in the `credential_vault` table.
pub struct CredentialVault {
    db: Arc<Mutex<Connection>>,
    cipher: Aes256Gcm,
}

/// HMAC-SHA256(hostname + username) so the key is stable across restarts
/// but tied to the local machine and user.
fn derive_key() -> Result<[u8; 32]> {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"cortexkit-vault-v1")
        .map_err(|e| anyhow!("Vault key derivation failed: {}", e))?;
    mac.update(format!("{}{}", hostname, username).as_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&mac.finalize().into_bytes());
    Ok(key)
}

impl CredentialVault {
    pub fn new(db: Arc<Mutex<Connection>>) -> Result<Self> {
        let key = derive_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| anyhow!("Vault cipher init failed: {}", e))?;
        Ok(Self { db, cipher })
    }

    /// Returns base64(nonce || ciphertext).
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("Base64 decode failed: {}", e))?;
        if combined.len() <= NONCE_LEN {
            return Err(anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;
        String::from_utf8(plaintext).map_err(|e| anyhow!("UTF-8 decode failed: {}", e))
    }

    pub async fn set_secret(&self, key: &str, value: &str) -> Result<()> {
        let encrypted = self.encrypt(value)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO credential_vault (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            (key, &encrypted),
        )?;
        Ok(())
    }

    pub async fn get_secret(&self, key: &str) -> Result<Option<String>> {
        let stored: Option<String> = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT value FROM credential_vault WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?
        };
        stored.map(|s| self.decrypt(&s)).transpose()
    }

    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT key FROM credential_vault ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    pub async fn remove_secret(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute("DELETE FROM credential_vault WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }
}
