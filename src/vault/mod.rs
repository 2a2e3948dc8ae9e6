//! Credential vault
//!
//! Stores source-database credentials sealed with AES-256-GCM. The 256-bit
//! key is derived from process-wide key material with SHA-256; each seal uses
//! a fresh 96-bit random IV and keeps the 16-byte authentication tag
//! detached. Plaintext exists only transiently in memory: `open` hands the
//! decrypted secret to the caller, nothing else ever sees it.

use crate::common::config::VaultConfig;
use crate::database::Database;
use crate::errors::{DataflowError, Result};
use crate::models::{Credential, SourceSecret};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgConnectOptions;
use sqlx::ConnectOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Sealed secret: ciphertext with detached IV and authentication tag.
#[derive(Debug, Clone)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Result of a connectivity probe. Never persisted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProbeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service for encrypting and managing database credentials.
pub struct CredentialVault {
    database: Arc<Database>,
    /// Derived once at startup; process-wide immutable.
    key: [u8; 32],
}

impl CredentialVault {
    pub fn new(database: Arc<Database>, config: &VaultConfig) -> Self {
        if config.encryption_key.starts_with("dev-key") {
            warn!("Vault is using the development encryption key; set vault.encryption_key in production");
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(config.encryption_key.as_bytes()));
        Self { database, key }
    }

    /// Seal a secret: JSON-encode, encrypt, detach the tag.
    pub fn seal(&self, secret: &SourceSecret) -> Result<SealedSecret> {
        let plaintext = serde_json::to_vec(secret)?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
            .map_err(|_| DataflowError::Integrity("credential encryption failed".to_string()))?;

        // The AEAD output is ciphertext || tag; store the tag detached.
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(SealedSecret {
            ciphertext: sealed,
            iv: iv.to_vec(),
            tag,
        })
    }

    /// Open a sealed secret. Any tampering with ciphertext, IV, or tag fails
    /// authentication; the error carries no detail beyond that.
    pub fn unseal(&self, sealed: &SealedSecret) -> Result<SourceSecret> {
        if sealed.iv.len() != IV_LEN || sealed.tag.len() != TAG_LEN {
            error!("Credential decryption failed: malformed IV or tag");
            return Err(DataflowError::DecryptionFailed);
        }

        let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(&sealed.ciphertext);
        combined.extend_from_slice(&sealed.tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&sealed.iv), combined.as_ref())
            .map_err(|_| {
                error!("Credential decryption failed: authentication tag mismatch");
                DataflowError::DecryptionFailed
            })?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Store credentials, optionally probing connectivity first.
    ///
    /// Returns the stored record; the secret itself is not part of it.
    #[instrument(skip(self, secret))]
    pub async fn store(
        &self,
        user_id: &str,
        name: &str,
        source_kind: &str,
        secret: SourceSecret,
        probe: bool,
    ) -> Result<Credential> {
        let mut is_valid = false;
        if probe {
            let result = self.test(source_kind, &secret).await;
            if !result.success {
                return Err(DataflowError::InvalidCredentials(
                    result.error.unwrap_or_else(|| "connection test failed".to_string()),
                ));
            }
            is_valid = true;
        }

        let sealed = self.seal(&secret)?;
        let now = Utc::now();

        let credential = Credential {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            source_kind: source_kind.to_string(),
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            tag: sealed.tag,
            host: Some(secret.host.clone()),
            port: Some(secret.port as i32),
            database: Some(secret.database.clone()),
            is_valid,
            last_validated_at: if is_valid { Some(now) } else { None },
            created_at: now,
        };

        self.database.insert_credential(&credential).await?;
        info!("Stored encrypted credentials '{}' for user {}", name, user_id);
        Ok(credential)
    }

    /// Retrieve and decrypt a credential's secret for in-memory use.
    pub async fn open(&self, user_id: &str, credential_id: &str) -> Result<SourceSecret> {
        let credential = self
            .database
            .get_credential(user_id, credential_id)
            .await?
            .ok_or_else(|| DataflowError::NotFound(format!("credential {credential_id}")))?;

        self.unseal(&SealedSecret {
            ciphertext: credential.ciphertext,
            iv: credential.iv,
            tag: credential.tag,
        })
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Credential>> {
        self.database.list_credentials(user_id).await
    }

    pub async fn delete(&self, user_id: &str, credential_id: &str) -> Result<()> {
        if !self.database.delete_credential(user_id, credential_id).await? {
            return Err(DataflowError::NotFound(format!("credential {credential_id}")));
        }
        info!("Deleted credential {}", credential_id);
        Ok(())
    }

    /// Probe connectivity with a short timeout and a trivial query.
    pub async fn test(&self, source_kind: &str, secret: &SourceSecret) -> ProbeResult {
        if source_kind != "postgresql" {
            return ProbeResult {
                success: false,
                version: None,
                error: Some(format!("Unsupported source kind: {source_kind}")),
            };
        }

        match probe_postgres(secret).await {
            Ok(version) => ProbeResult {
                success: true,
                version: Some(version),
                error: None,
            },
            Err(e) => ProbeResult {
                success: false,
                version: None,
                error: Some(e.to_string()),
            },
        }
    }
}

async fn probe_postgres(secret: &SourceSecret) -> Result<String> {
    let options = PgConnectOptions::new()
        .host(&secret.host)
        .port(secret.port)
        .database(&secret.database)
        .username(&secret.username)
        .password(&secret.password);

    let mut conn = tokio::time::timeout(Duration::from_secs(5), options.connect())
        .await
        .map_err(|_| DataflowError::ConnectFailed("connection timed out".to_string()))?
        .map_err(|e| DataflowError::ConnectFailed(e.to_string()))?;

    let row: (String,) = sqlx::query_as("SELECT version()")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| DataflowError::QueryFailed(e.to_string()))?;

    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_without_db() -> CredentialVault {
        // seal/unseal never touch the database.
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/unused").unwrap();
        CredentialVault::new(
            Arc::new(Database::from_pool(pool)),
            &VaultConfig {
                encryption_key: "unit-test-key-material-at-least-32-chars!!".to_string(),
            },
        )
    }

    fn secret() -> SourceSecret {
        SourceSecret {
            host: "db.example".to_string(),
            port: 5432,
            database: "shop".to_string(),
            username: "replicator".to_string(),
            password: "hunter2".to_string(),
            ssl_mode: None,
        }
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let vault = vault_without_db();
        let sealed = vault.seal(&secret()).unwrap();
        assert_eq!(sealed.iv.len(), 12);
        assert_eq!(sealed.tag.len(), 16);
        let opened = vault.unseal(&sealed).unwrap();
        assert_eq!(opened, secret());
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let vault = vault_without_db();
        let a = vault.seal(&secret()).unwrap();
        let b = vault.seal(&secret()).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_tag_rejected() {
        let vault = vault_without_db();
        let mut sealed = vault.seal(&secret()).unwrap();
        sealed.tag[0] ^= 0x01;
        assert!(matches!(
            vault.unseal(&sealed),
            Err(DataflowError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let vault = vault_without_db();
        let mut sealed = vault.seal(&secret()).unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(
            vault.unseal(&sealed),
            Err(DataflowError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_iv_rejected() {
        let vault = vault_without_db();
        let mut sealed = vault.seal(&secret()).unwrap();
        sealed.iv[3] ^= 0xFF;
        assert!(matches!(
            vault.unseal(&sealed),
            Err(DataflowError::DecryptionFailed)
        ));
    }
}
