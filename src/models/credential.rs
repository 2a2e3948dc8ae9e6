//! Stored source-database credentials
//!
//! The secret itself is only ever held in memory as a [`SourceSecret`];
//! at rest it exists as AES-256-GCM ciphertext with a detached IV and tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored source connection. The encrypted blob never leaves the vault;
/// this struct is what list/get operations return to callers.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub source_kind: String,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database: Option<String>,
    pub is_valid: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Public view without any cipher material.
    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "source_kind": self.source_kind,
            "host": self.host,
            "port": self.port,
            "database": self.database,
            "is_valid": self.is_valid,
            "last_validated_at": self.last_validated_at,
            "created_at": self.created_at,
        })
    }
}

/// Decrypted connection parameters. JSON-encoded before sealing so the
/// round trip is byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSecret {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
}

fn default_port() -> u16 {
    5432
}

impl SourceSecret {
    /// Connection string for the source database.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_roundtrip_json() {
        let secret = SourceSecret {
            host: "db.example".to_string(),
            port: 5432,
            database: "shop".to_string(),
            username: "replicator".to_string(),
            password: "s3cret".to_string(),
            ssl_mode: None,
        };
        let encoded = serde_json::to_vec(&secret).unwrap();
        let decoded: SourceSecret = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(secret, decoded);
    }

    #[test]
    fn test_default_port_applied() {
        let secret: SourceSecret = serde_json::from_str(
            r#"{"host":"h","database":"d","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert_eq!(secret.port, 5432);
    }
}
