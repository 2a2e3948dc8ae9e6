//! Property-based tests: credential seal/open round-trips, tamper
//! rejection, type-mapping stability, and predicate quoting.

use dataflow_hub::common::config::{ClickHouseConfig, VaultConfig};
use dataflow_hub::database::Database;
use dataflow_hub::infra::clickhouse::ClickHouseClient;
use dataflow_hub::infra::ksql::quote_predicate_identifiers;
use dataflow_hub::models::SourceSecret;
use dataflow_hub::vault::CredentialVault;
use proptest::prelude::*;
use std::sync::Arc;

fn vault() -> CredentialVault {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/unused")
        .unwrap();
    CredentialVault::new(
        Arc::new(Database::from_pool(pool)),
        &VaultConfig {
            encryption_key: "property-test-key-material-32-chars-min".to_string(),
        },
    )
}

fn secret_strategy() -> impl Strategy<Value = SourceSecret> {
    (
        "[a-z0-9.-]{1,40}",
        1024u16..65535,
        "[a-z_][a-z0-9_]{0,30}",
        "[a-z_][a-z0-9_]{0,30}",
        "\\PC{0,64}",
    )
        .prop_map(|(host, port, database, username, password)| SourceSecret {
            host,
            port,
            database,
            username,
            password,
            ssl_mode: None,
        })
}

proptest! {
    #[test]
    fn prop_seal_open_roundtrip(secret in secret_strategy()) {
        let vault = vault();
        let sealed = vault.seal(&secret).unwrap();
        let opened = vault.unseal(&sealed).unwrap();
        prop_assert_eq!(opened, secret);
    }

    #[test]
    fn prop_tampered_ciphertext_rejected(secret in secret_strategy(), flip in 0usize..64) {
        let vault = vault();
        let mut sealed = vault.seal(&secret).unwrap();
        let index = flip % sealed.ciphertext.len();
        sealed.ciphertext[index] ^= 0x01;
        prop_assert!(vault.unseal(&sealed).is_err());
    }

    #[test]
    fn prop_tampered_tag_rejected(secret in secret_strategy(), flip in 0usize..16) {
        let vault = vault();
        let mut sealed = vault.seal(&secret).unwrap();
        sealed.tag[flip] ^= 0x01;
        prop_assert!(vault.unseal(&sealed).is_err());
    }

    #[test]
    fn prop_type_mapping_is_stable(source_type in "[a-z ()0-9]{1,30}") {
        let client = ClickHouseClient::new(&ClickHouseConfig::default()).unwrap();
        let first = client.map_type(&source_type);
        let second = client.map_type(&source_type);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_quoting_preserves_literals(value in "[a-zA-Z0-9 _-]{0,20}") {
        let clause = format!("status = '{value}'");
        let quoted = quote_predicate_identifiers(&clause);
        prop_assert!(quoted.contains(&format!("'{value}'")));
        prop_assert!(quoted.starts_with("`status`"));
    }
}
