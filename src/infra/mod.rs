//! Clients for the external systems the control plane drives:
//! Kafka Connect, the stream processor, the schema registry, the broker
//! admin API, the ClickHouse warehouse, and the SMTP alert transport.

pub mod clickhouse;
pub mod connect;
pub mod kafka;
pub mod ksql;
pub mod schema_registry;
pub mod smtp;

pub use clickhouse::ClickHouseClient;
pub use connect::ConnectClient;
pub use kafka::TopicManager;
pub use ksql::ProcessorClient;
pub use schema_registry::SchemaRegistryClient;
pub use smtp::Mailer;
