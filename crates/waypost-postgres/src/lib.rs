mod client;
mod config;
mod drift_repository;
mod ledger_repository;
mod migrations;
mod models;
mod point_repository;

pub use client::PostgresClient;
pub use config::PostgresConfig;
pub use drift_repository::PostgresDriftRepository;
pub use ledger_repository::PostgresIngestionLedgerRepository;
pub use migrations::run_migrations;
pub use point_repository::PostgresTelemetryPointRepository;
