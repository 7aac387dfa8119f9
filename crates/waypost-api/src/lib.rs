pub mod domain;
pub mod http;

pub use domain::ingestion_service::{IngestTelemetryInput, IngestionService};
pub use domain::policy_service::PolicyService;
pub use http::server::{router, AppState};
