pub mod ingestion_service;
pub mod policy_service;
