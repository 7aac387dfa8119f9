use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use waypost_domain::{DriftRepository, IngestionLedgerRepository};

use super::handlers;
use crate::domain::ingestion_service::IngestionService;
use crate::domain::policy_service::PolicyService;

#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub policy: Arc<PolicyService>,
    pub ledger: Arc<dyn IngestionLedgerRepository>,
    pub drift: Arc<dyn DriftRepository>,
    pub device_token: String,
    pub admin_token: String,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/ingest", post(handlers::ingest))
        .route("/v1/policy", get(handlers::policy))
        .route("/v1/contract", get(handlers::contract))
        .route("/v1/admin/batches", get(handlers::list_batches))
        .route("/v1/admin/drift", get(handlers::list_drift))
        .route("/healthz", get(handlers::healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use tower::ServiceExt;
    use waypost_domain::repository::{
        MockDriftRepository, MockIngestionLedgerRepository, MockTelemetryPointRepository,
    };
    use waypost_domain::{
        ContractValidator, DriftPolicy, InsertPointsOutcome, MetricContract, MetricType, Policy,
        SystemClock,
    };

    fn test_router(points: MockTelemetryPointRepository) -> Router {
        let mut ledger = MockIngestionLedgerRepository::new();
        ledger.expect_record_batch().returning(|_| Ok(()));
        ledger.expect_list_batches().returning(|_| Ok(Vec::new()));
        let mut drift = MockDriftRepository::new();
        drift.expect_record_drift_events().returning(|_| Ok(()));
        drift.expect_record_quarantined().returning(|_| Ok(()));
        drift.expect_list_drift_events().returning(|_| Ok(Vec::new()));

        let ledger: Arc<dyn IngestionLedgerRepository> = Arc::new(ledger);
        let drift: Arc<dyn DriftRepository> = Arc::new(drift);

        let mut keys = BTreeMap::new();
        keys.insert("temp_c".to_string(), MetricType::Number);
        let contract = MetricContract { version: 1, keys };

        let ingestion = Arc::new(IngestionService::new(
            Arc::new(points),
            ledger.clone(),
            drift.clone(),
            ContractValidator::new(DriftPolicy::default()),
            contract.clone(),
            Arc::new(SystemClock),
            100,
        ));
        let policy = Arc::new(PolicyService::new(
            Policy::conservative_default(),
            contract,
            300,
        ));

        router(
            AppState {
                ingestion,
                policy,
                ledger,
                drift,
                device_token: "device-secret".to_string(),
                admin_token: "admin-secret".to_string(),
            },
            1024 * 1024,
        )
    }

    fn ingest_body() -> String {
        serde_json::json!({
            "device_id": "dev-1",
            "points": [{
                "message_id": "m-1",
                "captured_at": "2026-08-27T10:00:00Z",
                "metrics": { "temp_c": 21.5 }
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_ingest_requires_device_token() {
        let app = test_router(MockTelemetryPointRepository::new());
        let response = app
            .oneshot(
                Request::post("/v1/ingest")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(ingest_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ingest_round_trip() {
        let mut points = MockTelemetryPointRepository::new();
        points.expect_insert_points().times(1).return_once(|_| {
            Ok(InsertPointsOutcome {
                accepted: 1,
                duplicates: 0,
            })
        });

        let app = test_router(points);
        let response = app
            .oneshot(
                Request::post("/v1/ingest")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer device-secret")
                    .body(Body::from(ingest_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["accepted"], 1);
        assert_eq!(parsed["duplicates"], 0);
    }

    #[tokio::test]
    async fn test_policy_serves_etag_and_304() {
        let app = test_router(MockTelemetryPointRepository::new());
        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/policy")
                    .header(header::AUTHORIZATION, "Bearer device-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::get("/v1/policy")
                    .header(header::AUTHORIZATION, "Bearer device-secret")
                    .header(header::IF_NONE_MATCH, etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_policy_304_for_weak_and_listed_validators() {
        let app = test_router(MockTelemetryPointRepository::new());
        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/policy")
                    .header(header::AUTHORIZATION, "Bearer device-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let etag = response
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        // Weak validator inside a list, the way a caching proxy sends it.
        let response = app
            .oneshot(
                Request::get("/v1/policy")
                    .header(header::AUTHORIZATION, "Bearer device-secret")
                    .header(header::IF_NONE_MATCH, format!("\"stale\", W/{etag}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_contract_is_public() {
        let app = test_router(MockTelemetryPointRepository::new());
        let response = app
            .oneshot(Request::get("/v1/contract").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["keys"]["temp_c"], "number");
    }

    #[tokio::test]
    async fn test_admin_surface_requires_admin_token() {
        let app = test_router(MockTelemetryPointRepository::new());
        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/admin/batches")
                    .header(header::AUTHORIZATION, "Bearer device-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/v1/admin/batches")
                    .header(header::AUTHORIZATION, "Bearer admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = test_router(MockTelemetryPointRepository::new());
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
