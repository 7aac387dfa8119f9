use chrono::Utc;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use waypost_domain::{
    DriftEvent, DriftKind, DriftRepository, IngestionBatch, IngestionLedgerRepository, MetricMap,
    ProcessingStatus, TelemetryPoint, TelemetryPointRepository,
};
use waypost_postgres::{
    run_migrations, PostgresClient, PostgresConfig, PostgresDriftRepository,
    PostgresIngestionLedgerRepository, PostgresTelemetryPointRepository,
};

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresClient) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let config = PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        user: "postgres".to_string(),
        password: "postgres".to_string(),
        pool_size: 4,
    };
    let client = PostgresClient::new(&config).expect("failed to create client");
    run_migrations(&client).await.expect("migrations failed");

    (postgres, client)
}

fn point(device_id: &str, message_id: &str) -> TelemetryPoint {
    let mut metrics = MetricMap::new();
    metrics.insert("temp_c".to_string(), serde_json::json!(21.5));
    TelemetryPoint {
        device_id: device_id.to_string(),
        message_id: message_id.to_string(),
        captured_at: Utc::now(),
        metrics,
        received_at: Utc::now(),
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_insert_points_is_idempotent() {
    let (_container, client) = setup_test_db().await;
    let repo = PostgresTelemetryPointRepository::new(client);

    let outcome = repo
        .insert_points(vec![point("dev-1", "m-1"), point("dev-1", "m-2")])
        .await
        .unwrap();
    assert_eq!(outcome.accepted, 2);
    assert_eq!(outcome.duplicates, 0);

    // Redelivery of the whole batch plus one new point.
    let outcome = repo
        .insert_points(vec![
            point("dev-1", "m-1"),
            point("dev-1", "m-2"),
            point("dev-1", "m-3"),
        ])
        .await
        .unwrap();
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.duplicates, 2);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_same_message_id_across_devices_is_not_a_duplicate() {
    let (_container, client) = setup_test_db().await;
    let repo = PostgresTelemetryPointRepository::new(client);

    repo.insert_points(vec![point("dev-1", "m-1")]).await.unwrap();
    let outcome = repo.insert_points(vec![point("dev-2", "m-1")]).await.unwrap();
    assert_eq!(outcome.accepted, 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_ledger_append_and_list_newest_first() {
    let (_container, client) = setup_test_db().await;
    let repo = PostgresIngestionLedgerRepository::new(client);

    for i in 0..3u32 {
        let batch = IngestionBatch {
            batch_id: uuid::Uuid::new_v4(),
            device_id: "dev-1".to_string(),
            received_at: Utc::now() + chrono::Duration::seconds(i as i64),
            contract_version: 1,
            contract_hash: "abc".to_string(),
            points_submitted: 10,
            points_accepted: 9,
            points_duplicate: 1,
            points_quarantined: 0,
            min_ts: Some(Utc::now()),
            max_ts: Some(Utc::now()),
            unknown_metric_keys: vec!["hum_rel".to_string()],
            type_mismatch_keys: vec![],
            processing_status: ProcessingStatus::Completed,
        };
        repo.record_batch(batch).await.unwrap();
    }

    let batches = repo.list_batches(2).await.unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches[0].received_at >= batches[1].received_at);
    assert_eq!(batches[0].unknown_metric_keys, vec!["hum_rel".to_string()]);
    assert_eq!(batches[0].processing_status, ProcessingStatus::Completed);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_drift_events_round_trip() {
    let (_container, client) = setup_test_db().await;
    let repo = PostgresDriftRepository::new(client);

    let batch_id = uuid::Uuid::new_v4();
    repo.record_drift_events(vec![
        DriftEvent {
            batch_id,
            device_id: "dev-1".to_string(),
            metric_key: "hum_rel".to_string(),
            kind: DriftKind::UnknownKey,
            observed_at: Utc::now(),
        },
        DriftEvent {
            batch_id,
            device_id: "dev-1".to_string(),
            metric_key: "temp_c".to_string(),
            kind: DriftKind::TypeMismatch,
            observed_at: Utc::now(),
        },
    ])
    .await
    .unwrap();

    let events = repo.list_drift_events(10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| e.kind == DriftKind::UnknownKey));
    assert!(events.iter().any(|e| e.kind == DriftKind::TypeMismatch));
}
