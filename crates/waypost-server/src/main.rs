mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use config::ServiceConfig;
use telemetry::init_telemetry;
use waypost_api::{AppState, IngestionService, PolicyService};
use waypost_domain::{
    ContractValidator, DriftPolicy, MetricContract, Policy, SystemClock,
};
use waypost_postgres::{
    run_migrations, PostgresClient, PostgresConfig, PostgresDriftRepository,
    PostgresIngestionLedgerRepository, PostgresTelemetryPointRepository,
};
use waypost_runner::Runner;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config.log_level) {
        eprintln!("failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    info!(port = config.http_port, "starting waypost-server");

    let router = match build_router(&config).await {
        Ok(router) => router,
        Err(e) => {
            error!(error = %e, "failed to initialize server");
            std::process::exit(1);
        }
    };

    let bind_addr = format!("{}:{}", config.http_host, config.http_port);
    let result = Runner::new()
        .with_process("http_server", move |ctx| async move {
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .with_context(|| format!("binding {bind_addr}"))?;
            info!(addr = %bind_addr, "listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { ctx.cancelled().await })
                .await
                .context("http server failed")?;
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;

    if let Err(e) = result {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}

async fn build_router(config: &ServiceConfig) -> anyhow::Result<axum::Router> {
    let client = PostgresClient::new(&PostgresConfig {
        host: config.postgres_host.clone(),
        port: config.postgres_port,
        database: config.postgres_database.clone(),
        user: config.postgres_username.clone(),
        password: config.postgres_password.clone(),
        pool_size: config.postgres_pool_size,
    })?;
    run_migrations(&client).await?;

    let policy = load_policy(config.policy_path.as_deref())?;
    let contract = load_contract(config.contract_path.as_deref())?;

    let points = Arc::new(PostgresTelemetryPointRepository::new(client.clone()));
    let ledger = Arc::new(PostgresIngestionLedgerRepository::new(client.clone()));
    let drift = Arc::new(PostgresDriftRepository::new(client));

    let ingestion = Arc::new(IngestionService::new(
        points,
        ledger.clone(),
        drift.clone(),
        ContractValidator::new(DriftPolicy::default()),
        contract.clone(),
        Arc::new(SystemClock),
        config.max_batch_points,
    ));
    let policy_service = Arc::new(PolicyService::new(
        policy,
        contract,
        config.policy_refresh_after_s,
    ));

    Ok(waypost_api::router(
        AppState {
            ingestion,
            policy: policy_service,
            ledger,
            drift,
            device_token: config.device_token.clone(),
            admin_token: config.admin_token.clone(),
        },
        config.max_body_bytes,
    ))
}

fn load_policy(path: Option<&str>) -> anyhow::Result<Policy> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy from {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing policy from {path}"))
        }
        None => {
            info!("no policy file configured, serving conservative defaults");
            Ok(Policy::conservative_default())
        }
    }
}

fn load_contract(path: Option<&str>) -> anyhow::Result<MetricContract> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading contract from {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing contract from {path}"))
        }
        None => {
            info!("no contract file configured, every metric key will count as drift");
            Ok(MetricContract {
                version: 1,
                keys: Default::default(),
            })
        }
    }
}
