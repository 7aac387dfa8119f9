use anyhow::Context;
use tracing::info;

use crate::client::PostgresClient;

/// Ordered, embedded migrations. Each entry runs once; applied versions are
/// tracked in `schema_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_telemetry",
    include_str!("../migrations/0001_telemetry.sql"),
)];

pub async fn run_migrations(client: &PostgresClient) -> anyhow::Result<()> {
    let conn = client.get_connection().await?;

    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
             version TEXT PRIMARY KEY,
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
    )
    .await
    .context("creating schema_migrations table")?;

    for (version, sql) in MIGRATIONS {
        let applied = conn
            .query_opt(
                "SELECT version FROM schema_migrations WHERE version = $1",
                &[version],
            )
            .await
            .context("checking applied migrations")?;
        if applied.is_some() {
            continue;
        }

        conn.batch_execute(sql)
            .await
            .with_context(|| format!("applying migration {version}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version) VALUES ($1)",
            &[version],
        )
        .await
        .context("recording applied migration")?;
        info!(version, "applied migration");
    }

    Ok(())
}
