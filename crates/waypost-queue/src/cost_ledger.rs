//! Durable daily cost counters, kept in the same single-file store as the
//! queue so a restart never resets the day's spend.

use chrono::NaiveDate;
use rusqlite::params;
use tracing::debug;

use waypost_domain::{CostCounterStore, DailySpend, DomainError, DomainResult};

use crate::store::SqliteQueue;

fn storage_err(e: rusqlite::Error) -> DomainError {
    DomainError::QueueStorage(e.to_string())
}

impl CostCounterStore for SqliteQueue {
    fn spend_for(&self, day: NaiveDate) -> DomainResult<DailySpend> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT bytes_sent, snapshots, uploads FROM cost_counters WHERE day = ?1",
                params![day.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(storage_err(other)),
            })?;

        // A day with no row is a day with no spend; UTC midnight reset falls
        // out of keying by date.
        Ok(row
            .map(|(bytes, snaps, uploads)| DailySpend {
                bytes_sent: bytes.max(0) as u64,
                snapshots: snaps.max(0) as u32,
                uploads: uploads.max(0) as u32,
            })
            .unwrap_or_default())
    }

    fn add_bytes(&self, day: NaiveDate, bytes: u64) -> DomainResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cost_counters (day, bytes_sent) VALUES (?1, ?2)
             ON CONFLICT(day) DO UPDATE SET bytes_sent = bytes_sent + ?2",
            params![day.to_string(), bytes as i64],
        )
        .map_err(storage_err)?;
        debug!(%day, bytes, "recorded sent bytes");
        Ok(())
    }

    fn add_snapshot(&self, day: NaiveDate) -> DomainResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cost_counters (day, snapshots) VALUES (?1, 1)
             ON CONFLICT(day) DO UPDATE SET snapshots = snapshots + 1",
            params![day.to_string()],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn add_upload(&self, day: NaiveDate) -> DomainResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cost_counters (day, uploads) VALUES (?1, 1)
             ON CONFLICT(day) DO UPDATE SET uploads = uploads + 1",
            params![day.to_string()],
        )
        .map_err(storage_err)?;
        Ok(())
    }
}
