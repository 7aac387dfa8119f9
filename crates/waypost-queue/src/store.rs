use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypost_domain::queue::EnqueueReading;
use waypost_domain::{
    BufferedReading, DomainError, DomainResult, FailureOutcome, QueueMetrics, ReadingQueue,
    ReadingStatus, SendReason,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS readings (
    message_id    TEXT PRIMARY KEY,
    device_id     TEXT NOT NULL,
    captured_at   TEXT NOT NULL,
    metrics       TEXT NOT NULL,
    reason        TEXT NOT NULL,
    enqueued_at   TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    status        TEXT NOT NULL DEFAULT 'pending',
    last_error    TEXT
);
CREATE INDEX IF NOT EXISTS idx_readings_status_enqueued
    ON readings(status, enqueued_at);
CREATE TABLE IF NOT EXISTS queue_meta (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS cost_counters (
    day        TEXT PRIMARY KEY,
    bytes_sent INTEGER NOT NULL DEFAULT 0,
    snapshots  INTEGER NOT NULL DEFAULT 0,
    uploads    INTEGER NOT NULL DEFAULT 0
);
";

/// Single-file SQLite implementation of the local queue and the daily cost
/// ledger.
///
/// All access goes through one connection behind a mutex; each operation is
/// one transaction and nothing is held across an await point.
pub struct SqliteQueue {
    conn: Mutex<Connection>,
    path: PathBuf,
    max_disk_bytes: u64,
}

impl SqliteQueue {
    /// Open the queue file, recovering from corruption if needed.
    ///
    /// A file that cannot be opened or fails the integrity check is renamed
    /// to a timestamped `.corrupt-*` path and a fresh empty store is created
    /// in its place. The agent keeps running either way.
    pub fn open(path: impl AsRef<Path>, max_disk_bytes: u64) -> DomainResult<Self> {
        let path = path.as_ref().to_path_buf();

        match Self::try_open(&path, max_disk_bytes) {
            Ok(queue) => Ok(queue),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "queue store unusable, backing up and recreating"
                );
                Self::back_up_corrupt(&path)?;
                let queue = Self::try_open(&path, max_disk_bytes)?;
                info!(path = %path.display(), "recreated empty queue store after corruption");
                Ok(queue)
            }
        }
    }

    fn try_open(path: &Path, max_disk_bytes: u64) -> DomainResult<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;

        // auto_vacuum must be configured before the schema exists so deletes
        // actually release file pages.
        conn.pragma_update(None, "auto_vacuum", "FULL")
            .map_err(storage_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage_err)?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(storage_err)?;

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(storage_err)?;
        if check != "ok" {
            return Err(DomainError::QueueCorruption(check));
        }

        conn.execute_batch(SCHEMA).map_err(storage_err)?;

        // A crash mid-send leaves rows in_flight with no terminal resolution;
        // they are pending again as far as the next flush is concerned.
        let recovered = conn
            .execute(
                "UPDATE readings SET status = 'pending' WHERE status = 'in_flight'",
                [],
            )
            .map_err(storage_err)?;
        if recovered > 0 {
            info!(recovered, "reset in-flight readings to pending at open");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            max_disk_bytes,
        })
    }

    fn back_up_corrupt(path: &Path) -> DomainResult<()> {
        let backup = PathBuf::from(format!(
            "{}.corrupt-{}",
            path.display(),
            Utc::now().format("%Y%m%dT%H%M%SZ")
        ));
        std::fs::rename(path, &backup)
            .map_err(|e| DomainError::QueueStorage(format!("backing up corrupt store: {e}")))?;
        // WAL sidecars belong to the old file.
        for suffix in ["-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
        warn!(backup = %backup.display(), "corrupt queue store backed up");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn lock(&self) -> DomainResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DomainError::QueueStorage("queue mutex poisoned".to_string()))
    }

    /// Logical bytes occupied by buffered rows. Quota is enforced on this
    /// figure because physical page counts only move at commit time.
    fn logical_bytes(conn: &Connection) -> DomainResult<u64> {
        conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(metrics) + LENGTH(message_id) + 64), 0) FROM readings",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v.max(0) as u64)
        .map_err(storage_err)
    }

    /// Delete oldest rows until `incoming` more bytes fit under the quota.
    /// Never touches in-flight rows. Returns the eviction count.
    fn evict_to_fit(tx: &rusqlite::Transaction<'_>, quota: u64, incoming: u64) -> DomainResult<u64> {
        let mut evicted = 0u64;
        loop {
            let used = Self::logical_bytes(tx)?;
            if used + incoming <= quota {
                break;
            }
            let deleted = tx
                .execute(
                    "DELETE FROM readings WHERE message_id = (
                         SELECT message_id FROM readings
                         WHERE status != 'in_flight'
                         ORDER BY enqueued_at ASC, message_id ASC
                         LIMIT 1)",
                    [],
                )
                .map_err(storage_err)?;
            if deleted == 0 {
                warn!(used, incoming, quota, "nothing left to evict under disk quota");
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            tx.execute(
                "INSERT INTO queue_meta (key, value) VALUES ('evictions_total', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = value + ?1",
                params![evicted as i64],
            )
            .map_err(storage_err)?;
            warn!(evicted, "evicted oldest readings to stay under disk quota");
        }
        Ok(evicted)
    }

    fn row_to_reading(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            message_id: row.get(0)?,
            device_id: row.get(1)?,
            captured_at: row.get(2)?,
            metrics: row.get(3)?,
            reason: row.get(4)?,
            enqueued_at: row.get(5)?,
            attempt_count: row.get(6)?,
            status: row.get(7)?,
        })
    }
}

struct RawRow {
    message_id: String,
    device_id: String,
    captured_at: String,
    metrics: String,
    reason: String,
    enqueued_at: String,
    attempt_count: i64,
    status: String,
}

impl RawRow {
    fn into_reading(self) -> DomainResult<BufferedReading> {
        Ok(BufferedReading {
            captured_at: parse_ts(&self.captured_at)?,
            enqueued_at: parse_ts(&self.enqueued_at)?,
            metrics: serde_json::from_str(&self.metrics)
                .map_err(|e| DomainError::QueueStorage(format!("decoding metrics: {e}")))?,
            reason: SendReason::parse(&self.reason)
                .ok_or_else(|| DomainError::QueueStorage(format!("bad reason: {}", self.reason)))?,
            status: ReadingStatus::parse(&self.status)
                .ok_or_else(|| DomainError::QueueStorage(format!("bad status: {}", self.status)))?,
            attempt_count: self.attempt_count.max(0) as u32,
            message_id: self.message_id,
            device_id: self.device_id,
        })
    }
}

fn parse_ts(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::QueueStorage(format!("bad timestamp {s}: {e}")))
}

fn storage_err(e: rusqlite::Error) -> DomainError {
    DomainError::QueueStorage(e.to_string())
}

impl ReadingQueue for SqliteQueue {
    fn enqueue(&self, reading: EnqueueReading) -> DomainResult<String> {
        let message_id = Uuid::new_v4().to_string();
        let metrics = serde_json::to_string(&reading.metrics)
            .map_err(|e| DomainError::QueueStorage(format!("encoding metrics: {e}")))?;
        let incoming = (metrics.len() + message_id.len() + 64) as u64;
        let now = Utc::now();

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        Self::evict_to_fit(&tx, self.max_disk_bytes, incoming)?;
        tx.execute(
            "INSERT INTO readings
                 (message_id, device_id, captured_at, metrics, reason, enqueued_at,
                  attempt_count, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 'pending')",
            params![
                message_id,
                reading.device_id,
                reading.captured_at.to_rfc3339(),
                metrics,
                reading.reason.as_str(),
                now.to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;

        debug!(%message_id, reason = reading.reason.as_str(), "enqueued reading");
        Ok(message_id)
    }

    fn peek_batch(&self, max_n: usize, max_bytes: usize) -> DomainResult<Vec<BufferedReading>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;

        let rows: Vec<RawRow> = {
            let mut stmt = tx
                .prepare(
                    "SELECT message_id, device_id, captured_at, metrics, reason, enqueued_at,
                            attempt_count, status
                     FROM readings
                     WHERE status = 'pending'
                     ORDER BY enqueued_at ASC, message_id ASC
                     LIMIT ?1",
                )
                .map_err(storage_err)?;
            let mapped = stmt
                .query_map(params![max_n as i64], Self::row_to_reading)
                .map_err(storage_err)?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?
        };

        let mut batch = Vec::new();
        let mut bytes = 0usize;
        for row in rows {
            let reading = row.into_reading()?;
            let size = reading.encoded_size();
            // Always take at least one so an oversized reading cannot wedge
            // the flush; it will dead-letter through the attempt ceiling.
            if !batch.is_empty() && bytes + size > max_bytes {
                break;
            }
            bytes += size;
            batch.push(reading);
        }

        for reading in &mut batch {
            tx.execute(
                "UPDATE readings SET status = 'in_flight' WHERE message_id = ?1",
                params![reading.message_id],
            )
            .map_err(storage_err)?;
            reading.status = ReadingStatus::InFlight;
        }
        tx.commit().map_err(storage_err)?;

        Ok(batch)
    }

    fn mark_delivered(&self, message_ids: &[String]) -> DomainResult<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; message_ids.len()].join(",");
        let deleted = conn
            .execute(
                &format!("DELETE FROM readings WHERE message_id IN ({placeholders})"),
                params_from_iter(message_ids.iter()),
            )
            .map_err(storage_err)?;
        debug!(deleted, "removed delivered readings");
        Ok(())
    }

    fn release(&self, message_ids: &[String]) -> DomainResult<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; message_ids.len()].join(",");
        conn.execute(
            &format!(
                "UPDATE readings SET status = 'pending'
                 WHERE status = 'in_flight' AND message_id IN ({placeholders})"
            ),
            params_from_iter(message_ids.iter()),
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn mark_failed(
        &self,
        message_id: &str,
        max_attempts: u32,
        error: &str,
    ) -> DomainResult<FailureOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;

        let attempts: Option<i64> = tx
            .query_row(
                "SELECT attempt_count FROM readings WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let attempts = attempts
            .ok_or_else(|| DomainError::ReadingNotFound(message_id.to_string()))?
            .max(0) as u32
            + 1;

        let outcome = if attempts >= max_attempts {
            FailureOutcome::DeadLetter
        } else {
            FailureOutcome::Retry
        };
        let status = match outcome {
            FailureOutcome::DeadLetter => "dead_letter",
            FailureOutcome::Retry => "pending",
        };
        tx.execute(
            "UPDATE readings
             SET attempt_count = ?1, status = ?2, last_error = ?3
             WHERE message_id = ?4",
            params![attempts as i64, status, error, message_id],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;

        if outcome == FailureOutcome::DeadLetter {
            warn!(%message_id, attempts, error, "reading moved to dead letter");
        }
        Ok(outcome)
    }

    fn metrics(&self) -> DomainResult<QueueMetrics> {
        let conn = self.lock()?;
        let disk_bytes: i64 = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        let row_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))
            .map_err(storage_err)?;
        let dead_letter_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM readings WHERE status = 'dead_letter'",
                [],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        let evictions_total: i64 = conn
            .query_row(
                "SELECT value FROM queue_meta WHERE key = 'evictions_total'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?
            .unwrap_or(0);

        Ok(QueueMetrics {
            disk_bytes: disk_bytes.max(0) as u64,
            row_count: row_count.max(0) as u64,
            dead_letter_count: dead_letter_count.max(0) as u64,
            evictions_total: evictions_total.max(0) as u64,
        })
    }
}
