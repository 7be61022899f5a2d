use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::debug;

use super::row::{TrainingRow, TIMESTAMP_FORMAT};
use super::store::TrainingStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS training_data (
    timestamp TEXT PRIMARY KEY NOT NULL,
    concurrency_start INTEGER NOT NULL,
    concurrency_end INTEGER NOT NULL,
    concurrency_finished INTEGER NOT NULL,
    command_id TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    cpu_usage REAL NOT NULL,
    requests_per_second INTEGER NOT NULL DEFAULT 0,
    requests_per_minute INTEGER NOT NULL DEFAULT 0,
    switch_id TEXT,
    bytes_per_second REAL,
    packets_per_second REAL
);

CREATE INDEX IF NOT EXISTS idx_training_data_command ON training_data(command_id);
"#;

const COLUMNS: &str = "timestamp, concurrency_start, concurrency_end, concurrency_finished, \
     command_id, duration_ms, cpu_usage, requests_per_second, requests_per_minute, \
     switch_id, bytes_per_second, packets_per_second";

/// SQLite-backed training store.
///
/// A batch is an explicit transaction opened by the first `insert_batch`
/// and closed by `commit` or `rollback`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    enforce_unique_timestamps: bool,
}

impl SqliteStore {
    /// Opens (and if needed creates) the database at `path`.
    pub fn open(path: &Path, enforce_unique_timestamps: bool) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("enabling WAL")?;
        Self::init(conn, enforce_unique_timestamps)
    }

    pub fn open_in_memory(enforce_unique_timestamps: bool) -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite")?;
        Self::init(conn, enforce_unique_timestamps)
    }

    fn init(conn: Connection, enforce_unique_timestamps: bool) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("creating training_data schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            enforce_unique_timestamps,
        })
    }

    fn insert_sql(&self) -> String {
        let verb = if self.enforce_unique_timestamps {
            "INSERT"
        } else {
            "INSERT OR REPLACE"
        };
        format!(
            "{verb} INTO training_data ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        )
    }
}

impl TrainingStore for SqliteStore {
    async fn exists_for_date(&self, date: NaiveDate) -> Result<bool> {
        let next = date + Duration::days(1);
        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM training_data WHERE timestamp >= ?1 AND timestamp < ?2)",
                params![date.format("%Y-%m-%d").to_string(), next.format("%Y-%m-%d").to_string()],
                |row| row.get(0),
            )
            .with_context(|| format!("checking rows for {date}"))?;
        Ok(exists)
    }

    async fn insert_batch(&self, rows: &[TrainingRow]) -> Result<()> {
        let sql = self.insert_sql();
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN IMMEDIATE")
                .context("opening batch transaction")?;
        }

        let mut stmt = conn.prepare_cached(&sql).context("preparing insert")?;
        for row in rows {
            stmt.execute(params![
                row.timestamp_key(),
                row.concurrency_start,
                row.concurrency_end,
                row.concurrency_finished,
                &row.command_id,
                row.duration_ms,
                row.cpu_usage,
                to_sql_int(row.requests_per_second),
                to_sql_int(row.requests_per_minute),
                row.switch_id.as_deref(),
                row.bytes_per_second,
                row.packets_per_second,
            ])
            .with_context(|| format!("inserting row {}", row.timestamp_key()))?;
        }

        debug!(rows = rows.len(), "staged sqlite batch");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT").context("committing batch")?;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")
                .context("rolling back batch")?;
        }
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<TrainingRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM training_data ORDER BY timestamp"))
            .context("preparing select")?;

        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    TrainingRow {
                        timestamp: NaiveDateTime::default(),
                        concurrency_start: row.get(1)?,
                        concurrency_end: row.get(2)?,
                        concurrency_finished: row.get(3)?,
                        command_id: row.get(4)?,
                        duration_ms: row.get(5)?,
                        cpu_usage: row.get(6)?,
                        requests_per_second: from_sql_int(row.get(7)?),
                        requests_per_minute: from_sql_int(row.get(8)?),
                        switch_id: row.get(9)?,
                        bytes_per_second: row.get(10)?,
                        packets_per_second: row.get(11)?,
                    },
                ))
            })
            .context("querying training_data")?;

        let mut rows = Vec::new();
        for item in raw {
            let (ts, mut row) = item.context("reading training_data row")?;
            row.timestamp = parse_stored_timestamp(&ts)?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM training_data", [], |row| row.get(0))
            .context("counting training_data")?;
        Ok(from_sql_int(n))
    }
}

pub(crate) fn parse_stored_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .with_context(|| format!("invalid stored timestamp {raw:?}"))
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_sql_int(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(second: u32, micro: u32, command: &str) -> TrainingRow {
        TrainingRow {
            timestamp: NaiveDate::from_ymd_opt(2021, 12, 20)
                .and_then(|d| d.and_hms_micro_opt(10, 0, second, micro))
                .expect("valid timestamp"),
            concurrency_start: 1,
            concurrency_end: 2,
            concurrency_finished: 3,
            command_id: command.to_string(),
            duration_ms: 150,
            cpu_usage: 1.0,
            requests_per_second: 4,
            requests_per_minute: 40,
            switch_id: None,
            bytes_per_second: None,
            packets_per_second: None,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, 20).expect("valid date")
    }

    #[tokio::test]
    async fn test_commit_makes_rows_visible() {
        let store = SqliteStore::open_in_memory(true).expect("open");
        assert!(!store.exists_for_date(day()).await.expect("exists"));

        let mut with_switch = row(1, 0, "ID_B");
        with_switch.switch_id = Some("sw-1".to_string());
        with_switch.bytes_per_second = Some(1024.5);

        store
            .insert_batch(&[row(0, 150_000, "ID_A"), with_switch.clone()])
            .await
            .expect("insert");
        store.commit().await.expect("commit");

        assert!(store.exists_for_date(day()).await.expect("exists"));
        assert!(!store
            .exists_for_date(day().succ_opt().expect("next day"))
            .await
            .expect("exists"));

        let rows = store.fetch_all().await.expect("fetch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], row(0, 150_000, "ID_A"));
        assert_eq!(rows[1], with_switch);
    }

    #[tokio::test]
    async fn test_rollback_discards_batch() {
        let store = SqliteStore::open_in_memory(true).expect("open");
        store.insert_batch(&[row(0, 0, "ID_A")]).await.expect("insert");
        store.rollback().await.expect("rollback");

        assert_eq!(store.count().await.expect("count"), 0);
        assert!(!store.exists_for_date(day()).await.expect("exists"));
    }

    #[tokio::test]
    async fn test_unique_timestamps_enforced() {
        let store = SqliteStore::open_in_memory(true).expect("open");
        let err = store
            .insert_batch(&[row(0, 0, "ID_A"), row(0, 0, "ID_B")])
            .await
            .expect_err("duplicate key");
        assert!(format!("{err:#}").contains("inserting row"));
        store.rollback().await.expect("rollback");
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_last_write_wins_without_uniqueness() {
        let store = SqliteStore::open_in_memory(false).expect("open");
        store
            .insert_batch(&[row(0, 0, "ID_A"), row(0, 0, "ID_B")])
            .await
            .expect("insert");
        store.commit().await.expect("commit");

        let rows = store.fetch_all().await.expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].command_id, "ID_B");
    }

    #[tokio::test]
    async fn test_commit_without_batch_is_noop() {
        let store = SqliteStore::open_in_memory(true).expect("open");
        store.commit().await.expect("commit");
        store.rollback().await.expect("rollback");
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("training.db");
        {
            let store = SqliteStore::open(&path, true).expect("open");
            store.insert_batch(&[row(5, 0, "ID_A")]).await.expect("insert");
            store.commit().await.expect("commit");
        }
        let reopened = SqliteStore::open(&path, true).expect("reopen");
        assert_eq!(reopened.count().await.expect("count"), 1);
    }

    #[test]
    fn test_parse_stored_timestamp() {
        let ts = parse_stored_timestamp("2021-12-20 10:00:00.150000").expect("micros");
        assert_eq!(ts.and_utc().timestamp_subsec_micros(), 150_000);
        assert!(parse_stored_timestamp("2021-12-20 10:00:00").is_ok());
        assert!(parse_stored_timestamp("yesterday").is_err());
    }
}
