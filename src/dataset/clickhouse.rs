use std::fmt::Write;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clickhouse_rs::Pool;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ClickHouseConfig;
use crate::migrate::{ClickHouseMigrator, Migrator};

use super::row::TrainingRow;
use super::sqlite::parse_stored_timestamp;
use super::store::TrainingStore;

const COLUMNS: &str = "timestamp, concurrency_start, concurrency_end, concurrency_finished, \
     command_id, duration_ms, cpu_usage, requests_per_second, requests_per_minute, \
     switch_id, bytes_per_second, packets_per_second";

/// ClickHouse-backed training store.
///
/// Rows are staged in memory on `insert_batch` and sent as a single INSERT
/// on `commit`. The table is a ReplacingMergeTree keyed by timestamp, so a
/// re-sent row replaces the earlier one.
pub struct ClickHouseStore {
    pool: Pool,
    table: String,
    staged: Mutex<Vec<TrainingRow>>,
}

impl ClickHouseStore {
    /// Opens the connection pool, verifies connectivity and optionally
    /// runs the schema migrations.
    pub async fn connect(cfg: &ClickHouseConfig) -> Result<Self> {
        let pool = Pool::new(cfg.dsn());

        let mut handle = pool
            .get_handle()
            .await
            .context("opening ClickHouse connection")?;
        handle.ping().await.context("pinging ClickHouse")?;
        drop(handle);

        info!(endpoint = %cfg.endpoint, database = %cfg.database, "ClickHouse store connected");

        if cfg.migrations.enabled {
            ClickHouseMigrator::new(pool.clone(), &cfg.table)
                .up()
                .await
                .context("running migrations")?;
        }

        Ok(Self {
            pool,
            table: format!("{}.{}", cfg.database, cfg.table),
            staged: Mutex::new(Vec::new()),
        })
    }
}

impl TrainingStore for ClickHouseStore {
    async fn exists_for_date(&self, date: NaiveDate) -> Result<bool> {
        let sql = format!(
            "SELECT count() AS c FROM {} WHERE toDate(timestamp) = '{}'",
            self.table,
            date.format("%Y-%m-%d")
        );

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for date check")?;
        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .with_context(|| format!("checking rows for {date}"))?;

        let count: u64 = match block.rows().next() {
            Some(row) => row.get("c").context("reading count")?,
            None => 0,
        };
        Ok(count > 0)
    }

    async fn insert_batch(&self, rows: &[TrainingRow]) -> Result<()> {
        self.staged.lock().extend_from_slice(rows);
        debug!(rows = rows.len(), "staged ClickHouse batch");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let rows = std::mem::take(&mut *self.staged.lock());
        if rows.is_empty() {
            return Ok(());
        }

        let sql = build_insert(&self.table, &rows);
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for training_data insert")?;
        handle
            .execute(sql.as_str())
            .await
            .context("sending training_data batch")?;

        debug!(rows = rows.len(), table = %self.table, "committed ClickHouse batch");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.staged.lock().clear();
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<TrainingRow>> {
        let sql = format!(
            "SELECT toString(timestamp) AS ts, concurrency_start, concurrency_end, \
             concurrency_finished, command_id, duration_ms, cpu_usage, requests_per_second, \
             requests_per_minute, switch_id, bytes_per_second, packets_per_second \
             FROM {} FINAL ORDER BY timestamp",
            self.table
        );

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for training_data select")?;
        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .context("querying training_data")?;

        let mut rows = Vec::with_capacity(block.row_count());
        for row in block.rows() {
            let ts: String = row.get("ts").context("reading timestamp")?;
            rows.push(TrainingRow {
                timestamp: parse_stored_timestamp(&ts)?,
                concurrency_start: row.get("concurrency_start")?,
                concurrency_end: row.get("concurrency_end")?,
                concurrency_finished: row.get("concurrency_finished")?,
                command_id: row.get("command_id")?,
                duration_ms: row.get("duration_ms")?,
                cpu_usage: row.get("cpu_usage")?,
                requests_per_second: row.get("requests_per_second")?,
                requests_per_minute: row.get("requests_per_minute")?,
                switch_id: row.get("switch_id")?,
                bytes_per_second: row.get("bytes_per_second")?,
                packets_per_second: row.get("packets_per_second")?,
            });
        }
        Ok(rows)
    }

    async fn count(&self) -> Result<u64> {
        let sql = format!("SELECT count() AS c FROM {} FINAL", self.table);
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for count")?;
        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .context("counting training_data")?;

        match block.rows().next() {
            Some(row) => Ok(row.get("c").context("reading count")?),
            None => Ok(0),
        }
    }
}

/// Builds one multi-row INSERT statement.
fn build_insert(table: &str, rows: &[TrainingRow]) -> String {
    let mut sql = String::with_capacity(64 + table.len() + COLUMNS.len() + rows.len() * 160);
    let _ = write!(sql, "INSERT INTO {table} ({COLUMNS}) VALUES ");

    for (idx, r) in rows.iter().enumerate() {
        if idx > 0 {
            sql.push_str(", ");
        }
        let _ = write!(
            sql,
            "('{}', {}, {}, {}, '{}', {}, {}, {}, {}, {}, {}, {})",
            r.timestamp_key(),
            r.concurrency_start,
            r.concurrency_end,
            r.concurrency_finished,
            escape_sql(&r.command_id),
            r.duration_ms,
            format_float(r.cpu_usage),
            r.requests_per_second,
            r.requests_per_minute,
            r.switch_id
                .as_deref()
                .map_or_else(|| "NULL".to_string(), |s| format!("'{}'", escape_sql(s))),
            r.bytes_per_second
                .map_or_else(|| "NULL".to_string(), format_float),
            r.packets_per_second
                .map_or_else(|| "NULL".to_string(), format_float),
        );
    }

    sql
}

/// Escapes a string value for SQL insertion (single-quote escaping).
fn escape_sql(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        format!("{v:?}")
    }
}
