//! Persistence of the training dataset.
//!
//! [`DatasetWriter`] applies the per-file contract on top of a
//! [`TrainingStore`]: a date that already has rows is skipped, and the rows
//! of one file become visible all at once or not at all.

pub mod clickhouse;
pub mod convert;
pub mod features;
pub mod row;
pub mod sqlite;
pub mod store;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, error, info};

pub use self::convert::{format_converted_line, parse_converted_line, write_converted_line};
pub use self::features::{write_features, FeatureRow};
pub use self::row::TrainingRow;
pub use self::sqlite::SqliteStore;
pub use self::store::{Store, TrainingStore};

/// DatasetWriter commits the rows of one source file as a single batch.
pub struct DatasetWriter<S> {
    store: S,
}

impl<S: TrainingStore> DatasetWriter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns true when rows dated `date` already exist.
    pub async fn already_ingested(&self, date: NaiveDate) -> Result<bool> {
        self.store
            .exists_for_date(date)
            .await
            .with_context(|| format!("checking ingestion state of {date}"))
    }

    /// Inserts and commits `rows` as one batch. On failure the batch is
    /// rolled back and the error returned. Returns the number of rows
    /// committed.
    pub async fn write_file(&self, label: &str, rows: &[TrainingRow]) -> Result<u64> {
        if rows.is_empty() {
            debug!(file = %label, "no rows to commit");
            return Ok(0);
        }

        if let Err(e) = self.store.insert_batch(rows).await {
            self.rollback(label).await;
            return Err(e.context(format!("inserting batch of {label}")));
        }

        if let Err(e) = self.store.commit().await {
            self.rollback(label).await;
            return Err(e.context(format!("committing batch of {label}")));
        }

        let written = rows.len() as u64;
        info!(file = %label, rows = written, "committed batch");
        Ok(written)
    }

    async fn rollback(&self, label: &str) {
        if let Err(e) = self.store.rollback().await {
            error!(file = %label, error = %e, "rollback failed");
        }
    }
}
