use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::config::{Config, StoreBackend};

use super::clickhouse::ClickHouseStore;
use super::row::TrainingRow;
use super::sqlite::SqliteStore;

/// Persistence contract of the training dataset.
///
/// `insert_batch` stages rows inside an open batch; nothing is visible
/// until `commit`. `rollback` discards the open batch.
pub trait TrainingStore: Send + Sync {
    /// Returns true if any persisted row falls on `date`.
    fn exists_for_date(
        &self,
        date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    fn insert_batch(
        &self,
        rows: &[TrainingRow],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn commit(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    fn rollback(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// All persisted rows ordered by timestamp.
    fn fetch_all(&self) -> impl std::future::Future<Output = Result<Vec<TrainingRow>>> + Send;

    fn count(&self) -> impl std::future::Future<Output = Result<u64>> + Send;
}

/// Store dispatches to the SQLite or ClickHouse backend.
pub enum Store {
    Sqlite(SqliteStore),
    ClickHouse(ClickHouseStore),
}

impl Store {
    /// Opens the backend selected in the configuration.
    pub async fn open(cfg: &Config) -> Result<Self> {
        match cfg.store.backend {
            StoreBackend::Sqlite => {
                let path = cfg.sqlite_path();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("creating database directory {}", parent.display())
                    })?;
                }
                let store = SqliteStore::open(&path, cfg.store.sqlite.enforce_unique_timestamps)?;
                Ok(Self::Sqlite(store))
            }
            StoreBackend::Clickhouse => {
                let store = ClickHouseStore::connect(&cfg.store.clickhouse).await?;
                Ok(Self::ClickHouse(store))
            }
        }
    }

    /// Returns the backend name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::ClickHouse(_) => "clickhouse",
        }
    }
}

impl TrainingStore for Store {
    async fn exists_for_date(&self, date: NaiveDate) -> Result<bool> {
        match self {
            Self::Sqlite(s) => s.exists_for_date(date).await,
            Self::ClickHouse(s) => s.exists_for_date(date).await,
        }
    }

    async fn insert_batch(&self, rows: &[TrainingRow]) -> Result<()> {
        match self {
            Self::Sqlite(s) => s.insert_batch(rows).await,
            Self::ClickHouse(s) => s.insert_batch(rows).await,
        }
    }

    async fn commit(&self) -> Result<()> {
        match self {
            Self::Sqlite(s) => s.commit().await,
            Self::ClickHouse(s) => s.commit().await,
        }
    }

    async fn rollback(&self) -> Result<()> {
        match self {
            Self::Sqlite(s) => s.rollback().await,
            Self::ClickHouse(s) => s.rollback().await,
        }
    }

    async fn fetch_all(&self) -> Result<Vec<TrainingRow>> {
        match self {
            Self::Sqlite(s) => s.fetch_all().await,
            Self::ClickHouse(s) => s.fetch_all().await,
        }
    }

    async fn count(&self) -> Result<u64> {
        match self {
            Self::Sqlite(s) => s.count().await,
            Self::ClickHouse(s) => s.count().await,
        }
    }
}
