use anyhow::{bail, Context, Result};
use clickhouse_rs::Pool;
use tracing::info;

/// Placeholder for the target table inside embedded SQL.
const TABLE_PLACEHOLDER: &str = "{table}";

/// Embedded SQL migration.
struct Migration {
    version: u32,
    up_sql: &'static str,
    #[cfg_attr(not(test), allow(dead_code))]
    down_sql: &'static str,
}

/// All embedded migrations, ordered by version.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        up_sql: include_str!("sql/001_training_data.up.sql"),
        down_sql: include_str!("sql/001_training_data.down.sql"),
    },
    Migration {
        version: 2,
        up_sql: include_str!("sql/002_command_index.up.sql"),
        down_sql: include_str!("sql/002_command_index.down.sql"),
    },
];

/// Applies the training_data schema.
///
/// Version bookkeeping uses golang-migrate's `schema_migrations` layout so
/// the table can also be managed with the `migrate` CLI.
pub trait Migrator: Send {
    /// Applies all pending forward migrations.
    fn up(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Returns the current migration version and dirty flag.
    fn status(&self) -> impl std::future::Future<Output = Result<(u32, bool)>> + Send;
}

/// ClickHouse migration runner.
pub struct ClickHouseMigrator {
    pool: Pool,
    table: String,
}

impl ClickHouseMigrator {
    /// Creates a migrator for `table` in the pool's default database.
    pub fn new(pool: Pool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    async fn ensure_migrations_table(&self) -> Result<()> {
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting ClickHouse handle for migrations table")?;

        handle
            .execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version Int64,
                    dirty UInt8,
                    sequence UInt64
                ) ENGINE = TinyLog",
            )
            .await
            .context("creating schema_migrations table")?;

        Ok(())
    }

    async fn current_version(&self) -> Result<(u32, bool)> {
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting ClickHouse handle for version check")?;

        let block = handle
            .query("SELECT version, dirty FROM schema_migrations ORDER BY sequence DESC LIMIT 1")
            .fetch_all()
            .await
            .context("querying migration version")?;

        match block.rows().next() {
            Some(row) => {
                let version: i64 = row.get("version").context("reading version")?;
                let dirty: u8 = row.get("dirty").context("reading dirty flag")?;
                let version = u32::try_from(version)
                    .with_context(|| format!("migration version {version} out of range"))?;
                Ok((version, dirty != 0))
            }
            None => Ok((0, false)),
        }
    }

    async fn set_version(&self, version: u32, dirty: bool) -> Result<()> {
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting ClickHouse handle for version update")?;

        handle
            .execute("TRUNCATE TABLE schema_migrations")
            .await
            .context("truncating schema_migrations")?;

        let sql = format!(
            "INSERT INTO schema_migrations (version, dirty, sequence) VALUES ({version}, {}, 1)",
            u8::from(dirty)
        );
        handle
            .execute(sql.as_str())
            .await
            .context("inserting migration version")?;

        Ok(())
    }

    async fn execute_sql(&self, sql: &str) -> Result<()> {
        let rendered = render(sql, &self.table);
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting ClickHouse handle for SQL execution")?;

        for statement in split_statements(&rendered) {
            handle.execute(statement).await.with_context(|| {
                let preview: String = statement.chars().take(80).collect();
                format!("executing migration statement: {preview}...")
            })?;
        }

        Ok(())
    }
}

impl Migrator for ClickHouseMigrator {
    async fn up(&self) -> Result<()> {
        let (current_version, dirty) = self.status().await?;
        if dirty {
            bail!("migration version {current_version} is dirty, manual intervention required");
        }

        let mut applied = 0u32;
        for migration in pending_after(current_version) {
            info!(version = migration.version, table = %self.table, "applying migration");

            self.set_version(migration.version, true).await?;
            self.execute_sql(migration.up_sql)
                .await
                .with_context(|| format!("applying migration version {}", migration.version))?;
            self.set_version(migration.version, false).await?;

            applied += 1;
        }

        if applied == 0 {
            info!(version = current_version, "schema up to date");
        } else {
            info!(from = current_version, applied, "migrations completed");
        }

        Ok(())
    }

    async fn status(&self) -> Result<(u32, bool)> {
        self.ensure_migrations_table().await?;
        self.current_version().await
    }
}

/// Migrations newer than `current`, in order.
fn pending_after(current: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > current)
}

/// Substitutes the target table into a migration.
fn render(sql: &str, table: &str) -> String {
    sql.replace(TABLE_PLACEHOLDER, table)
}

/// Splits SQL text into individual statements by semicolons.
fn split_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}
