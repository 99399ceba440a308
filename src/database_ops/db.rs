use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use super::migrations::{self, MigrationReport, MigrationVersion, VERSIONS};
use crate::error::{CatalogError, CatalogResult};

/// Tables as first shipped. Detail columns on `cards` arrive through
/// column migrations so old databases and fresh ones converge.
const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS series (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    logo        TEXT,
    total_sets  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS sets (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    series_id     TEXT NOT NULL,
    release_date  TEXT,
    total_cards   INTEGER NOT NULL DEFAULT 0,
    symbol        TEXT,
    logo          TEXT,
    created_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_sets_series_id ON sets (series_id);

CREATE TABLE IF NOT EXISTS cards (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    image         TEXT,
    rarity        TEXT,
    set_id        TEXT NOT NULL,
    series_id     TEXT NOT NULL,
    price         REAL NOT NULL DEFAULT 0,
    hp            INTEGER,
    types         TEXT,
    attacks       TEXT,
    weaknesses    TEXT,
    resistances   TEXT,
    last_updated  TEXT,
    created_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_cards_set_id ON cards (set_id);
CREATE INDEX IF NOT EXISTS idx_cards_series_id ON cards (series_id);
CREATE INDEX IF NOT EXISTS idx_cards_rarity ON cards (rarity);
CREATE INDEX IF NOT EXISTS idx_cards_name ON cards (name);

CREATE TABLE IF NOT EXISTS migrations (
    name        TEXT PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS app_metadata (
    key         TEXT PRIMARY KEY,
    value       TEXT,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    written_at  INTEGER NOT NULL,
    ttl_ms      INTEGER
);
"#;

/// Handle to the catalog store. Cheap to clone; clones share the pool and the
/// initialization state.
#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
    init: Arc<OnceCell<MigrationReport>>,
    init_runs: Arc<AtomicUsize>,
}

impl Db {
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>, max_connections: u32) -> CatalogResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(opts)
            .await
            .map_err(|e| CatalogError::Initialization(format!("open catalog db: {e}")))?;
        info!("connected to catalog db");
        Ok(Self::from_pool(pool))
    }

    /// Private in-memory database. One connection only: every SQLite memory
    /// connection is its own database.
    pub async fn connect_in_memory() -> CatalogResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| CatalogError::Initialization(format!("open in-memory db: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            init: Arc::new(OnceCell::new()),
            init_runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create the schema and bring columns up to date.
    ///
    /// Concurrent callers await the same in-flight run; once it succeeded the
    /// call is a no-op. Failed column migrations are logged and leave the store
    /// usable in a degraded schema; only a failure to create the base tables is
    /// returned as an error (and the next call retries).
    pub async fn initialize(&self) -> CatalogResult<&MigrationReport> {
        self.initialize_with(VERSIONS).await
    }

    pub(crate) async fn initialize_with(
        &self,
        versions: &'static [MigrationVersion],
    ) -> CatalogResult<&MigrationReport> {
        self.init
            .get_or_try_init(|| async {
                let run = self.init_runs.fetch_add(1, Ordering::SeqCst) + 1;
                sqlx::raw_sql(BASE_SCHEMA)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| CatalogError::Initialization(format!("create schema: {e}")))?;
                let report = migrations::run(&self.pool, versions).await;
                if !report.failed.is_empty() {
                    warn!(
                        failed = report.failed.len(),
                        "catalog store initialized with a degraded schema"
                    );
                }
                info!(
                    run,
                    applied = report.applied_versions.len(),
                    skipped = report.skipped_versions.len(),
                    "catalog store initialized"
                );
                Ok(report)
            })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.init.initialized()
    }

    /// How many times the initialization body actually ran.
    pub fn initialization_runs(&self) -> usize {
        self.init_runs.load(Ordering::SeqCst)
    }

    /// Pool for store operations; fails fast before `initialize` completed.
    pub(crate) fn ready(&self) -> CatalogResult<&SqlitePool> {
        if self.init.initialized() {
            Ok(&self.pool)
        } else {
            Err(CatalogError::Uninitialized)
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_before_initialize_fail_fast() {
        let db = Db::connect_in_memory().await.unwrap();
        let err = db.get_stats().await.unwrap_err();
        assert!(matches!(err, CatalogError::Uninitialized));
    }

    #[tokio::test]
    async fn concurrent_initialize_shares_one_run() {
        let db = Db::connect_in_memory().await.unwrap();
        let (a, b, c) = tokio::join!(db.initialize(), db.initialize(), db.initialize());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(db.initialization_runs(), 1);

        let clone = db.clone();
        clone.initialize().await.unwrap();
        assert_eq!(db.initialization_runs(), 1);
        assert!(clone.is_initialized());
    }

    #[tokio::test]
    async fn failed_migration_leaves_store_writable() {
        use crate::database_ops::migrations::ColumnMigration;
        use crate::database_ops::models::{CardSet, Series};

        const BROKEN: &[MigrationVersion] = &[MigrationVersion {
            version: "v_broken",
            columns: &[ColumnMigration {
                name: "missing_table_add",
                table: "no_such_table",
                column: "x",
                definition: "TEXT",
            }],
        }];
        let db = Db::connect_in_memory().await.unwrap();
        let report = db.initialize_with(BROKEN).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(db.is_initialized());

        db.insert_series(&Series {
            id: "bw".into(),
            name: "Black & White".into(),
            logo: None,
            total_sets: 0,
        })
        .await
        .unwrap();
        db.insert_set(&CardSet {
            id: "bw1".into(),
            name: "Black & White".into(),
            series_id: "bw".into(),
            release_date: None,
            total_cards: 115,
            symbol: None,
            logo: None,
        })
        .await
        .unwrap();
        assert_eq!(db.get_sets_by_series("bw").await.unwrap().len(), 1);
        assert_eq!(db.get_stats().await.unwrap().series, 1);
    }

    #[tokio::test]
    async fn file_path_is_not_parsed_as_a_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd?name%20").join("catalog#1.db");
        let db = Db::connect(&path, 1).await.unwrap();
        db.initialize().await.unwrap();
        db.close().await;
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn file_backed_store_persists_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        {
            let db = Db::connect(&path, 2).await.unwrap();
            db.initialize().await.unwrap();
            db.set_metadata("marker", "1").await.unwrap();
            db.close().await;
        }
        let db = Db::connect(&path, 2).await.unwrap();
        let report = db.initialize().await.unwrap();
        assert!(report.applied_versions.is_empty());
        assert_eq!(db.get_metadata("marker").await.unwrap().as_deref(), Some("1"));
    }
}
