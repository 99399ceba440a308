//! Additive column migrations for stores created by older builds.
//!
//! Each version lists column adds. A version whose names are all recorded in
//! `migrations` is skipped. Every add is guarded by `PRAGMA table_info` so a
//! half-applied version can be re-run. Names are recorded only when the whole
//! version succeeded; failures are logged and never abort initialization.
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Copy)]
pub struct ColumnMigration {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationVersion {
    pub version: &'static str,
    pub columns: &'static [ColumnMigration],
}

const fn col(
    name: &'static str,
    table: &'static str,
    column: &'static str,
    definition: &'static str,
) -> ColumnMigration {
    ColumnMigration {
        name,
        table,
        column,
        definition,
    }
}

pub const VERSIONS: &[MigrationVersion] = &[
    MigrationVersion {
        version: "v2_card_details",
        columns: &[
            col("cards_add_local_id", "cards", "local_id", "TEXT"),
            col("cards_add_category", "cards", "category", "TEXT"),
            col("cards_add_illustrator", "cards", "illustrator", "TEXT"),
            col("cards_add_dex_id", "cards", "dex_id", "TEXT"),
            col("cards_add_stage", "cards", "stage", "TEXT"),
            col("cards_add_retreat", "cards", "retreat", "INTEGER"),
            col("cards_add_legal", "cards", "legal", "TEXT"),
            col("cards_add_variants", "cards", "variants", "TEXT"),
            col("cards_add_updated", "cards", "updated", "TEXT"),
        ],
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied_versions: Vec<String>,
    pub skipped_versions: Vec<String>,
    /// (migration name, reason)
    pub failed: Vec<(String, String)>,
}

/// SQLite column names are case-insensitive, so `Category` satisfies `category`.
pub async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> CatalogResult<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .any(|r| r.try_get::<String, _>("name").is_ok_and(|n| n.eq_ignore_ascii_case(column))))
}

/// Add the column unless it is already there. Returns whether it was added.
async fn apply_column(pool: &SqlitePool, m: &ColumnMigration) -> CatalogResult<bool> {
    if column_exists(pool, m.table, m.column).await? {
        debug!(migration = m.name, "column already present");
        return Ok(false);
    }
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        m.table, m.column, m.definition
    );
    sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(|e| CatalogError::Migration {
            name: m.name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(true)
}

pub async fn applied_names(pool: &SqlitePool) -> CatalogResult<HashSet<String>> {
    let rows = sqlx::query("SELECT name FROM migrations")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .filter_map(|r| r.try_get::<String, _>("name").ok())
        .collect())
}

async fn record_version(pool: &SqlitePool, v: &MigrationVersion) -> CatalogResult<()> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    for m in v.columns {
        sqlx::query("INSERT OR IGNORE INTO migrations (name, applied_at) VALUES (?, ?)")
            .bind(m.name)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn run(pool: &SqlitePool, versions: &[MigrationVersion]) -> MigrationReport {
    let mut report = MigrationReport::default();
    let applied = match applied_names(pool).await {
        Ok(set) => set,
        Err(e) => {
            // Column guards still make every add safe to repeat.
            warn!(error = %e, "could not read migration log");
            HashSet::new()
        }
    };

    for v in versions {
        if v.columns.iter().all(|m| applied.contains(m.name)) {
            report.skipped_versions.push(v.version.to_string());
            continue;
        }
        let mut version_ok = true;
        let mut added = 0usize;
        for m in v.columns {
            match apply_column(pool, m).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(migration = m.name, error = %e, "migration failed");
                    report.failed.push((m.name.to_string(), e.to_string()));
                    version_ok = false;
                }
            }
        }
        if !version_ok {
            continue;
        }
        match record_version(pool, v).await {
            Ok(()) => {
                info!(version = v.version, added, "migration version applied");
                report.applied_versions.push(v.version.to_string());
            }
            Err(e) => {
                warn!(version = v.version, error = %e, "could not record migration version");
                report
                    .failed
                    .push((v.version.to_string(), format!("record: {e}")));
            }
        }
    }
    report
}
