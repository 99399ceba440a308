//! Process-wide handles, built once at startup and passed by reference.
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::database_ops::cache::{Cache, CacheTtl, CachedListings, SqliteCacheStore};
use crate::database_ops::db::Db;
use crate::database_ops::exchange::{ExchangeService, FxConfig};
use crate::database_ops::filters::CatalogFilters;
use crate::database_ops::snapshot::{JsonSnapshotDir, SnapshotSource};
use crate::database_ops::sync::{SyncConfig, SyncEngine};
use crate::database_ops::tcgdex::{CatalogSource, ProviderConfig, TcgdexProvider};
use crate::util::env;

#[derive(Clone)]
pub struct CatalogContext {
    pub db: Db,
    pub engine: Arc<SyncEngine>,
    pub cache: Cache,
    pub listings: Arc<CachedListings>,
    pub exchange: ExchangeService,
    pub filters: Arc<CatalogFilters>,
    pub ttl: CacheTtl,
}

impl CatalogContext {
    /// Wire everything from environment configuration. The store is
    /// connected but not initialized; the first engine run (or an explicit
    /// `db.initialize()`) does that.
    pub async fn from_env() -> Result<Self> {
        env::init_env();
        let path = env::db_path();
        let max_conns = env::env_parse("CATALOG_DB_MAX_CONNS", 4u32).max(1);
        let db = Db::connect(&path, max_conns)
            .await
            .with_context(|| format!("open catalog store {}", path.display()))?;

        let provider_config = ProviderConfig::from_env();
        let provider = TcgdexProvider::new(&provider_config)?;
        let snapshot = JsonSnapshotDir::new(env::snapshot_dir());
        let ttl = CacheTtl::from_env();

        info!(
            db = %path.display(),
            snapshot = %snapshot.dir().display(),
            language = %provider_config.language,
            "catalog context ready"
        );
        Self::assemble(
            db,
            Arc::new(provider),
            Arc::new(snapshot),
            SyncConfig::from_env(),
            ttl,
            FxConfig::from_env(ttl.rates),
            &provider_config.language,
        )
    }

    /// Build from explicit parts; the cache and the filter selections share
    /// the catalog store.
    pub fn assemble(
        db: Db,
        source: Arc<dyn CatalogSource>,
        snapshot: Arc<dyn SnapshotSource>,
        sync_config: SyncConfig,
        ttl: CacheTtl,
        fx_config: FxConfig,
        namespace: &str,
    ) -> Result<Self> {
        let cache = Cache::new(Arc::new(SqliteCacheStore::new(db.clone())));
        let listings = Arc::new(CachedListings::new(cache.clone(), source.clone(), ttl, namespace));
        let exchange = ExchangeService::new(cache.clone(), fx_config)?;
        let filters = Arc::new(CatalogFilters::new(db.clone(), namespace));
        let engine = Arc::new(SyncEngine::new(db.clone(), source, snapshot, sync_config));
        Ok(Self {
            db,
            engine,
            cache,
            listings,
            exchange,
            filters,
            ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::cache::CacheCategory;
    use crate::database_ops::models::{sample_card, Series};
    use crate::database_ops::snapshot::{Snapshot, StaticSnapshot};
    use crate::database_ops::sync::testing::{listed_series, FakeSource};

    async fn context(source: FakeSource, snapshot: Snapshot) -> CatalogContext {
        let db = Db::connect_in_memory().await.unwrap();
        CatalogContext::assemble(
            db,
            Arc::new(source),
            Arc::new(StaticSnapshot(snapshot)),
            SyncConfig::default(),
            CacheTtl::default(),
            FxConfig::default(),
            "pt",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn isolated_contexts_do_not_share_state() {
        let a = context(FakeSource::default(), Snapshot::default()).await;
        let b = context(FakeSource::default(), Snapshot::default()).await;
        a.db.initialize().await.unwrap();
        b.db.initialize().await.unwrap();
        a.db.insert_card(&sample_card("bw1-1")).await.unwrap();
        assert_eq!(a.db.get_stats().await.unwrap().cards, 1);
        assert_eq!(b.db.get_stats().await.unwrap().cards, 0);
    }

    #[tokio::test]
    async fn engine_and_listings_share_the_store() {
        let snapshot = Snapshot {
            series: vec![Series {
                name: "Black & White".into(),
                ..listed_series("bw")
            }],
            ..Default::default()
        };
        let ctx = context(
            FakeSource {
                series: vec![listed_series("sv")],
                ..Default::default()
            },
            snapshot,
        )
        .await;

        let report = ctx.engine.bootstrap().await.unwrap();
        assert!(report.success);
        assert_eq!(ctx.db.series_ids().await.unwrap().len(), 1);

        let listed = ctx.listings.series().await.unwrap();
        assert_eq!(listed[0].id, "sv");
        assert!(
            ctx.cache
                .is_valid(&CacheCategory::Series.key(Some("pt")), ctx.ttl.series)
                .await
        );

        ctx.filters.select_series(vec!["bw".into()]).await.unwrap();
        let shown = ctx.filters.filtered_series().await.unwrap();
        assert_eq!(shown[0].name, "Black & White");
        assert_eq!(ctx.filters.language(), "pt");
    }
}
