//! Reconciles the catalog store with the bundled snapshot and the remote source.
//!
//! A run picks its strategy from the store counts: an empty store is seeded
//! from the snapshot, anything else gets an incremental id diff against the
//! remote listings followed by a backfill pass. Rows are only ever added or
//! overwritten here, never deleted.
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use super::catalog::{META_LAST_BOOTSTRAP, META_LAST_SYNC};
use super::db::Db;
use super::models::{Card, CardPatch, Series};
use super::snapshot::SnapshotSource;
use super::tcgdex::CatalogSource;
use crate::error::{CatalogError, CatalogResult};
use crate::normalization::series::SeriesResolver;
use crate::util::env::{env_parse, env_parse_opt};

pub const BUSY_MESSAGE: &str = "synchronization already in progress";

/// Consecutive failed card pages after which the walk gives up.
const MAX_CONSECUTIVE_PAGE_FAILURES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub page_size: u32,
    /// Hard ceiling on card listing pages fetched per run.
    pub max_pages: u32,
    /// Stop accumulating new cards once this many were found.
    pub max_new_cards: usize,
    pub write_batch: usize,
    pub backfill_batch: usize,
    pub backfill_pause: Duration,
    pub backfill_limit: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 50,
            max_new_cards: 5000,
            write_batch: 100,
            backfill_batch: 10,
            backfill_pause: Duration::from_millis(500),
            backfill_limit: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            page_size: env_parse("SYNC_PAGE_SIZE", d.page_size).max(1),
            max_pages: env_parse("SYNC_MAX_PAGES", d.max_pages).max(1),
            max_new_cards: env_parse("SYNC_MAX_NEW_CARDS", d.max_new_cards).max(1),
            write_batch: env_parse("SYNC_WRITE_BATCH", d.write_batch).max(1),
            backfill_batch: env_parse("BACKFILL_BATCH", d.backfill_batch).max(1),
            backfill_pause: Duration::from_millis(env_parse("BACKFILL_PAUSE_MS", 500u64)),
            backfill_limit: env_parse_opt("BACKFILL_LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    DecidingStrategy,
    Bootstrapping,
    SyncingSeries,
    SyncingSets,
    SyncingCards,
    Backfilling,
    RecomputingRollups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    Bootstrap,
    Incremental,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub strategy: Option<SyncStrategy>,
    pub new_series: usize,
    pub new_sets: usize,
    pub new_cards: usize,
    /// Card batches committed as one transaction each.
    pub batches_committed: usize,
    pub pages_fetched: usize,
    pub backfilled: usize,
    pub rollups_updated: usize,
    pub errors: usize,
}

impl SyncReport {
    pub(crate) fn busy() -> Self {
        Self {
            success: false,
            message: BUSY_MESSAGE.to_string(),
            ..Default::default()
        }
    }

    fn summary(&self) -> String {
        format!(
            "{} new series, {} new sets, {} new cards, {} errors",
            self.new_series, self.new_sets, self.new_cards, self.errors
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub has_updates: bool,
    pub new_series: usize,
    pub new_sets: usize,
    pub new_cards: usize,
    pub message: Option<String>,
}

impl UpdateCheck {
    fn failed(message: String) -> Self {
        Self {
            message: Some(message),
            ..Default::default()
        }
    }
}

/// Outcome of writing a run of cards in fixed-size batches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteOutcome {
    pub written: usize,
    pub batches: usize,
    pub errors: usize,
}

pub struct SyncEngine {
    pub(crate) db: Db,
    pub(crate) source: Arc<dyn CatalogSource>,
    snapshot: Arc<dyn SnapshotSource>,
    pub(crate) config: SyncConfig,
    run_lock: Mutex<()>,
    phase: watch::Sender<SyncPhase>,
}

impl SyncEngine {
    pub fn new(
        db: Db,
        source: Arc<dyn CatalogSource>,
        snapshot: Arc<dyn SnapshotSource>,
        config: SyncConfig,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            db,
            source,
            snapshot,
            config,
            run_lock: Mutex::new(()),
            phase,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub(crate) fn enter(&self, phase: SyncPhase) {
        let prev = self.phase.send_replace(phase);
        if prev != phase {
            info!(from = ?prev, to = ?phase, "sync phase");
        }
    }

    pub(crate) fn try_begin(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match self.run_lock.try_lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("sync run rejected: another run is active");
                None
            }
        }
    }

    /// Initialization failure is the one error a run surfaces as `Err`.
    pub(crate) async fn ensure_store(&self) -> CatalogResult<()> {
        self.db.initialize().await.map(|_| ()).map_err(|e| {
            error!(error = %e, "catalog store unavailable");
            match e {
                CatalogError::Initialization(_) => e,
                other => CatalogError::Initialization(other.to_string()),
            }
        })
    }

    /// Full synchronization: bootstrap an empty store, otherwise incremental
    /// diff plus backfill. Always ends with rollups and back in `Idle`.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> CatalogResult<SyncReport> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncReport::busy());
        };
        self.ensure_store().await?;

        self.enter(SyncPhase::DecidingStrategy);
        let stats = match self.db.get_stats().await {
            Ok(s) => s,
            Err(e) => {
                self.enter(SyncPhase::Idle);
                return Ok(SyncReport {
                    message: format!("could not read store counts: {e}"),
                    errors: 1,
                    ..Default::default()
                });
            }
        };
        let strategy = if stats.is_empty() {
            SyncStrategy::Bootstrap
        } else {
            SyncStrategy::Incremental
        };
        info!(?strategy, series = stats.series, sets = stats.sets, cards = stats.cards, "strategy selected");

        let mut report = match strategy {
            SyncStrategy::Bootstrap => self.bootstrap_pass().await,
            SyncStrategy::Incremental => {
                let mut report = self.incremental_pass().await;
                if report.success {
                    self.enter(SyncPhase::Backfilling);
                    let backfill = self.backfill_pass().await;
                    report.backfilled = backfill.updated;
                    report.errors += backfill.errors;
                }
                report
            }
        };
        self.finish(&mut report).await;
        Ok(report)
    }

    /// Seed the store from the bundled snapshot. A store that already holds
    /// data is left alone and its counts are reported.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> CatalogResult<SyncReport> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncReport::busy());
        };
        self.ensure_store().await?;

        self.enter(SyncPhase::DecidingStrategy);
        match self.db.get_stats().await {
            Ok(stats) if !stats.is_empty() => {
                self.enter(SyncPhase::Idle);
                return Ok(SyncReport {
                    success: true,
                    message: format!(
                        "data already present: {} series, {} sets, {} cards",
                        stats.series, stats.sets, stats.cards
                    ),
                    ..Default::default()
                });
            }
            Ok(_) => {}
            Err(e) => {
                self.enter(SyncPhase::Idle);
                return Ok(SyncReport {
                    message: format!("could not read store counts: {e}"),
                    errors: 1,
                    ..Default::default()
                });
            }
        }
        let mut report = self.bootstrap_pass().await;
        self.finish(&mut report).await;
        Ok(report)
    }

    async fn finish(&self, report: &mut SyncReport) {
        self.enter(SyncPhase::RecomputingRollups);
        match self.recompute_rollups().await {
            Ok(n) => report.rollups_updated = n,
            Err(e) => {
                warn!(error = %e, "rollup recompute failed");
                report.errors += 1;
            }
        }
        if report.success {
            let key = match report.strategy {
                Some(SyncStrategy::Bootstrap) => META_LAST_BOOTSTRAP,
                _ => META_LAST_SYNC,
            };
            self.db.touch_metadata(key).await;
            report.message = match report.strategy {
                Some(SyncStrategy::Bootstrap) => format!("bootstrap complete: {}", report.summary()),
                _ => format!("sync complete: {}", report.summary()),
            };
        }
        info!(
            success = report.success,
            new_series = report.new_series,
            new_sets = report.new_sets,
            new_cards = report.new_cards,
            batches = report.batches_committed,
            errors = report.errors,
            "sync finished"
        );
        self.enter(SyncPhase::Idle);
    }

    #[instrument(skip(self))]
    async fn bootstrap_pass(&self) -> SyncReport {
        self.enter(SyncPhase::Bootstrapping);
        let mut report = SyncReport {
            strategy: Some(SyncStrategy::Bootstrap),
            ..Default::default()
        };
        let snapshot = match self.snapshot.load().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "bundled snapshot unavailable");
                report.message = format!("failed to load bundled snapshot: {e:#}");
                report.errors += 1;
                return report;
            }
        };

        for chunk in snapshot.series.chunks(self.config.write_batch) {
            match self.db.insert_series_batch(chunk).await {
                Ok(n) => report.new_series += n,
                Err(e) => {
                    warn!(error = %e, n = chunk.len(), "series batch failed");
                    report.errors += 1;
                }
            }
        }

        let mut resolver = SeriesResolver::new();
        let sets: Vec<_> = snapshot
            .sets
            .into_iter()
            .map(|s| {
                let series = resolver.resolve(s.supplied_series.as_deref(), &s.id);
                resolver.remember(s.id.clone(), series.clone());
                s.into_set(series)
            })
            .collect();
        for chunk in sets.chunks(self.config.write_batch) {
            match self.db.insert_sets_batch(chunk).await {
                Ok(n) => report.new_sets += n,
                Err(e) => {
                    warn!(error = %e, n = chunk.len(), "set batch failed");
                    report.errors += 1;
                }
            }
        }

        let cards = resolve_cards(&resolver, snapshot.cards);
        let outcome = self.write_cards(&cards).await;
        report.new_cards = outcome.written;
        report.batches_committed = outcome.batches;
        report.errors += outcome.errors;
        report.success = true;
        report
    }

    #[instrument(skip(self))]
    async fn incremental_pass(&self) -> SyncReport {
        let mut report = SyncReport {
            strategy: Some(SyncStrategy::Incremental),
            ..Default::default()
        };
        let mut listings_failed = 0usize;

        // Series
        self.enter(SyncPhase::SyncingSeries);
        match self.source.list_series().await {
            Ok(remote) => match self.db.series_ids().await {
                Ok(local) => {
                    let fresh: Vec<Series> = new_by_id(remote, &local, |s| &s.id);
                    debug!(remote_new = fresh.len(), "series diff");
                    for s in &fresh {
                        match self.db.insert_series(s).await {
                            Ok(()) => report.new_series += 1,
                            Err(e) => {
                                warn!(id = %s.id, error = %e, "series insert failed");
                                report.errors += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "could not read stored series ids");
                    report.errors += 1;
                }
            },
            Err(e) => {
                warn!(error = %e, "series listing failed");
                report.errors += 1;
                listings_failed += 1;
            }
        }

        // Sets
        self.enter(SyncPhase::SyncingSets);
        let mut resolver = match self.db.set_series_pairs().await {
            Ok(pairs) => SeriesResolver::with_known_sets(pairs),
            Err(e) => {
                warn!(error = %e, "could not read stored set series");
                report.errors += 1;
                SeriesResolver::new()
            }
        };
        match self.source.list_sets().await {
            Ok(remote) => match self.db.set_ids().await {
                Ok(local) => {
                    let fresh = new_by_id(remote, &local, |s| &s.id);
                    debug!(remote_new = fresh.len(), "set diff");
                    for s in fresh {
                        let series = resolver.resolve(s.supplied_series.as_deref(), &s.id);
                        resolver.remember(s.id.clone(), series.clone());
                        let set = s.into_set(series);
                        match self.db.insert_set(&set).await {
                            Ok(()) => report.new_sets += 1,
                            Err(e) => {
                                warn!(id = %set.id, error = %e, "set insert failed");
                                report.errors += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "could not read stored set ids");
                    report.errors += 1;
                }
            },
            Err(e) => {
                warn!(error = %e, "set listing failed");
                report.errors += 1;
                listings_failed += 1;
            }
        }

        // Cards
        self.enter(SyncPhase::SyncingCards);
        let local = match self.db.card_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not read stored card ids");
                report.errors += 1;
                report.message = format!("could not read stored cards: {e}");
                return report;
            }
        };
        let mut pending: Vec<CardPatch> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut page_failures = 0usize;
        let mut consecutive_failures = 0usize;
        for page in 1..=self.config.max_pages {
            let batch = match self.source.list_cards(page, self.config.page_size).await {
                Ok(b) => {
                    consecutive_failures = 0;
                    b
                }
                Err(e) => {
                    warn!(page, error = %e, "card page failed");
                    report.errors += 1;
                    page_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_PAGE_FAILURES {
                        warn!(page, "giving up on card listing");
                        break;
                    }
                    continue;
                }
            };
            report.pages_fetched += 1;
            if batch.is_empty() {
                break;
            }
            let short_page = batch.len() < self.config.page_size as usize;
            for patch in batch {
                if !local.contains(&patch.id) && seen.insert(patch.id.clone()) {
                    pending.push(patch);
                }
            }
            if pending.len() >= self.config.max_new_cards {
                pending.truncate(self.config.max_new_cards);
                info!(cap = self.config.max_new_cards, "new card cap reached");
                break;
            }
            if short_page {
                break;
            }
        }
        if report.pages_fetched == 0 && page_failures > 0 {
            listings_failed += 1;
        }
        debug!(new = pending.len(), pages = report.pages_fetched, "card diff");

        let cards = resolve_cards(&resolver, pending);
        let outcome = self.write_cards(&cards).await;
        report.new_cards = outcome.written;
        report.batches_committed = outcome.batches;
        report.errors += outcome.errors;

        if listings_failed == 3 {
            report.message = "catalog source unavailable: every listing failed".to_string();
            return report;
        }
        report.success = true;
        report
    }

    /// Write cards in fixed-size transactional batches. A failed batch is
    /// retried card by card so one bad row costs one error, not a batch.
    pub(crate) async fn write_cards(&self, cards: &[Card]) -> WriteOutcome {
        let mut out = WriteOutcome::default();
        for chunk in cards.chunks(self.config.write_batch) {
            match self.db.update_cards_batch(chunk).await {
                Ok(n) => {
                    out.written += n;
                    out.batches += 1;
                    debug!(batch = out.batches, n, "card batch written");
                }
                Err(e) => {
                    warn!(error = %e, n = chunk.len(), "card batch failed, retrying per card");
                    for card in chunk {
                        match self.db.insert_card(card).await {
                            Ok(()) => out.written += 1,
                            Err(e) => {
                                debug!(id = %card.id, error = %e, "card insert failed");
                                out.errors += 1;
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Rewrite each series' set count from the stored sets. Returns how many
    /// series rows changed.
    #[instrument(skip(self))]
    pub async fn recompute_rollups(&self) -> CatalogResult<usize> {
        let mut changed = 0usize;
        for mut series in self.db.get_all_series().await? {
            let total = self.db.get_sets_by_series(&series.id).await?.len() as i64;
            if series.total_sets != total {
                series.total_sets = total;
                self.db.insert_series(&series).await?;
                changed += 1;
            }
        }
        debug!(changed, "series rollups recomputed");
        Ok(changed)
    }

    /// Count what an incremental run would add: series and sets by id diff,
    /// cards against the first listing page only. Never fails.
    #[instrument(skip(self))]
    pub async fn check_for_updates(&self) -> UpdateCheck {
        if let Err(e) = self.ensure_store().await {
            return UpdateCheck::failed(e.to_string());
        }
        let remote_series = match self.source.list_series().await {
            Ok(v) => v,
            Err(e) => return UpdateCheck::failed(format!("series listing failed: {e:#}")),
        };
        let remote_sets = match self.source.list_sets().await {
            Ok(v) => v,
            Err(e) => return UpdateCheck::failed(format!("set listing failed: {e:#}")),
        };
        let remote_cards = match self.source.list_cards(1, self.config.page_size).await {
            Ok(v) => v,
            Err(e) => return UpdateCheck::failed(format!("card listing failed: {e:#}")),
        };
        let (series_ids, set_ids, card_ids) = match tokio::try_join!(
            self.db.series_ids(),
            self.db.set_ids(),
            self.db.card_ids()
        ) {
            Ok(ids) => ids,
            Err(e) => return UpdateCheck::failed(format!("could not read store: {e}")),
        };
        let new_series = new_by_id(remote_series, &series_ids, |s| &s.id).len();
        let new_sets = new_by_id(remote_sets, &set_ids, |s| &s.id).len();
        let new_cards = new_by_id(remote_cards, &card_ids, |c| &c.id).len();
        let check = UpdateCheck {
            has_updates: new_series + new_sets + new_cards > 0,
            new_series,
            new_sets,
            new_cards,
            message: None,
        };
        info!(?check, checked_at = %Utc::now(), "update check");
        check
    }
}

/// Items whose id is absent from `local`, first occurrence wins.
fn new_by_id<T>(remote: Vec<T>, local: &HashSet<String>, id: impl Fn(&T) -> &String) -> Vec<T> {
    let mut seen = HashSet::new();
    remote
        .into_iter()
        .filter(|item| {
            let key = id(item);
            !local.contains(key) && seen.insert(key.clone())
        })
        .collect()
}

/// Turn patches into full rows, placing each card in a series.
fn resolve_cards(resolver: &SeriesResolver, patches: Vec<CardPatch>) -> Vec<Card> {
    patches
        .into_iter()
        .map(|p| {
            let set_id = p.effective_set_id();
            let series = resolver.resolve(p.series_id.as_deref(), &set_id);
            p.into_card(series)
        })
        .collect()
}
