use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::database_ops::catalog::META_LAST_BACKFILL;
use crate::database_ops::models::Card;
use crate::database_ops::sync::{SyncEngine, SyncPhase, BUSY_MESSAGE};
use crate::error::CatalogResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub success: bool,
    pub message: String,
    pub scanned: usize,
    pub incomplete: usize,
    pub updated: usize,
    pub batches: usize,
    pub errors: usize,
}

impl BackfillReport {
    fn busy() -> Self {
        Self {
            message: BUSY_MESSAGE.to_string(),
            ..Default::default()
        }
    }
}

/// Cards the backfill pass should fetch details for, capped at `limit`.
pub fn select_incomplete(cards: Vec<Card>, limit: Option<usize>) -> Vec<Card> {
    cards
        .into_iter()
        .filter(Card::is_incomplete)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

impl SyncEngine {
    /// Fetch full details for incomplete cards and merge them into the store.
    #[instrument(skip(self))]
    pub async fn download_card_details(&self) -> CatalogResult<BackfillReport> {
        let Some(_guard) = self.try_begin() else {
            return Ok(BackfillReport::busy());
        };
        self.ensure_store().await?;
        self.enter(SyncPhase::Backfilling);
        let report = self.backfill_pass().await;
        self.enter(SyncPhase::Idle);
        Ok(report)
    }

    /// Detail fetches run concurrently inside each batch of
    /// `backfill_batch` cards, with `backfill_pause` between batches. A failed
    /// fetch or write is counted and the pass moves on.
    pub(crate) async fn backfill_pass(&self) -> BackfillReport {
        let mut report = BackfillReport::default();
        let cards = match self.db.get_all_cards().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "backfill: could not read cards");
                report.errors = 1;
                report.message = format!("could not read cards: {e}");
                return report;
            }
        };
        report.scanned = cards.len();
        let todo = select_incomplete(cards, self.config.backfill_limit);
        report.incomplete = todo.len();
        if todo.is_empty() {
            report.success = true;
            report.message = "no incomplete cards".to_string();
            return report;
        }
        info!(incomplete = todo.len(), scanned = report.scanned, "backfill: starting");

        for (i, chunk) in todo.chunks(self.config.backfill_batch).enumerate() {
            if i > 0 && !self.config.backfill_pause.is_zero() {
                tokio::time::sleep(self.config.backfill_pause).await;
            }
            let details = join_all(chunk.iter().map(|c| self.source.card_detail(&c.id))).await;

            let mut merged = Vec::with_capacity(chunk.len());
            for (card, detail) in chunk.iter().zip(details) {
                match detail {
                    Ok(patch) => {
                        let mut card = card.clone();
                        card.apply_patch(patch);
                        merged.push(card);
                    }
                    Err(e) => {
                        debug!(id = %card.id, error = %e, "backfill: detail fetch failed");
                        report.errors += 1;
                    }
                }
            }

            let outcome = self.write_cards(&merged).await;
            report.updated += outcome.written;
            report.batches += 1;
            report.errors += outcome.errors;
            debug!(batch = i + 1, updated = report.updated, errors = report.errors, "backfill: batch done");
        }

        self.db.touch_metadata(META_LAST_BACKFILL).await;
        report.success = true;
        report.message = format!(
            "{} of {} incomplete cards updated, {} errors",
            report.updated, report.incomplete, report.errors
        );
        info!(
            updated = report.updated,
            errors = report.errors,
            "backfill: finished"
        );
        report
    }
}
