//! Saved series and expansion selections, one pair per language.
//!
//! Selections live in `app_metadata` as JSON id lists under
//! `selected_series_<lang>` and `selected_expansions_<lang>`. An empty series
//! selection shows nothing (the user has to pick); an empty expansion
//! selection shows every set of the chosen series.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::db::Db;
use super::models::{Card, CardSet, Series};
use crate::error::CatalogResult;

pub const META_LAST_UPDATE: &str = "last_update_time";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Selection {
    series: Vec<String>,
    expansions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterInfo {
    pub series_count: usize,
    pub expansions_count: usize,
    pub has_filters: bool,
}

pub struct CatalogFilters {
    db: Db,
    language: String,
    selection: RwLock<Selection>,
}

impl CatalogFilters {
    /// Starts with nothing selected; call [`load`](Self::load) to read the
    /// saved selections.
    pub fn new(db: Db, language: &str) -> Self {
        Self {
            db,
            language: language.trim().to_string(),
            selection: RwLock::new(Selection::default()),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn series_key(&self) -> String {
        format!("selected_series_{}", self.language)
    }

    fn expansions_key(&self) -> String {
        format!("selected_expansions_{}", self.language)
    }

    async fn read_ids(&self, key: &str) -> CatalogResult<Vec<String>> {
        let Some(raw) = self.db.get_metadata(key).await? else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(key, error = %e, "unreadable saved selection, treating as empty");
            Vec::new()
        }))
    }

    async fn write_ids(&self, key: &str, ids: &[String]) -> CatalogResult<()> {
        let raw = serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string());
        self.db.set_metadata(key, &raw).await
    }

    #[instrument(skip(self), fields(lang = %self.language))]
    pub async fn load(&self) -> CatalogResult<FilterInfo> {
        let loaded = Selection {
            series: self.read_ids(&self.series_key()).await?,
            expansions: self.read_ids(&self.expansions_key()).await?,
        };
        *self.selection.write().await = loaded;
        let info = self.info().await;
        info!(
            series = info.series_count,
            expansions = info.expansions_count,
            "filters loaded"
        );
        Ok(info)
    }

    pub async fn select_series(&self, ids: Vec<String>) -> CatalogResult<()> {
        self.write_ids(&self.series_key(), &ids).await?;
        self.selection.write().await.series = ids;
        Ok(())
    }

    pub async fn select_expansions(&self, ids: Vec<String>) -> CatalogResult<()> {
        self.write_ids(&self.expansions_key(), &ids).await?;
        self.selection.write().await.expansions = ids;
        Ok(())
    }

    pub async fn filtered_series(&self) -> CatalogResult<Vec<Series>> {
        let selected = self.selection.read().await.series.clone();
        if selected.is_empty() {
            debug!("no series selected");
            return Ok(Vec::new());
        }
        let all = self.db.get_all_series().await?;
        Ok(all.into_iter().filter(|s| selected.contains(&s.id)).collect())
    }

    pub async fn filtered_sets_by_series(&self, series_id: &str) -> CatalogResult<Vec<CardSet>> {
        let sets = self.db.get_sets_by_series(series_id).await?;
        let selected = self.selection.read().await.expansions.clone();
        if selected.is_empty() {
            return Ok(sets);
        }
        Ok(sets.into_iter().filter(|s| selected.contains(&s.id)).collect())
    }

    /// Cards are already narrowed by the set the caller picked.
    pub async fn filtered_cards_by_set(&self, set_id: &str) -> CatalogResult<Vec<Card>> {
        self.db.get_cards_by_set(set_id).await
    }

    pub async fn has_active_filters(&self) -> bool {
        let s = self.selection.read().await;
        !s.series.is_empty() || !s.expansions.is_empty()
    }

    pub async fn info(&self) -> FilterInfo {
        let s = self.selection.read().await;
        FilterInfo {
            series_count: s.series.len(),
            expansions_count: s.expansions.len(),
            has_filters: !s.series.is_empty() || !s.expansions.is_empty(),
        }
    }

    /// Forget both selections for this language only.
    pub async fn clear_all(&self) -> CatalogResult<()> {
        *self.selection.write().await = Selection::default();
        self.db.delete_metadata(&self.series_key()).await?;
        self.db.delete_metadata(&self.expansions_key()).await?;
        info!(lang = %self.language, "filters cleared");
        Ok(())
    }

    pub async fn set_last_update_time(&self, at: DateTime<Utc>) -> CatalogResult<()> {
        self.db.set_metadata(META_LAST_UPDATE, &at.to_rfc3339()).await
    }

    pub async fn last_update_time(&self) -> CatalogResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.db.get_metadata(META_LAST_UPDATE).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(t) => Ok(Some(t.with_timezone(&Utc))),
            Err(e) => {
                warn!(raw = %raw, error = %e, "unreadable last update time");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::models::sample_card;

    async fn seeded_db() -> Db {
        let db = Db::connect_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        for (id, name) in [("bw", "Black & White"), ("xy", "XY"), ("sm", "Sun & Moon")] {
            db.insert_series(&Series {
                id: id.into(),
                name: name.into(),
                logo: None,
                total_sets: 0,
            })
            .await
            .unwrap();
        }
        for (id, series) in [("bw1", "bw"), ("bw2", "bw"), ("xy1", "xy")] {
            db.insert_set(&CardSet {
                id: id.into(),
                name: format!("Set {id}"),
                series_id: series.into(),
                release_date: None,
                total_cards: 0,
                symbol: None,
                logo: None,
            })
            .await
            .unwrap();
        }
        db
    }

    fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
        let mut out: Vec<String> = items.iter().map(|i| id(i).to_string()).collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn empty_selection_rules() {
        let filters = CatalogFilters::new(seeded_db().await, "pt");
        filters.load().await.unwrap();
        assert!(!filters.has_active_filters().await);
        assert!(filters.filtered_series().await.unwrap().is_empty());
        let sets = filters.filtered_sets_by_series("bw").await.unwrap();
        assert_eq!(ids(&sets, |s| s.id.as_str()), vec!["bw1", "bw2"]);
    }

    #[tokio::test]
    async fn selections_narrow_series_and_sets() {
        let filters = CatalogFilters::new(seeded_db().await, "pt");
        filters
            .select_series(vec!["bw".into(), "sm".into(), "gone".into()])
            .await
            .unwrap();
        filters.select_expansions(vec!["bw2".into()]).await.unwrap();

        let series = filters.filtered_series().await.unwrap();
        assert_eq!(ids(&series, |s| s.id.as_str()), vec!["bw", "sm"]);
        let sets = filters.filtered_sets_by_series("bw").await.unwrap();
        assert_eq!(ids(&sets, |s| s.id.as_str()), vec!["bw2"]);
        assert!(filters.filtered_sets_by_series("xy").await.unwrap().is_empty());
        assert_eq!(
            filters.info().await,
            FilterInfo {
                series_count: 3,
                expansions_count: 1,
                has_filters: true
            }
        );
    }

    #[tokio::test]
    async fn selections_are_saved_per_language() {
        let db = seeded_db().await;
        let pt = CatalogFilters::new(db.clone(), "pt");
        pt.select_series(vec!["xy".into()]).await.unwrap();

        let reopened = CatalogFilters::new(db.clone(), "pt");
        assert_eq!(reopened.load().await.unwrap().series_count, 1);
        assert_eq!(reopened.filtered_series().await.unwrap()[0].id, "xy");

        let en = CatalogFilters::new(db.clone(), "en");
        assert!(!en.load().await.unwrap().has_filters);
        assert_eq!(
            db.get_metadata("selected_series_pt").await.unwrap().as_deref(),
            Some(r#"["xy"]"#)
        );
    }

    #[tokio::test]
    async fn clear_only_touches_own_language() {
        let db = seeded_db().await;
        let pt = CatalogFilters::new(db.clone(), "pt");
        let en = CatalogFilters::new(db.clone(), "en");
        pt.select_series(vec!["bw".into()]).await.unwrap();
        pt.select_expansions(vec!["bw1".into()]).await.unwrap();
        en.select_series(vec!["sm".into()]).await.unwrap();

        pt.clear_all().await.unwrap();
        assert!(!pt.has_active_filters().await);
        assert!(db.get_metadata("selected_series_pt").await.unwrap().is_none());
        assert!(db.get_metadata("selected_expansions_pt").await.unwrap().is_none());

        let en_again = CatalogFilters::new(db, "en");
        assert_eq!(en_again.load().await.unwrap().series_count, 1);
    }

    #[tokio::test]
    async fn unreadable_saved_selection_loads_empty() {
        let db = seeded_db().await;
        db.set_metadata("selected_series_pt", "{not a list").await.unwrap();
        db.set_metadata("selected_expansions_pt", r#"["bw1"]"#).await.unwrap();
        let filters = CatalogFilters::new(db, "pt");
        let info = filters.load().await.unwrap();
        assert_eq!((info.series_count, info.expansions_count), (0, 1));
    }

    #[tokio::test]
    async fn cards_by_set_pass_through() {
        let db = seeded_db().await;
        db.insert_card(&sample_card("bw1-1")).await.unwrap();
        let filters = CatalogFilters::new(db, "pt");
        let cards = filters.filtered_cards_by_set("bw1").await.unwrap();
        assert_eq!(cards.len(), 1);
    }

    #[tokio::test]
    async fn last_update_time_round_trips() {
        let db = seeded_db().await;
        let filters = CatalogFilters::new(db.clone(), "pt");
        assert!(filters.last_update_time().await.unwrap().is_none());

        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        filters.set_last_update_time(at).await.unwrap();
        assert_eq!(filters.last_update_time().await.unwrap(), Some(at));

        db.set_metadata(META_LAST_UPDATE, "yesterday").await.unwrap();
        assert!(filters.last_update_time().await.unwrap().is_none());
    }
}
