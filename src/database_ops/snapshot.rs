//! Bundled catalog snapshot used to seed an empty store.
//!
//! Loading is explicit and lazy: nothing is read until `load()` is called,
//! and tests swap in [`StaticSnapshot`].
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::decode::{self, DecodedSet};
use super::models::{CardPatch, Series};

pub const SERIES_FILE: &str = "series.json";
pub const SETS_FILE: &str = "sets.json";
pub const CARDS_FILE: &str = "cards.json";

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub series: Vec<Series>,
    pub sets: Vec<DecodedSet>,
    pub cards: Vec<CardPatch>,
    /// Entries dropped because they lacked an id or were not objects.
    pub skipped: usize,
}

impl Snapshot {
    pub fn from_values(series: &Value, sets: &Value, cards: &Value) -> Self {
        let (series, a) = decode::decode_collection(series, decode::decode_series);
        let (sets, b) = decode::decode_collection(sets, decode::decode_set);
        let (cards, c) = decode::decode_collection(cards, decode::decode_card);
        Self {
            series,
            sets,
            cards,
            skipped: a + b + c,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.sets.is_empty() && self.cards.is_empty()
    }
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load(&self) -> Result<Snapshot>;
}

/// Directory holding `series.json`, `sets.json` and `cards.json`.
#[derive(Debug, Clone)]
pub struct JsonSnapshotDir {
    dir: PathBuf,
}

impl JsonSnapshotDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read(&self, file: &str) -> Result<Value> {
        let path = self.dir.join(file);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read snapshot file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse snapshot file {}", path.display()))
    }
}

#[async_trait]
impl SnapshotSource for JsonSnapshotDir {
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn load(&self) -> Result<Snapshot> {
        let series = self.read(SERIES_FILE).await?;
        let sets = self.read(SETS_FILE).await?;
        let cards = self.read(CARDS_FILE).await?;
        let snapshot = Snapshot::from_values(&series, &sets, &cards);
        if snapshot.skipped > 0 {
            warn!(skipped = snapshot.skipped, "snapshot entries skipped");
        }
        info!(
            series = snapshot.series.len(),
            sets = snapshot.sets.len(),
            cards = snapshot.cards.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }
}

/// In-memory snapshot, handed out by clone on every load.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshot(pub Snapshot);

#[async_trait]
impl SnapshotSource for StaticSnapshot {
    async fn load(&self) -> Result<Snapshot> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn loads_directory_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonSnapshotDir::new(dir.path());
        // Nothing on disk yet: construction succeeded, load fails.
        assert!(source.load().await.is_err());

        std::fs::write(
            dir.path().join(SERIES_FILE),
            json!([{"id": "bw", "name": "Black & White"}]).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join(SETS_FILE),
            json!([{"id": "bw1", "name": "Black & White", "series": "bw", "totalCards": 115}])
                .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join(CARDS_FILE),
            json!({"data": [{"id": "bw1-1", "name": "Snivy"}, {"name": "no id"}]}).to_string(),
        )
        .unwrap();

        let snapshot = source.load().await.unwrap();
        assert_eq!(snapshot.series.len(), 1);
        assert_eq!(snapshot.sets[0].total_cards, 115);
        assert_eq!(snapshot.cards.len(), 1);
        assert_eq!(snapshot.skipped, 1);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        for f in [SERIES_FILE, SETS_FILE, CARDS_FILE] {
            std::fs::write(dir.path().join(f), "{ not json").unwrap();
        }
        let err = JsonSnapshotDir::new(dir.path()).load().await.unwrap_err();
        assert!(err.to_string().contains(SERIES_FILE));
    }
}
