//! Catalog reads and writes on top of [`Db`].
//!
//! Every write is an upsert keyed by primary id that replaces all columns
//! except `created_at`. Batches run inside one transaction.
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use super::db::Db;
use super::models::{Card, CardSet, Series, Stats};
use crate::error::{CatalogError, CatalogResult};

pub const META_LAST_BOOTSTRAP: &str = "last_bootstrap_at";
pub const META_LAST_SYNC: &str = "last_sync_at";
pub const META_LAST_BACKFILL: &str = "last_backfill_at";

pub const DEFAULT_SEARCH_LIMIT: i64 = 100;

const CARD_COLUMNS: &str = "id, name, image, rarity, set_id, series_id, price, hp, local_id, \
     types, attacks, weaknesses, resistances, category, illustrator, dex_id, stage, retreat, \
     legal, variants, updated, last_updated";

const UPSERT_CARD: &str = r#"
INSERT INTO cards (id, name, image, rarity, set_id, series_id, price, hp, local_id,
                   types, attacks, weaknesses, resistances, category, illustrator, dex_id,
                   stage, retreat, legal, variants, updated, last_updated)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    image = excluded.image,
    rarity = excluded.rarity,
    set_id = excluded.set_id,
    series_id = excluded.series_id,
    price = excluded.price,
    hp = excluded.hp,
    local_id = excluded.local_id,
    types = excluded.types,
    attacks = excluded.attacks,
    weaknesses = excluded.weaknesses,
    resistances = excluded.resistances,
    category = excluded.category,
    illustrator = excluded.illustrator,
    dex_id = excluded.dex_id,
    stage = excluded.stage,
    retreat = excluded.retreat,
    legal = excluded.legal,
    variants = excluded.variants,
    updated = excluded.updated,
    last_updated = excluded.last_updated
"#;

const UPSERT_SERIES: &str = r#"
INSERT INTO series (id, name, logo, total_sets, updated_at)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    logo = excluded.logo,
    total_sets = excluded.total_sets,
    updated_at = excluded.updated_at
"#;

const UPSERT_SET: &str = r#"
INSERT INTO sets (id, name, series_id, release_date, total_cards, symbol, logo, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    series_id = excluded.series_id,
    release_date = excluded.release_date,
    total_cards = excluded.total_cards,
    symbol = excluded.symbol,
    logo = excluded.logo,
    updated_at = excluded.updated_at
"#;

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn to_json<T: Serialize + ?Sized>(v: &T) -> CatalogResult<String> {
    serde_json::to_string(v).map_err(|e| CatalogError::Serialization(e.to_string()))
}

fn opt_json<T: Serialize>(v: &Option<T>) -> CatalogResult<Option<String>> {
    v.as_ref().map(|x| to_json(x)).transpose()
}

/// JSON text column; NULL or unreadable content (older rows) reads as empty.
fn json_col<T: DeserializeOwned + Default>(row: &SqliteRow, col: &str) -> T {
    match row.try_get::<Option<String>, _>(col) {
        Ok(Some(raw)) if !raw.trim().is_empty() => serde_json::from_str(&raw).unwrap_or_else(|e| {
            debug!(column = col, error = %e, "unreadable json column");
            T::default()
        }),
        _ => T::default(),
    }
}

fn opt_json_col<T: DeserializeOwned>(row: &SqliteRow, col: &str) -> Option<T> {
    match row.try_get::<Option<String>, _>(col) {
        Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
        _ => None,
    }
}

fn series_from_row(r: &SqliteRow) -> CatalogResult<Series> {
    Ok(Series {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        logo: r.try_get("logo")?,
        total_sets: r.try_get("total_sets")?,
    })
}

fn set_from_row(r: &SqliteRow) -> CatalogResult<CardSet> {
    Ok(CardSet {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        series_id: r.try_get("series_id")?,
        release_date: r.try_get("release_date")?,
        total_cards: r.try_get("total_cards")?,
        symbol: r.try_get("symbol")?,
        logo: r.try_get("logo")?,
    })
}

fn card_from_row(r: &SqliteRow) -> CatalogResult<Card> {
    Ok(Card {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        image: r.try_get("image")?,
        rarity: r.try_get("rarity")?,
        set_id: r.try_get("set_id")?,
        series_id: r.try_get("series_id")?,
        price: r.try_get::<Option<f64>, _>("price")?.unwrap_or(0.0),
        hp: r.try_get("hp")?,
        local_id: r.try_get("local_id")?,
        types: json_col(r, "types"),
        attacks: json_col(r, "attacks"),
        weaknesses: json_col(r, "weaknesses"),
        resistances: json_col(r, "resistances"),
        category: r.try_get("category")?,
        illustrator: r.try_get("illustrator")?,
        dex_id: json_col(r, "dex_id"),
        stage: r.try_get("stage")?,
        retreat: r.try_get("retreat")?,
        legal: opt_json_col(r, "legal"),
        variants: opt_json_col(r, "variants"),
        updated: r.try_get("updated")?,
        last_updated: r.try_get("last_updated")?,
    })
}

async fn upsert_card_with<'e, E>(exec: E, card: &Card, now: DateTime<Utc>) -> CatalogResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_CARD)
        .bind(&card.id)
        .bind(&card.name)
        .bind(&card.image)
        .bind(&card.rarity)
        .bind(&card.set_id)
        .bind(&card.series_id)
        .bind(card.price)
        .bind(card.hp)
        .bind(&card.local_id)
        .bind(to_json(&card.types)?)
        .bind(to_json(&card.attacks)?)
        .bind(to_json(&card.weaknesses)?)
        .bind(to_json(&card.resistances)?)
        .bind(&card.category)
        .bind(&card.illustrator)
        .bind(to_json(&card.dex_id)?)
        .bind(&card.stage)
        .bind(card.retreat)
        .bind(opt_json(&card.legal)?)
        .bind(opt_json(&card.variants)?)
        .bind(&card.updated)
        .bind(now)
        .execute(exec)
        .await?;
    Ok(())
}

async fn upsert_series_with<'e, E>(exec: E, s: &Series, now: DateTime<Utc>) -> CatalogResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_SERIES)
        .bind(&s.id)
        .bind(&s.name)
        .bind(&s.logo)
        .bind(s.total_sets)
        .bind(now)
        .execute(exec)
        .await?;
    Ok(())
}

async fn upsert_set_with<'e, E>(exec: E, s: &CardSet, now: DateTime<Utc>) -> CatalogResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_SET)
        .bind(&s.id)
        .bind(&s.name)
        .bind(&s.series_id)
        .bind(&s.release_date)
        .bind(s.total_cards)
        .bind(&s.symbol)
        .bind(&s.logo)
        .bind(now)
        .execute(exec)
        .await?;
    Ok(())
}

impl Db {
    // ---- writes ----

    #[instrument(skip(self, series), fields(id = %series.id))]
    pub async fn insert_series(&self, series: &Series) -> CatalogResult<()> {
        upsert_series_with(self.ready()?, series, Utc::now()).await
    }

    #[instrument(skip(self, set), fields(id = %set.id))]
    pub async fn insert_set(&self, set: &CardSet) -> CatalogResult<()> {
        upsert_set_with(self.ready()?, set, Utc::now()).await
    }

    #[instrument(skip(self, card), fields(id = %card.id))]
    pub async fn insert_card(&self, card: &Card) -> CatalogResult<()> {
        upsert_card_with(self.ready()?, card, Utc::now()).await
    }

    /// Upsert a batch of series in one transaction.
    #[instrument(skip(self, rows), fields(n = rows.len()))]
    pub async fn insert_series_batch(&self, rows: &[Series]) -> CatalogResult<usize> {
        let pool = self.ready()?;
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        for s in rows {
            upsert_series_with(&mut *tx, s, now).await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    /// Upsert a batch of sets in one transaction.
    #[instrument(skip(self, rows), fields(n = rows.len()))]
    pub async fn insert_sets_batch(&self, rows: &[CardSet]) -> CatalogResult<usize> {
        let pool = self.ready()?;
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        for s in rows {
            upsert_set_with(&mut *tx, s, now).await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    /// All-or-nothing upsert of many cards. On any failure the transaction is
    /// dropped (rolled back) and nothing from this batch persists.
    #[instrument(skip(self, cards), fields(n = cards.len()))]
    pub async fn update_cards_batch(&self, cards: &[Card]) -> CatalogResult<usize> {
        if cards.is_empty() {
            return Ok(0);
        }
        let pool = self.ready()?;
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        for card in cards {
            upsert_card_with(&mut *tx, card, now).await?;
        }
        tx.commit().await?;
        debug!(n = cards.len(), "card batch committed");
        Ok(cards.len())
    }

    // ---- reads ----

    pub async fn get_all_series(&self) -> CatalogResult<Vec<Series>> {
        let rows = sqlx::query(
            "SELECT id, name, logo, total_sets FROM series ORDER BY name ASC, id ASC",
        )
        .fetch_all(self.ready()?)
        .await?;
        rows.iter().map(series_from_row).collect()
    }

    /// Newest releases first; undated sets last.
    pub async fn get_all_sets(&self) -> CatalogResult<Vec<CardSet>> {
        let rows = sqlx::query(
            "SELECT id, name, series_id, release_date, total_cards, symbol, logo FROM sets \
             ORDER BY release_date IS NULL, release_date DESC, id ASC",
        )
        .fetch_all(self.ready()?)
        .await?;
        rows.iter().map(set_from_row).collect()
    }

    pub async fn get_sets_by_series(&self, series_id: &str) -> CatalogResult<Vec<CardSet>> {
        let rows = sqlx::query(
            "SELECT id, name, series_id, release_date, total_cards, symbol, logo FROM sets \
             WHERE series_id = ? ORDER BY release_date IS NULL, release_date DESC, id ASC",
        )
        .bind(series_id)
        .fetch_all(self.ready()?)
        .await?;
        rows.iter().map(set_from_row).collect()
    }

    pub async fn get_all_cards(&self) -> CatalogResult<Vec<Card>> {
        let sql = format!("SELECT {CARD_COLUMNS} FROM cards ORDER BY name ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(self.ready()?).await?;
        rows.iter().map(card_from_row).collect()
    }

    pub async fn get_cards_by_set(&self, set_id: &str) -> CatalogResult<Vec<Card>> {
        let sql =
            format!("SELECT {CARD_COLUMNS} FROM cards WHERE set_id = ? ORDER BY name ASC, id ASC");
        let rows = sqlx::query(&sql)
            .bind(set_id)
            .fetch_all(self.ready()?)
            .await?;
        rows.iter().map(card_from_row).collect()
    }

    /// Substring match on the card name, ASCII case-insensitive like SQLite's
    /// LIKE. `%` and `_` in the query match literally.
    pub async fn search_cards_by_name(&self, query: &str, limit: i64) -> CatalogResult<Vec<Card>> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE name LIKE ? ESCAPE '\\' \
             ORDER BY name ASC, id ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(pattern)
            .bind(limit.max(1))
            .fetch_all(self.ready()?)
            .await?;
        rows.iter().map(card_from_row).collect()
    }

    pub async fn get_card(&self, id: &str) -> CatalogResult<Option<Card>> {
        let sql = format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.ready()?)
            .await?;
        row.as_ref().map(card_from_row).transpose()
    }

    async fn id_set(&self, sql: &'static str) -> CatalogResult<HashSet<String>> {
        let rows = sqlx::query(sql).fetch_all(self.ready()?).await?;
        rows.iter()
            .map(|r| -> CatalogResult<String> { Ok(r.try_get(0)?) })
            .collect()
    }

    pub async fn series_ids(&self) -> CatalogResult<HashSet<String>> {
        self.id_set("SELECT id FROM series").await
    }

    pub async fn set_ids(&self) -> CatalogResult<HashSet<String>> {
        self.id_set("SELECT id FROM sets").await
    }

    pub async fn card_ids(&self) -> CatalogResult<HashSet<String>> {
        self.id_set("SELECT id FROM cards").await
    }

    /// (set id, series id) for every stored set.
    pub async fn set_series_pairs(&self) -> CatalogResult<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT id, series_id FROM sets")
            .fetch_all(self.ready()?)
            .await?;
        rows.iter()
            .map(|r| -> CatalogResult<(String, String)> {
                Ok((r.try_get("id")?, r.try_get("series_id")?))
            })
            .collect()
    }

    pub async fn get_stats(&self) -> CatalogResult<Stats> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM series) AS series, \
                    (SELECT COUNT(*) FROM sets) AS sets, \
                    (SELECT COUNT(*) FROM cards) AS cards",
        )
        .fetch_one(self.ready()?)
        .await?;
        Ok(Stats {
            series: row.try_get("series")?,
            sets: row.try_get("sets")?,
            cards: row.try_get("cards")?,
        })
    }

    /// True when any card was written after `since`.
    pub async fn needs_update(&self, since: DateTime<Utc>) -> CatalogResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM cards WHERE last_updated > ?) AS newer",
        )
        .bind(since)
        .fetch_one(self.ready()?)
        .await?;
        Ok(row.try_get::<i64, _>("newer")? != 0)
    }

    /// Remove every domain row. Migration and metadata bookkeeping survive.
    #[instrument(skip(self))]
    pub async fn clear_all_data(&self) -> CatalogResult<()> {
        let pool = self.ready()?;
        let mut tx = pool.begin().await?;
        for table in ["cards", "sets", "series"] {
            let done = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
            debug!(table, rows = done.rows_affected(), "cleared");
        }
        tx.commit().await?;
        warn!("catalog data cleared");
        Ok(())
    }

    // ---- metadata ----

    pub async fn set_metadata(&self, key: &str, value: &str) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO app_metadata (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(self.ready()?)
        .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &str) -> CatalogResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM app_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(self.ready()?)
            .await?;
        Ok(match row {
            Some(r) => r.try_get::<Option<String>, _>("value")?,
            None => None,
        })
    }

    pub async fn delete_metadata(&self, key: &str) -> CatalogResult<bool> {
        let done = sqlx::query("DELETE FROM app_metadata WHERE key = ?")
            .bind(key)
            .execute(self.ready()?)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Stamp a bookkeeping key with the current time. Failures are logged only.
    pub(crate) async fn touch_metadata(&self, key: &str) {
        if let Err(e) = self.set_metadata(key, &Utc::now().to_rfc3339()).await {
            warn!(key, error = %e, "failed to record metadata");
        } else {
            info!(key, "metadata stamped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::models::{sample_card, Attack, Legality};

    async fn ready_db() -> Db {
        let db = Db::connect_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    fn set(id: &str, series: &str, date: Option<&str>) -> CardSet {
        CardSet {
            id: id.into(),
            name: format!("Set {id}"),
            series_id: series.into(),
            release_date: date.map(Into::into),
            total_cards: 0,
            symbol: None,
            logo: None,
        }
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row_with_last_values() {
        let db = ready_db().await;
        let mut card = sample_card("bw1-1");
        db.insert_card(&card).await.unwrap();
        card.name = "Snivy".into();
        card.price = 3.25;
        db.insert_card(&card).await.unwrap();

        assert_eq!(db.get_stats().await.unwrap().cards, 1);
        let stored = db.get_card("bw1-1").await.unwrap().unwrap();
        assert_eq!(stored.name, "Snivy");
        assert_eq!(stored.price, 3.25);
        assert!(stored.last_updated.is_some());
    }

    #[tokio::test]
    async fn structured_columns_round_trip() {
        let db = ready_db().await;
        let mut card = sample_card("bw1-9");
        card.attacks = vec![Attack {
            name: "Vine Whip".into(),
            cost: vec!["Grass".into()],
            damage: Some("20".into()),
            effect: None,
        }];
        card.dex_id = vec![495];
        card.legal = Some(Legality {
            standard: false,
            expanded: true,
        });
        db.insert_card(&card).await.unwrap();
        let stored = db.get_card("bw1-9").await.unwrap().unwrap();
        assert_eq!(stored.attacks, card.attacks);
        assert_eq!(stored.dex_id, vec![495]);
        assert_eq!(stored.legal, card.legal);
        assert_eq!(stored.variants, None);
    }

    #[tokio::test]
    async fn reads_are_deterministically_ordered() {
        let db = ready_db().await;
        db.insert_set(&set("a", "bw", Some("2011-04-25"))).await.unwrap();
        db.insert_set(&set("b", "bw", Some("2012-02-08"))).await.unwrap();
        db.insert_set(&set("c", "xy", None)).await.unwrap();
        let ids: Vec<_> = db
            .get_all_sets()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let by_series = db.get_sets_by_series("bw").await.unwrap();
        assert_eq!(by_series.len(), 2);

        for (id, name) in [("bw1-2", "Tepig"), ("bw1-1", "Snivy"), ("bw2-1", "Oshawott")] {
            let mut c = sample_card(id);
            c.name = name.into();
            db.insert_card(&c).await.unwrap();
        }
        let names: Vec<_> = db
            .get_cards_by_set("bw1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Snivy", "Tepig"]);

        let found = db.search_cards_by_name("osha", DEFAULT_SEARCH_LIMIT).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bw2-1");
    }

    #[test]
    fn unencodable_value_is_a_serialization_error() {
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        let err = to_json(&bad).unwrap_err();
        assert!(matches!(err, CatalogError::Serialization(_)));
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let db = ready_db().await;
        let mut plain = sample_card("sv1-1");
        plain.name = "Pikachu ex".into();
        let mut percent = sample_card("sv1-2");
        percent.name = "100% Energy".into();
        let mut underscore = sample_card("sv1-3");
        underscore.name = "Team_Rocket".into();
        for c in [&plain, &percent, &underscore] {
            db.insert_card(c).await.unwrap();
        }

        let hits = db.search_cards_by_name("%", DEFAULT_SEARCH_LIMIT).await.unwrap();
        assert_eq!(hits.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["sv1-2"]);

        let hits = db.search_cards_by_name("pik_chu", DEFAULT_SEARCH_LIMIT).await.unwrap();
        assert!(hits.is_empty());
        let hits = db.search_cards_by_name("TEAM_r", DEFAULT_SEARCH_LIMIT).await.unwrap();
        assert_eq!(hits.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["sv1-3"]);
        assert_eq!(escape_like(r"a\b%c_"), r"a\\b\%c\_");
    }

    #[tokio::test]
    async fn clear_all_keeps_bookkeeping() {
        let db = ready_db().await;
        db.insert_series(&Series {
            id: "bw".into(),
            name: "Black & White".into(),
            logo: None,
            total_sets: 0,
        })
        .await
        .unwrap();
        db.insert_card(&sample_card("bw1-1")).await.unwrap();
        db.set_metadata(META_LAST_SYNC, "yesterday").await.unwrap();

        db.clear_all_data().await.unwrap();
        assert!(db.get_stats().await.unwrap().is_empty());
        assert_eq!(
            db.get_metadata(META_LAST_SYNC).await.unwrap().as_deref(),
            Some("yesterday")
        );
        assert!(!crate::database_ops::migrations::applied_names(&db.pool)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failing_batch_rolls_back_entirely() {
        let db = ready_db().await;
        sqlx::raw_sql(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON cards WHEN NEW.id = 'x-boom' \
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let good: Vec<Card> = (1..=3).map(|i| sample_card(&format!("x-{i}"))).collect();
        db.update_cards_batch(&good).await.unwrap();

        let mut bad: Vec<Card> = (4..=6).map(|i| sample_card(&format!("x-{i}"))).collect();
        bad.push(sample_card("x-boom"));
        assert!(db.update_cards_batch(&bad).await.is_err());

        assert_eq!(db.get_stats().await.unwrap().cards, 3);
        assert!(db.get_card("x-4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn needs_update_compares_write_stamps() {
        let db = ready_db().await;
        let before = Utc::now() - chrono::Duration::seconds(5);
        assert!(!db.needs_update(before).await.unwrap());
        db.insert_card(&sample_card("bw1-1")).await.unwrap();
        assert!(db.needs_update(before).await.unwrap());
        let after = Utc::now() + chrono::Duration::seconds(5);
        assert!(!db.needs_update(after).await.unwrap());
    }

    #[tokio::test]
    async fn id_sets_reflect_rows() {
        let db = ready_db().await;
        db.insert_card(&sample_card("bw1-1")).await.unwrap();
        db.insert_card(&sample_card("bw1-2")).await.unwrap();
        db.insert_set(&set("bw1", "bw", None)).await.unwrap();
        let ids = db.card_ids().await.unwrap();
        assert!(ids.contains("bw1-1") && ids.contains("bw1-2"));
        assert_eq!(
            db.set_series_pairs().await.unwrap(),
            vec![("bw1".to_string(), "bw".to_string())]
        );
        assert!(db.series_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_before_initialize_are_rejected() {
        let db = Db::connect_in_memory().await.unwrap();
        let err = db.insert_card(&sample_card("bw1-1")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Uninitialized));
    }
}
