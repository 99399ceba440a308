//! Time-boxed key/value cache for read-mostly remote queries.
//!
//! Validity is judged at read time against a caller-chosen duration: an entry
//! is valid iff `now - written_at < ttl`. Nothing in here returns an error;
//! storage failures are logged and read as "absent".
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::db::Db;
use super::models::{CardSet, Series};
use super::tcgdex::CatalogSource;
use crate::normalization::series::SeriesResolver;
use crate::util::env::env_parse;

/// Written in place of any node the sanitizer meets a second time.
pub const CIRCULAR_SENTINEL: &str = "[Circular Reference]";

/// Rough storage budget used by [`Cache::has_room`].
pub const CACHE_BUDGET_BYTES: usize = 50 * 1024 * 1024;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

// ---- payload sanitizing ----

/// Value graph handed to the cache. `Shared` nodes may alias one another or
/// form cycles; [`Payload::sanitize`] turns the graph into a plain tree.
#[derive(Debug, Clone)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Payload>),
    Object(Vec<(String, Payload)>),
    Shared(Arc<Mutex<Payload>>),
}

impl Payload {
    pub fn shared(inner: Payload) -> Arc<Mutex<Payload>> {
        Arc::new(Mutex::new(inner))
    }

    /// Depth-first walk with a seen set keyed by node address. A shared node
    /// visited a second time in the same walk becomes [`CIRCULAR_SENTINEL`].
    pub fn sanitize(&self) -> Value {
        let mut seen = HashSet::new();
        self.sanitize_with(&mut seen)
    }

    fn sanitize_with(&self, seen: &mut HashSet<usize>) -> Value {
        match self {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::Array(items) => {
                Value::Array(items.iter().map(|p| p.sanitize_with(seen)).collect())
            }
            Payload::Object(fields) => {
                let mut out = Map::new();
                for (k, v) in fields {
                    out.insert(k.clone(), v.sanitize_with(seen));
                }
                Value::Object(out)
            }
            Payload::Shared(node) => {
                let addr = Arc::as_ptr(node) as usize;
                if !seen.insert(addr) {
                    return Value::String(CIRCULAR_SENTINEL.to_string());
                }
                let inner = match node.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                inner.sanitize_with(seen)
            }
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(a) => Payload::Array(a.into_iter().map(Payload::from).collect()),
            Value::Object(o) => {
                Payload::Object(o.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

// ---- storage ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub value: String,
    pub written_at_ms: i64,
    /// Duration chosen by the writer; used by `info` and `optimize`.
    pub ttl_ms: Option<i64>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<CacheRecord>>;
    async fn write(&self, key: &str, record: CacheRecord) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
    async fn remove_all(&self) -> Result<()>;
}

/// Entries live in the `cache_entries` table of the catalog store.
#[derive(Clone)]
pub struct SqliteCacheStore {
    db: Db,
}

impl SqliteCacheStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn read(&self, key: &str) -> Result<Option<CacheRecord>> {
        let row = sqlx::query("SELECT value, written_at, ttl_ms FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.ready()?)
            .await?;
        Ok(match row {
            Some(r) => Some(CacheRecord {
                value: r.try_get("value")?,
                written_at_ms: r.try_get("written_at")?,
                ttl_ms: r.try_get("ttl_ms")?,
            }),
            None => None,
        })
    }

    async fn write(&self, key: &str, record: CacheRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_entries (key, value, written_at, ttl_ms) VALUES (?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             written_at = excluded.written_at, ttl_ms = excluded.ttl_ms",
        )
        .bind(key)
        .bind(record.value)
        .bind(record.written_at_ms)
        .bind(record.ttl_ms)
        .execute(self.db.ready()?)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(self.db.ready()?)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM cache_entries ORDER BY key")
            .fetch_all(self.db.ready()?)
            .await?;
        rows.iter()
            .map(|r| -> Result<String> { Ok(r.try_get("key")?) })
            .collect()
    }

    async fn remove_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries")
            .execute(self.db.ready()?)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheRecord>>,
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn read(&self, key: &str) -> Result<Option<CacheRecord>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, record: CacheRecord) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn remove_all(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

// ---- clock ----

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn at(ms: i64) -> Self {
        Self(AtomicI64::new(ms))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(duration_ms(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ---- categories ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Series,
    Sets,
    Cards,
    Rates,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 4] = [Self::Series, Self::Sets, Self::Cards, Self::Rates];

    pub fn base_key(self) -> &'static str {
        match self {
            Self::Series => "cached_series",
            Self::Sets => "cached_sets",
            Self::Cards => "cached_cards",
            Self::Rates => "cached_exchange_rate",
        }
    }

    /// `cached_sets` or, with a namespace such as a language, `cached_sets_pt`.
    pub fn key(self, namespace: Option<&str>) -> String {
        match namespace.map(str::trim).filter(|n| !n.is_empty()) {
            Some(ns) => format!("{}_{ns}", self.base_key()),
            None => self.base_key().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub series: Duration,
    pub sets: Duration,
    pub cards: Duration,
    pub rates: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            series: DAY * 7,
            sets: DAY * 7,
            cards: DAY,
            rates: DAY,
        }
    }
}

impl CacheTtl {
    pub fn from_env() -> Self {
        let d = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(env_parse(key, default.as_secs()))
        };
        Self {
            series: secs("CACHE_TTL_SERIES_SECS", d.series),
            sets: secs("CACHE_TTL_SETS_SECS", d.sets),
            cards: secs("CACHE_TTL_CARDS_SECS", d.cards),
            rates: secs("CACHE_TTL_RATES_SECS", d.rates),
        }
    }

    pub fn for_category(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Series => self.series,
            CacheCategory::Sets => self.sets,
            CacheCategory::Cards => self.cards,
            CacheCategory::Rates => self.rates,
        }
    }
}

// ---- cache ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub exists: bool,
    pub size: usize,
    pub written_at: Option<DateTime<Utc>>,
    pub valid: bool,
}

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::default()))
    }

    async fn record(&self, key: &str) -> Option<CacheRecord> {
        match self.store.read(key).await {
            Ok(r) => r,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    fn fresh(&self, record: &CacheRecord, ttl_ms: i64) -> bool {
        self.clock.now_ms().saturating_sub(record.written_at_ms) < ttl_ms
    }

    pub async fn is_valid(&self, key: &str, ttl: Duration) -> bool {
        self.record(key)
            .await
            .is_some_and(|r| self.fresh(&r, duration_ms(ttl)))
    }

    /// Stored value regardless of age.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let record = self.record(key).await?;
        match serde_json::from_str(&record.value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "cache entry unreadable");
                None
            }
        }
    }

    /// Stored value only while `now - written_at < ttl`.
    pub async fn get_valid(&self, key: &str, ttl: Duration) -> Option<Value> {
        let record = self.record(key).await?;
        if !self.fresh(&record, duration_ms(ttl)) {
            debug!(key, "cache entry expired");
            return None;
        }
        serde_json::from_str(&record.value).ok()
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.get(key).await?).ok()
    }

    pub async fn get_valid_as<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        serde_json::from_value(self.get_valid(key, ttl).await?).ok()
    }

    /// Serialize and store `value`, stamping the write time.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(v) => self.write_value(key, &v, ttl).await,
            Err(e) => warn!(key, error = %e, "cache value not serializable; skipped"),
        }
    }

    /// Store an arbitrary graph; revisited shared nodes become the sentinel.
    pub async fn set_payload(&self, key: &str, payload: &Payload, ttl: Duration) {
        let v = payload.sanitize();
        self.write_value(key, &v, ttl).await;
    }

    async fn write_value(&self, key: &str, value: &Value, ttl: Duration) {
        let record = CacheRecord {
            value: value.to_string(),
            written_at_ms: self.clock.now_ms(),
            ttl_ms: Some(duration_ms(ttl)),
        };
        let size = record.value.len();
        match self.store.write(key, record).await {
            Ok(()) => debug!(key, size, "cache entry written"),
            Err(e) => warn!(key, error = %e, "cache write failed"),
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key, error = %e, "cache invalidate failed");
        }
    }

    pub async fn clear_all(&self) {
        match self.store.remove_all().await {
            Ok(()) => info!("cache cleared"),
            Err(e) => warn!(error = %e, "cache clear failed"),
        }
    }

    async fn keys(&self) -> Vec<String> {
        self.store.keys().await.unwrap_or_else(|e| {
            warn!(error = %e, "cache key listing failed");
            Vec::new()
        })
    }

    /// Remove every entry whose key ends with `_<suffix>`, e.g. one language.
    pub async fn clear(&self, suffix: &str) -> usize {
        let tail = format!("_{}", suffix.trim());
        let mut removed = 0usize;
        for key in self.keys().await {
            if key.ends_with(&tail) {
                self.invalidate(&key).await;
                removed += 1;
            }
        }
        info!(suffix, removed, "cache namespace cleared");
        removed
    }

    pub async fn info(&self, key: &str) -> CacheEntryInfo {
        match self.record(key).await {
            Some(r) => CacheEntryInfo {
                key: key.to_string(),
                exists: true,
                size: r.value.len(),
                written_at: Utc.timestamp_millis_opt(r.written_at_ms).single(),
                valid: r.ttl_ms.is_some_and(|ttl| self.fresh(&r, ttl)),
            },
            None => CacheEntryInfo {
                key: key.to_string(),
                exists: false,
                size: 0,
                written_at: None,
                valid: false,
            },
        }
    }

    pub async fn info_all(&self) -> Vec<CacheEntryInfo> {
        let mut out = Vec::new();
        for key in self.keys().await {
            out.push(self.info(&key).await);
        }
        out
    }

    pub async fn total_size(&self) -> usize {
        let mut total = 0usize;
        for key in self.keys().await {
            if let Some(r) = self.record(&key).await {
                total += r.value.len();
            }
        }
        total
    }

    pub async fn has_room(&self, required: usize) -> bool {
        self.total_size().await.saturating_add(required) < CACHE_BUDGET_BYTES
    }

    /// Drop entries past their own duration, and well-known category keys
    /// (any namespace) past the category duration. Returns how many went.
    pub async fn optimize(&self, ttls: &CacheTtl) -> usize {
        let mut removed = 0usize;
        for key in self.keys().await {
            let Some(record) = self.record(&key).await else {
                continue;
            };
            let category_ttl = CacheCategory::ALL
                .iter()
                .find(|c| key == c.base_key() || key.starts_with(&format!("{}_", c.base_key())))
                .map(|c| duration_ms(ttls.for_category(*c)));
            let ttl = match (record.ttl_ms, category_ttl) {
                (Some(own), Some(cat)) => own.min(cat),
                (own, cat) => own.or(cat).unwrap_or(i64::MAX),
            };
            if !self.fresh(&record, ttl) {
                self.invalidate(&key).await;
                removed += 1;
            }
        }
        info!(removed, "cache optimized");
        removed
    }
}

// ---- cache-fronted listings ----

/// Series and set listings served from the cache while fresh, refreshed from
/// the source otherwise. A failed refresh falls back to a stale copy.
#[derive(Clone)]
pub struct CachedListings {
    cache: Cache,
    source: Arc<dyn CatalogSource>,
    ttl: CacheTtl,
    namespace: String,
}

impl CachedListings {
    pub fn new(cache: Cache, source: Arc<dyn CatalogSource>, ttl: CacheTtl, namespace: &str) -> Self {
        Self {
            cache,
            source,
            ttl,
            namespace: namespace.to_string(),
        }
    }

    fn key(&self, category: CacheCategory) -> String {
        category.key(Some(&self.namespace))
    }

    pub async fn series(&self) -> Result<Vec<Series>> {
        let key = self.key(CacheCategory::Series);
        if let Some(hit) = self.cache.get_valid_as(&key, self.ttl.series).await {
            return Ok(hit);
        }
        match self.source.list_series().await {
            Ok(list) => {
                self.cache.set(&key, &list, self.ttl.series).await;
                Ok(list)
            }
            Err(e) => match self.cache.get_as::<Vec<Series>>(&key).await {
                Some(stale) => {
                    warn!(key, error = %e, "series refresh failed; serving stale cache");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    pub async fn sets(&self) -> Result<Vec<CardSet>> {
        let key = self.key(CacheCategory::Sets);
        if let Some(hit) = self.cache.get_valid_as(&key, self.ttl.sets).await {
            return Ok(hit);
        }
        match self.source.list_sets().await {
            Ok(list) => {
                let resolver = SeriesResolver::new();
                let sets: Vec<CardSet> = list
                    .into_iter()
                    .map(|s| {
                        let series = resolver.resolve(s.supplied_series.as_deref(), &s.id);
                        s.into_set(series)
                    })
                    .collect();
                self.cache.set(&key, &sets, self.ttl.sets).await;
                Ok(sets)
            }
            Err(e) => match self.cache.get_as::<Vec<CardSet>>(&key).await {
                Some(stale) => {
                    warn!(key, error = %e, "set refresh failed; serving stale cache");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    pub async fn invalidate(&self) -> usize {
        self.cache.clear(&self.namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::sync::testing::{listed_series, listed_set, FakeSource};
    use serde_json::json;

    fn manual_cache() -> (Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(1_700_000_000_000));
        let cache = Cache::with_clock(Arc::new(MemoryCacheStore::default()), clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn validity_boundary_is_exclusive() {
        let (cache, clock) = manual_cache();
        let ttl = Duration::from_secs(60);
        cache.set("cached_series", &json!(["bw"]), ttl).await;

        clock.advance(Duration::from_millis(59_999));
        assert!(cache.is_valid("cached_series", ttl).await);
        assert_eq!(cache.get_valid("cached_series", ttl).await, Some(json!(["bw"])));

        clock.advance(Duration::from_millis(1));
        assert!(!cache.is_valid("cached_series", ttl).await);
        assert_eq!(cache.get_valid("cached_series", ttl).await, None);
        // Expired but still readable through the plain path.
        assert_eq!(cache.get("cached_series").await, Some(json!(["bw"])));
    }

    #[tokio::test]
    async fn never_written_is_absent_and_invalid() {
        let (cache, _) = manual_cache();
        assert_eq!(cache.get("nope").await, None);
        assert!(!cache.is_valid("nope", DAY).await);
        let info = cache.info("nope").await;
        assert!(!info.exists && !info.valid);
    }

    #[test]
    fn cycle_becomes_sentinel() {
        let node = Payload::shared(Payload::Null);
        *node.lock().unwrap() = Payload::Object(vec![
            ("name".into(), Payload::String("root".into())),
            ("self".into(), Payload::Shared(node.clone())),
        ]);
        let out = Payload::Shared(node).sanitize();
        assert_eq!(out, json!({"name": "root", "self": CIRCULAR_SENTINEL}));
    }

    #[test]
    fn repeated_alias_is_replaced_on_second_visit() {
        let leaf = Payload::shared(Payload::String("x".into()));
        let out = Payload::Array(vec![Payload::Shared(leaf.clone()), Payload::Shared(leaf)]).sanitize();
        assert_eq!(out, json!(["x", CIRCULAR_SENTINEL]));
    }

    #[tokio::test]
    async fn cyclic_payload_is_stored() {
        let (cache, _) = manual_cache();
        let a = Payload::shared(Payload::Null);
        let b = Payload::shared(Payload::Array(vec![Payload::Shared(a.clone())]));
        *a.lock().unwrap() = Payload::Object(vec![("next".into(), Payload::Shared(b))]);
        cache.set_payload("graph", &Payload::Shared(a), DAY).await;
        assert_eq!(
            cache.get("graph").await,
            Some(json!({"next": [CIRCULAR_SENTINEL]}))
        );
    }

    #[tokio::test]
    async fn namespace_clear_only_touches_suffix() {
        let (cache, _) = manual_cache();
        for key in ["cached_sets_pt", "cached_series_pt", "cached_sets_en", "cached_sets"] {
            cache.set(key, &json!(1), DAY).await;
        }
        assert_eq!(cache.clear("pt").await, 2);
        assert!(cache.get("cached_sets_pt").await.is_none());
        assert!(cache.get("cached_sets_en").await.is_some());
        assert!(cache.get("cached_sets").await.is_some());

        cache.invalidate("cached_sets").await;
        assert!(cache.get("cached_sets").await.is_none());
        cache.clear_all().await;
        assert_eq!(cache.total_size().await, 0);
    }

    #[tokio::test]
    async fn optimize_drops_expired_entries() {
        let (cache, clock) = manual_cache();
        let ttls = CacheTtl::default();
        cache.set(&CacheCategory::Cards.key(Some("pt")), &json!([1, 2]), ttls.cards).await;
        cache.set(&CacheCategory::Series.key(Some("pt")), &json!([1]), ttls.series).await;
        clock.advance(DAY * 2);

        assert_eq!(cache.optimize(&ttls).await, 1);
        assert!(cache.get("cached_cards_pt").await.is_none());
        assert!(cache.get("cached_series_pt").await.is_some());
        let info = cache.info("cached_series_pt").await;
        assert!(info.exists && info.valid);
        assert_eq!(info.size, 3);
        assert!(cache.has_room(1024).await);
    }

    #[tokio::test]
    async fn sqlite_store_backs_the_cache() {
        let db = Db::connect_in_memory().await.unwrap();
        let uninitialized = Cache::new(Arc::new(SqliteCacheStore::new(db.clone())));
        // Store failures degrade to absent, never panic or error.
        uninitialized.set("k", &json!(1), DAY).await;
        assert!(uninitialized.get("k").await.is_none());

        db.initialize().await.unwrap();
        let cache = Cache::new(Arc::new(SqliteCacheStore::new(db.clone())));
        cache.set("cached_sets_pt", &json!({"a": 1}), DAY).await;
        assert_eq!(cache.get_valid("cached_sets_pt", DAY).await, Some(json!({"a": 1})));
        assert_eq!(cache.info_all().await.len(), 1);
        // Cache rows are not catalog data.
        db.clear_all_data().await.unwrap();
        assert!(cache.get("cached_sets_pt").await.is_some());
    }

    #[tokio::test]
    async fn listings_are_served_from_cache_until_expiry() {
        let source = Arc::new(FakeSource {
            series: vec![listed_series("bw")],
            sets: vec![listed_set("dv1", None)],
            ..Default::default()
        });
        let (cache, clock) = manual_cache();
        let listings = CachedListings::new(cache.clone(), source, CacheTtl::default(), "pt");

        let series = listings.series().await.unwrap();
        assert_eq!(series[0].id, "bw");
        let sets = listings.sets().await.unwrap();
        assert_eq!(sets[0].series_id, "bw");
        assert!(cache.is_valid("cached_series_pt", DAY).await);

        // A dead source is papered over by the stale copy.
        let offline = Arc::new(FakeSource {
            fail_listings: true,
            ..Default::default()
        });
        let stale = CachedListings::new(cache, offline, CacheTtl::default(), "pt");
        clock.advance(DAY * 8);
        assert_eq!(stale.series().await.unwrap().len(), 1);
        assert_eq!(stale.invalidate().await, 2);
        assert!(stale.series().await.is_err());
    }
}
