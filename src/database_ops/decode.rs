//! One decode function per entity. Every legacy alias a payload may use for a
//! field is listed here and nowhere else; call sites only ever see the
//! normalized records.
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::models::{
    local_id_from_card_id, Attack, CardPatch, CardSet, Legality, Series, TypeModifier, Variants,
};

const NAME_KEYS: &[&str] = &["name"];
const LOGO_KEYS: &[&str] = &["logo"];
const SERIES_KEYS: &[&str] = &["serie", "series", "seriesId", "series_id"];
const RELEASE_KEYS: &[&str] = &["releaseDate", "release_date", "release", "date"];
const TOTAL_CARD_KEYS: &[&str] = &["totalCards", "total_cards", "total"];
const SET_KEYS: &[&str] = &["set", "setId", "set_id"];
const LOCAL_ID_KEYS: &[&str] = &["localId", "local_id", "number"];
const DEX_KEYS: &[&str] = &["dexId", "dex_id", "nationalPokedexNumbers"];
const UPDATED_KEYS: &[&str] = &["updated", "updatedAt"];
/// Price fields in preference order, looked up inside the cardmarket block.
const PRICE_KEYS: &[&str] = &[
    "averageSellPrice",
    "avg",
    "lowPrice",
    "midPrice",
    "low",
    "mid",
    "high",
    "market",
    "directLow",
];

fn hp_digits() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()
}

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Strings pass through; numbers are rendered (`localId: 12`).
fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A reference given either as a bare id or as an object carrying `id`.
fn reference_id(v: &Value) -> Option<String> {
    match v {
        Value::Object(obj) => obj.get("id").and_then(scalar_string),
        other => scalar_string(other),
    }
}

fn first_string(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(scalar_string))
}

fn first_reference(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(reference_id))
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_i64(obj: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(as_i64))
}

/// Nested image lookups: `images.<key>`.
fn image_variant(obj: &Value, key: &str) -> Option<String> {
    obj.get("images")
        .and_then(|i| i.get(key))
        .and_then(scalar_string)
}

pub fn parse_hp(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => hp_digits()?
            .find(s)
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}

/// Explicit `price` wins, then the cardmarket block (`cardmarket.prices`,
/// `cardmarket` or `pricing.cardmarket`) in [`PRICE_KEYS`] order. Zero prices
/// are treated as absent, mirroring how the source reports "no data".
pub fn parse_price(obj: &Value) -> Option<f64> {
    if let Some(p) = obj.get("price").and_then(as_f64) {
        return Some(p);
    }
    let market = obj
        .get("cardmarket")
        .map(|cm| cm.get("prices").unwrap_or(cm))
        .or_else(|| obj.get("pricing").and_then(|p| p.get("cardmarket")))?;
    PRICE_KEYS
        .iter()
        .filter_map(|k| market.get(*k).and_then(as_f64))
        .find(|p| *p > 0.0)
}

fn string_list(v: &Value) -> Option<Vec<String>> {
    v.as_array()
        .map(|arr| arr.iter().filter_map(scalar_string).collect())
}

fn parse_attack(v: &Value) -> Option<Attack> {
    let obj = v.as_object()?;
    Some(Attack {
        name: obj.get("name").and_then(scalar_string).unwrap_or_default(),
        cost: obj.get("cost").and_then(string_list).unwrap_or_default(),
        damage: obj.get("damage").and_then(scalar_string),
        effect: obj
            .get("effect")
            .or_else(|| obj.get("text"))
            .and_then(scalar_string),
    })
}

fn parse_modifier(v: &Value) -> Option<TypeModifier> {
    let obj = v.as_object()?;
    Some(TypeModifier {
        kind: obj.get("type").and_then(scalar_string)?,
        value: obj.get("value").and_then(scalar_string).unwrap_or_default(),
    })
}

fn parse_list<T>(v: &Value, parse: fn(&Value) -> Option<T>) -> Option<Vec<T>> {
    v.as_array().map(|arr| arr.iter().filter_map(parse).collect())
}

fn parse_dex(v: &Value) -> Option<Vec<i64>> {
    match v {
        Value::Array(arr) => Some(arr.iter().filter_map(as_i64).collect()),
        other => as_i64(other).map(|n| vec![n]),
    }
}

fn parse_legal(v: &Value) -> Option<Legality> {
    serde_json::from_value(v.clone()).ok()
}

fn parse_variants(v: &Value) -> Option<Variants> {
    serde_json::from_value(v.clone()).ok()
}

pub fn decode_series(v: &Value) -> Option<Series> {
    let id = v.get("id").and_then(scalar_string)?;
    Some(Series {
        name: first_string(v, NAME_KEYS).unwrap_or_else(|| id.clone()),
        logo: first_string(v, LOGO_KEYS),
        total_sets: 0,
        id,
    })
}

/// Set as decoded from a payload, before series resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSet {
    pub id: String,
    pub name: String,
    pub supplied_series: Option<String>,
    pub release_date: Option<String>,
    pub total_cards: i64,
    pub symbol: Option<String>,
    pub logo: Option<String>,
}

impl DecodedSet {
    pub fn into_set(self, series_id: String) -> CardSet {
        CardSet {
            id: self.id,
            name: self.name,
            series_id,
            release_date: self.release_date,
            total_cards: self.total_cards,
            symbol: self.symbol,
            logo: self.logo,
        }
    }
}

pub fn decode_set(v: &Value) -> Option<DecodedSet> {
    let id = v.get("id").and_then(scalar_string)?;
    let total_cards = first_i64(v, TOTAL_CARD_KEYS)
        .or_else(|| {
            let count = v.get("cardCount")?;
            count
                .get("total")
                .and_then(as_i64)
                .or_else(|| count.get("official").and_then(as_i64))
        })
        .unwrap_or(0);
    Some(DecodedSet {
        name: first_string(v, NAME_KEYS).unwrap_or_else(|| id.clone()),
        supplied_series: first_reference(v, SERIES_KEYS),
        release_date: first_string(v, RELEASE_KEYS),
        total_cards,
        symbol: first_string(v, &["symbol"]).or_else(|| image_variant(v, "symbol")),
        logo: first_string(v, LOGO_KEYS).or_else(|| image_variant(v, "logo")),
        id,
    })
}

/// Decode any card payload (list entry, detail, or bundled row) into a patch.
pub fn decode_card(v: &Value) -> Option<CardPatch> {
    let id = v.get("id").and_then(scalar_string)?;

    // Card series hides under the set object in remote payloads and sits at
    // the top level in bundled rows.
    let supplied_series = v
        .get("set")
        .filter(|s| s.is_object())
        .and_then(|s| first_reference(s, SERIES_KEYS))
        .or_else(|| first_reference(v, SERIES_KEYS));

    let image = first_string(v, &["image"])
        .or_else(|| image_variant(v, "large"))
        .or_else(|| image_variant(v, "small"));

    let local_id = first_string(v, LOCAL_ID_KEYS).or_else(|| local_id_from_card_id(&id));

    Some(CardPatch {
        name: first_string(v, NAME_KEYS),
        image,
        rarity: first_string(v, &["rarity"]),
        set_id: first_reference(v, SET_KEYS),
        series_id: supplied_series,
        price: parse_price(v),
        hp: v.get("hp").and_then(parse_hp),
        local_id,
        types: v.get("types").and_then(string_list),
        attacks: v.get("attacks").and_then(|a| parse_list(a, parse_attack)),
        weaknesses: v.get("weaknesses").and_then(|a| parse_list(a, parse_modifier)),
        resistances: v.get("resistances").and_then(|a| parse_list(a, parse_modifier)),
        category: first_string(v, &["category", "supertype"]),
        illustrator: first_string(v, &["illustrator", "artist"]),
        dex_id: DEX_KEYS.iter().find_map(|k| v.get(*k).and_then(parse_dex)),
        stage: first_string(v, &["stage"]),
        retreat: first_i64(v, &["retreat"]).or_else(|| {
            v.get("retreatCost")
                .and_then(Value::as_array)
                .map(|a| a.len() as i64)
        }),
        legal: v.get("legal").and_then(parse_legal),
        variants: v.get("variants").and_then(parse_variants),
        updated: first_string(v, UPDATED_KEYS),
        id,
    })
}

/// Decode a JSON collection, skipping entries that lack an id. Returns the
/// decoded items and the number skipped.
pub fn decode_collection<T>(v: &Value, decode: fn(&Value) -> Option<T>) -> (Vec<T>, usize) {
    let items: &[Value] = match v {
        Value::Array(arr) => arr,
        Value::Object(obj) => obj
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };
    let mut out = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    for item in items {
        match decode(item) {
            Some(d) => out.push(d),
            None => skipped += 1,
        }
    }
    (out, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_series_aliases() {
        let a = decode_set(&json!({"id": "sv01", "name": "Scarlet & Violet", "serie": {"id": "sv", "name": "SV"}})).unwrap();
        assert_eq!(a.supplied_series.as_deref(), Some("sv"));

        let b = decode_set(&json!({"id": "bw1", "name": "Black & White", "series": "bw", "cardCount": {"official": 114}})).unwrap();
        assert_eq!(b.supplied_series.as_deref(), Some("bw"));
        assert_eq!(b.total_cards, 114);

        let c = decode_set(&json!({"id": "dv1", "name": "Dragon Vault"})).unwrap();
        assert_eq!(c.supplied_series, None);
        assert_eq!(c.total_cards, 0);
    }

    #[test]
    fn detail_card_payload() {
        let v = json!({
            "id": "swsh3-136",
            "localId": "136",
            "name": "Furret",
            "image": "https://assets.tcgdex.net/en/swsh/swsh3/136",
            "category": "Pokemon",
            "illustrator": "tetsuya koizumi",
            "rarity": "Uncommon",
            "hp": 110,
            "types": ["Colorless"],
            "stage": "Stage1",
            "attacks": [{"cost": ["Colorless"], "name": "Feelin' Fine", "effect": "Draw 3 cards."},
                        {"cost": ["Colorless", "Colorless"], "name": "Tail Smash", "damage": 90}],
            "weaknesses": [{"type": "Fighting", "value": "×2"}],
            "retreat": 1,
            "dexId": [162],
            "legal": {"standard": false, "expanded": true},
            "variants": {"normal": true, "reverse": true, "holo": false, "firstEdition": false},
            "set": {"id": "swsh3", "name": "Darkness Ablaze"},
            "updated": "2024-06-18T00:34:39+02:00"
        });
        let p = decode_card(&v).unwrap();
        assert_eq!(p.set_id.as_deref(), Some("swsh3"));
        assert_eq!(p.series_id, None);
        assert_eq!(p.hp, Some(110));
        assert_eq!(p.retreat, Some(1));
        assert_eq!(p.dex_id, Some(vec![162]));
        let attacks = p.attacks.clone().unwrap();
        assert_eq!(attacks[1].damage.as_deref(), Some("90"));
        assert_eq!(attacks[0].effect.as_deref(), Some("Draw 3 cards."));
        assert_eq!(p.legal, Some(Legality { standard: false, expanded: true }));
        assert!(p.variants.unwrap().reverse);
        assert_eq!(p.resistances, None);
    }

    #[test]
    fn bundled_row_shape() {
        let v = json!({"id": "bw1-1", "name": "Snivy", "set": "bw1", "series": "bw",
                       "price": 0.25, "hp": "60 HP", "images": {"small": "s.png"}});
        let p = decode_card(&v).unwrap();
        assert_eq!(p.set_id.as_deref(), Some("bw1"));
        assert_eq!(p.series_id.as_deref(), Some("bw"));
        assert_eq!(p.hp, Some(60));
        assert_eq!(p.price, Some(0.25));
        assert_eq!(p.image.as_deref(), Some("s.png"));
        assert_eq!(p.local_id.as_deref(), Some("1"));
    }

    #[test]
    fn price_falls_through_zero_entries() {
        let v = json!({"cardmarket": {"prices": {"averageSellPrice": 0, "lowPrice": 0.1}}});
        assert_eq!(parse_price(&v), Some(0.1));
        assert_eq!(parse_price(&json!({})), None);
    }

    #[test]
    fn price_reads_v2_pricing_average() {
        let v = json!({"pricing": {"cardmarket": {"avg": 1.4, "low": 0.9, "unit": "EUR"}}});
        assert_eq!(parse_price(&v), Some(1.4));
        let v = json!({"pricing": {"cardmarket": {"avg": 0, "low": 0.9}}});
        assert_eq!(parse_price(&v), Some(0.9));
    }

    #[test]
    fn collection_skips_entries_without_id() {
        let v = json!([{"id": "bw"}, {"name": "nameless"}]);
        let (series, skipped) = decode_collection(&v, decode_series);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "bw");
        assert_eq!(skipped, 1);
    }
}
