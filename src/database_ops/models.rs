use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category value that marks the primary collectible type. HP is only
/// meaningful for cards in this category.
pub const PRIMARY_CATEGORY: &str = "Pokemon";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    pub name: String,
    pub logo: Option<String>,
    /// Rollup recomputed after every sync; never taken from input as truth.
    pub total_sets: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSet {
    pub id: String,
    pub name: String,
    pub series_id: String,
    pub release_date: Option<String>,
    pub total_cards: i64,
    pub symbol: Option<String>,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attack {
    pub name: String,
    #[serde(default)]
    pub cost: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<String>,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

/// Weakness or resistance entry (`{"type": "Fire", "value": "×2"}`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeModifier {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Legality {
    #[serde(default)]
    pub standard: bool,
    #[serde(default)]
    pub expanded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variants {
    #[serde(default)]
    pub normal: bool,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub holo: bool,
    #[serde(default)]
    pub first_edition: bool,
    #[serde(default)]
    pub w_promo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub rarity: Option<String>,
    pub set_id: String,
    pub series_id: String,
    pub price: f64,
    pub hp: Option<i64>,
    pub local_id: Option<String>,
    pub types: Vec<String>,
    pub attacks: Vec<Attack>,
    pub weaknesses: Vec<TypeModifier>,
    pub resistances: Vec<TypeModifier>,
    pub category: Option<String>,
    pub illustrator: Option<String>,
    pub dex_id: Vec<i64>,
    pub stage: Option<String>,
    pub retreat: Option<i64>,
    pub legal: Option<Legality>,
    pub variants: Option<Variants>,
    /// Freshness stamp as reported by the source, kept verbatim.
    pub updated: Option<String>,
    /// Stamped by the store on every write.
    pub last_updated: Option<DateTime<Utc>>,
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map(str::trim).map_or(true, str::is_empty)
}

/// Case-insensitive match on the primary category, tolerant of the accented
/// spelling some locales return.
pub fn is_primary_category(category: &str) -> bool {
    let folded: String = category
        .trim()
        .chars()
        .map(|c| match c {
            'é' | 'É' => 'e',
            other => other.to_ascii_lowercase(),
        })
        .collect();
    folded == PRIMARY_CATEGORY.to_ascii_lowercase()
}

impl Card {
    pub fn is_primary_category(&self) -> bool {
        self.category.as_deref().is_some_and(is_primary_category)
    }

    /// Backfill predicate: the card lacks category, rarity or image, or it is a
    /// primary-category card without HP.
    pub fn is_incomplete(&self) -> bool {
        if is_blank(&self.category) || is_blank(&self.rarity) || is_blank(&self.image) {
            return true;
        }
        self.is_primary_category() && self.hp.is_none()
    }

    /// Merge a detail fetch into this card. Supplied fields overwrite, silent
    /// fields keep the stored value. Identity (id) never changes.
    pub fn apply_patch(&mut self, patch: CardPatch) {
        let CardPatch {
            id: _,
            name,
            image,
            rarity,
            set_id,
            series_id,
            price,
            hp,
            local_id,
            types,
            attacks,
            weaknesses,
            resistances,
            category,
            illustrator,
            dex_id,
            stage,
            retreat,
            legal,
            variants,
            updated,
        } = patch;

        if let Some(v) = name {
            self.name = v;
        }
        if image.is_some() {
            self.image = image;
        }
        if rarity.is_some() {
            self.rarity = rarity;
        }
        if let Some(v) = set_id {
            self.set_id = v;
        }
        if let Some(v) = series_id.filter(|s| !s.trim().is_empty()) {
            self.series_id = v;
        }
        if let Some(v) = price {
            self.price = v;
        }
        if hp.is_some() {
            self.hp = hp;
        }
        if local_id.is_some() {
            self.local_id = local_id;
        }
        if let Some(v) = types {
            self.types = v;
        }
        if let Some(v) = attacks {
            self.attacks = v;
        }
        if let Some(v) = weaknesses {
            self.weaknesses = v;
        }
        if let Some(v) = resistances {
            self.resistances = v;
        }
        if category.is_some() {
            self.category = category;
        }
        if illustrator.is_some() {
            self.illustrator = illustrator;
        }
        if let Some(v) = dex_id {
            self.dex_id = v;
        }
        if stage.is_some() {
            self.stage = stage;
        }
        if retreat.is_some() {
            self.retreat = retreat;
        }
        if legal.is_some() {
            self.legal = legal;
        }
        if variants.is_some() {
            self.variants = variants;
        }
        if updated.is_some() {
            self.updated = updated;
        }
    }
}

/// Normalized, possibly partial card as decoded from any source payload.
/// `None` means "the payload did not say", never "clear this field".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CardPatch {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub rarity: Option<String>,
    pub set_id: Option<String>,
    /// Series as supplied by the payload, before any inference.
    pub series_id: Option<String>,
    pub price: Option<f64>,
    pub hp: Option<i64>,
    pub local_id: Option<String>,
    pub types: Option<Vec<String>>,
    pub attacks: Option<Vec<Attack>>,
    pub weaknesses: Option<Vec<TypeModifier>>,
    pub resistances: Option<Vec<TypeModifier>>,
    pub category: Option<String>,
    pub illustrator: Option<String>,
    pub dex_id: Option<Vec<i64>>,
    pub stage: Option<String>,
    pub retreat: Option<i64>,
    pub legal: Option<Legality>,
    pub variants: Option<Variants>,
    pub updated: Option<String>,
}

impl CardPatch {
    /// Build a full row. `series_id` is the already-resolved series (supplied
    /// or inferred); `set_id` falls back to the card id prefix.
    pub fn into_card(self, series_id: String) -> Card {
        let set_id = self
            .set_id
            .clone()
            .unwrap_or_else(|| set_id_from_card_id(&self.id));
        Card {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            image: self.image,
            rarity: self.rarity,
            set_id,
            series_id,
            price: self.price.unwrap_or(0.0),
            hp: self.hp,
            local_id: self.local_id,
            types: self.types.unwrap_or_default(),
            attacks: self.attacks.unwrap_or_default(),
            weaknesses: self.weaknesses.unwrap_or_default(),
            resistances: self.resistances.unwrap_or_default(),
            category: self.category,
            illustrator: self.illustrator,
            dex_id: self.dex_id.unwrap_or_default(),
            stage: self.stage,
            retreat: self.retreat,
            legal: self.legal,
            variants: self.variants,
            updated: self.updated,
            last_updated: None,
            id: self.id,
        }
    }

    /// Set id the card belongs to, supplied or derived from `<set>-<local>`.
    pub fn effective_set_id(&self) -> String {
        self.set_id
            .clone()
            .unwrap_or_else(|| set_id_from_card_id(&self.id))
    }
}

/// `swsh3-136` -> `swsh3`; `sv03.5-001` -> `sv03.5`. Ids without a dash yield
/// the whole id.
pub fn set_id_from_card_id(card_id: &str) -> String {
    match card_id.rsplit_once('-') {
        Some((set, _)) if !set.is_empty() => set.to_string(),
        _ => card_id.to_string(),
    }
}

/// Trailing numeric segment of a card id, if any.
pub fn local_id_from_card_id(card_id: &str) -> Option<String> {
    let (_, tail) = card_id.rsplit_once('-')?;
    if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
        Some(tail.to_string())
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub series: i64,
    pub sets: i64,
    pub cards: i64,
}

impl Stats {
    pub fn is_empty(&self) -> bool {
        self.series == 0 && self.sets == 0 && self.cards == 0
    }
}

#[cfg(test)]
pub(crate) fn sample_card(id: &str) -> Card {
    Card {
        id: id.to_string(),
        name: format!("Card {id}"),
        image: Some(format!("https://assets.example/{id}")),
        rarity: Some("Common".into()),
        set_id: set_id_from_card_id(id),
        series_id: "bw".into(),
        price: 0.5,
        hp: Some(60),
        local_id: local_id_from_card_id(id),
        types: vec!["Grass".into()],
        attacks: vec![],
        weaknesses: vec![],
        resistances: vec![],
        category: Some("Pokemon".into()),
        illustrator: None,
        dex_id: vec![],
        stage: Some("Basic".into()),
        retreat: Some(1),
        legal: None,
        variants: None,
        updated: None,
        last_updated: None,
    }
}
