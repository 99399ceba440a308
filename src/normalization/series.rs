use std::collections::HashMap;

/// Series code used when neither the payload nor the prefix table can place an id.
pub const DEFAULT_SERIES: &str = "base";

/// Ordered prefix table. Order is kept for readability only: resolution always
/// picks the longest matching prefix, so `det1` lands in `sm` and never in a
/// shorter rule that happens to match.
pub const SERIES_PREFIXES: &[(&str, &str)] = &[
    // Main lines
    ("base", "base"),
    ("ex", "ex"),
    ("dp", "dp"),
    ("pl", "pl"),
    ("hgss", "hgss"),
    ("bw", "bw"),
    ("xy", "xy"),
    ("sm", "sm"),
    ("swsh", "swsh"),
    ("sv", "sv"),
    // Specials folded into their parent era
    ("col", "col"),
    ("dv", "bw"),
    ("dc", "base"),
    ("g", "base"),
    ("det", "sm"),
    ("cel", "sm"),
    ("A", "tcgp"),
    ("P-", "base"),
];

/// Resolves the series of a set (or of a card through its set id).
///
/// Resolution order: series supplied by the payload, then a series already
/// known for that set id, then the prefix table, then [`DEFAULT_SERIES`]. The
/// result is never empty. A supplied default code is treated as a placeholder
/// and re-inferred, since older snapshots wrote it for every unplaced set.
#[derive(Debug, Clone, Default)]
pub struct SeriesResolver {
    known_sets: HashMap<String, String>,
}

impl SeriesResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with `set id -> series id` pairs already stored.
    pub fn with_known_sets<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut resolver = Self::new();
        for (set_id, series_id) in pairs {
            resolver.remember(set_id, series_id);
        }
        resolver
    }

    pub fn remember(&mut self, set_id: String, series_id: String) {
        if !series_id.trim().is_empty() {
            self.known_sets.insert(set_id, series_id);
        }
    }

    pub fn resolve(&self, supplied: Option<&str>, set_id: &str) -> String {
        if let Some(s) = supplied
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != DEFAULT_SERIES)
        {
            return s.to_string();
        }
        if let Some(known) = self.known_sets.get(set_id) {
            return known.clone();
        }
        infer_series_from_set_id(set_id).to_string()
    }
}

/// Longest-prefix lookup against [`SERIES_PREFIXES`]; falls back to the default code.
pub fn infer_series_from_set_id(set_id: &str) -> &'static str {
    SERIES_PREFIXES
        .iter()
        .filter(|(prefix, _)| set_id.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, series)| *series)
        .unwrap_or(DEFAULT_SERIES)
}
