use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::CatalogSource;
use crate::database_ops::decode::{self, DecodedSet};
use crate::database_ops::models::{CardPatch, Series};
use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_BASE_URL: &str = "https://api.tcgdex.net/v2";
pub const DEFAULT_LANGUAGE: &str = "pt";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_opt("TCGDEX_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            language: env_opt("TCGDEX_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            timeout_secs: env_parse("TCGDEX_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS).max(1),
        }
    }
}

/// TCGdex REST client.
///
/// Endpoints (all under `{base}/{language}`):
/// - GET /series
/// - GET /sets
/// - GET /cards?pagination:page=N&pagination:itemsPerPage=M
/// - GET /cards/{id}
#[derive(Debug, Clone)]
pub struct TcgdexProvider {
    base_url: String,
    language: String,
    http: Client,
}

impl TcgdexProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tcg-catalog/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build tcgdex http client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.trim().to_string(),
            http,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.language, path.trim_start_matches('/'))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .with_context(|| format!("tcgdex request failed url={url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 500);
            return Err(anyhow!("tcgdex {status} url={url} body={body}"));
        }
        resp.json::<Value>()
            .await
            .with_context(|| format!("tcgdex returned invalid json url={url}"))
    }
}

#[async_trait]
impl CatalogSource for TcgdexProvider {
    #[instrument(skip(self), fields(lang = %self.language))]
    async fn list_series(&self) -> Result<Vec<Series>> {
        let body = self.get_json("series", &[]).await?;
        let (series, skipped) = decode::decode_collection(&body, decode::decode_series);
        if skipped > 0 {
            warn!(skipped, "tcgdex: undecodable series entries");
        }
        debug!(count = series.len(), "tcgdex: series listed");
        Ok(series)
    }

    #[instrument(skip(self), fields(lang = %self.language))]
    async fn list_sets(&self) -> Result<Vec<DecodedSet>> {
        let body = self.get_json("sets", &[]).await?;
        let (sets, skipped) = decode::decode_collection(&body, decode::decode_set);
        if skipped > 0 {
            warn!(skipped, "tcgdex: undecodable set entries");
        }
        debug!(count = sets.len(), "tcgdex: sets listed");
        Ok(sets)
    }

    #[instrument(skip(self), fields(lang = %self.language))]
    async fn list_cards(&self, page: u32, page_size: u32) -> Result<Vec<CardPatch>> {
        let query = [
            ("pagination:page", page.max(1).to_string()),
            ("pagination:itemsPerPage", page_size.max(1).to_string()),
        ];
        let body = self.get_json("cards", &query).await?;
        let (cards, skipped) = decode::decode_collection(&body, decode::decode_card);
        if skipped > 0 {
            warn!(page, skipped, "tcgdex: undecodable card entries");
        }
        Ok(cards)
    }

    #[instrument(skip(self), fields(lang = %self.language))]
    async fn card_detail(&self, id: &str) -> Result<CardPatch> {
        let body = self.get_json(&format!("cards/{id}"), &[]).await?;
        decode::decode_card(&body).ok_or_else(|| anyhow!("tcgdex: undecodable card detail id={id}"))
    }
}
