use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::database_ops::cache::{Cache, CacheCategory};
use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_PRIMARY_URL: &str = "https://api.exchangerate-api.com/v4/latest/USD";
pub const DEFAULT_FALLBACK_URL: &str = "https://api.frankfurter.app/latest?from=USD";
pub const DEFAULT_FALLBACK_RATE: f64 = 5.20;
pub const DEFAULT_QUOTE: &str = "BRL";

#[derive(Debug, Clone, PartialEq)]
pub struct FxConfig {
    pub primary_url: String,
    pub fallback_url: String,
    pub quote_currency: String,
    /// Client timeout, and the hard limit on the direct fallback call.
    pub timeout: Duration,
    pub fallback_rate: f64,
    pub ttl: Duration,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            quote_currency: DEFAULT_QUOTE.to_string(),
            timeout: Duration::from_secs(10),
            fallback_rate: DEFAULT_FALLBACK_RATE,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl FxConfig {
    pub fn from_env(ttl: Duration) -> Self {
        let d = Self::default();
        Self {
            primary_url: env_opt("FX_PRIMARY_URL").unwrap_or(d.primary_url),
            fallback_url: env_opt("FX_FALLBACK_URL").unwrap_or(d.fallback_url),
            quote_currency: env_opt("FX_QUOTE_CURRENCY")
                .map(|q| q.trim().to_uppercase())
                .unwrap_or(d.quote_currency),
            timeout: Duration::from_secs(env_parse("FX_TIMEOUT_SECS", 10u64).max(1)),
            fallback_rate: env_parse("FX_FALLBACK_RATE", d.fallback_rate),
            ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Cache,
    Primary,
    Fallback,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRow {
    pub base_currency: String,
    pub quote_currency: String,
    pub rate: f64,
    pub provider: RateSource,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub amount: f64,
    pub converted: f64,
    pub rate: f64,
    pub quote_currency: String,
    pub source: RateSource,
}

/// `rates.<QUOTE>` from an `{ "rates": { ... } }` body; positive values only.
pub fn parse_rate(body: &Value, quote: &str) -> Option<f64> {
    let rates = body.get("rates")?.as_object()?;
    rates
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(quote))
        .and_then(|(_, v)| v.as_f64().or_else(|| v.as_str()?.trim().parse().ok()))
        .filter(|r| r.is_finite() && *r > 0.0)
}

/// USD to quote-currency rate, cached under the rates category.
#[derive(Clone)]
pub struct ExchangeService {
    pub cache: Cache,
    pub http: Client,
    pub config: FxConfig,
}

impl ExchangeService {
    pub fn new(cache: Cache, config: FxConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tcg-catalog/0.1")
            .timeout(config.timeout)
            .build()
            .context("build fx http client")?;
        Ok(Self {
            cache,
            http,
            config,
        })
    }

    fn cache_key(&self) -> String {
        CacheCategory::Rates.key(Some(&self.config.quote_currency.to_lowercase()))
    }

    async fn fetch(&self, url: &str) -> Result<f64> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let body: Value = resp.json().await?;
        parse_rate(&body, &self.config.quote_currency)
            .ok_or_else(|| anyhow!("no {} rate in response from {url}", self.config.quote_currency))
    }

    /// Cached rate if fresh; else primary endpoint; else the direct fallback
    /// bounded by the configured timeout; else the fixed rate. Never fails.
    #[instrument(skip(self), fields(quote = %self.config.quote_currency))]
    pub async fn rate(&self) -> RateRow {
        let key = self.cache_key();
        if let Some(mut hit) = self.cache.get_valid_as::<RateRow>(&key, self.config.ttl).await {
            debug!(rate = hit.rate, "fx: cache hit");
            hit.provider = RateSource::Cache;
            return hit;
        }

        let fetched = match self.fetch(&self.config.primary_url).await {
            Ok(rate) => Some((rate, RateSource::Primary)),
            Err(e) => {
                warn!(error = %e, "fx: primary endpoint failed, trying fallback");
                match tokio::time::timeout(self.config.timeout, self.fetch(&self.config.fallback_url)).await {
                    Ok(Ok(rate)) => Some((rate, RateSource::Fallback)),
                    Ok(Err(e)) => {
                        warn!(error = %e, "fx: fallback endpoint failed");
                        None
                    }
                    Err(_) => {
                        warn!(timeout_secs = self.config.timeout.as_secs(), "fx: fallback endpoint timed out");
                        None
                    }
                }
            }
        };

        match fetched {
            Some((rate, provider)) => {
                let row = RateRow {
                    base_currency: "USD".to_string(),
                    quote_currency: self.config.quote_currency.clone(),
                    rate,
                    provider,
                    fetched_at: Utc::now(),
                };
                self.cache.set(&key, &row, self.config.ttl).await;
                info!(rate, ?provider, "fx: rate refreshed");
                row
            }
            None => {
                warn!(rate = self.config.fallback_rate, "fx: using fixed fallback rate");
                RateRow {
                    base_currency: "USD".to_string(),
                    quote_currency: self.config.quote_currency.clone(),
                    rate: self.config.fallback_rate,
                    provider: RateSource::Fixed,
                    fetched_at: Utc::now(),
                }
            }
        }
    }

    pub async fn convert(&self, usd_amount: f64) -> Conversion {
        let row = self.rate().await;
        Conversion {
            amount: usd_amount,
            converted: usd_amount * row.rate,
            rate: row.rate,
            quote_currency: row.quote_currency,
            source: row.provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offline_config() -> FxConfig {
        FxConfig {
            // Discard port: connections are refused immediately.
            primary_url: "http://127.0.0.1:9/latest".into(),
            fallback_url: "http://127.0.0.1:9/fallback".into(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[test]
    fn parses_quote_from_rates_object() {
        let body = json!({"base": "USD", "rates": {"BRL": 5.43, "EUR": 0.92}});
        assert_eq!(parse_rate(&body, "BRL"), Some(5.43));
        assert_eq!(parse_rate(&body, "brl"), Some(5.43));
        assert_eq!(parse_rate(&body, "JPY"), None);
        assert_eq!(parse_rate(&json!({"rates": {"BRL": "5.1"}}), "BRL"), Some(5.1));
        assert_eq!(parse_rate(&json!({"rates": {"BRL": 0}}), "BRL"), None);
        assert_eq!(parse_rate(&json!({"error": "quota"}), "BRL"), None);
    }

    #[tokio::test]
    async fn unreachable_endpoints_fall_back_to_fixed_rate() {
        let cache = Cache::in_memory();
        let fx = ExchangeService::new(cache.clone(), offline_config()).unwrap();
        let conv = fx.convert(10.0).await;
        assert_eq!(conv.source, RateSource::Fixed);
        assert!((conv.converted - 52.0).abs() < 1e-9);
        // The fixed rate is not cached.
        assert!(cache.get("cached_exchange_rate_brl").await.is_none());
    }

    #[tokio::test]
    async fn fresh_cached_rate_skips_the_network() {
        let cache = Cache::in_memory();
        let fx = ExchangeService::new(cache.clone(), offline_config()).unwrap();
        let row = RateRow {
            base_currency: "USD".into(),
            quote_currency: "BRL".into(),
            rate: 4.99,
            provider: RateSource::Primary,
            fetched_at: Utc::now(),
        };
        cache
            .set("cached_exchange_rate_brl", &row, fx.config.ttl)
            .await;
        let got = fx.rate().await;
        assert_eq!(got.rate, 4.99);
        assert_eq!(got.provider, RateSource::Cache);
    }
}
