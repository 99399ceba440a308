pub mod provider;

pub use provider::{ProviderConfig, TcgdexProvider};

use anyhow::Result;
use async_trait::async_trait;

use crate::database_ops::decode::DecodedSet;
use crate::database_ops::models::{CardPatch, Series};

/// Remote catalog the sync engine reconciles against. Listings and details
/// come back already decoded; undecodable items are dropped by the source.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn list_series(&self) -> Result<Vec<Series>>;

    async fn list_sets(&self) -> Result<Vec<DecodedSet>>;

    /// One page of the card listing, 1-based. An empty page means exhausted.
    async fn list_cards(&self, page: u32, page_size: u32) -> Result<Vec<CardPatch>>;

    async fn card_detail(&self, id: &str) -> Result<CardPatch>;
}
