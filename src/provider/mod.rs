//! DNS provider abstraction (spec §4.6, §6 "DNS provider wire contract").

pub mod cloudflare;

use async_trait::async_trait;
use derive_more::{Display, Error};
use serde::Serialize;

pub use cloudflare::CloudflareProvider;

/// The payload shape every provider write uses (spec §3 "Record payload").
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecordPayload {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
    pub comment: Option<String>,
}

/// An existing record as returned by the provider's read endpoint. Only
/// `id` is needed by the reconciler.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExistingRecord {
    pub id: String,
}

#[derive(Debug, Display, Error)]
pub enum ProviderError {
    /// The provider asked the caller to back off (spec §4.6 step 5): it
    /// reported a rate limit either via message content or HTTP 429.
    #[display(fmt = "provider reported a rate limit")]
    RateLimited,
    #[display(fmt = "provider error: {}", _0)]
    Other(#[error(not(source))] String),
}

/// The three operations the reconciler needs from a DNS provider (spec
/// §6). Abstracted behind a trait so the reconciler can be exercised
/// against a fake in tests (spec §4.9 "Testing hooks").
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn get_records(&self, zone_id: &str, name: &str) -> Result<Vec<ExistingRecord>, ProviderError>;
    async fn post_record(&self, zone_id: &str, payload: &RecordPayload) -> Result<(), ProviderError>;
    async fn put_record(&self, zone_id: &str, record_id: &str, payload: &RecordPayload) -> Result<(), ProviderError>;
}
