//! Cloudflare DNS provider client (spec §6 "DNS provider wire contract").

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{DnsProvider, ExistingRecord, ProviderError, RecordPayload};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

pub struct CloudflareProvider {
    client: reqwest::Client,
    token: String,
    email: Option<String>,
}

impl CloudflareProvider {
    /// Bearer-token auth if `email` is absent ("scoped" mode); otherwise
    /// the legacy `X-Auth-Email`/`X-Auth-Key` header pair ("global" mode).
    /// Mirrors the original client's mode selection based on whether
    /// `cf_email` was configured.
    pub fn new(token: String, email: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(CloudflareProvider { client, token, email })
    }

    fn authenticate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.email {
            Some(email) => builder
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", &self.token),
            None => builder.bearer_auth(&self.token),
        }
    }

    fn is_rate_limited(status: StatusCode, errors: &[ApiError]) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || errors.iter().any(|e| e.message.contains("Rate limited"))
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;

        if Self::is_rate_limited(status, &body.errors) {
            return Err(ProviderError::RateLimited);
        }
        if !body.success {
            let message = body
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ProviderError::Other(message));
        }
        body.result.ok_or_else(|| ProviderError::Other("missing result".into()))
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn get_records(&self, zone_id: &str, name: &str) -> Result<Vec<ExistingRecord>, ProviderError> {
        let url = format!("{}/zones/{}/dns_records", API_BASE, zone_id);
        let request = self
            .authenticate(self.client.get(&url))
            .query(&[("name", name)]);
        let response = request.send().await.map_err(|e| ProviderError::Other(e.to_string()))?;
        Self::parse_response(response).await
    }

    async fn post_record(&self, zone_id: &str, payload: &RecordPayload) -> Result<(), ProviderError> {
        let url = format!("{}/zones/{}/dns_records", API_BASE, zone_id);
        let request = self.authenticate(self.client.post(&url)).json(payload);
        let response = request.send().await.map_err(|e| ProviderError::Other(e.to_string()))?;
        Self::parse_response::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn put_record(&self, zone_id: &str, record_id: &str, payload: &RecordPayload) -> Result<(), ProviderError> {
        let url = format!("{}/zones/{}/dns_records/{}", API_BASE, zone_id, record_id);
        let request = self.authenticate(self.client.put(&url)).json(payload);
        let response = request.send().await.map_err(|e| ProviderError::Other(e.to_string()))?;
        Self::parse_response::<serde_json::Value>(response).await.map(|_| ())
    }
}
