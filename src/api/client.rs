//! Real GW2 API transport.
//!
//! Thin `reqwest` wrapper implementing `PageTransport`. Knows how to
//! build `/v2` bulk URLs and how to surface the server's `Warning`
//! header on partial-success replies; everything else (paging, retry,
//! reassembly) lives in the fetch coordinator.
//!
//! API docs: https://wiki.guildwars2.com/wiki/API:2
//! Base URL: https://api.guildwars2.com/v2/
//! Bulk endpoints accept at most 200 ids per request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{PageReply, PageTransport};
use crate::types::ItemId;

const BASE_URL: &str = "https://api.guildwars2.com/v2";

/// All requests ask for English item names.
const LANG: &str = "en";

/// HTTP transport against the live GW2 API.
pub struct CommerceClient {
    http: Client,
    base_url: String,
}

impl CommerceClient {
    /// Build a client with the given request timeout.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("tpflip/0.1.0 (trading-post-scanner)")
            .build()
            .context("Failed to build HTTP client for the GW2 API")?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Override the base URL (tests, API mirrors).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `ids` query parameter value: comma-separated decimal ids.
    fn ids_param(ids: &[ItemId]) -> String {
        let mut out = String::new();
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&id.to_string());
        }
        out
    }

    fn url(&self, endpoint: &str, ids: &[ItemId]) -> String {
        if ids.is_empty() {
            format!("{}/{endpoint}?lang={LANG}", self.base_url)
        } else {
            format!(
                "{}/{endpoint}?lang={LANG}&ids={}",
                self.base_url,
                Self::ids_param(ids)
            )
        }
    }
}

#[async_trait]
impl PageTransport for CommerceClient {
    async fn get_page(&self, endpoint: &str, ids: &[ItemId]) -> Result<PageReply> {
        let url = self.url(endpoint, ids);
        debug!(url = %url, ids = ids.len(), "GET");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {endpoint} failed"))?;

        let status = resp.status().as_u16();
        let warning = resp
            .headers()
            .get("warning")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read {endpoint} response body"))?;

        Ok(PageReply {
            status,
            body,
            warning,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
