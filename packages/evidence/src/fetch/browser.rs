//! Browser automation sidecar client.
//!
//! Rendered fetches go through an external browser service that executes
//! JavaScript and surfaces auth walls (login pages, CAPTCHA interstitials)
//! as a structured flag instead of garbled HTML.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{Error, Result};

/// One rendered page from the browser sidecar.
#[derive(Debug, Clone)]
pub struct BrowserPage {
    pub status: u16,
    pub body: String,
    pub title: Option<String>,
    /// The sidecar detected a login wall or CAPTCHA.
    pub auth_block: bool,
}

/// Browser automation backend abstraction.
#[async_trait]
pub trait BrowserFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<BrowserPage>;
}

/// HTTP client for the browser sidecar: `POST {base}/fetch`.
pub struct HttpBrowserClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct BrowserResponse {
    status: u16,
    body: String,
    title: Option<String>,
    #[serde(default)]
    auth_block: bool,
}

impl HttpBrowserClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl BrowserFetcher for HttpBrowserClient {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<BrowserPage> {
        let response = self
            .http
            .post(format!("{}/fetch", self.base_url))
            .timeout(timeout)
            .json(&serde_json::json!({
                "url": url,
                "timeout_ms": timeout.as_millis() as u64,
            }))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(Error::TransientFetch(format!(
                "browser sidecar returned HTTP {status}"
            )));
        }

        let body: BrowserResponse = response
            .json()
            .await
            .map_err(|e| Error::TransientFetch(format!("bad browser response: {e}")))?;

        Ok(BrowserPage {
            status: body.status,
            body: body.body,
            title: body.title,
            auth_block: body.auth_block,
        })
    }
}
