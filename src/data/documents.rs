//! HTTP context-document fetcher.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::ExternalDocumentFetcher;

/// Bytes read from a document before the rest is dropped.
const MAX_DOCUMENT_BYTES: usize = 256 * 1024;

pub struct HttpDocumentFetcher {
    http: Client,
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("AUGUR/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build document HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ExternalDocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {status}");
        }

        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(false);

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = resp.chunk().await.context("Failed to read document body")? {
            if append_capped(&mut body, &chunk, MAX_DOCUMENT_BYTES) {
                truncated = true;
                break;
            }
        }
        let text = String::from_utf8_lossy(&body);

        debug!(url, bytes = body.len(), truncated, is_html, "Document downloaded");

        Ok(if is_html {
            strip_markup(&text)
        } else {
            text.trim().to_string()
        })
    }
}

/// Append as much of `chunk` as fits under `cap`. True once the cap is hit.
fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize) -> bool {
    let room = cap.saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    chunk.len() >= room
}

/// Drop tags plus script/style bodies and collapse whitespace.
pub fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        out.push(' ');
        let after = &rest[start..];
        let lower = after.get(..8).unwrap_or(after).to_ascii_lowercase();

        let skip_to = if lower.starts_with("<script") {
            find_ci(after, "</script>").map(|i| i + "</script>".len())
        } else if lower.starts_with("<style") {
            find_ci(after, "</style>").map(|i| i + "</style>".len())
        } else {
            after.find('>').map(|i| i + 1)
        };

        match skip_to {
            Some(n) => rest = &after[n..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}
