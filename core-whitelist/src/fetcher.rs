//! Remote whitelist fetcher
//!
//! Retrieves the published artist list with one HTTP GET. The document looks
//! like:
//!
//! ```json
//! { "hash": "9f2c...", "artists": [{ "id": "A", "name": "Alpha" }] }
//! ```
//!
//! `hash` is optional. When a publisher omits it, the fetcher derives a
//! SHA-256 digest of the canonical list so change detection keeps working.
//!
//! The fetcher never retries; the coordinator owns the retry policy.

use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use chrono::{DateTime, Utc};
use core_library::models::{normalize_entries, WhitelistEntry, WhitelistSnapshot};
use core_runtime::logging::redact_url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{FetchError, FetchResult};

/// Whitelist as published remotely, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePayload {
    pub content_hash: String,
    /// Unique by artist id and sorted by it
    pub entries: Vec<WhitelistEntry>,
}

impl RemotePayload {
    /// Build a payload; duplicate artist ids keep their first occurrence.
    pub fn new(
        content_hash: impl Into<String>,
        entries: impl IntoIterator<Item = WhitelistEntry>,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            entries: normalize_entries(entries),
        }
    }

    pub fn artist_ids(&self) -> HashSet<String> {
        self.entries.iter().map(|e| e.artist_id.clone()).collect()
    }

    /// Snapshot to persist once this payload has been applied.
    pub fn to_snapshot(&self, fetched_at: DateTime<Utc>) -> WhitelistSnapshot {
        WhitelistSnapshot::new(
            self.content_hash.clone(),
            self.entries.iter().cloned(),
            fetched_at,
        )
    }
}

/// Source of the remote whitelist.
#[async_trait]
pub trait WhitelistFetcher: Send + Sync {
    /// Fetch the current remote list. Side-effect free apart from the request.
    async fn fetch(&self) -> FetchResult<RemotePayload>;
}

#[derive(Debug, Deserialize)]
struct WhitelistDocument {
    #[serde(default)]
    hash: Option<String>,
    artists: Vec<DocumentArtist>,
}

#[derive(Debug, Deserialize)]
struct DocumentArtist {
    id: String,
    name: String,
}

/// Fetches the whitelist document over HTTP.
pub struct HttpWhitelistFetcher {
    http_client: Arc<dyn HttpClient>,
    url: String,
    timeout: Duration,
}

impl HttpWhitelistFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WhitelistFetcher for HttpWhitelistFetcher {
    #[instrument(skip(self), fields(url = %redact_url(&self.url)))]
    async fn fetch(&self) -> FetchResult<RemotePayload> {
        let request = HttpRequest::get(&self.url)
            .accept_json()
            .timeout(self.timeout);

        let response = tokio::time::timeout(
            self.timeout,
            self.http_client
                .execute_with_retry(request, RetryPolicy::single_attempt()),
        )
        .await
        .map_err(|_| FetchError::Timeout(format!("no response within {:?}", self.timeout)))?
        .map_err(map_bridge_error)?;

        if !response.is_success() {
            warn!(status = response.status, "Whitelist request rejected");
            return Err(FetchError::Network(format!(
                "unexpected HTTP status {}",
                response.status
            )));
        }

        let payload = parse_document(&response.body)?;
        debug!(
            hash = %payload.content_hash,
            artists = payload.entries.len(),
            "Fetched remote whitelist"
        );
        Ok(payload)
    }
}

fn map_bridge_error(error: BridgeError) -> FetchError {
    match error {
        BridgeError::Timeout(message) => FetchError::Timeout(message),
        other => {
            let message = other.to_string();
            if message.to_ascii_lowercase().contains("timed out") {
                FetchError::Timeout(message)
            } else {
                FetchError::Network(message)
            }
        }
    }
}

/// Parse and normalize a whitelist document.
pub fn parse_document(body: &[u8]) -> FetchResult<RemotePayload> {
    let document: WhitelistDocument = serde_json::from_slice(body)
        .map_err(|e| FetchError::Malformed(format!("invalid whitelist JSON: {}", e)))?;

    if let Some(position) = document.artists.iter().position(|a| a.id.trim().is_empty()) {
        return Err(FetchError::Malformed(format!(
            "artist at index {} has an empty id",
            position
        )));
    }

    let entries = normalize_entries(
        document
            .artists
            .into_iter()
            .map(|a| WhitelistEntry::new(a.id, a.name)),
    );

    let content_hash = match document.hash {
        Some(hash) if hash.trim().is_empty() => {
            return Err(FetchError::Malformed("hash is present but empty".to_string()))
        }
        Some(hash) => hash,
        None => canonical_hash(&entries),
    };

    Ok(RemotePayload {
        content_hash,
        entries,
    })
}

/// Hex SHA-256 over entries sorted by id, one `id\tname\n` line each.
pub fn canonical_hash(entries: &[WhitelistEntry]) -> String {
    let mut sorted: Vec<&WhitelistEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.artist_id.cmp(&b.artist_id));

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.artist_id.as_bytes());
        hasher.update(b"\t");
        hasher.update(entry.display_name.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
