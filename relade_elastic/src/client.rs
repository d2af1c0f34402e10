//! The REST client
//!
//! Two calls are all the rest of the project needs: a bulk write into the
//! target cluster and a time-windowed search against a source cluster. Retry
//! policy, if any, belongs to whoever drives this client; failures here are
//! reported with the target URL and payload size and left at that.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::document::{BulkDocument, SourceDocument, to_bulk_body};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SEARCH_RESULT_CAP: u32 = 10_000;

/// Errors produced by [`Client`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`reqwest::Error`].
    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The cluster answered with a non-success status.
    #[error("Request to {url} failed with status {status}, payload was {payload_bytes} bytes")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code returned.
        status: u16,
        /// Size of the request payload.
        payload_bytes: usize,
    },
    /// The bulk endpoint accepted the request but rejected items. The bulk
    /// API reports per-item failures with a 200 status and `"errors": true`.
    #[error("Bulk write to {url} rejected items, payload was {payload_bytes} bytes")]
    BulkRejected {
        /// Request URL.
        url: String,
        /// Size of the request payload.
        payload_bytes: usize,
    },
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<SourceDocument>,
}

/// Basic-auth credentials for a cluster.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

/// A thin client for one cluster.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    credentials: Credentials,
    inner: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`] for the cluster at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying TLS backend cannot be initialized.
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, Error> {
        let inner = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            inner,
        })
    }

    /// Write a batch of documents through the `_bulk` endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status or a bulk
    /// response that rejected items.
    pub async fn bulk(&self, documents: &[BulkDocument]) -> Result<(), Error> {
        let url = format!("{base}/_bulk", base = self.base_url);
        let payload = to_bulk_body(documents);
        let payload_bytes = payload.len();

        info!(
            "Writing {count} documents ({payload_bytes} bytes) to {url}",
            count = documents.len()
        );

        let response = self
            .inner
            .post(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url,
                status: status.as_u16(),
                payload_bytes,
            });
        }

        let body: Value = response.json().await?;
        if body.get("errors").and_then(Value::as_bool) == Some(true) {
            return Err(Error::BulkRejected { url, payload_bytes });
        }

        Ok(())
    }

    /// Fetch every document in `index` whose `timestamp_field` falls in
    /// `[window_start, window_end)`, optionally also requiring
    /// `filter.0 == filter.1`. Window bounds are fixed-format timestamp
    /// strings. An empty result is a valid, non-error outcome.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status or a
    /// response missing the hits structure.
    pub async fn search_window(
        &self,
        index: &str,
        timestamp_field: &str,
        filter: Option<(&str, &str)>,
        window_start: &str,
        window_end: &str,
    ) -> Result<Vec<SourceDocument>, Error> {
        let url = format!(
            "{base}/{index}/_search?size={SEARCH_RESULT_CAP}",
            base = self.base_url
        );

        let mut must = vec![json!({
            "range": {
                (timestamp_field): { "gte": window_start, "lt": window_end }
            }
        })];
        if let Some((field, value)) = filter {
            must.push(json!({ "term": { (field): value } }));
        }
        let query = json!({ "query": { "bool": { "must": must } } });

        debug!("Searching {url}: {query}");

        let response = self
            .inner
            .post(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url,
                status: status.as_u16(),
                payload_bytes: query.to_string().len(),
            });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.hits.hits)
    }
}
