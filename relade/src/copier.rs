//! Windowed cross-cluster replication
//!
//! One [`Copier`] drives one copy source over the load-test interval. The
//! interval is split into bounded windows so no single query outruns the
//! store's result cap; windows run strictly sequentially since each cursor
//! depends on the previous window's end. Every window's documents
//! accumulate before a single normalize-and-sink pass per source, so the
//! numeric unification sees the whole set at once. Sinking per window would
//! lose cross-window type consistency.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relade_elastic::{BulkDocument, SourceDocument};
use tracing::{debug, info};

use crate::config::CopySource;
use crate::document::{self, format_timestamp_ms};
use crate::normalize;

/// Window width. Two minutes keeps a busy cluster's worst windows under the
/// single-query result cap.
pub const WINDOW_WIDTH_MS: i64 = 2 * 60 * 1000;

/// Padding applied around the load-test bounds when copying, so context
/// just before and after the run comes along.
pub const INTERVAL_PADDING_MS: i64 = 5 * 60 * 1000;

/// Errors produced by [`Copier`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A copied document could not be rebuilt.
    #[error("Document build error: {0}")]
    Document(#[from] document::Error),
    /// The accumulated batch failed numeric unification.
    #[error("Normalization error: {0}")]
    Normalize(#[from] normalize::Error),
    /// A fetch or sink call failed.
    #[error("Transport error: {0}")]
    Transport(#[from] relade_elastic::client::Error),
    /// The window dump diagnostic could not be written.
    #[error("Failed to write window dump: {0}")]
    Dump(#[from] std::io::Error),
    /// The window dump diagnostic could not be serialized.
    #[error("Failed to serialize window dump: {0}")]
    DumpSerialize(#[from] serde_json::Error),
}

/// Fetch collaborator: everything matching the source's filters inside one
/// window. An empty result is a valid, non-error outcome.
#[async_trait]
pub trait DocumentFetcher {
    /// Fetch documents whose `timestamp_field` lies in
    /// `[window_start, window_end)`.
    async fn fetch_window(
        &self,
        index: &str,
        timestamp_field: &str,
        filter: Option<(&str, &str)>,
        window_start: &str,
        window_end: &str,
    ) -> Result<Vec<SourceDocument>, relade_elastic::client::Error>;
}

#[async_trait]
impl DocumentFetcher for relade_elastic::Client {
    async fn fetch_window(
        &self,
        index: &str,
        timestamp_field: &str,
        filter: Option<(&str, &str)>,
        window_start: &str,
        window_end: &str,
    ) -> Result<Vec<SourceDocument>, relade_elastic::client::Error> {
        self.search_window(index, timestamp_field, filter, window_start, window_end)
            .await
    }
}

/// Sink collaborator: one bulk write of routed documents.
#[async_trait]
pub trait DocumentSink {
    /// Write the batch.
    async fn sink(
        &self,
        documents: &[BulkDocument],
    ) -> Result<(), relade_elastic::client::Error>;
}

#[async_trait]
impl DocumentSink for relade_elastic::Client {
    async fn sink(
        &self,
        documents: &[BulkDocument],
    ) -> Result<(), relade_elastic::client::Error> {
        self.bulk(documents).await
    }
}

/// Split `[start_ms, end_ms)` into consecutive windows of at most
/// `width_ms`. The final window is clipped to the interval end; an empty or
/// inverted interval yields no windows.
#[must_use]
pub fn split_windows(start_ms: i64, end_ms: i64, width_ms: i64) -> Vec<(i64, i64)> {
    let mut windows = Vec::new();
    let mut cursor = start_ms;
    while cursor < end_ms {
        let window_end = end_ms.min(cursor + width_ms);
        windows.push((cursor, window_end));
        cursor = window_end;
    }
    windows
}

/// One copy pass over one source.
#[derive(Debug)]
pub struct Copier<'a> {
    source: &'a CopySource,
    offset_ms: i64,
    extra_fields: &'a [(String, String)],
    interval_start_ms: i64,
    interval_end_ms: i64,
    dump_dir: Option<PathBuf>,
}

impl<'a> Copier<'a> {
    /// Create a new [`Copier`] for `source`, replicating
    /// `[interval_start_ms, interval_end_ms)`.
    #[must_use]
    pub fn new(
        source: &'a CopySource,
        offset_ms: i64,
        extra_fields: &'a [(String, String)],
        interval_start_ms: i64,
        interval_end_ms: i64,
        dump_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            source,
            offset_ms,
            extra_fields,
            interval_start_ms,
            interval_end_ms,
            dump_dir,
        }
    }

    /// Run the copy pass to completion: fetch every window sequentially,
    /// accumulate, unify numeric fields over the whole set, sink once.
    /// Returns the number of documents written.
    ///
    /// # Errors
    ///
    /// Returns an error if a fetch, a document rebuild, normalization or
    /// the sink fails. The caller abandons this source and moves on; the
    /// sink is idempotent by document id so a re-run is safe.
    pub async fn run<F, S>(&self, fetcher: &F, sink: &S) -> Result<usize, Error>
    where
        F: DocumentFetcher + Sync,
        S: DocumentSink + Sync,
    {
        let name = &self.source.name;
        info!(
            "Copying {name}: {index} from {start} to {end}",
            index = self.source.index_pattern,
            start = format_timestamp_ms(self.interval_start_ms),
            end = format_timestamp_ms(self.interval_end_ms),
        );

        let windows = split_windows(self.interval_start_ms, self.interval_end_ms, WINDOW_WIDTH_MS);
        let mut accumulated: Vec<BulkDocument> = Vec::new();

        for (ordinal, (window_start_ms, window_end_ms)) in windows.into_iter().enumerate() {
            let window_start = format_timestamp_ms(window_start_ms);
            let window_end = format_timestamp_ms(window_end_ms);
            let filter = self
                .source
                .filter
                .as_ref()
                .map(|(field, value)| (field.as_str(), value.as_str()));

            let fetched = fetcher
                .fetch_window(
                    &self.source.index_pattern,
                    &self.source.timestamp_field,
                    filter,
                    &window_start,
                    &window_end,
                )
                .await?;

            if let Some(ref dir) = self.dump_dir {
                self.dump_window(dir, ordinal, &fetched).await?;
            }

            if fetched.is_empty() {
                debug!("Window {ordinal} of {name} ({window_start} to {window_end}) is empty");
                continue;
            }

            debug!(
                "Window {ordinal} of {name} fetched {count} documents",
                count = fetched.len()
            );
            for source_document in &fetched {
                accumulated.push(document::from_source(
                    source_document,
                    &self.source.timestamp_field,
                    self.offset_ms,
                    self.extra_fields,
                    self.source.target_index.as_deref(),
                )?);
            }
        }

        if accumulated.is_empty() {
            info!("No documents to copy for {name}, skipping");
            return Ok(0);
        }

        normalize::unify_numeric_fields(&mut accumulated)?;

        let count = accumulated.len();
        sink.sink(&accumulated).await?;
        info!("Copied {count} documents for {name}");
        Ok(count)
    }

    /// Write one window's raw fetch result for offline diagnosis. The file
    /// ordinal is the window index within this source's pass.
    async fn dump_window(
        &self,
        dir: &Path,
        ordinal: usize,
        fetched: &[SourceDocument],
    ) -> Result<(), Error> {
        let path = dir.join(format!(
            "copy_{name}_{ordinal}.json",
            name = self.source.name
        ));
        let payload = serde_json::to_vec_pretty(fetched)?;
        tokio::fs::write(&path, payload).await?;
        Ok(())
    }
}
