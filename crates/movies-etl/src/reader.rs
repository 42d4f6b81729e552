//! Chunked stream reader
//!
//! Pulls one stream key page by page. Every iteration reads the watermark,
//! asks for rows with a marker strictly greater than it, saves the marker of
//! the last row and hands the page out. Nothing is queried until the caller
//! asks for the next page.
//!
//! The stream ends on an empty page, or right after a page shorter than the
//! query limit since that page already proves the stream caught up.

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use movies_rdbc::{Row, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::executor::QueryRunner;
use crate::kind::{EntityKind, StreamKey};
use crate::query::{ExtractQuery, ID_COLUMN, MARKER_COLUMN};
use crate::watermark::WatermarkStore;

type PageQuery = Box<dyn Fn(DateTime<Utc>) -> ExtractQuery + Send + Sync>;

/// One bounded, marker-ordered page of raw rows
#[derive(Debug, Clone)]
pub struct Page {
    kind: EntityKind,
    rows: Vec<Row>,
    watermark: DateTime<Utc>,
}

impl Page {
    /// Kind of the rows
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Rows in marker order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Take the rows
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the page has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Watermark saved for this page (marker of its last row)
    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    /// Unique identifiers of the rows, in first-seen order
    pub fn ids(&self) -> Result<Vec<Uuid>> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        let mut ids = Vec::with_capacity(self.rows.len());
        for (idx, row) in self.rows.iter().enumerate() {
            let id = row
                .get_by_name(ID_COLUMN)
                .and_then(Value::as_uuid)
                .ok_or_else(|| {
                    EtlError::validation(self.kind, format!("row {}: missing or invalid id", idx))
                })?;
            if seen.insert(id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Counters of one reader run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Rows handed out
    pub rows_seen: u64,
    /// Non-empty pages handed out
    pub pages: u64,
    /// Queries issued
    pub queries: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Polling,
    /// Last page was short; finish without querying again
    CaughtUp(DateTime<Utc>),
    Finished,
}

/// Pull cursor over the pages of one stream key
pub struct ChunkedReader {
    key: StreamKey,
    store: Arc<dyn WatermarkStore>,
    runner: QueryRunner,
    page_query: PageQuery,
    reset_on_exhaustion: bool,
    state: ReaderState,
    stats: ReaderStats,
}

impl std::fmt::Debug for ChunkedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedReader")
            .field("key", &self.key)
            .field("reset_on_exhaustion", &self.reset_on_exhaustion)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ChunkedReader {
    /// Create a reader for `key`.
    ///
    /// `page_query` builds the page query from the current watermark. It must
    /// return a paginated query filtering on markers greater than the
    /// watermark and ordering by marker ascending.
    pub fn new<F>(key: StreamKey, store: Arc<dyn WatermarkStore>, runner: QueryRunner, page_query: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> ExtractQuery + Send + Sync + 'static,
    {
        Self {
            key,
            store,
            runner,
            page_query: Box::new(page_query),
            reset_on_exhaustion: false,
            state: ReaderState::Polling,
            stats: ReaderStats::default(),
        }
    }

    /// Reset the watermark once the stream is drained
    pub fn with_reset_on_exhaustion(mut self) -> Self {
        self.reset_on_exhaustion = true;
        self
    }

    /// Stream key
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Counters so far
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Whether the stream has ended
    pub fn is_finished(&self) -> bool {
        self.state == ReaderState::Finished
    }

    /// Fetch the next page, or `None` once the stream has caught up
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        match self.state {
            ReaderState::Finished => return Ok(None),
            ReaderState::CaughtUp(watermark) => {
                self.finish(watermark).await?;
                return Ok(None);
            }
            ReaderState::Polling => {}
        }

        let watermark = self.store.get(&self.key).await?;
        let query = (self.page_query)(watermark);
        if self.stats.queries == 0 {
            debug!(stream = %self.key, watermark = %watermark, "Starting stream");
        }

        let rows = self.runner.fetch(&query).await?;
        self.stats.queries += 1;

        if rows.is_empty() {
            self.finish(watermark).await?;
            return Ok(None);
        }

        let kind = query.kind();
        let marker = last_marker(kind, &rows)?;
        if marker <= watermark {
            self.state = ReaderState::Finished;
            return Err(EtlError::WatermarkRegression {
                key: self.key.clone(),
                watermark,
                marker,
            });
        }

        self.store.save(&self.key, marker).await?;
        self.stats.rows_seen += rows.len() as u64;
        self.stats.pages += 1;
        debug!(
            stream = %self.key,
            rows = rows.len(),
            watermark = %marker,
            "Fetched page"
        );

        if query.limit().is_some_and(|limit| (rows.len() as u64) < limit) {
            self.state = ReaderState::CaughtUp(marker);
        }

        Ok(Some(Page {
            kind,
            rows,
            watermark: marker,
        }))
    }

    /// Turn the reader into a lazy stream of pages.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> BoxStream<'static, Result<Page>> {
        stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_page().await?.map(|page| (page, reader)))
        })
        .boxed()
    }

    async fn finish(&mut self, watermark: DateTime<Utc>) -> Result<()> {
        self.state = ReaderState::Finished;
        info!(
            stream = %self.key,
            rows = self.stats.rows_seen,
            pages = self.stats.pages,
            watermark = %watermark,
            "Stream caught up, seen {} updates",
            self.stats.rows_seen
        );
        if self.reset_on_exhaustion {
            self.store.reset(&self.key).await?;
            debug!(stream = %self.key, "Watermark reset");
        }
        Ok(())
    }
}

fn last_marker(kind: EntityKind, rows: &[Row]) -> Result<DateTime<Utc>> {
    let idx = rows.len().saturating_sub(1);
    rows.last()
        .and_then(|row| row.get_by_name(MARKER_COLUMN))
        .and_then(Value::as_timestamp)
        .ok_or_else(|| {
            EtlError::validation(kind, format!("row {}: missing or invalid {}", idx, MARKER_COLUMN))
        })
}
