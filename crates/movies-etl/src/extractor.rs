//! Extraction entry points
//!
//! Film works are extracted as: the person cascade, then the genre cascade,
//! then film works changed directly. Each part is drained before the next one
//! starts so the three watermark lineages never interleave. Persons and
//! genres only have their direct stream.
//!
//! All streams are lazy and end after the first error.

use async_stream::try_stream;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::info;

use crate::cascade::CascadeResolver;
use crate::error::{EtlError, Result};
use crate::executor::{Executor, QueryRunner};
use crate::kind::{EntityKind, StreamKey};
use crate::model::{Batch, Filmwork, Genre, Person, Record};
use crate::normalize::normalize;
use crate::query::ExtractQuery;
use crate::reader::ChunkedReader;
use crate::retry::RetryConfig;
use crate::watermark::WatermarkStore;

/// Upper bound for the page size
pub const MAX_CHUNK_SIZE: u64 = 10_000;

/// Incremental extractor over one store and one watermark store
#[derive(Clone)]
pub struct Extractor {
    runner: QueryRunner,
    store: Arc<dyn WatermarkStore>,
    chunk_size: u64,
}

impl Extractor {
    /// Create an extractor reading pages of at most `chunk_size` rows
    pub fn new(
        executor: Arc<dyn Executor>,
        store: Arc<dyn WatermarkStore>,
        chunk_size: u64,
        retry: RetryConfig,
    ) -> Result<Self> {
        if !(1..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(EtlError::config(format!(
                "chunk size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }
        Ok(Self {
            runner: QueryRunner::new(executor, retry),
            store,
            chunk_size,
        })
    }

    /// Page size
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Watermark store in use
    pub fn store(&self) -> &Arc<dyn WatermarkStore> {
        &self.store
    }

    /// Reader over the direct changes of `kind`
    pub fn direct(&self, kind: EntityKind) -> ChunkedReader {
        let limit = self.chunk_size;
        ChunkedReader::new(
            StreamKey::direct(kind),
            self.store.clone(),
            self.runner.clone(),
            move |since| ExtractQuery::Changed { kind, since, limit },
        )
    }

    /// Cascade resolver for a related kind
    pub fn cascade(&self, related: EntityKind) -> Result<CascadeResolver> {
        CascadeResolver::new(related, self.store.clone(), self.runner.clone(), self.chunk_size)
    }

    /// Records of `T` changed directly, one batch per page
    pub fn extract_changed<T: Record>(&self) -> BoxStream<'static, Result<Vec<T>>> {
        let mut reader = self.direct(T::KIND);
        Box::pin(try_stream! {
            while let Some(page) = reader.next_page().await? {
                let records = normalize::<T>(page.into_rows())?;
                yield records;
            }
        })
    }

    /// Direct changes of `kind` as batches of the matching shape
    pub fn extract_direct(&self, kind: EntityKind) -> BoxStream<'static, Result<Batch>> {
        let mut reader = self.direct(kind);
        Box::pin(try_stream! {
            while let Some(page) = reader.next_page().await? {
                let batch = Batch::from_rows(kind, page.into_rows())?;
                yield batch;
            }
        })
    }

    /// Persons changed since the last run
    pub fn extract_persons(&self) -> BoxStream<'static, Result<Vec<Person>>> {
        self.extract_changed()
    }

    /// Genres changed since the last run
    pub fn extract_genres(&self) -> BoxStream<'static, Result<Vec<Genre>>> {
        self.extract_changed()
    }

    /// Changed persons, then changed genres
    pub fn extract_related(&self) -> BoxStream<'static, Result<Batch>> {
        let mut persons = self.extract_direct(EntityKind::Person);
        let mut genres = self.extract_direct(EntityKind::Genre);
        Box::pin(try_stream! {
            while let Some(batch) = persons.next().await {
                yield batch?;
            }
            while let Some(batch) = genres.next().await {
                yield batch?;
            }
        })
    }

    /// Film works to re-publish: cascades first, then direct changes
    pub fn extract_filmworks(&self) -> BoxStream<'static, Result<Vec<Filmwork>>> {
        let this = self.clone();
        Box::pin(try_stream! {
            info!("Extracting film works");
            for related in EntityKind::CASCADE_SOURCES {
                let mut cascade = this.cascade(related)?.into_stream();
                while let Some(batch) = cascade.next().await {
                    yield batch?;
                }
            }

            let mut direct = this.extract_changed::<Filmwork>();
            while let Some(batch) = direct.next().await {
                yield batch?;
            }
        })
    }

    /// Batches of `kind`, dispatching to the matching entry point
    pub fn extract(&self, kind: EntityKind) -> BoxStream<'static, Result<Batch>> {
        match kind {
            EntityKind::Filmwork => self.extract_filmworks().map_ok(Batch::from).boxed(),
            related => self.extract_direct(related),
        }
    }
}
