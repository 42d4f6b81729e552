//! Cascade resolution
//!
//! A changed person or genre changes every film work document that embeds
//! it, even though those film works keep their own `modified` marker. The
//! resolver finds them in two stages:
//!
//! 1. Stage A streams the changed identifiers of the related kind
//!    (`<kind>_related` watermark).
//! 2. For each Stage A page, Stage B streams the film works linked to any of
//!    those identifiers (`<kind>_filmwork` watermark) and drains them fully.
//!    The Stage B watermark is reset before each lookup and again once
//!    drained, so no Stage A page inherits progress left by an earlier page
//!    or by a run that failed halfway through Stage B.
//!
//! Every Stage B page is fetched in full and normalized into film works.
//! The same film work may come out more than once when it references several
//! changed entities; consumers upsert by id.

use async_stream::try_stream;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::executor::QueryRunner;
use crate::kind::{EntityKind, StreamKey};
use crate::model::Filmwork;
use crate::normalize::fetch_by_ids;
use crate::query::ExtractQuery;
use crate::reader::ChunkedReader;
use crate::watermark::WatermarkStore;

/// Resolves changes of one related kind into film works to re-publish
pub struct CascadeResolver {
    related: EntityKind,
    store: Arc<dyn WatermarkStore>,
    runner: QueryRunner,
    chunk_size: u64,
}

impl CascadeResolver {
    /// Create a resolver for `related`, which must be linked to film works
    pub fn new(
        related: EntityKind,
        store: Arc<dyn WatermarkStore>,
        runner: QueryRunner,
        chunk_size: u64,
    ) -> Result<Self> {
        if related.filmwork_link().is_none() {
            return Err(EtlError::config(format!(
                "{} changes do not cascade into film works",
                related
            )));
        }
        if chunk_size == 0 {
            return Err(EtlError::config("chunk size must be positive"));
        }
        Ok(Self {
            related,
            store,
            runner,
            chunk_size,
        })
    }

    /// Related kind driving the cascade
    pub fn related(&self) -> EntityKind {
        self.related
    }

    /// Stage A: changed identifiers of the related kind
    pub fn related_ids(&self) -> ChunkedReader {
        let kind = self.related;
        let limit = self.chunk_size;
        ChunkedReader::new(
            StreamKey::related(kind),
            self.store.clone(),
            self.runner.clone(),
            move |since| ExtractQuery::ChangedIds { kind, since, limit },
        )
    }

    /// Stage B: film works linked to `ids`, reset once drained.
    ///
    /// The caller resets the watermark before reading; see [`Self::into_stream`].
    pub fn dependent_ids(&self, ids: Vec<Uuid>) -> ChunkedReader {
        let related = self.related;
        let limit = self.chunk_size;
        ChunkedReader::new(
            StreamKey::cascade(related),
            self.store.clone(),
            self.runner.clone(),
            move |since| ExtractQuery::DependentIds {
                related,
                ids: ids.clone(),
                since,
                limit,
            },
        )
        .with_reset_on_exhaustion()
    }

    /// Lazy stream of film work batches affected by related changes
    pub fn into_stream(self) -> BoxStream<'static, Result<Vec<Filmwork>>> {
        Box::pin(try_stream! {
            info!(related = %self.related, "Resolving cascade");
            let mut stage_a = self.related_ids();

            while let Some(page) = stage_a.next_page().await? {
                let related_ids = page.ids()?;
                debug!(
                    related = %self.related,
                    ids = related_ids.len(),
                    watermark = %page.watermark(),
                    "Looking up dependent film works"
                );

                self.store.reset(&StreamKey::cascade(self.related)).await?;
                let mut stage_b = self.dependent_ids(related_ids);
                while let Some(dependents) = stage_b.next_page().await? {
                    let ids = dependents.ids()?;
                    let filmworks = fetch_by_ids::<Filmwork>(&self.runner, &ids).await?;
                    yield filmworks;
                }
            }
        })
    }
}
