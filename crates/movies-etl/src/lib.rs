//! # movies-etl
//!
//! Incremental change extraction from the movies database for search
//! indexing.
//!
//! Film work documents embed the persons and genres they reference, so a
//! film work has to be re-published when it changes *or* when anything it
//! embeds changes. The extractor tracks one watermark per stream and reads
//! each stream in bounded, marker-ordered pages:
//!
//! - **Direct streams** read rows of one kind changed after the watermark
//! - **Cascades** turn changed persons and genres into the film works that
//!   reference them, using watermarks of their own
//! - **Retry** re-issues reads that hit a transient store fault, with
//!   exponential backoff
//!
//! Delivery is at-least-once: a film work may be emitted more than once in a
//! run, and consumers are expected to upsert by id.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use movies_etl::prelude::*;
//!
//! let extractor = Extractor::new(executor, store, 100, RetryConfig::default())?;
//! let mut filmworks = extractor.extract_filmworks();
//! while let Some(batch) = filmworks.next().await {
//!     index(batch?).await?;
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cascade;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod kind;
pub mod model;
pub mod normalize;
pub mod output;
pub mod query;
pub mod reader;
pub mod retry;
pub mod watermark;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cascade::CascadeResolver;
    pub use crate::config::{EtlConfig, SensitiveString};
    pub use crate::error::{EtlError, Result};
    pub use crate::executor::{Executor, QueryRunner, RdbcExecutor};
    pub use crate::extractor::Extractor;
    pub use crate::kind::{EntityKind, StreamKey, StreamRole};
    pub use crate::model::{
        Batch, Filmwork, FilmworkGenre, FilmworkPerson, Genre, Person, PersonFilm, Record,
    };
    pub use crate::normalize::{fetch_by_ids, normalize};
    pub use crate::query::{ExtractQuery, QueryBuilder};
    pub use crate::reader::{ChunkedReader, Page, ReaderStats};
    pub use crate::retry::{retry, RetryConfig};
    pub use crate::watermark::{
        FileWatermarkStore, MemoryWatermarkStore, WatermarkStore, INITIAL_WATERMARK,
    };
}

pub use error::{EtlError, Result};
pub use extractor::Extractor;
