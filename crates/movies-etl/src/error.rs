//! Error types for movies-etl
//!
//! Every extraction failure ends the current run. The variants tell the
//! caller why:
//! - `RetriesExhausted`: a transient store fault outlived the backoff budget
//! - `Database`: a non-retriable store error, propagated on first occurrence
//! - `Validation`: a row could not be shaped into an output record
//! - `Configuration`: the run could not start

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::kind::{EntityKind, StreamKey};

/// Result type alias for movies-etl
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for movies-etl
#[derive(Debug, Error)]
pub enum EtlError {
    /// Non-retriable error from the relational store
    #[error("database error: {0}")]
    Database(#[from] movies_rdbc::Error),

    /// A transient fault persisted through every retry attempt
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of calls made, including the first one
        attempts: u32,
        /// The last transient error observed
        #[source]
        source: movies_rdbc::Error,
    },

    /// A row failed to coerce into the output record shape
    #[error("invalid {kind} row: {message}")]
    Validation {
        /// Kind of the record being built
        kind: EntityKind,
        /// What was wrong with the row
        message: String,
    },

    /// Configuration or startup failure
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Watermark store failure
    #[error("watermark store error: {0}")]
    State(String),

    /// A page did not advance the watermark of its stream
    #[error("stream '{key}' did not advance: page ends at {marker}, watermark is {watermark}")]
    WatermarkRegression {
        /// Stream whose page regressed
        key: StreamKey,
        /// Watermark the page was queried with
        watermark: DateTime<Utc>,
        /// Marker of the last row of the page
        marker: DateTime<Utc>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Create a validation error
    pub fn validation(kind: EntityKind, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a watermark store error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Whether the error came from exhausting the retry budget
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// Whether the error is a row validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Whether the run cannot go on: the store stayed unreachable through
    /// every retry, or the run could not start
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. } | Self::Configuration(_))
    }

    /// Short label of the variant, for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Validation { .. } => "validation",
            Self::Configuration(_) => "configuration",
            Self::State(_) => "state",
            Self::WatermarkRegression { .. } => "watermark_regression",
            Self::Io(_) => "io",
        }
    }

    /// Underlying store error category, if the error came from the store
    pub fn db_category(&self) -> Option<movies_rdbc::ErrorCategory> {
        match self {
            Self::Database(e) | Self::RetriesExhausted { source: e, .. } => Some(e.category()),
            _ => None,
        }
    }
}
