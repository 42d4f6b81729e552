//! Error types for movies-rdbc
//!
//! Every error carries an [`ErrorCategory`]. The extractor retries the
//! transient categories and gives up immediately on everything else.

use std::fmt;
use thiserror::Error;

/// Result type for movies-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection could not be established or was lost
    Connection,
    /// Statement rejected or failed on the server
    Query,
    /// A column value could not be decoded
    TypeConversion,
    /// Statement cancelled by a timeout
    Timeout,
    /// Transaction aborted by deadlock detection
    Deadlock,
    /// Credentials rejected
    Authentication,
    /// Bad url, identifier or option
    Configuration,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Whether a fault of this category may go away when the same
    /// statement is issued again.
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::Deadlock)
    }

    /// Stable lowercase name, used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::TypeConversion => "type_conversion",
            Self::Timeout => "timeout",
            Self::Deadlock => "deadlock",
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store error: a category, a message and optionally the statement and
/// driver error behind it.
#[derive(Error, Debug)]
#[error("{category} error: {message}")]
pub struct Error {
    category: ErrorCategory,
    message: String,
    sql: Option<String>,
    #[source]
    source: Option<BoxedSource>,
}

#[allow(missing_docs)]
impl Error {
    /// Build an error of any category
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Attach the statement that failed
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach the underlying driver error
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Connection, message)
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::connection(message).with_source(source)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Query, message)
    }

    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::query(message).with_sql(sql)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn deadlock() -> Self {
        Self::new(ErrorCategory::Deadlock, "deadlock detected")
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Authentication, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Configuration, message)
    }

    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TypeConversion, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Other, message)
    }

    #[inline]
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category.is_retriable()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Statement attached to the error, if any
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }
}
