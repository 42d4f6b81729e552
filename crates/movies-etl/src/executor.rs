//! Query execution seam
//!
//! The extraction core never talks to a connection directly. It hands an
//! [`ExtractQuery`] to an [`Executor`] through a [`QueryRunner`], which adds
//! the retry policy.

use async_trait::async_trait;
use movies_rdbc::connection::Connection;
use movies_rdbc::Row;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::query::{ExtractQuery, QueryBuilder};
use crate::retry::{retry, RetryConfig};

/// Executes extraction queries against the relational store
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `query` and return its rows in store order
    async fn fetch(&self, query: &ExtractQuery) -> movies_rdbc::Result<Vec<Row>>;
}

/// [`Executor`] rendering queries to SQL over a [`Connection`]
pub struct RdbcExecutor {
    conn: Arc<dyn Connection>,
    builder: QueryBuilder,
}

impl RdbcExecutor {
    /// Create an executor over a shared connection
    pub fn new(conn: Arc<dyn Connection>, builder: QueryBuilder) -> Self {
        Self { conn, builder }
    }

    /// Query builder in use
    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }
}

#[async_trait]
impl Executor for RdbcExecutor {
    async fn fetch(&self, query: &ExtractQuery) -> movies_rdbc::Result<Vec<Row>> {
        let sql = self.builder.build(query);
        debug!(query = %query, "Executing: {}", sql);
        self.conn.query(&sql, &[]).await
    }
}

/// An [`Executor`] paired with the retry policy every read goes through
#[derive(Clone)]
pub struct QueryRunner {
    executor: Arc<dyn Executor>,
    retry: RetryConfig,
}

impl QueryRunner {
    /// Create a runner
    pub fn new(executor: Arc<dyn Executor>, retry: RetryConfig) -> Self {
        Self { executor, retry }
    }

    /// Retry policy
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run `query`, retrying transient faults with the same query
    pub async fn fetch(&self, query: &ExtractQuery) -> Result<Vec<Row>> {
        retry(&self.retry, || self.executor.fetch(query)).await
    }
}
