//! SQL dialect abstraction for movies-rdbc
//!
//! Vendor-specific pieces of SQL text generation:
//! - Identifier quoting
//! - String, UUID and timestamp literals
//! - LIMIT syntax

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::security::escape_string_literal;

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Quote a string literal, escaping embedded quotes
    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", escape_string_literal(value))
    }

    /// Render a timestamp literal with microsecond precision
    fn timestamp_literal(&self, value: &DateTime<Utc>) -> String;

    /// Render a UUID literal
    fn uuid_literal(&self, value: &Uuid) -> String {
        self.quote_literal(&value.to_string())
    }

    /// Render a schema-qualified table name
    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!(
                "{}.{}",
                self.quote_identifier(s),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Get the LIMIT syntax
    fn limit_sql(&self, limit: u64) -> String;
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn timestamp_literal(&self, value: &DateTime<Utc>) -> String {
        format!(
            "{}::timestamptz",
            self.quote_literal(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
        )
    }

    fn uuid_literal(&self, value: &Uuid) -> String {
        format!("{}::uuid", self.quote_literal(&value.to_string()))
    }

    fn limit_sql(&self, limit: u64) -> String {
        format!(" LIMIT {}", limit)
    }
}
