//! Security utilities for SQL injection prevention in movies-rdbc.
//!
//! Queries are built by interpolating values into SQL text, so every
//! identifier and literal goes through one of these helpers first.

use std::borrow::Cow;

use crate::error::Error;

/// PostgreSQL truncates identifiers beyond `NAMEDATALEN - 1` bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Check that `name` can be used as a bare schema, table or column name.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit,
/// at most [`MAX_IDENTIFIER_LEN`] bytes.
///
/// ```
/// use movies_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("content").is_ok());
/// assert!(validate_sql_identifier("film_work").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE film_work--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("1st").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    let problem = if name.is_empty() {
        Some("is empty".to_string())
    } else if name.len() > MAX_IDENTIFIER_LEN {
        Some(format!("is longer than {} bytes", MAX_IDENTIFIER_LEN))
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        Some("starts with a digit".to_string())
    } else {
        name.chars()
            .find(|&c| !(c.is_ascii_alphanumeric() || c == '_'))
            .map(|c| format!("contains {:?}", c))
    };

    match problem {
        Some(problem) => Err(Error::config(format!(
            "invalid SQL identifier '{}': {}",
            name, problem
        ))),
        None => Ok(()),
    }
}

/// Double every single quote so `value` can sit inside `'...'`.
///
/// ```
/// use movies_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("drama"), "drama");
/// assert_eq!(escape_string_literal("Schindler's List"), "Schindler''s List");
/// ```
pub fn escape_string_literal(value: &str) -> Cow<'_, str> {
    if value.contains('\'') {
        Cow::Owned(value.replace('\'', "''"))
    } else {
        Cow::Borrowed(value)
    }
}
