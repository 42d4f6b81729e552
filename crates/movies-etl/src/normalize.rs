//! Normalizer and record fetcher
//!
//! Rows are turned into JSON objects and deserialized, so a missing column or
//! an uncoercible value surfaces as a validation error naming the kind and
//! the row. A page is converted all or nothing.

use movies_rdbc::Row;
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::executor::QueryRunner;
use crate::model::Record;
use crate::query::ExtractQuery;

/// Convert raw rows into records, failing on the first bad row
pub fn normalize<T: Record>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            serde_json::from_value(row.to_json_object())
                .map_err(|e| EtlError::validation(T::KIND, format!("row {}: {}", idx, e)))
        })
        .collect()
}

/// Fetch and normalize the records with the given identifiers.
///
/// One query, no marker filter and no pagination: the identifier set is
/// already bounded by the caller. An empty set returns without querying.
pub async fn fetch_by_ids<T: Record>(runner: &QueryRunner, ids: &[Uuid]) -> Result<Vec<T>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = runner
        .fetch(&ExtractQuery::ByIds {
            kind: T::KIND,
            ids: ids.to_vec(),
        })
        .await?;
    normalize(rows)
}
