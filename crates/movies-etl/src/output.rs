//! NDJSON output of extracted batches
//!
//! One line per record: `{"kind": "...", "id": "...", "document": {...}}`.

use serde::Serialize;
use std::io::Write;
use uuid::Uuid;

use crate::error::Result;
use crate::kind::EntityKind;
use crate::model::Batch;

#[derive(Serialize)]
struct Line<'a> {
    kind: EntityKind,
    id: Uuid,
    document: &'a serde_json::Value,
}

/// Write every record of `batch` as one JSON line, returning the line count
pub fn write_ndjson<W: Write>(out: &mut W, batch: &Batch) -> Result<usize> {
    let kind = batch.kind();
    let documents = batch.documents()?;
    for (id, document) in &documents {
        let line = Line {
            kind,
            id: *id,
            document,
        };
        serde_json::to_writer(&mut *out, &line).map_err(std::io::Error::from)?;
        out.write_all(b"\n")?;
    }
    Ok(documents.len())
}
