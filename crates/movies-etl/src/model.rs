//! Output records handed to the search indexer
//!
//! A film work embeds the persons and genres linked to it, so its document
//! can be indexed without further lookups.

use chrono::{DateTime, Utc};
use movies_rdbc::Row;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::kind::EntityKind;
use crate::normalize::normalize;

/// A typed output record of one entity kind
pub trait Record: DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Kind the record is built from
    const KIND: EntityKind;

    /// Identifier of the record
    fn id(&self) -> Uuid;
}

/// Person taking part in a film work, with their role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmworkPerson {
    pub id: Uuid,
    pub name: String,
    pub role: String,
}

/// Genre of a film work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmworkGenre {
    pub id: Uuid,
    pub name: String,
}

/// Denormalized film work document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filmwork {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub imdb_rating: Option<f64>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub personas: Vec<FilmworkPerson>,
    #[serde(default)]
    pub genres: Vec<FilmworkGenre>,
}

impl Record for Filmwork {
    const KIND: EntityKind = EntityKind::Filmwork;

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Film work a person took part in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonFilm {
    pub id: Uuid,
    pub role: String,
}

/// Person document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub full_name: String,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub films: Vec<PersonFilm>,
}

impl Record for Person {
    const KIND: EntityKind = EntityKind::Person;

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Genre document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: Uuid,
    pub name: String,
    pub modified: DateTime<Utc>,
}

impl Record for Genre {
    const KIND: EntityKind = EntityKind::Genre;

    fn id(&self) -> Uuid {
        self.id
    }
}

/// A page of records of one kind
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// Film work documents
    Filmworks(Vec<Filmwork>),
    /// Person documents
    Persons(Vec<Person>),
    /// Genre documents
    Genres(Vec<Genre>),
}

impl Batch {
    /// Build the batch shape of `kind` from raw rows
    pub fn from_rows(kind: EntityKind, rows: Vec<Row>) -> Result<Self> {
        Ok(match kind {
            EntityKind::Filmwork => Self::Filmworks(normalize(rows)?),
            EntityKind::Person => Self::Persons(normalize(rows)?),
            EntityKind::Genre => Self::Genres(normalize(rows)?),
        })
    }

    /// Kind of the records in the batch
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Filmworks(_) => EntityKind::Filmwork,
            Self::Persons(_) => EntityKind::Person,
            Self::Genres(_) => EntityKind::Genre,
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        match self {
            Self::Filmworks(v) => v.len(),
            Self::Persons(v) => v.len(),
            Self::Genres(v) => v.len(),
        }
    }

    /// Whether the batch has no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records as `(id, document)` pairs ready for upsert
    pub fn documents(&self) -> Result<Vec<(Uuid, serde_json::Value)>> {
        fn docs<T: Record>(records: &[T]) -> Result<Vec<(Uuid, serde_json::Value)>> {
            records
                .iter()
                .map(|r| {
                    serde_json::to_value(r)
                        .map(|doc| (r.id(), doc))
                        .map_err(|e| EtlError::validation(T::KIND, e.to_string()))
                })
                .collect()
        }

        match self {
            Self::Filmworks(v) => docs(v),
            Self::Persons(v) => docs(v),
            Self::Genres(v) => docs(v),
        }
    }
}

impl From<Vec<Filmwork>> for Batch {
    fn from(value: Vec<Filmwork>) -> Self {
        Self::Filmworks(value)
    }
}

impl From<Vec<Person>> for Batch {
    fn from(value: Vec<Person>) -> Self {
        Self::Persons(value)
    }
}

impl From<Vec<Genre>> for Batch {
    fn from(value: Vec<Genre>) -> Self {
        Self::Genres(value)
    }
}
