//! Entity kinds and stream keys
//!
//! The schema has one aggregate (`Filmwork`) and two related kinds that it
//! embeds (`Person`, `Genre`). Each independent watermark lineage is named by
//! a [`StreamKey`] derived from a kind and a [`StreamRole`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity stored in the movies schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Film work, the denormalized aggregate
    Filmwork,
    /// Person taking part in film works
    Person,
    /// Genre of film works
    Genre,
}

impl EntityKind {
    /// All kinds, in extraction order
    pub const ALL: [EntityKind; 3] = [Self::Filmwork, Self::Person, Self::Genre];

    /// Related kinds whose changes cascade into film works, in cascade order
    pub const CASCADE_SOURCES: [EntityKind; 2] = [Self::Person, Self::Genre];

    /// Stable lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filmwork => "filmwork",
            Self::Person => "person",
            Self::Genre => "genre",
        }
    }

    /// Table holding rows of this kind
    pub const fn table(self) -> &'static str {
        match self {
            Self::Filmwork => "film_work",
            Self::Person => "person",
            Self::Genre => "genre",
        }
    }

    /// Link table joining this kind to film works, with its foreign key column
    pub const fn filmwork_link(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Filmwork => None,
            Self::Person => Some(("person_film_work", "person_id")),
            Self::Genre => Some(("genre_film_work", "genre_id")),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filmwork" | "film_work" => Ok(Self::Filmwork),
            "person" => Ok(Self::Person),
            "genre" => Ok(Self::Genre),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// Role of a stream within the extraction pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    /// Direct changes of the kind itself
    Direct,
    /// Changed identifiers of a related kind (cascade stage A)
    Related,
    /// Film works referencing a batch of related identifiers (cascade stage B)
    Filmwork,
}

impl StreamRole {
    const fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Direct => None,
            Self::Related => Some("related"),
            Self::Filmwork => Some("filmwork"),
        }
    }
}

/// Name of one independent watermark lineage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    /// Derive the key for a kind and role
    pub fn new(kind: EntityKind, role: StreamRole) -> Self {
        match role.suffix() {
            Some(suffix) => Self(format!("{}_{}", kind.as_str(), suffix)),
            None => Self(kind.as_str().to_string()),
        }
    }

    /// Key of the direct-change stream of a kind
    pub fn direct(kind: EntityKind) -> Self {
        Self::new(kind, StreamRole::Direct)
    }

    /// Key of the changed-identifier stream of a related kind
    pub fn related(kind: EntityKind) -> Self {
        Self::new(kind, StreamRole::Related)
    }

    /// Key of the dependent film work stream of a related kind
    pub fn cascade(kind: EntityKind) -> Self {
        Self::new(kind, StreamRole::Filmwork)
    }

    /// Every key the pipeline uses
    pub fn all() -> Vec<Self> {
        let mut keys: Vec<Self> = EntityKind::ALL.into_iter().map(Self::direct).collect();
        for kind in EntityKind::CASCADE_SOURCES {
            keys.push(Self::related(kind));
            keys.push(Self::cascade(kind));
        }
        keys
    }

    /// Key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}
