//! Extraction queries and their SQL rendering
//!
//! The core describes every read as an [`ExtractQuery`]. [`QueryBuilder`]
//! turns one into SQL text, interpolating identifiers quoted by the dialect
//! and literals escaped by it. The connection only ever receives finished SQL.

use chrono::{DateTime, Utc};
use movies_rdbc::dialect::{PostgresDialect, SqlDialect};
use movies_rdbc::security::validate_sql_identifier;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::kind::EntityKind;

/// Change marker column present on every table
pub const MARKER_COLUMN: &str = "modified";

/// Identifier column present on every table
pub const ID_COLUMN: &str = "id";

/// A read issued by the extraction core
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractQuery {
    /// Full rows of `kind` changed after `since`, marker ascending
    Changed {
        kind: EntityKind,
        since: DateTime<Utc>,
        limit: u64,
    },
    /// `(id, modified)` of `kind` changed after `since`, marker ascending
    ChangedIds {
        kind: EntityKind,
        since: DateTime<Utc>,
        limit: u64,
    },
    /// `(id, modified)` of film works linked to any of `ids` of kind `related`
    /// and changed after `since`
    DependentIds {
        related: EntityKind,
        ids: Vec<Uuid>,
        since: DateTime<Utc>,
        limit: u64,
    },
    /// Full rows of `kind` with the given identifiers
    ByIds { kind: EntityKind, ids: Vec<Uuid> },
}

impl ExtractQuery {
    /// Kind of the rows the query returns
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Changed { kind, .. } | Self::ChangedIds { kind, .. } | Self::ByIds { kind, .. } => {
                *kind
            }
            Self::DependentIds { .. } => EntityKind::Filmwork,
        }
    }

    /// Page size bound, if the query is paginated
    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Changed { limit, .. }
            | Self::ChangedIds { limit, .. }
            | Self::DependentIds { limit, .. } => Some(*limit),
            Self::ByIds { .. } => None,
        }
    }

    /// Lower marker bound (exclusive), if the query is paginated
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Changed { since, .. }
            | Self::ChangedIds { since, .. }
            | Self::DependentIds { since, .. } => Some(*since),
            Self::ByIds { .. } => None,
        }
    }
}

impl fmt::Display for ExtractQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changed { kind, since, limit } => {
                write!(f, "changed {} since {} limit {}", kind, since, limit)
            }
            Self::ChangedIds { kind, since, limit } => {
                write!(f, "changed {} ids since {} limit {}", kind, since, limit)
            }
            Self::DependentIds {
                related,
                ids,
                since,
                limit,
            } => write!(
                f,
                "filmworks of {} {}s since {} limit {}",
                ids.len(),
                related,
                since,
                limit
            ),
            Self::ByIds { kind, ids } => write!(f, "{} {}s by id", ids.len(), kind),
        }
    }
}

/// Renders [`ExtractQuery`] values to SQL for one schema
#[derive(Clone)]
pub struct QueryBuilder {
    schema: String,
    dialect: Arc<dyn SqlDialect>,
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("schema", &self.schema)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

impl QueryBuilder {
    /// Create a builder for `schema`, rejecting unsafe schema names
    pub fn new(schema: impl Into<String>, dialect: Arc<dyn SqlDialect>) -> movies_rdbc::Result<Self> {
        let schema = schema.into();
        validate_sql_identifier(&schema)?;
        Ok(Self { schema, dialect })
    }

    /// PostgreSQL builder for `schema`
    pub fn postgres(schema: impl Into<String>) -> movies_rdbc::Result<Self> {
        Self::new(schema, Arc::new(PostgresDialect))
    }

    /// Schema the queries target
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Render a query to SQL text
    pub fn build(&self, query: &ExtractQuery) -> String {
        match query {
            ExtractQuery::Changed { kind, since, limit } => {
                let filter = self.after(*kind, since);
                self.select_records(*kind, &filter, Some(*limit))
            }
            ExtractQuery::ByIds { kind, ids } => {
                let filter = self.id_in(&self.column(alias(*kind), ID_COLUMN), ids);
                self.select_records(*kind, &filter, None)
            }
            ExtractQuery::ChangedIds { kind, since, limit } => {
                let a = alias(*kind);
                format!(
                    "SELECT DISTINCT {}, {} FROM {} {} WHERE {} ORDER BY {} ASC{}",
                    self.column(a, ID_COLUMN),
                    self.column(a, MARKER_COLUMN),
                    self.table(kind.table()),
                    a,
                    self.after(*kind, since),
                    self.column(a, MARKER_COLUMN),
                    self.dialect.limit_sql(*limit)
                )
            }
            ExtractQuery::DependentIds {
                related,
                ids,
                since,
                limit,
            } => self.select_dependent_ids(*related, ids, since, *limit),
        }
    }

    fn select_dependent_ids(
        &self,
        related: EntityKind,
        ids: &[Uuid],
        since: &DateTime<Utc>,
        limit: u64,
    ) -> String {
        let fw = alias(EntityKind::Filmwork);
        // Filmwork has no link to itself; the filter then matches nothing
        let (link_table, link_filter) = match related.filmwork_link() {
            Some((table, fk)) => (table, self.id_in(&self.column("l", fk), ids)),
            None => (EntityKind::Filmwork.table(), "FALSE".to_string()),
        };

        format!(
            "SELECT DISTINCT {}, {} FROM {} {} JOIN {} l ON {} = {} WHERE {} AND {} ORDER BY {} ASC{}",
            self.column(fw, ID_COLUMN),
            self.column(fw, MARKER_COLUMN),
            self.table(EntityKind::Filmwork.table()),
            fw,
            self.table(link_table),
            self.column("l", "film_work_id"),
            self.column(fw, ID_COLUMN),
            link_filter,
            self.after(EntityKind::Filmwork, since),
            self.column(fw, MARKER_COLUMN),
            self.dialect.limit_sql(limit)
        )
    }

    fn select_records(&self, kind: EntityKind, filter: &str, limit: Option<u64>) -> String {
        let a = alias(kind);
        let limit = limit.map(|n| self.dialect.limit_sql(n)).unwrap_or_default();
        let order = format!(" ORDER BY {} ASC", self.column(a, MARKER_COLUMN));

        match kind {
            EntityKind::Filmwork => {
                let personas = self.json_list(
                    &[
                        ("id", self.column("p", "id")),
                        ("name", self.column("p", "full_name")),
                        ("role", self.column("pfw", "role")),
                    ],
                    &self.column("p", "id"),
                );
                let genres = self.json_list(
                    &[
                        ("id", self.column("g", "id")),
                        ("name", self.column("g", "name")),
                    ],
                    &self.column("g", "id"),
                );
                format!(
                    "SELECT {}, {}, {}, {} AS {}, {}, {} AS {}, {} AS {} \
                     FROM {} {} \
                     LEFT JOIN {} pfw ON {} = {} \
                     LEFT JOIN {} p ON {} = {} \
                     LEFT JOIN {} gfw ON {} = {} \
                     LEFT JOIN {} g ON {} = {} \
                     WHERE {} GROUP BY {}{}{}",
                    self.column(a, "id"),
                    self.column(a, "title"),
                    self.column(a, "description"),
                    self.column(a, "rating"),
                    self.dialect.quote_identifier("imdb_rating"),
                    self.column(a, MARKER_COLUMN),
                    personas,
                    self.dialect.quote_identifier("personas"),
                    genres,
                    self.dialect.quote_identifier("genres"),
                    self.table(EntityKind::Filmwork.table()),
                    a,
                    self.table("person_film_work"),
                    self.column("pfw", "film_work_id"),
                    self.column(a, "id"),
                    self.table(EntityKind::Person.table()),
                    self.column("p", "id"),
                    self.column("pfw", "person_id"),
                    self.table("genre_film_work"),
                    self.column("gfw", "film_work_id"),
                    self.column(a, "id"),
                    self.table(EntityKind::Genre.table()),
                    self.column("g", "id"),
                    self.column("gfw", "genre_id"),
                    filter,
                    self.column(a, "id"),
                    order,
                    limit
                )
            }
            EntityKind::Person => {
                let films = self.json_list(
                    &[
                        ("id", self.column("pfw", "film_work_id")),
                        ("role", self.column("pfw", "role")),
                    ],
                    &self.column("pfw", "film_work_id"),
                );
                format!(
                    "SELECT {}, {}, {}, {} AS {} FROM {} {} \
                     LEFT JOIN {} pfw ON {} = {} \
                     WHERE {} GROUP BY {}{}{}",
                    self.column(a, "id"),
                    self.column(a, "full_name"),
                    self.column(a, MARKER_COLUMN),
                    films,
                    self.dialect.quote_identifier("films"),
                    self.table(EntityKind::Person.table()),
                    a,
                    self.table("person_film_work"),
                    self.column("pfw", "person_id"),
                    self.column(a, "id"),
                    filter,
                    self.column(a, "id"),
                    order,
                    limit
                )
            }
            EntityKind::Genre => format!(
                "SELECT {}, {}, {} FROM {} {} WHERE {}{}{}",
                self.column(a, "id"),
                self.column(a, "name"),
                self.column(a, MARKER_COLUMN),
                self.table(EntityKind::Genre.table()),
                a,
                filter,
                order,
                limit
            ),
        }
    }

    /// `COALESCE(json_agg(DISTINCT jsonb_build_object(..)) FILTER (..), '[]')`
    fn json_list(&self, fields: &[(&str, String)], not_null: &str) -> String {
        let pairs: Vec<String> = fields
            .iter()
            .map(|(name, expr)| format!("{}, {}", self.dialect.quote_literal(name), expr))
            .collect();
        format!(
            "COALESCE(json_agg(DISTINCT jsonb_build_object({})) FILTER (WHERE {} IS NOT NULL), '[]')",
            pairs.join(", "),
            not_null
        )
    }

    fn after(&self, kind: EntityKind, since: &DateTime<Utc>) -> String {
        format!(
            "{} > {}",
            self.column(alias(kind), MARKER_COLUMN),
            self.dialect.timestamp_literal(since)
        )
    }

    fn id_in(&self, column: &str, ids: &[Uuid]) -> String {
        if ids.is_empty() {
            return "FALSE".to_string();
        }
        let list: Vec<String> = ids.iter().map(|id| self.dialect.uuid_literal(id)).collect();
        format!("{} IN ({})", column, list.join(", "))
    }

    fn table(&self, table: &str) -> String {
        self.dialect.qualified_table(Some(&self.schema), table)
    }

    fn column(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", alias, self.dialect.quote_identifier(column))
    }
}

const fn alias(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Filmwork => "fw",
        EntityKind::Person => "p",
        EntityKind::Genre => "g",
    }
}
