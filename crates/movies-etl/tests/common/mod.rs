//! Shared fixtures: an in-memory movies catalog that answers extraction
//! queries, and a watermark store that records every write.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use movies_etl::executor::Executor;
use movies_etl::kind::{EntityKind, StreamKey};
use movies_etl::query::ExtractQuery;
use movies_etl::watermark::{MemoryWatermarkStore, WatermarkStore};
use movies_etl::Result;
use movies_rdbc::{Row, Value};
use serde_json::json;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// `2024-01-01T00:00:00Z` plus `minutes`
pub fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

#[derive(Debug, Clone)]
struct FilmworkRow {
    id: Uuid,
    title: Option<String>,
    rating: Option<f64>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PersonRow {
    id: Uuid,
    full_name: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct GenreRow {
    id: Uuid,
    name: String,
    modified: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    filmworks: Vec<FilmworkRow>,
    persons: Vec<PersonRow>,
    genres: Vec<GenreRow>,
    person_links: Vec<(Uuid, Uuid, String)>,
    genre_links: Vec<(Uuid, Uuid)>,
    failures: VecDeque<movies_rdbc::Error>,
    queries: Vec<ExtractQuery>,
}

/// In-memory stand-in for the movies schema
#[derive(Default)]
pub struct Catalog {
    tables: Mutex<Tables>,
}

impl Catalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_filmwork(&self, title: &str, modified: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().unwrap().filmworks.push(FilmworkRow {
            id,
            title: Some(title.to_string()),
            rating: Some(7.5),
            modified,
        });
        id
    }

    pub fn add_person(&self, full_name: &str, modified: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().unwrap().persons.push(PersonRow {
            id,
            full_name: full_name.to_string(),
            modified,
        });
        id
    }

    pub fn add_genre(&self, name: &str, modified: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().unwrap().genres.push(GenreRow {
            id,
            name: name.to_string(),
            modified,
        });
        id
    }

    pub fn link_person(&self, person: Uuid, filmwork: Uuid, role: &str) {
        self.tables
            .lock()
            .unwrap()
            .person_links
            .push((person, filmwork, role.to_string()));
    }

    pub fn link_genre(&self, genre: Uuid, filmwork: Uuid) {
        self.tables.lock().unwrap().genre_links.push((genre, filmwork));
    }

    /// Set the change marker of any row
    pub fn touch(&self, id: Uuid, modified: DateTime<Utc>) {
        let mut t = self.tables.lock().unwrap();
        for row in t.filmworks.iter_mut().filter(|r| r.id == id) {
            row.modified = modified;
        }
        for row in t.persons.iter_mut().filter(|r| r.id == id) {
            row.modified = modified;
        }
        for row in t.genres.iter_mut().filter(|r| r.id == id) {
            row.modified = modified;
        }
    }

    /// Make a film work violate the record shape
    pub fn drop_title(&self, id: Uuid) {
        let mut t = self.tables.lock().unwrap();
        for row in t.filmworks.iter_mut().filter(|r| r.id == id) {
            row.title = None;
        }
    }

    /// Fail the next `times` queries with `make()`
    pub fn fail_next(&self, times: usize, make: impl Fn() -> movies_rdbc::Error) {
        let mut t = self.tables.lock().unwrap();
        for _ in 0..times {
            t.failures.push_back(make());
        }
    }

    pub fn queries(&self) -> Vec<ExtractQuery> {
        self.tables.lock().unwrap().queries.clone()
    }

    pub fn query_count(&self) -> usize {
        self.tables.lock().unwrap().queries.len()
    }

    pub fn clear_queries(&self) {
        self.tables.lock().unwrap().queries.clear();
    }
}

fn id_row(id: Uuid, modified: DateTime<Utc>) -> Row {
    Row::from_pairs([("id", Value::Uuid(id)), ("modified", Value::Timestamp(modified))])
}

fn page<T: Clone>(
    mut rows: Vec<T>,
    modified: impl Fn(&T) -> DateTime<Utc>,
    since: Option<DateTime<Utc>>,
    limit: Option<u64>,
) -> Vec<T> {
    if let Some(since) = since {
        rows.retain(|r| modified(r) > since);
    }
    rows.sort_by_key(|r| modified(r));
    if let Some(limit) = limit {
        rows.truncate(limit as usize);
    }
    rows
}

impl Tables {
    fn filmwork_record(&self, fw: &FilmworkRow) -> Row {
        let personas: Vec<_> = self
            .person_links
            .iter()
            .filter(|(_, f, _)| *f == fw.id)
            .filter_map(|(p, _, role)| {
                self.persons
                    .iter()
                    .find(|row| row.id == *p)
                    .map(|row| json!({"id": row.id, "name": row.full_name, "role": role}))
            })
            .collect();
        let genres: Vec<_> = self
            .genre_links
            .iter()
            .filter(|(_, f)| *f == fw.id)
            .filter_map(|(g, _)| {
                self.genres
                    .iter()
                    .find(|row| row.id == *g)
                    .map(|row| json!({"id": row.id, "name": row.name}))
            })
            .collect();

        Row::from_pairs([
            ("id", Value::Uuid(fw.id)),
            ("title", Value::from(fw.title.clone())),
            ("description", Value::Null),
            ("imdb_rating", Value::from(fw.rating)),
            ("modified", Value::Timestamp(fw.modified)),
            ("personas", Value::Json(json!(personas))),
            ("genres", Value::Json(json!(genres))),
        ])
    }

    fn person_record(&self, p: &PersonRow) -> Row {
        let films: Vec<_> = self
            .person_links
            .iter()
            .filter(|(person, _, _)| *person == p.id)
            .map(|(_, fw, role)| json!({"id": fw, "role": role}))
            .collect();
        Row::from_pairs([
            ("id", Value::Uuid(p.id)),
            ("full_name", Value::from(p.full_name.as_str())),
            ("modified", Value::Timestamp(p.modified)),
            ("films", Value::Json(json!(films))),
        ])
    }

    fn genre_record(&self, g: &GenreRow) -> Row {
        Row::from_pairs([
            ("id", Value::Uuid(g.id)),
            ("name", Value::from(g.name.as_str())),
            ("modified", Value::Timestamp(g.modified)),
        ])
    }

    fn records(
        &self,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
        limit: Option<u64>,
        ids: Option<&[Uuid]>,
    ) -> Vec<Row> {
        let wanted = |id: &Uuid| ids.map_or(true, |ids| ids.contains(id));
        match kind {
            EntityKind::Filmwork => {
                let rows: Vec<_> = self.filmworks.iter().filter(|r| wanted(&r.id)).cloned().collect();
                page(rows, |r| r.modified, since, limit)
                    .iter()
                    .map(|r| self.filmwork_record(r))
                    .collect()
            }
            EntityKind::Person => {
                let rows: Vec<_> = self.persons.iter().filter(|r| wanted(&r.id)).cloned().collect();
                page(rows, |r| r.modified, since, limit)
                    .iter()
                    .map(|r| self.person_record(r))
                    .collect()
            }
            EntityKind::Genre => {
                let rows: Vec<_> = self.genres.iter().filter(|r| wanted(&r.id)).cloned().collect();
                page(rows, |r| r.modified, since, limit)
                    .iter()
                    .map(|r| self.genre_record(r))
                    .collect()
            }
        }
    }

    fn changed_ids(&self, kind: EntityKind, since: DateTime<Utc>, limit: u64) -> Vec<Row> {
        let rows: Vec<(Uuid, DateTime<Utc>)> = match kind {
            EntityKind::Filmwork => self.filmworks.iter().map(|r| (r.id, r.modified)).collect(),
            EntityKind::Person => self.persons.iter().map(|r| (r.id, r.modified)).collect(),
            EntityKind::Genre => self.genres.iter().map(|r| (r.id, r.modified)).collect(),
        };
        page(rows, |r| r.1, Some(since), Some(limit))
            .into_iter()
            .map(|(id, m)| id_row(id, m))
            .collect()
    }

    fn dependent_ids(
        &self,
        related: EntityKind,
        ids: &[Uuid],
        since: DateTime<Utc>,
        limit: u64,
    ) -> Vec<Row> {
        let linked: HashSet<Uuid> = match related {
            EntityKind::Person => self
                .person_links
                .iter()
                .filter(|(p, _, _)| ids.contains(p))
                .map(|(_, fw, _)| *fw)
                .collect(),
            EntityKind::Genre => self
                .genre_links
                .iter()
                .filter(|(g, _)| ids.contains(g))
                .map(|(_, fw)| *fw)
                .collect(),
            EntityKind::Filmwork => HashSet::new(),
        };
        let rows: Vec<(Uuid, DateTime<Utc>)> = self
            .filmworks
            .iter()
            .filter(|r| linked.contains(&r.id))
            .map(|r| (r.id, r.modified))
            .collect();
        page(rows, |r| r.1, Some(since), Some(limit))
            .into_iter()
            .map(|(id, m)| id_row(id, m))
            .collect()
    }
}

#[async_trait]
impl Executor for Catalog {
    async fn fetch(&self, query: &ExtractQuery) -> movies_rdbc::Result<Vec<Row>> {
        let mut t = self.tables.lock().unwrap();
        t.queries.push(query.clone());
        if let Some(err) = t.failures.pop_front() {
            return Err(err);
        }

        Ok(match query {
            ExtractQuery::Changed { kind, since, limit } => {
                t.records(*kind, Some(*since), Some(*limit), None)
            }
            ExtractQuery::ByIds { kind, ids } => t.records(*kind, None, None, Some(ids)),
            ExtractQuery::ChangedIds { kind, since, limit } => t.changed_ids(*kind, *since, *limit),
            ExtractQuery::DependentIds {
                related,
                ids,
                since,
                limit,
            } => t.dependent_ids(*related, ids, *since, *limit),
        })
    }
}

/// Watermark store recording every save and reset, in order
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryWatermarkStore,
    saves: Mutex<Vec<(String, DateTime<Utc>)>>,
    resets: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn saves_for(&self, key: &str) -> Vec<DateTime<Utc>> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, m)| *m)
            .collect()
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().unwrap().clone()
    }
}

#[async_trait]
impl WatermarkStore for RecordingStore {
    async fn get(&self, key: &StreamKey) -> Result<DateTime<Utc>> {
        self.inner.get(key).await
    }

    async fn save(&self, key: &StreamKey, marker: DateTime<Utc>) -> Result<()> {
        self.saves
            .lock()
            .unwrap()
            .push((key.as_str().to_string(), marker));
        self.inner.save(key, marker).await
    }

    async fn reset(&self, key: &StreamKey) -> Result<()> {
        self.resets.lock().unwrap().push(key.as_str().to_string());
        self.inner.reset(key).await
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        self.inner.snapshot().await
    }
}
