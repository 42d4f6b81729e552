//! Chunked reader behaviour against the in-memory catalog

mod common;

use async_trait::async_trait;
use common::{ts, Catalog, RecordingStore};
use futures::StreamExt;
use movies_etl::prelude::*;
use movies_rdbc::{Row, Value};
use std::sync::Arc;
use uuid::Uuid;

fn genre_reader(catalog: Arc<Catalog>, store: Arc<dyn WatermarkStore>, chunk_size: u64) -> ChunkedReader {
    Extractor::new(catalog, store, chunk_size, RetryConfig::default())
        .unwrap()
        .direct(EntityKind::Genre)
}

async fn drain(reader: &mut ChunkedReader) -> Vec<usize> {
    let mut sizes = Vec::new();
    while let Some(page) = reader.next_page().await.unwrap() {
        sizes.push(page.len());
    }
    sizes
}

#[tokio::test]
async fn full_page_triggers_another_poll() {
    let catalog = Catalog::new();
    for i in 1..=4 {
        catalog.add_genre(&format!("genre-{i}"), ts(i));
    }
    let store = Arc::new(MemoryWatermarkStore::new());

    let mut reader = genre_reader(catalog.clone(), store.clone(), 2);
    assert_eq!(drain(&mut reader).await, vec![2, 2]);

    // Two full pages, then the empty page that proves exhaustion
    assert_eq!(catalog.query_count(), 3);
    assert_eq!(
        store.get(&StreamKey::direct(EntityKind::Genre)).await.unwrap(),
        ts(4)
    );
}

#[tokio::test]
async fn short_page_ends_stream_without_extra_query() {
    let catalog = Catalog::new();
    for i in 1..=3 {
        catalog.add_genre(&format!("genre-{i}"), ts(i));
    }
    let store = Arc::new(MemoryWatermarkStore::new());

    let mut reader = genre_reader(catalog.clone(), store, 2);
    assert_eq!(drain(&mut reader).await, vec![2, 1]);
    assert_eq!(catalog.query_count(), 2);

    assert!(reader.is_finished());
    assert!(reader.next_page().await.unwrap().is_none());
    assert_eq!(catalog.query_count(), 2);

    let stats = reader.stats();
    assert_eq!(stats.rows_seen, 3);
    assert_eq!(stats.pages, 2);
    assert_eq!(stats.queries, 2);
}

#[tokio::test]
async fn resumed_stream_yields_only_new_rows() {
    let catalog = Catalog::new();
    for i in 1..=5 {
        catalog.add_genre(&format!("genre-{i}"), ts(i));
    }
    let store: Arc<dyn WatermarkStore> = Arc::new(MemoryWatermarkStore::new());

    let mut first = genre_reader(catalog.clone(), store.clone(), 2);
    assert_eq!(drain(&mut first).await.iter().sum::<usize>(), 5);

    let mut replay = genre_reader(catalog.clone(), store.clone(), 2);
    assert!(drain(&mut replay).await.is_empty());

    let late = catalog.add_genre("late", ts(60));
    let mut resumed = genre_reader(catalog.clone(), store.clone(), 2);
    let page = resumed.next_page().await.unwrap().unwrap();
    assert_eq!(page.ids().unwrap(), vec![late]);
    assert_eq!(page.watermark(), ts(60));
    assert!(resumed.next_page().await.unwrap().is_none());
}

#[tokio::test]
async fn saved_watermarks_never_decrease() {
    let catalog = Catalog::new();
    for i in [3, 1, 7, 5, 9, 2, 8] {
        catalog.add_genre(&format!("genre-{i}"), ts(i));
    }
    let store = RecordingStore::new();

    let mut reader = genre_reader(catalog.clone(), store.clone(), 2);
    drain(&mut reader).await;

    let saves = store.saves_for("genre");
    assert_eq!(saves.len(), 4);
    assert!(saves.windows(2).all(|w| w[0] <= w[1]), "{saves:?}");
    assert_eq!(saves.last().copied(), Some(ts(9)));
    assert!(store.resets().is_empty());
}

#[tokio::test]
async fn reset_on_exhaustion_puts_watermark_back() {
    let catalog = Catalog::new();
    catalog.add_genre("drama", ts(1));
    let store = RecordingStore::new();

    let mut reader = genre_reader(catalog.clone(), store.clone(), 10).with_reset_on_exhaustion();
    assert_eq!(drain(&mut reader).await, vec![1]);

    assert_eq!(store.resets(), vec!["genre".to_string()]);
    assert_eq!(
        store.get(&StreamKey::direct(EntityKind::Genre)).await.unwrap(),
        INITIAL_WATERMARK
    );
}

/// Answers every query with the same row, whatever the watermark
struct StuckExecutor {
    id: Uuid,
}

#[async_trait]
impl Executor for StuckExecutor {
    async fn fetch(&self, _query: &ExtractQuery) -> movies_rdbc::Result<Vec<Row>> {
        Ok(vec![Row::from_pairs([
            ("id", Value::Uuid(self.id)),
            ("modified", Value::Timestamp(ts(1))),
        ])])
    }
}

#[tokio::test]
async fn stuck_marker_is_rejected() {
    let executor = Arc::new(StuckExecutor { id: Uuid::new_v4() });
    let store = Arc::new(MemoryWatermarkStore::new());
    let extractor = Extractor::new(executor, store, 1, RetryConfig::default()).unwrap();

    let mut pages = extractor.direct(EntityKind::Genre).into_stream();
    assert!(pages.next().await.unwrap().is_ok());

    match pages.next().await.unwrap() {
        Err(EtlError::WatermarkRegression {
            key,
            watermark,
            marker,
        }) => {
            assert_eq!(key.as_str(), "genre");
            assert_eq!(watermark, ts(1));
            assert_eq!(marker, ts(1));
        }
        other => panic!("unexpected item: {other:?}"),
    }
    assert!(pages.next().await.is_none());
}

#[tokio::test]
async fn stream_ends_after_error() {
    let catalog = Catalog::new();
    catalog.add_genre("drama", ts(1));
    catalog.fail_next(1, || movies_rdbc::Error::query("relation \"genre\" does not exist"));
    let store = Arc::new(MemoryWatermarkStore::new());

    let results: Vec<_> = genre_reader(catalog.clone(), store.clone(), 10)
        .into_stream()
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(EtlError::Database(_))));
    assert_eq!(catalog.query_count(), 1);
    assert!(store.snapshot().await.unwrap().is_empty());
}
