use super::*;
use tempfile::TempDir;

async fn create_test_store(write_batch_size: usize) -> (VectorStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::open_at(temp_dir.path().join("vectors"), "test_kb", write_batch_size)
        .await
        .expect("should open vector store");
    (store, temp_dir)
}

fn record(source: &str, chunk_index: u32, vector: Vec<f32>, content: &str) -> EmbeddingRecord {
    let mut extra = BTreeMap::new();
    extra.insert("format".to_string(), "text".to_string());
    EmbeddingRecord {
        id: format!("{}_{}", source, chunk_index),
        vector,
        content: content.to_string(),
        metadata: ChunkMetadata {
            source: source.to_string(),
            file_path: format!("/corpus/{}", source),
            chunk_index,
            extra,
        },
    }
}

fn sample_records() -> Vec<EmbeddingRecord> {
    vec![
        record("a.txt", 0, vec![1.0, 0.0, 0.0], "Deadline is March 1"),
        record("b.txt", 0, vec![0.0, 1.0, 0.0], "Weather is sunny"),
        record("c.md", 0, vec![0.6, 0.8, 0.0], "Apply early"),
    ]
}

#[tokio::test]
async fn empty_store_behaviour() {
    let (store, _temp_dir) = create_test_store(50).await;

    assert_eq!(store.count().await.expect("should count"), 0);
    assert!(
        store
            .search(&[1.0, 0.0, 0.0], 5)
            .await
            .expect("should search")
            .is_empty()
    );
    assert!(store.list_sources().await.expect("should list").is_empty());
    assert!(store.get("a.txt_0").await.expect("should get").is_none());
    assert_eq!(store.upsert(Vec::new()).await.expect("should upsert"), 0);
}

#[tokio::test]
async fn upsert_then_get_and_count() {
    let (store, _temp_dir) = create_test_store(50).await;

    let written = store
        .upsert(sample_records())
        .await
        .expect("should upsert records");
    assert_eq!(written, 3);
    assert_eq!(store.count().await.expect("should count"), 3);

    let fetched = store
        .get("a.txt_0")
        .await
        .expect("should get record")
        .expect("record should exist");
    assert_eq!(fetched, sample_records()[0]);
}

#[tokio::test]
async fn upsert_replaces_records_with_same_id() {
    let (store, _temp_dir) = create_test_store(50).await;
    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");

    let replacement = record("a.txt", 0, vec![0.0, 0.0, 1.0], "Deadline moved to April 2");
    store
        .upsert(vec![replacement.clone()])
        .await
        .expect("should upsert replacement");

    assert_eq!(store.count().await.expect("should count"), 3);
    let fetched = store
        .get("a.txt_0")
        .await
        .expect("should get record")
        .expect("record should exist");
    assert_eq!(fetched.content, "Deadline moved to April 2");
    assert_eq!(fetched.vector, vec![0.0, 0.0, 1.0]);

    // Re-upserting the full set is idempotent
    store
        .upsert(sample_records())
        .await
        .expect("should upsert again");
    assert_eq!(store.count().await.expect("should count"), 3);
}

#[tokio::test]
async fn duplicate_ids_in_one_call_keep_the_last() {
    let (store, _temp_dir) = create_test_store(50).await;

    let written = store
        .upsert(vec![
            record("a.txt", 0, vec![1.0, 0.0], "first"),
            record("a.txt", 1, vec![0.0, 1.0], "other"),
            record("a.txt", 0, vec![1.0, 1.0], "second"),
        ])
        .await
        .expect("should upsert");

    assert_eq!(written, 2);
    assert_eq!(store.count().await.expect("should count"), 2);
    let fetched = store
        .get("a.txt_0")
        .await
        .expect("should get")
        .expect("record should exist");
    assert_eq!(fetched.content, "second");
}

#[tokio::test]
async fn writes_are_batched_transparently() {
    let (store, _temp_dir) = create_test_store(2).await;

    let records: Vec<EmbeddingRecord> = (0..5)
        .map(|i| record("big.txt", i, vec![1.0, i as f32], "chunk"))
        .collect();
    let written = store.upsert(records).await.expect("should upsert");

    assert_eq!(written, 5);
    assert_eq!(store.count().await.expect("should count"), 5);
}

#[tokio::test]
async fn search_ranks_by_cosine_distance() {
    let (store, _temp_dir) = create_test_store(50).await;
    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");

    let results = store
        .search(&[1.0, 0.0, 0.0], 2)
        .await
        .expect("should search");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].metadata.source, "a.txt");
    assert_eq!(results[1].metadata.source, "c.md");
    assert!(results[0].distance.abs() < 1e-4);
    assert!((results[1].distance - 0.4).abs() < 1e-4);
    for result in &results {
        assert!((result.score - (1.0 - result.distance)).abs() < 1e-6);
    }
}

#[tokio::test]
async fn search_returns_everything_when_k_exceeds_size() {
    let (store, _temp_dir) = create_test_store(50).await;
    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");

    let results = store
        .search(&[0.0, 1.0, 0.0], 10)
        .await
        .expect("should search");

    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    let sources: Vec<&str> = results
        .iter()
        .map(|r| r.metadata.source.as_str())
        .collect();
    assert_eq!(sources, vec!["b.txt", "c.md", "a.txt"]);

    assert!(
        store
            .search(&[0.0, 1.0, 0.0], 0)
            .await
            .expect("should search")
            .is_empty()
    );
}

#[tokio::test]
async fn query_with_wrong_dimension_is_rejected() {
    let (store, _temp_dir) = create_test_store(50).await;
    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");

    let result = store.search(&[1.0, 0.0], 3).await;
    assert!(matches!(result, Err(RagError::Database(_))));
}

#[tokio::test]
async fn mixed_dimensions_fail_with_index_write() {
    let (store, _temp_dir) = create_test_store(2).await;
    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");

    let result = store
        .upsert(vec![record("d.txt", 0, vec![1.0, 0.0], "two dims")])
        .await;
    assert!(matches!(result, Err(RagError::IndexWrite { batch: 0, .. })));

    let result = store
        .upsert(vec![
            record("e.txt", 0, vec![1.0, 0.0, 0.0], "ok"),
            record("e.txt", 1, vec![1.0, 0.0, 0.0], "ok"),
            record("e.txt", 2, vec![1.0, 0.0], "bad"),
        ])
        .await;
    assert!(matches!(result, Err(RagError::IndexWrite { batch: 1, .. })));
    assert_eq!(store.count().await.expect("should count"), 3);
}

#[tokio::test]
async fn delete_single_record() {
    let (store, _temp_dir) = create_test_store(50).await;
    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");

    store
        .delete(DeleteTarget::Id("b.txt_0".to_string()))
        .await
        .expect("should delete record");

    assert_eq!(store.count().await.expect("should count"), 2);
    assert!(store.get("b.txt_0").await.expect("should get").is_none());

    // Unknown ids are ignored
    store
        .delete(DeleteTarget::Id("it's missing".to_string()))
        .await
        .expect("should ignore unknown id");
    assert_eq!(store.count().await.expect("should count"), 2);
}

#[tokio::test]
async fn delete_all_drops_collection() {
    let (store, _temp_dir) = create_test_store(50).await;

    store
        .delete(DeleteTarget::All)
        .await
        .expect("deleting a missing collection should be a no-op");

    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");
    store
        .delete(DeleteTarget::All)
        .await
        .expect("should drop collection");

    assert_eq!(store.count().await.expect("should count"), 0);
    assert!(store.list_sources().await.expect("should list").is_empty());

    // A fresh collection may use another dimension
    store
        .upsert(vec![record("a.txt", 0, vec![1.0, 0.0], "again")])
        .await
        .expect("should recreate collection");
    assert_eq!(store.count().await.expect("should count"), 1);
}

#[tokio::test]
async fn list_sources_is_sorted_and_unique() {
    let (store, _temp_dir) = create_test_store(50).await;
    store
        .upsert(vec![
            record("z.pdf", 0, vec![1.0, 0.0], "z0"),
            record("a.txt", 0, vec![0.0, 1.0], "a0"),
            record("z.pdf", 1, vec![1.0, 1.0], "z1"),
            record("m.md", 0, vec![1.0, 0.5], "m0"),
        ])
        .await
        .expect("should upsert records");

    let sources = store.list_sources().await.expect("should list sources");
    assert_eq!(sources, vec!["a.txt", "m.md", "z.pdf"]);
}

#[tokio::test]
async fn stats_and_persistence() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = temp_dir.path().join("vectors");

    {
        let store = VectorStore::open_at(&location, "handbook", 50)
            .await
            .expect("should open store");
        store
            .upsert(sample_records())
            .await
            .expect("should upsert records");
    }

    let reopened = VectorStore::open_at(&location, "handbook", 50)
        .await
        .expect("should reopen store");
    let stats = reopened.stats().await.expect("should get stats");

    assert_eq!(
        stats,
        StoreStats {
            count: 3,
            name: "handbook".to_string(),
            location: location.clone(),
        }
    );
}

#[tokio::test]
async fn concurrent_searches_share_the_store() {
    let (store, _temp_dir) = create_test_store(50).await;
    store
        .upsert(sample_records())
        .await
        .expect("should upsert records");
    let store = Arc::new(store);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.search(&[1.0, 0.0, 0.0], 1).await })
        })
        .collect();

    for handle in handles {
        let results = handle
            .await
            .expect("task should finish")
            .expect("should search");
        assert_eq!(results[0].metadata.source, "a.txt");
    }
}
