use super::*;
use crate::chunking::ChunkingConfig;
use crate::config::{ChatConfig, OllamaConfig, ServerConfig};
use tempfile::TempDir;

fn test_config(temp_dir: &TempDir) -> Config {
    Config {
        ollama: OllamaConfig::default(),
        chunking: ChunkingConfig::default(),
        chat: ChatConfig::default(),
        server: ServerConfig::default(),
        base_dir: temp_dir.path().to_path_buf(),
    }
}

fn record(id: &str, vector: Vec<f32>, source: &str, content: &str, chunk_index: u32) -> ChunkRecord {
    ChunkRecord {
        id: id.to_string(),
        vector,
        source: source.to_string(),
        content: content.to_string(),
        chunk_index,
        created_at: "2026-01-01T00:00:00+00:00".to_string(),
    }
}

#[tokio::test]
async fn open_existing_returns_none_before_first_upload() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);

    let index = VectorIndex::open_existing(&config)
        .await
        .expect("open should succeed");

    assert!(index.is_none());
}

#[tokio::test]
async fn create_append_and_count() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);

    let index = VectorIndex::create(
        &config,
        &[
            record("a", vec![1.0, 0.0, 0.0], "doc.txt", "alpha", 0),
            record("b", vec![0.0, 1.0, 0.0], "doc.txt", "beta", 1),
        ],
    )
    .await
    .expect("create should succeed");

    assert_eq!(index.count_chunks().await.expect("count"), 2);

    index
        .append(&[record("c", vec![0.0, 0.0, 1.0], "other.txt", "gamma", 0)])
        .await
        .expect("append should succeed");

    assert_eq!(index.count_chunks().await.expect("count"), 3);
}

#[tokio::test]
async fn search_orders_by_ascending_distance() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);

    let index = VectorIndex::create(
        &config,
        &[
            record("a", vec![1.0, 0.0, 0.0], "doc.txt", "closest", 0),
            record("b", vec![0.0, 1.0, 0.0], "doc.txt", "farther", 1),
            record("c", vec![-1.0, 0.0, 0.0], "doc.txt", "farthest", 2),
        ],
    )
    .await
    .expect("create should succeed");

    let results = index
        .search(&[0.9, 0.1, 0.0], 2)
        .await
        .expect("search should succeed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].content, "closest");
    assert!(results[0].distance <= results[1].distance);
}

#[tokio::test]
async fn reopen_preserves_data() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);

    let index = VectorIndex::create(
        &config,
        &[record("a", vec![0.5, 0.5], "doc.txt", "persisted", 0)],
    )
    .await
    .expect("create should succeed");
    drop(index);

    let reopened = VectorIndex::open_existing(&config)
        .await
        .expect("open should succeed")
        .expect("index should exist");

    assert_eq!(reopened.count_chunks().await.expect("count"), 1);

    let results = reopened
        .search(&[0.5, 0.5], 1)
        .await
        .expect("search should succeed");
    assert_eq!(results[0].content, "persisted");
    assert_eq!(results[0].source, "doc.txt");
}

#[tokio::test]
async fn append_rejects_dimension_mismatch() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);

    let index = VectorIndex::create(
        &config,
        &[record("a", vec![1.0, 0.0, 0.0], "doc.txt", "alpha", 0)],
    )
    .await
    .expect("create should succeed");

    let result = index
        .append(&[record("b", vec![1.0, 0.0], "doc.txt", "beta", 1)])
        .await;

    assert!(matches!(result, Err(DocChatError::Database(_))));
}

#[tokio::test]
async fn create_with_no_records_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);

    let result = VectorIndex::create(&config, &[]).await;

    assert!(matches!(result, Err(DocChatError::Database(_))));
}
