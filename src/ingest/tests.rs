use super::*;
use crate::chunking::ChunkingConfig;
use crate::config::{ChatConfig, OllamaConfig, ServerConfig};
use crate::embeddings::OllamaClient;
use std::time::Duration;
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

async fn test_pipeline(config: &Config) -> IngestPipeline {
    let embeddings = OllamaClient::new(config).expect("client should construct");
    let index = Arc::new(
        IndexManager::open(config.clone(), embeddings)
            .await
            .expect("index manager should open"),
    );
    let blobs = Arc::new(BlobStore::new(config.blob_dir_path()).expect("blob store"));
    let cache = Arc::new(CacheStore::new(Duration::from_secs(600)));
    IngestPipeline::new(config.clone(), index, blobs, cache)
}

fn temp_file_count(config: &Config) -> usize {
    match std::fs::read_dir(config.temp_dir_path()) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn rejects_unsupported_extension() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);
    let pipeline = test_pipeline(&config).await;

    let result = pipeline.ingest("picture.png", b"not a document".to_vec()).await;

    assert!(matches!(
        result,
        Err(DocChatError::UnsupportedFileType(ref name)) if name == "picture.png"
    ));
    assert_eq!(temp_file_count(&config), 0);
}

#[tokio::test]
async fn decode_failure_cleans_up_temp_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);
    let pipeline = test_pipeline(&config).await;

    let result = pipeline.ingest("broken.pdf", b"not a pdf".to_vec()).await;

    assert!(matches!(result, Err(DocChatError::Decode(_))));
    assert_eq!(temp_file_count(&config), 0);
}

#[tokio::test]
async fn empty_document_adds_no_chunks() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);
    let pipeline = test_pipeline(&config).await;

    let report = pipeline
        .ingest("empty.txt", b"   \n\n  ".to_vec())
        .await
        .expect("ingest should succeed");

    assert_eq!(report.chunks_added, 0);
    // No chunks means the index is never created.
    assert!(!pipeline.index.is_ready().await);
    assert_eq!(temp_file_count(&config), 0);
}

#[tokio::test]
async fn archives_original_bytes_in_background() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir);
    let pipeline = test_pipeline(&config).await;

    pipeline
        .ingest("notes.txt", b" ".to_vec())
        .await
        .expect("ingest should succeed");

    // The archive task runs off the request path; poll for its result.
    let mut metadata = None;
    for _ in 0..50 {
        metadata = pipeline.cache.file("notes.txt").await;
        if metadata.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let metadata = metadata.expect("file metadata should be recorded");
    assert!(metadata.blob_url.starts_with("file://"));
    assert_eq!(metadata.chunk_count, 0);
    assert_eq!(pipeline.blobs.get("notes.txt").expect("blob"), b" ");
}
