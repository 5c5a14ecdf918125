
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{DocChatError, Result};

/// Metadata kept for each uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    pub filename: String,
    pub blob_url: String,
    pub chunk_count: usize,
}

/// Filesystem-backed store for original upload bytes. Keys are derived from
/// the client filename; re-uploading the same name overwrites the blob.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| DocChatError::Storage(format!("Failed to create blob directory: {e}")))?;
        Ok(Self { root })
    }

    /// Store the raw bytes and return a file:// URL for the blob.
    #[inline]
    pub fn put(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        let key = sanitize_key(filename);
        let path = self.root.join(&key);

        std::fs::write(&path, bytes)
            .map_err(|e| DocChatError::Storage(format!("Failed to write blob {key}: {e}")))?;

        debug!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(format!("file://{}", path.display()))
    }

    /// Read a blob back by its original filename.
    #[inline]
    pub fn get(&self, filename: &str) -> Result<Vec<u8>> {
        let key = sanitize_key(filename);
        let path = self.root.join(&key);

        std::fs::read(&path)
            .map_err(|e| DocChatError::Storage(format!("Failed to read blob {key}: {e}")))
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Replace anything outside [A-Za-z0-9._-] so the key is a safe single path
/// component regardless of what the client sent.
fn sanitize_key(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// In-process caches: answers expire after the configured TTL, file metadata
/// lives for the life of the process.
pub struct CacheStore {
    answers: Cache<String, String>,
    files: Cache<String, FileMetadata>,
}

impl CacheStore {
    #[inline]
    pub fn new(answer_ttl: Duration) -> Self {
        Self {
            answers: Cache::builder().time_to_live(answer_ttl).build(),
            files: Cache::builder().build(),
        }
    }

    #[inline]
    pub async fn get_answer(&self, question: &str) -> Option<String> {
        self.answers.get(&answer_key(question)).await
    }

    #[inline]
    pub async fn put_answer(&self, question: &str, answer: String) {
        self.answers.insert(answer_key(question), answer).await;
    }

    #[inline]
    pub async fn record_file(&self, metadata: FileMetadata) {
        self.files.insert(metadata.filename.clone(), metadata).await;
    }

    #[inline]
    pub async fn file(&self, filename: &str) -> Option<FileMetadata> {
        self.files.get(filename).await
    }
}

fn answer_key(question: &str) -> String {
    question.trim().to_string()
}
