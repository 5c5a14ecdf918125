#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunking::{DocumentChunk, chunk_document};
use crate::config::Config;
use crate::index::IndexManager;
use crate::loader::{FileType, load_document};
use crate::storage::{BlobStore, CacheStore, FileMetadata};
use crate::{DocChatError, Result};

/// Outcome of a successful ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub chunks_added: usize,
}

/// Uploaded bytes spilled to a temp file for decoding. The file is removed
/// when the guard drops, on both success and failure paths.
struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    fn write(temp_dir: &Path, filename: &str, bytes: &[u8]) -> Result<Self> {
        std::fs::create_dir_all(temp_dir)
            .map_err(|e| DocChatError::Storage(format!("Failed to create temp directory: {e}")))?;

        // Keep the original name for log readability; the uuid prefix makes
        // concurrent uploads of the same file collide-free.
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let path = temp_dir.join(format!("{}-{}", uuid::Uuid::new_v4(), name));
        std::fs::write(&path, bytes)
            .map_err(|e| DocChatError::Storage(format!("Failed to write temp file: {e}")))?;

        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove temp file {}: {}", self.path.display(), e);
        }
    }
}

/// Upload pipeline: decode, chunk, embed, index, and archive the original
/// bytes.
pub struct IngestPipeline {
    config: Config,
    index: Arc<IndexManager>,
    blobs: Arc<BlobStore>,
    cache: Arc<CacheStore>,
}

impl IngestPipeline {
    #[inline]
    pub fn new(
        config: Config,
        index: Arc<IndexManager>,
        blobs: Arc<BlobStore>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self {
            config,
            index,
            blobs,
            cache,
        }
    }

    /// Run the full ingest for one uploaded file and return how many chunks
    /// landed in the index.
    #[inline]
    pub async fn ingest(&self, filename: &str, bytes: Vec<u8>) -> Result<IngestReport> {
        let file_type = FileType::from_filename(filename)
            .ok_or_else(|| DocChatError::UnsupportedFileType(filename.to_string()))?;

        info!("Ingesting {} ({} bytes)", filename, bytes.len());

        let temp = TempUpload::write(&self.config.temp_dir_path(), filename, &bytes)?;
        let chunks = self.decode_and_chunk(temp.path(), filename, file_type).await?;
        drop(temp);

        debug!("Split {} into {} chunks", filename, chunks.len());

        // Archiving the original bytes must not delay or fail the upload
        // response; errors are logged and dropped.
        self.archive_in_background(filename.to_string(), bytes, chunks.len());

        let chunks_added = self.index.upsert(chunks).await?;

        info!("Ingested {}: {} chunks added", filename, chunks_added);
        Ok(IngestReport { chunks_added })
    }

    async fn decode_and_chunk(
        &self,
        path: &Path,
        filename: &str,
        file_type: FileType,
    ) -> Result<Vec<DocumentChunk>> {
        let path = path.to_path_buf();
        let filename = filename.to_string();
        let chunking = self.config.chunking.clone();

        tokio::task::spawn_blocking(move || {
            let documents = load_document(&path, &filename, file_type)?;
            let mut chunks = Vec::new();
            for document in &documents {
                chunks.extend(chunk_document(document, &chunking));
            }
            Ok(chunks)
        })
        .await
        .map_err(|e| DocChatError::Decode(format!("Decode task panicked: {e}")))?
    }

    fn archive_in_background(&self, filename: String, bytes: Vec<u8>, chunk_count: usize) {
        let blobs = Arc::clone(&self.blobs);
        let cache = Arc::clone(&self.cache);

        tokio::spawn(async move {
            let blob_url = match tokio::task::spawn_blocking({
                let filename = filename.clone();
                move || blobs.put(&filename, &bytes)
            })
            .await
            {
                Ok(Ok(url)) => url,
                Ok(Err(e)) => {
                    warn!("Failed to archive blob for {}: {}", filename, e);
                    return;
                }
                Err(e) => {
                    warn!("Blob archive task panicked for {}: {}", filename, e);
                    return;
                }
            };

            cache
                .record_file(FileMetadata {
                    filename,
                    blob_url,
                    chunk_count,
                })
                .await;
        });
    }
}
