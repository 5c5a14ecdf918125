#[cfg(test)]
mod tests;

use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection,
    query::{ExecutableQuery, QueryBase},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::chunking::DocumentChunk;
use crate::config::{COLLECTION_NAME, Config};
use crate::embeddings::OllamaClient;
use crate::{DocChatError, Result};

/// A chunk row as stored in LanceDB.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub source: String,
    pub content: String,
    pub chunk_index: u32,
    pub created_at: String,
}

/// A chunk returned from nearest-neighbor search, most relevant first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: String,
    pub chunk_index: u32,
    pub distance: f32,
}

/// Handle to the persistent LanceDB table backing the document index.
pub struct VectorIndex {
    connection: Connection,
    table_name: String,
    dimension: usize,
}

impl VectorIndex {
    async fn connect(config: &Config) -> Result<Connection> {
        let db_path = config.vector_db_path();
        std::fs::create_dir_all(&db_path)
            .map_err(|e| DocChatError::Database(format!("Failed to create index directory: {e}")))?;

        let uri = format!("file://{}", db_path.display());
        lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to connect to LanceDB: {e}")))
    }

    /// Open the index if a previous run created it. Absence is not an error.
    #[inline]
    pub async fn open_existing(config: &Config) -> Result<Option<Self>> {
        if !config.vector_db_path().exists() {
            return Ok(None);
        }

        let connection = Self::connect(config).await?;
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to list tables: {e}")))?;

        if !table_names.contains(&COLLECTION_NAME.to_string()) {
            return Ok(None);
        }

        let table = connection
            .open_table(COLLECTION_NAME)
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to open table: {e}")))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to read table schema: {e}")))?;

        let dimension = schema
            .fields()
            .iter()
            .find(|f| f.name() == "vector")
            .and_then(|f| match f.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            })
            .ok_or_else(|| {
                DocChatError::Database("Could not determine vector dimension".to_string())
            })?;

        info!(
            "Opened existing vector index '{}' ({} dimensions)",
            COLLECTION_NAME, dimension
        );

        Ok(Some(Self {
            connection,
            table_name: COLLECTION_NAME.to_string(),
            dimension,
        }))
    }

    /// Create the table and insert the first batch of records. The vector
    /// dimension is inferred from the batch.
    #[inline]
    pub async fn create(config: &Config, records: &[ChunkRecord]) -> Result<Self> {
        let Some(first) = records.first() else {
            return Err(DocChatError::Database(
                "Cannot create an index from zero records".to_string(),
            ));
        };
        let dimension = first.vector.len();

        let connection = Self::connect(config).await?;
        connection
            .create_empty_table(COLLECTION_NAME, Self::schema(dimension))
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to create table: {e}")))?;

        let index = Self {
            connection,
            table_name: COLLECTION_NAME.to_string(),
            dimension,
        };

        index.append(records).await?;

        info!(
            "Created vector index '{}' with {} chunks ({} dimensions)",
            COLLECTION_NAME,
            records.len(),
            dimension
        );

        Ok(index)
    }

    /// Append records in a single durable batch. LanceDB commits each add
    /// before returning, so there is no separate flush step.
    #[inline]
    pub async fn append(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let record_batch = self.record_batch(records)?;

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to open table: {e}")))?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to insert chunks: {e}")))?;

        debug!("Stored {} chunks in the vector index", records.len());
        Ok(())
    }

    /// Nearest-neighbor search, at most `limit` results ordered by ascending
    /// distance.
    #[inline]
    pub async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<RetrievedChunk>> {
        debug!("Searching vector index with limit {}", limit);

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to open table: {e}")))?;

        let results = table
            .vector_search(query_vector)
            .map_err(|e| DocChatError::Database(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .limit(limit)
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to execute search: {e}")))?;

        let mut chunks = Vec::new();
        let mut stream = results;
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to read result stream: {e}")))?
        {
            chunks.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Retrieved {} chunks", chunks.len());
        Ok(chunks)
    }

    /// Total number of chunks stored.
    #[inline]
    pub async fn count_chunks(&self) -> Result<u64> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to open table: {e}")))?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| DocChatError::Database(format!("Failed to count rows: {e}")))?;

        Ok(count as u64)
    }

    fn schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("source", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    fn record_batch(&self, records: &[ChunkRecord]) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);

        for record in records {
            if record.vector.len() != self.dimension {
                return Err(DocChatError::Database(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    record.vector.len()
                )));
            }
            ids.push(record.id.as_str());
            sources.push(record.source.as_str());
            contents.push(record.content.as_str());
            chunk_indices.push(record.chunk_index);
            created_ats.push(record.created_at.as_str());
            flat_values.extend_from_slice(&record.vector);
        }

        let values_array = Float32Array::from(flat_values);
        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            item_field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| DocChatError::Database(format!("Failed to create vector array: {e}")))?;

        let arrays: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(Self::schema(self.dimension), arrays)
            .map_err(|e| DocChatError::Database(format!("Failed to create record batch: {e}")))
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<RetrievedChunk>> {
        let sources = string_column(batch, "source")?;
        let contents = string_column(batch, "content")?;

        let chunk_indices = batch
            .column_by_name("chunk_index")
            .ok_or_else(|| DocChatError::Database("Missing chunk_index column".to_string()))?
            .as_any()
            .downcast_ref::<UInt32Array>()
            .ok_or_else(|| DocChatError::Database("Invalid chunk_index column type".to_string()))?;

        let distances = batch
            .column_by_name("_distance")
            .map(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut chunks = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances
                .flatten()
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            chunks.push(RetrievedChunk {
                content: contents.value(row).to_string(),
                source: sources.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                distance,
            });
        }

        Ok(chunks)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| DocChatError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| DocChatError::Database(format!("Invalid {name} column type")))
}

/// Owns the single shared index handle. The write lock serializes the
/// create-or-append decision across concurrent uploads; chat reads take read
/// locks and never block each other.
pub struct IndexManager {
    config: Config,
    embeddings: OllamaClient,
    index: RwLock<Option<VectorIndex>>,
}

impl IndexManager {
    /// Eagerly load a persisted index if one exists; otherwise start empty
    /// and create lazily on the first upload.
    #[inline]
    pub async fn open(config: Config, embeddings: OllamaClient) -> Result<Self> {
        let existing = VectorIndex::open_existing(&config).await?;
        if existing.is_none() {
            info!("No vector index found; one will be created on first upload");
        }

        Ok(Self {
            config,
            embeddings,
            index: RwLock::new(existing),
        })
    }

    /// Embed the chunks and create-or-append under the exclusive lock. The
    /// lock is held across the embedding round-trip so two first-time uploads
    /// cannot both decide to create the table. There is no rollback if the
    /// write fails mid-batch; all chunks go into one add call.
    #[inline]
    pub async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut guard = self.index.write().await;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embed_texts(texts).await?;

        if vectors.len() != chunks.len() {
            return Err(DocChatError::Embedding(format!(
                "Embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord {
                id: uuid::Uuid::new_v4().to_string(),
                vector,
                source: chunk.source,
                content: chunk.content,
                chunk_index: chunk.chunk_index,
                created_at: created_at.clone(),
            })
            .collect();
        let added = records.len();

        match guard.as_ref() {
            Some(index) => index.append(&records).await?,
            None => {
                let index = VectorIndex::create(&self.config, &records).await?;
                *guard = Some(index);
            }
        }

        Ok(added)
    }

    /// Retrieve the `k` most relevant chunks for a question.
    #[inline]
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or(DocChatError::IndexUnavailable)?;

        let query = self.embed_texts(vec![question.to_string()]).await?;
        let query_vector = query
            .into_iter()
            .next()
            .ok_or_else(|| DocChatError::Embedding("Empty query embedding".to_string()))?;

        index.search(&query_vector, k).await
    }

    /// Whether at least one document has been indexed.
    #[inline]
    pub async fn is_ready(&self) -> bool {
        self.index.read().await.is_some()
    }

    /// Chunk count, or zero before the first upload.
    #[inline]
    pub async fn chunk_count(&self) -> Result<u64> {
        let guard = self.index.read().await;
        match guard.as_ref() {
            Some(index) => index.count_chunks().await,
            None => Ok(0),
        }
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let client = self.embeddings.clone();
        tokio::task::spawn_blocking(move || client.embed_batch(&texts))
            .await
            .map_err(|e| DocChatError::Embedding(format!("Embedding task panicked: {e}")))?
            .map_err(|e| DocChatError::Embedding(e.to_string()))
    }
}
