#[cfg(test)]
mod tests;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;

use crate::config::{ChatConfig, Config};
use crate::index::{IndexManager, RetrievedChunk};
use crate::storage::CacheStore;
use crate::{DocChatError, Result};

/// Sent verbatim when a question arrives before any document has been
/// indexed. Never cached.
pub const NO_DOCUMENTS_NOTICE: &str = "Please upload documents first!";

const STREAM_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunkMessage {
    #[serde(default)]
    content: String,
}

/// Parse one NDJSON line from the chat stream. Returns the content fragment,
/// or `None` for the final done marker and empty fragments.
fn parse_chat_line(line: &str) -> Result<Option<String>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| DocChatError::Generation(format!("Invalid stream payload: {e}")))?;

    if chunk.done {
        return Ok(None);
    }

    match chunk.message {
        Some(message) if !message.content.is_empty() => Ok(Some(message.content)),
        _ => Ok(None),
    }
}

/// Streaming client for the Ollama chat API.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: Url,
    model: String,
    temperature: f32,
}

impl ChatClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .map_err(|e| DocChatError::Config(e.to_string()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            model: config.ollama.chat_model.clone(),
            temperature: config.ollama.temperature,
        })
    }

    /// Start a streamed completion and return the answer fragments as they
    /// arrive. Dropping the stream aborts the request.
    #[inline]
    pub async fn stream_chat(
        &self,
        system: &str,
        user: &str,
    ) -> Result<ReceiverStream<Result<String>>> {
        let url = self
            .base_url
            .join("/api/chat")
            .map_err(|e| DocChatError::Generation(format!("Failed to build chat URL: {e}")))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        debug!("Requesting chat completion from {}", url);

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocChatError::Generation(format!("Chat request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DocChatError::Generation(format!(
                "Chat request returned HTTP {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending = String::new();

            while let Some(bytes) = body.next().await {
                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(DocChatError::Generation(format!(
                                "Chat stream failed: {e}"
                            ))))
                            .await;
                        return;
                    }
                };

                pending.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    match parse_chat_line(&line) {
                        Ok(Some(fragment)) => {
                            if tx.send(Ok(fragment)).await.is_err() {
                                // Receiver gone; dropping the response body
                                // cancels the upstream request.
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            match parse_chat_line(&pending) {
                Ok(Some(fragment)) => {
                    let _ = tx.send(Ok(fragment)).await;
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Accumulates answer fragments and decides when to flush a batch to the
/// client: when the buffer reaches `max_chars` or `max_delay` has passed
/// since the last flush.
pub struct StreamBuffer {
    buffer: String,
    last_flush: Instant,
    max_chars: usize,
    max_delay: Duration,
}

impl StreamBuffer {
    #[inline]
    pub fn new(max_chars: usize, max_delay: Duration) -> Self {
        Self {
            buffer: String::new(),
            last_flush: Instant::now(),
            max_chars,
            max_delay,
        }
    }

    /// Append a fragment; returns a batch when the flush policy fires.
    #[inline]
    pub fn push(&mut self, fragment: &str, now: Instant) -> Option<String> {
        self.buffer.push_str(fragment);

        if self.buffer.is_empty() {
            return None;
        }

        let char_count = self.buffer.chars().count();
        if char_count >= self.max_chars || now.saturating_duration_since(self.last_flush) >= self.max_delay
        {
            self.last_flush = now;
            return Some(std::mem::take(&mut self.buffer));
        }

        None
    }

    /// Drain whatever is left at end of stream.
    #[inline]
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// System message fixing the assistant persona.
#[inline]
pub fn system_prompt(persona: &str, tone: &str) -> String {
    format!("You are {persona}. Respond with {tone} tone.")
}

/// Grounded user prompt: retrieved context followed by the question.
#[inline]
pub fn build_prompt(persona: &str, tone: &str, chunks: &[RetrievedChunk], question: &str) -> String {
    let context: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    format!(
        "You are {persona}. Tone: {tone}\nContext: {}\nQuestion: {question}",
        context.join("\n\n")
    )
}

/// Question answering pipeline: cache check, retrieval, streamed generation
/// with buffered flushes, then caching of the full answer.
pub struct ChatPipeline {
    chat: ChatConfig,
    client: ChatClient,
    index: Arc<IndexManager>,
    cache: Arc<CacheStore>,
}

impl ChatPipeline {
    #[inline]
    pub fn new(config: &Config, index: Arc<IndexManager>, cache: Arc<CacheStore>) -> Result<Self> {
        Ok(Self {
            chat: config.chat.clone(),
            client: ChatClient::new(config)?,
            index,
            cache,
        })
    }

    /// Answer a question, delivering batches through `sink` as they become
    /// ready. The complete answer is cached afterwards; the no-documents
    /// notice and cache hits bypass the model entirely.
    #[inline]
    pub async fn answer<S>(&self, question: &str, mut sink: S) -> Result<()>
    where
        S: AsyncFnMut(String) -> Result<()>,
    {
        let question = question.trim();

        if let Some(cached) = self.cache.get_answer(question).await {
            debug!("Answer cache hit");
            sink(cached).await?;
            return Ok(());
        }

        let chunks = match self
            .index
            .retrieve(question, self.chat.retrieval_k)
            .await
        {
            Ok(chunks) => chunks,
            Err(DocChatError::IndexUnavailable) => {
                sink(NO_DOCUMENTS_NOTICE.to_string()).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        debug!("Retrieved {} chunks for question", chunks.len());

        let system = system_prompt(&self.chat.persona, &self.chat.tone);
        let user = build_prompt(&self.chat.persona, &self.chat.tone, &chunks, question);

        let mut stream = self.client.stream_chat(&system, &user).await?;
        let mut buffer = StreamBuffer::new(
            self.chat.stream_buffer_chars as usize,
            Duration::from_millis(self.chat.stream_max_delay_ms),
        );
        let mut answer = String::new();

        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            answer.push_str(&fragment);
            if let Some(batch) = buffer.push(&fragment, Instant::now()) {
                sink(batch).await?;
            }
        }

        if let Some(batch) = buffer.finish() {
            sink(batch).await?;
        }

        if answer.is_empty() {
            warn!("Model returned an empty answer");
        } else {
            self.cache.put_answer(question, answer).await;
        }

        Ok(())
    }
}
