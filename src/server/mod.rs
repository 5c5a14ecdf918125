use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::chat::ChatPipeline;
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::index::IndexManager;
use crate::ingest::IngestPipeline;
use crate::storage::{BlobStore, CacheStore};
use crate::{DocChatError, Result};

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Clients send "exit" (any casing) to end a chat session.
const EXIT_SENTINEL: &str = "exit";

/// Shared handles behind every request.
pub struct AppState {
    pub config: Arc<Config>,
    pub index: Arc<IndexManager>,
    pub ingest: Arc<IngestPipeline>,
    pub chat: Arc<ChatPipeline>,
}

impl AppState {
    /// Wire up every component from the config. Loads a persisted index if
    /// one exists.
    #[inline]
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let embeddings = OllamaClient::new(&config)?;
        let index = Arc::new(IndexManager::open(config.clone(), embeddings).await?);
        let blobs = Arc::new(BlobStore::new(config.blob_dir_path())?);
        let cache = Arc::new(CacheStore::new(Duration::from_secs(
            config.chat.answer_ttl_secs,
        )));

        let ingest = Arc::new(IngestPipeline::new(
            config.clone(),
            Arc::clone(&index),
            blobs,
            Arc::clone(&cache),
        ));
        let chat = Arc::new(ChatPipeline::new(&config, Arc::clone(&index), cache)?);

        Ok(Arc::new(Self {
            config: Arc::new(config),
            index,
            ingest,
            chat,
        }))
    }
}

/// Build the HTTP router: document upload plus the chat WebSocket.
#[inline]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload/", post(upload_handler))
        .route("/chat", get(ws_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.file_name().is_some() => break field,
            Ok(Some(_)) => {}
            Ok(None) => {
                return error_response(StatusCode::BAD_REQUEST, "No file provided".to_string());
            }
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid multipart body: {e}"),
                );
            }
        }
    };

    let filename = match field.file_name() {
        Some(name) => name.to_string(),
        None => return error_response(StatusCode::BAD_REQUEST, "No file provided".to_string()),
    };

    let bytes = match field.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Failed to read upload: {e}"),
            );
        }
    };

    match state.ingest.ingest(&filename, bytes.to_vec()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "message": format!(
                    "File processed successfully! Added {} chunks",
                    report.chunks_added
                ),
            })),
        ),
        Err(DocChatError::UnsupportedFileType(_)) => {
            error_response(StatusCode::BAD_REQUEST, "Unsupported file type".to_string())
        }
        Err(e) => {
            error!("Upload of {} failed: {}", filename, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing file: {e}"),
            )
        }
    }
}

fn error_response(status: StatusCode, detail: String) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "detail": detail })))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Chat client connected");

    // The socket lives behind an Arc<Mutex> so the answer sink closure can
    // capture an owned handle: a borrowed `&mut socket` capture makes the
    // generic `AsyncFnMut` future impossible to prove `Send` on stable rustc
    // ("implementation of `Send` is not general enough"). Access stays
    // sequential within this task, so the lock is never contended.
    let socket = Arc::new(tokio::sync::Mutex::new(socket));

    while let Some(msg) = socket.lock().await.recv().await {
        match msg {
            Ok(Message::Text(text)) => {
                let question = text.trim();
                if question.eq_ignore_ascii_case(EXIT_SENTINEL) {
                    info!("Chat client sent exit");
                    break;
                }
                if question.is_empty() {
                    continue;
                }

                let sink_socket = Arc::clone(&socket);
                let result = state
                    .chat
                    .answer(question, async move |batch: String| {
                        sink_socket
                            .lock()
                            .await
                            .send(Message::Text(batch.into()))
                            .await
                            .map_err(|e| DocChatError::Generation(format!("Send failed: {e}")))
                    })
                    .await;

                if let Err(e) = result {
                    error!("Chat answer failed: {}", e);
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                if socket.lock().await.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("Chat client disconnected");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    let _ = socket.lock().await.send(Message::Close(None)).await;
    info!("Chat connection closed");
}
