use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::{COLLECTION_NAME, Config};
use crate::embeddings::OllamaClient;
use crate::index::IndexManager;
use crate::server::{AppState, build_router};

fn resolve_base_dir(data_dir: Option<PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(dir) => Ok(dir),
        None => Config::default_base_dir(),
    }
}

fn apply_bind_override(config: &mut Config, bind: &str) -> Result<()> {
    let (host, port) = bind
        .rsplit_once(':')
        .with_context(|| format!("Invalid bind address '{bind}', expected host:port"))?;
    config.server.host = host.to_string();
    config.server.port = port
        .parse()
        .with_context(|| format!("Invalid port in bind address '{bind}'"))?;
    Ok(())
}

/// Start the HTTP server: document upload plus the chat WebSocket.
#[inline]
pub async fn serve(data_dir: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let base_dir = resolve_base_dir(data_dir)?;
    let mut config = Config::load(&base_dir)?;
    if let Some(bind) = bind {
        apply_bind_override(&mut config, &bind)?;
    }

    info!("Using data directory {}", base_dir.display());

    // A missing Ollama is not fatal at startup; requests fail until it
    // comes back.
    let health_client = OllamaClient::new(&config)?;
    match tokio::task::spawn_blocking(move || health_client.health_check()).await? {
        Ok(()) => {}
        Err(e) => warn!("Ollama health check failed: {e:#}"),
    }

    let state = AppState::new(config.clone()).await?;
    let router = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on http://{}", addr);
    axum::serve(listener, router).await.context("Server error")?;

    Ok(())
}

/// Print the data directory, Ollama reachability, and index size.
#[inline]
pub async fn show_status(data_dir: Option<PathBuf>) -> Result<()> {
    let base_dir = resolve_base_dir(data_dir)?;
    let config = Config::load(&base_dir)?;

    println!("Data directory: {}", base_dir.display());
    println!("Ollama server: {}", config.ollama_url()?);
    println!("Embedding model: {}", config.ollama.embedding_model);
    println!("Chat model: {}", config.ollama.chat_model);

    let ping_client = OllamaClient::new(&config)?;
    let reachable = tokio::task::spawn_blocking(move || ping_client.ping())
        .await?
        .is_ok();
    println!(
        "Ollama status: {}",
        if reachable { "reachable" } else { "unreachable" }
    );

    let embeddings = OllamaClient::new(&config)?;
    let index = IndexManager::open(config, embeddings).await?;
    if index.is_ready().await {
        println!(
            "Index '{}': {} chunks",
            COLLECTION_NAME,
            index.chunk_count().await?
        );
    } else {
        println!("Index '{}': not created yet", COLLECTION_NAME);
    }

    Ok(())
}
