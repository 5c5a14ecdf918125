// Embedding generation via a local Ollama instance

pub mod ollama;

pub use ollama::OllamaClient;
