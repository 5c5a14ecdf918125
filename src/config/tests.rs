use super::*;
use tempfile::TempDir;

fn default_config(base_dir: &Path) -> Config {
    Config {
        ollama: OllamaConfig::default(),
        chunking: ChunkingConfig::default(),
        chat: ChatConfig::default(),
        server: ServerConfig::default(),
        base_dir: base_dir.to_path_buf(),
    }
}

#[test]
fn load_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("load should succeed");

    assert_eq!(config.chunking.chunk_size, 1200);
    assert_eq!(config.chunking.chunk_overlap, 300);
    assert_eq!(config.chat.retrieval_k, 5);
    assert_eq!(config.chat.answer_ttl_secs, 600);
    assert_eq!(config.base_dir, temp_dir.path());
}

#[test]
fn save_and_reload_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = default_config(temp_dir.path());
    config.ollama.chat_model = "llama3.2:70b".to_string();
    config.chat.retrieval_k = 8;

    config.save().expect("save should succeed");
    let reloaded = Config::load(temp_dir.path()).expect("reload should succeed");

    assert_eq!(reloaded, config);
}

#[test]
fn ollama_url_built_from_parts() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = default_config(temp_dir.path());

    let url = config.ollama_url().expect("url should parse");

    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn rejects_overlap_larger_than_chunk_size() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = default_config(temp_dir.path());
    config.chunking.chunk_overlap = config.chunking.chunk_size;

    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(_, _))
    ));
}

#[test]
fn rejects_invalid_protocol() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = default_config(temp_dir.path());
    config.ollama.protocol = "ftp".to_string();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));
}

#[test]
fn rejects_zero_ttl() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = default_config(temp_dir.path());
    config.chat.answer_ttl_secs = 0;

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidAnswerTtl(0))
    ));
}

#[test]
fn rejects_empty_model_name() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = default_config(temp_dir.path());
    config.ollama.embedding_model = String::new();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));
}

#[test]
fn data_paths_live_under_base_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = default_config(temp_dir.path());

    assert_eq!(config.vector_db_path(), temp_dir.path().join("vectors"));
    assert_eq!(config.temp_dir_path(), temp_dir.path().join("tmp"));
    assert_eq!(config.blob_dir_path(), temp_dir.path().join("blobs"));
}
