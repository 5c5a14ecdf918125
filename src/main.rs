use clap::{Parser, Subcommand};
use doc_chat::Result;
use doc_chat::commands::{serve, show_status};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doc-chat")]
#[command(about = "Document question-answering service with a streaming chat WebSocket")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Data directory for the index, blobs, and config (defaults to the
        /// platform data dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Override the bind address, e.g. 0.0.0.0:8000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show the index and Ollama connection status
    Status {
        /// Data directory for the index, blobs, and config
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { data_dir, bind } => {
            serve(data_dir, bind).await?;
        }
        Commands::Status { data_dir } => {
            show_status(data_dir).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["doc-chat", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Status { .. });
        }
    }

    #[test]
    fn serve_accepts_overrides() {
        let cli = Cli::try_parse_from([
            "doc-chat",
            "serve",
            "--data-dir",
            "/tmp/doc-chat",
            "--bind",
            "0.0.0.0:9000",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Serve { data_dir, bind } => {
                assert_eq!(data_dir, Some(PathBuf::from("/tmp/doc-chat")));
                assert_eq!(bind.as_deref(), Some("0.0.0.0:9000"));
            }
            Commands::Status { .. } => panic!("expected serve"),
        }
    }
}
