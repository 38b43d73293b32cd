use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repo_rag::commands::{
    IngestOptions, IngestSource, ask, chat, drop_collection, ingest, list_collections, search,
    show_status, summarize,
};
use repo_rag::config::{Config, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "repo-rag")]
#[command(about = "Ask questions about local files and git repositories using Ollama")]
#[command(version)]
struct Cli {
    /// Base directory for configuration and data (defaults to ~/.repo-rag)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and models
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index a file, a directory or a git repository
    Ingest {
        /// File or directory to index
        #[arg(required_unless_present = "repo", conflicts_with = "repo")]
        path: Option<PathBuf>,
        /// Git repository URL to clone and index
        #[arg(long)]
        repo: Option<String>,
        /// Target collection
        #[arg(long)]
        collection: Option<String>,
        /// File extensions to include, comma separated
        #[arg(long, value_delimiter = ',')]
        extensions: Vec<String>,
        /// Re-clone the repository instead of reusing the cached clone
        #[arg(long, requires = "repo")]
        refresh: bool,
        /// Drop the collection before indexing
        #[arg(long)]
        replace: bool,
    },
    /// Show the chunks closest to a query
    Search {
        query: String,
        #[arg(long)]
        collection: Option<String>,
        /// Number of chunks to return
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Only return chunks from this source file
        #[arg(long)]
        source: Option<String>,
    },
    /// Answer a single question
    Ask {
        question: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },
    /// Start an interactive conversation
    Chat {
        #[arg(long, conflicts_with = "repo")]
        collection: Option<String>,
        /// Chat about a git repository, indexing it on first use
        #[arg(long)]
        repo: Option<String>,
    },
    /// Summarize each file under a path
    Summarize {
        path: PathBuf,
        #[arg(long, value_delimiter = ',')]
        extensions: Vec<String>,
    },
    /// List collections
    Collections,
    /// Delete a collection and its vectors
    Drop {
        collection: String,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Show backend health, collections and cached repositories
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Config { show } = cli.command {
        let base_dir = cli.base_dir.as_deref();
        return if show {
            show_config(base_dir)
        } else {
            run_interactive_config(base_dir)
        };
    }

    let config = match &cli.base_dir {
        Some(base_dir) => Config::load(base_dir)?,
        None => Config::load_default()?,
    };

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Ingest {
            path,
            repo,
            collection,
            extensions,
            refresh,
            replace,
        } => {
            let source = match (path, repo) {
                (_, Some(url)) => IngestSource::Repository(url),
                (Some(path), None) => IngestSource::Path(path),
                (None, None) => anyhow::bail!("Either a path or --repo is required"),
            };
            let options = IngestOptions {
                collection,
                extensions,
                refresh,
                replace,
            };
            ingest(&config, &source, &options).await?;
        }
        Commands::Search {
            query,
            collection,
            top_k,
            source,
        } => {
            search(
                &config,
                &query,
                collection.as_deref(),
                top_k,
                source.as_deref(),
            )
            .await?;
        }
        Commands::Ask {
            question,
            collection,
            top_k,
        } => {
            ask(&config, &question, collection.as_deref(), top_k).await?;
        }
        Commands::Chat { collection, repo } => {
            chat(&config, collection.as_deref(), repo.as_deref()).await?;
        }
        Commands::Summarize { path, extensions } => {
            summarize(&config, &path, &extensions).await?;
        }
        Commands::Collections => {
            list_collections(&config).await?;
        }
        Commands::Drop { collection, yes } => {
            drop_collection(&config, &collection, yes).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
