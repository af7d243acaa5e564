use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docqa_app_server::{DocqaHandler, PromptStyle, default_config_path, load_config};
use docqa_retrieval::{RagConfig, SourceRef, StreamEvent};
use tokio::io::{AsyncWriteExt, stdout};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Ask questions about a local folder of documents")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to <config dir>/docqa/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Documents directory, overriding the configuration
    #[arg(long, global = true)]
    documents: Option<PathBuf>,

    /// Log filter, e.g. "info" or "docqa_retrieval=debug"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the documents directory
    Ingest {
        /// Clear the index and rebuild it from scratch
        #[arg(long)]
        force: bool,
    },
    /// Show the retrieved passages and the assembled context for a question
    Query {
        /// The question
        question: String,
    },
    /// Answer a question from the indexed documents
    Ask {
        /// The question
        question: String,
        /// Prompt style
        #[arg(long, value_enum, default_value_t)]
        style: PromptStyle,
        /// Print the answer once it is complete instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Index the documents directory, then keep it indexed until Ctrl-C
    Watch,
    /// Show index statistics
    Status,
    /// Write the index snapshot
    Persist,
    /// Drop removed documents from the index for good
    Compact,
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<RagConfig> {
    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => load_config(&path)?,
        None => RagConfig::default(),
    };
    if let Some(documents) = &cli.documents {
        config.documents_dir = documents.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for source in sources {
        println!(
            "  [{}] {} ({})",
            source.index,
            source.label(),
            source.source.display()
        );
    }
}

async fn ask(handler: &DocqaHandler, question: &str, no_stream: bool) -> Result<()> {
    if no_stream {
        let answer = handler.ask(question, &[]).await?;
        println!("{}", answer.content);
        print_sources(&answer.sources);
        return Ok(());
    }

    let Some(mut answer) = handler.ask_stream(question, &[]).await? else {
        println!("{}", docqa_app_server::NO_DOCUMENTS_ANSWER);
        return Ok(());
    };

    let mut out = stdout();
    while let Some(event) = answer.tokens.next().await {
        match event {
            StreamEvent::Token(token) => {
                out.write_all(token.as_bytes()).await?;
                out.flush().await?;
            }
            StreamEvent::Error(e) => anyhow::bail!("answer stream failed: {e}"),
            StreamEvent::Done => break,
        }
    }
    out.write_all(b"\n").await?;
    out.flush().await?;

    print_sources(&answer.sources);
    Ok(())
}

async fn watch(handler: &DocqaHandler) -> Result<()> {
    let report = handler.ingest(false).await?;
    info!(
        "Initial index: {} processed, {} unchanged, {} failed",
        report.processed,
        report.skipped,
        report.failed_count()
    );

    let cancel = CancellationToken::new();
    let watcher = handler.watch(cancel.clone())?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    cancel.cancel();
    watcher.await?;
    handler.persist().await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    let config = resolve_config(&cli)?;
    let handler = DocqaHandler::new(config).await?;

    match cli.command {
        Commands::Ingest { force } => {
            let report = handler.ingest(force).await?;
            println!(
                "Indexed {} files ({} unchanged, {} removed, {} failed), {} chunks added",
                report.processed,
                report.skipped,
                report.removed,
                report.failed_count(),
                report.chunks_added
            );
            for failure in &report.failed {
                println!("  failed: {} ({})", failure.path.display(), failure.error);
            }
        }
        Commands::Query { question } => {
            let response = handler.query(&question, &[]).await?;
            for (rank, result) in response.results.iter().enumerate() {
                println!(
                    "{}. {:.3} {} #{}",
                    rank + 1,
                    result.rerank_score,
                    result.filename,
                    result.chunk_index
                );
            }
            println!("\n{}", response.context.context);
        }
        Commands::Ask {
            question,
            style,
            no_stream,
        } => {
            let handler = handler.with_prompt_style(style);
            ask(&handler, &question, no_stream).await?;
        }
        Commands::Watch => watch(&handler).await?,
        Commands::Status => {
            let status = handler.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Persist => {
            handler.persist().await?;
            println!("Index written to {}", handler.service().config().persist_dir.display());
        }
        Commands::Compact => {
            let dropped = handler.compact().await?;
            println!("Dropped {dropped} removed chunks");
        }
    }

    Ok(())
}
