//! Deusto Knowledge - operator CLI
//!
//! Usage:
//!   deusto-knowledge upload --agent tutor notes.pdf syllabus.md
//!   deusto-knowledge build --agent tutor
//!   deusto-knowledge search --agent tutor "what is ownership?"
//!   deusto-knowledge ask --agent tutor "what is ownership?"
//!   deusto-knowledge stats --agent tutor
//!   deusto-knowledge delete --agent tutor [--file notes.pdf]
//!   deusto-knowledge config show

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use deusto_knowledge::services::embedding::EmbeddingProviderType;
use deusto_knowledge::services::knowledge::BuildStatus;
use deusto_knowledge::storage::ConfigService;
use deusto_knowledge::{AgentId, KnowledgeRuntime, SettingsUpdate};

#[derive(Parser)]
#[command(
    name = "deusto-knowledge",
    version,
    about = "Per-agent knowledge bases and retrieval-augmented answers"
)]
struct Cli {
    /// Configuration file (defaults to ~/.deusto-knowledge/config.json)
    #[arg(long, global = true, env = "DEUSTO_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store documents for an agent
    Upload {
        #[arg(short, long)]
        agent: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Rebuild the knowledge base after storing
        #[arg(long)]
        build: bool,
    },
    /// Rebuild an agent's knowledge base from its stored documents
    Build {
        #[arg(short, long)]
        agent: String,
    },
    /// Show the passages closest to a query
    Search {
        #[arg(short, long)]
        agent: String,
        #[arg(short, long)]
        k: Option<usize>,
        query: String,
    },
    /// Answer a question with retrieved context
    Ask {
        #[arg(short, long)]
        agent: String,
        question: String,
    },
    /// Describe an agent's knowledge base
    Stats {
        #[arg(short, long)]
        agent: String,
    },
    /// Delete one stored document, or an agent's documents and knowledge base
    Delete {
        #[arg(short, long)]
        agent: String,
        #[arg(long)]
        file: Option<String>,
    },
    /// Inspect or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Restore defaults
    Reset,
    /// Change individual settings
    Set {
        #[arg(long)]
        upload_dir: Option<PathBuf>,
        #[arg(long)]
        index_dir: Option<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        max_context_chars: Option<usize>,
        #[arg(long, value_enum)]
        embedding_provider: Option<EmbeddingBackend>,
        #[arg(long)]
        embedding_model: Option<String>,
        #[arg(long)]
        chat_model: Option<String>,
        #[arg(long)]
        tolerate_document_failures: Option<bool>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbeddingBackend {
    Openai,
    Ollama,
    Local,
}

impl From<EmbeddingBackend> for EmbeddingProviderType {
    fn from(backend: EmbeddingBackend) -> Self {
        match backend {
            EmbeddingBackend::Openai => EmbeddingProviderType::OpenAI,
            EmbeddingBackend::Ollama => EmbeddingProviderType::Ollama,
            EmbeddingBackend::Local => EmbeddingProviderType::Local,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn agent_id(raw: &str) -> Result<AgentId> {
    AgentId::new(raw).with_context(|| format!("invalid agent id {:?}", raw))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config_service = match cli.config {
        Some(ref path) => ConfigService::with_path(path),
        None => ConfigService::new(),
    }
    .context("failed to load configuration")?;

    if let Command::Config { action } = cli.command {
        return run_config(&mut config_service, action);
    }

    let runtime = KnowledgeRuntime::from_config(config_service.effective_config())
        .context("failed to initialize services")?;

    match cli.command {
        Command::Upload {
            agent,
            files,
            build,
        } => {
            let agent = agent_id(&agent)?;
            for file in &files {
                let bytes = tokio::fs::read(file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let document = runtime.uploads().store(&agent, &name, &bytes).await?;
                println!("stored {} ({} bytes)", document.file_name, document.size_bytes);
            }
            if build {
                run_build(&runtime, &agent).await?;
            }
        }
        Command::Build { agent } => {
            run_build(&runtime, &agent_id(&agent)?).await?;
        }
        Command::Search { agent, k, query } => {
            let k = k.unwrap_or(runtime.config().retrieval.top_k);
            let results = runtime
                .knowledge()
                .search(&agent_id(&agent)?, &query, k)
                .await?;
            if results.is_empty() {
                println!("no results");
            }
            for (rank, hit) in results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} #{}\n   {}",
                    rank + 1,
                    hit.score,
                    hit.passage.source.file_name,
                    hit.passage.chunk_index,
                    deusto_knowledge::services::rag::preview(
                        &hit.passage.content,
                        runtime.config().retrieval.citation_preview_chars
                    )
                );
            }
        }
        Command::Ask { agent, question } => {
            let response = runtime
                .assembler()
                .respond(&agent_id(&agent)?, &[], &question)
                .await?;
            println!("{}", response.answer);
            for citation in &response.citations {
                println!("\n[{}] {}", citation.document_name, citation.preview);
            }
        }
        Command::Stats { agent } => match runtime.knowledge().stats(&agent_id(&agent)?).await? {
            Some(stats) => print_json(&stats)?,
            None => println!("no knowledge base for {}", agent),
        },
        Command::Delete { agent, file } => {
            let agent = agent_id(&agent)?;
            let removed = match file {
                Some(name) => runtime.uploads().delete(&agent, &name).await?,
                None => runtime.delete_agent(&agent).await?,
            };
            println!("{}", if removed { "deleted" } else { "nothing to delete" });
        }
        Command::Config { .. } => {}
    }
    Ok(())
}

async fn run_build(runtime: &KnowledgeRuntime, agent: &AgentId) -> Result<()> {
    let mut job = runtime.rebuild(agent).await?;
    let status = tokio::select! {
        status = job.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(agent = %agent, "interrupted, cancelling build");
            job.cancel();
            job.wait().await
        }
    };

    match status {
        BuildStatus::Succeeded { report } => print_json(&report),
        BuildStatus::Cancelled => anyhow::bail!("build cancelled"),
        BuildStatus::Failed { message, .. } => anyhow::bail!(message),
        other => anyhow::bail!("build ended in unexpected state {:?}", other),
    }
}

fn run_config(service: &mut ConfigService, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => print_json(&service.effective_config())?,
        ConfigAction::Path => println!("{}", service.path().display()),
        ConfigAction::Reset => {
            service.reset()?;
            println!("configuration reset");
        }
        ConfigAction::Set {
            upload_dir,
            index_dir,
            chunk_size,
            overlap,
            top_k,
            max_context_chars,
            embedding_provider,
            embedding_model,
            chat_model,
            tolerate_document_failures,
        } => {
            let updated = service.update_config(SettingsUpdate {
                upload_dir,
                index_dir,
                chunk_size,
                overlap,
                top_k,
                max_context_chars,
                embedding_provider: embedding_provider.map(Into::into),
                embedding_model,
                chat_model,
                tolerate_document_failures,
            })?;
            print_json(&updated)?;
        }
    }
    Ok(())
}
