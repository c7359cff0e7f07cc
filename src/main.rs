use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use desk_core::config::{Config, IndexBackend, SourceKind};
use desk_core::orchestrator::{ConversationOrchestrator, OrchestratorConfig};
use desk_core::vault;
use desk_gateway::{AppState, GatewayServer, IndexJob};
use desk_llm::EmbedFn;
use desk_llm::http::default_client;
use desk_llm::openai::OpenAiProvider;
use desk_llm::provider::embed_fn;
use desk_memory::document::{
    ChunkerConfig, DirectorySource, DocumentChunker, DocumentSource, DriveSource,
    IndexingPipeline,
};
use desk_memory::{KnowledgeIndex, LocalVectorStore, QdrantOps, SessionMemoryStore, VectorStore};
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(name = "desk", version, about = "Retrieval-augmented service desk chat backend")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "DESK_CONFIG", default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Serve the HTTP and WebSocket API (default).
    Serve,
    /// Run one indexing pass over the configured folder and exit.
    Index,
}

struct Components {
    provider: Arc<OpenAiProvider>,
    index: Arc<KnowledgeIndex>,
    memory: Arc<SessionMemoryStore>,
    pipeline: Arc<IndexingPipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    config.resolve_secrets(vault::from_env().as_ref()).await?;

    let components = build_components(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Index => index_once(&components, &config).await,
        Command::Serve => serve(components, &config).await,
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_components(config: &Config) -> anyhow::Result<Components> {
    let provider = Arc::new(create_provider(config)?);
    let embed = create_embed_fn(config, &provider)?;

    let store = create_vector_store(config).await?;
    let index = Arc::new(
        KnowledgeIndex::new(
            store,
            config.index.collection.clone(),
            config.index.vector_size,
            embed,
        )
        .with_embed_timeout(Duration::from_secs(config.timeouts.embedding_seconds)),
    );
    if let Err(e) = index.ensure_ready().await {
        tracing::warn!("vector index not ready, retrieval will degrade until it is: {e}");
    }

    let memory = Arc::new(SessionMemoryStore::new(
        config.memory.max_messages,
        Duration::from_secs(config.memory.ttl_secs),
    ));

    let chunker = DocumentChunker::new(ChunkerConfig {
        chunk_size: config.index.chunk_size,
        chunk_overlap: config.index.chunk_overlap,
    })?;
    let pipeline = Arc::new(
        IndexingPipeline::new(create_source(config)?, Arc::clone(&index), chunker)
            .with_concurrency(config.index.concurrency),
    );

    Ok(Components {
        provider,
        index,
        memory,
        pipeline,
    })
}

fn create_provider(config: &Config) -> anyhow::Result<OpenAiProvider> {
    let api_key = config
        .secrets
        .openai_api_key
        .as_ref()
        .map(|s| s.expose().to_owned())
        .unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!(
            "DESK_OPENAI_API_KEY is not set, requests to {} may be rejected",
            config.llm.base_url
        );
    }
    let client = default_client(Duration::from_secs(config.timeouts.llm_seconds))
        .context("failed to build HTTP client")?;
    Ok(OpenAiProvider::new(
        client,
        api_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        Some(config.llm.embedding_model.clone()),
    )
    .with_max_tokens(config.llm.max_tokens)
    .with_temperature(config.llm.temperature)
    .with_embedding_dimensions(config.index.vector_size))
}

/// Embeddings go to `embedding_base_url` when set, else through the chat provider.
fn create_embed_fn(config: &Config, provider: &Arc<OpenAiProvider>) -> anyhow::Result<EmbedFn> {
    let Some(base_url) = &config.llm.embedding_base_url else {
        return Ok(embed_fn(Arc::clone(provider)));
    };
    let api_key = config
        .secrets
        .openai_api_key
        .as_ref()
        .map(|s| s.expose().to_owned())
        .unwrap_or_default();
    let client = default_client(Duration::from_secs(config.timeouts.embedding_seconds))
        .context("failed to build HTTP client")?;
    let embedder = OpenAiProvider::new(
        client,
        api_key,
        base_url.clone(),
        config.llm.model.clone(),
        Some(config.llm.embedding_model.clone()),
    )
    .with_embedding_dimensions(config.index.vector_size);
    tracing::info!(base_url = %base_url, "using separate embedding endpoint");
    Ok(embed_fn(Arc::new(embedder)))
}

async fn create_vector_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.index.backend {
        IndexBackend::Local => {
            let store = LocalVectorStore::open(&config.index.local_path).await;
            tracing::info!(path = %config.index.local_path.display(), "using local vector index");
            Ok(Arc::new(store))
        }
        IndexBackend::Qdrant => {
            let store = QdrantOps::new(&config.index.qdrant_url).with_context(|| {
                format!("failed to create Qdrant client for {}", config.index.qdrant_url)
            })?;
            tracing::info!(url = %config.index.qdrant_url, "using Qdrant vector index");
            Ok(Arc::new(store))
        }
    }
}

fn create_source(config: &Config) -> anyhow::Result<Arc<dyn DocumentSource>> {
    match config.source.kind {
        SourceKind::Drive => {
            let token = config
                .secrets
                .drive_access_token
                .as_ref()
                .context("DESK_DRIVE_ACCESS_TOKEN is required when source.kind = \"drive\"")?;
            let client = default_client(Duration::from_secs(config.timeouts.llm_seconds))
                .context("failed to build HTTP client")?;
            Ok(Arc::new(DriveSource::new(
                client,
                config.source.drive_base_url.clone(),
                token.expose().to_owned(),
            )))
        }
        SourceKind::Directory => Ok(Arc::new(DirectorySource::new(&config.source.directory))),
    }
}

async fn index_once(components: &Components, config: &Config) -> anyhow::Result<()> {
    let report = components
        .pipeline
        .run(config.index_folder())
        .await
        .context("indexing run failed")?;
    tracing::info!(
        indexed = report.results.len(),
        failed = report.failures.len(),
        chunks = report.chunk_total(),
        "indexing complete"
    );
    for failure in &report.failures {
        tracing::warn!(
            source_id = %failure.source_id,
            title = %failure.title,
            "not indexed: {}",
            failure.reason
        );
    }
    Ok(())
}

async fn serve(components: Components, config: &Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    spawn_session_gc(
        Arc::clone(&components.memory),
        Duration::from_secs(config.memory.gc_interval_secs.max(1)),
        shutdown_rx.clone(),
    );

    let conversation = Arc::new(ConversationOrchestrator::new(
        components.provider,
        Arc::clone(&components.index),
        Arc::clone(&components.memory),
        OrchestratorConfig::from(config),
    ));
    let indexer = Arc::new(IndexJob::new(components.pipeline, config.index_folder()));
    let state = AppState::new(conversation, components.index, components.memory, indexer);

    GatewayServer::new(&config.gateway.bind, config.gateway.port, state, shutdown_rx)
        .with_max_body_size(config.gateway.max_body_size)
        .serve()
        .await?;
    Ok(())
}

fn spawn_session_gc(
    memory: Arc<SessionMemoryStore>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = memory.purge_expired().await;
                    if purged > 0 {
                        tracing::info!(purged, "expired sessions removed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
