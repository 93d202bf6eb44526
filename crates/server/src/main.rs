//! Wiki assistant server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use wiki_agent_agent::{Orchestrator, OrchestratorDeps};
use wiki_agent_config::{load_settings, Settings};
use wiki_agent_core::{EmbeddingClient, VectorIndex};
use wiki_agent_llm::{
    IntentAnalyzer, OpenAiBackend, OpenAiBackendConfig, ResponsePromptBuilder, Reviewer,
    TokenBucket,
};
use wiki_agent_persistence::{ConversationLocks, SqliteConfig, SqliteStore};
use wiki_agent_quality::QualityAnalyzer;
use wiki_agent_rag::{
    AliasDiscovery, AliasRegistry, CachedEmbedder, HttpEmbedder, HttpEmbedderConfig,
    IngestPipeline, InMemoryVectorIndex, KeywordIndex, QdrantIndex, QdrantIndexConfig, Retriever,
    RetrieverConfig, SectionChunker,
};
use wiki_agent_server::{create_router, spawn_background_workers, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("WIKI_AGENT_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = env.as_deref().unwrap_or("default"),
        "Starting wiki assistant"
    );

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    // Relational store
    let store = SqliteStore::connect(SqliteConfig {
        path: settings.persistence.db_path.clone(),
        max_connections: 5,
    })
    .await?;

    // Embedding client with a process-wide exact-string cache
    let http_embedder = HttpEmbedder::new(HttpEmbedderConfig {
        endpoint: settings.embedding.endpoint.clone(),
        model: settings.embedding.model.clone(),
        dim: settings.embedding.dim,
        batch: settings.embedding.batch,
        max_retries: settings.embedding.max_retries,
        initial_backoff: Duration::from_millis(settings.embedding.initial_backoff_ms),
        warmup_timeout: Duration::from_secs(30),
    })?;
    let embedder: Arc<dyn EmbeddingClient> =
        Arc::new(CachedEmbedder::new(Arc::new(http_embedder)));
    {
        // Model warm-up off the startup path; requests surface their own
        // "loading model" step while this runs
        let embedder = Arc::clone(&embedder);
        tokio::spawn(async move {
            if let Err(error) = embedder.warm().await {
                tracing::warn!(%error, "Embedding warm-up failed");
            } else {
                tracing::info!("Embedding model warm");
            }
        });
    }

    // Vector index: Qdrant, with an in-memory fallback for local runs
    let vector_index: Arc<dyn VectorIndex> = match init_qdrant(&settings).await {
        Ok(index) => {
            tracing::info!(endpoint = %settings.vector_index.endpoint, "Vector index ready");
            index
        }
        Err(error) => {
            tracing::warn!(%error, "Qdrant unavailable, using in-memory vector index");
            Arc::new(InMemoryVectorIndex::new())
        }
    };

    let keyword_index = Arc::new(KeywordIndex::new(None)?);
    let aliases = Arc::new(AliasRegistry::new(settings.alias.expansion_cap));
    if let Err(error) = aliases.reload(&store, settings.alias.min_confidence).await {
        tracing::warn!(%error, "Alias registry initial load failed");
    }

    let retriever = Arc::new(Retriever::new(
        RetrieverConfig::from_settings(&settings.retrieval),
        Arc::clone(&embedder),
        Arc::clone(&vector_index),
        Arc::clone(&keyword_index),
        Arc::clone(&aliases),
        store.clone(),
    ));

    let ingest = IngestPipeline::new(
        store.clone(),
        Arc::clone(&embedder),
        Arc::clone(&vector_index),
        Arc::clone(&keyword_index),
        Arc::clone(&aliases),
        SectionChunker::default(),
        settings.retrieval.clone(),
        settings.alias.min_confidence,
    );

    // Two model instances over one OpenAI-compatible backend
    let intent_backend = Arc::new(OpenAiBackend::new(OpenAiBackendConfig {
        endpoint: settings.llm.endpoint.clone(),
        api_key: settings.llm.api_key.clone(),
        model: settings.llm.intent.model.clone(),
        timeout: Duration::from_secs(settings.timeouts.intent_s * 2),
        ..OpenAiBackendConfig::default()
    })?);
    let main_backend = Arc::new(OpenAiBackend::new(OpenAiBackendConfig {
        endpoint: settings.llm.endpoint.clone(),
        api_key: settings.llm.api_key.clone(),
        model: settings.llm.main.model.clone(),
        timeout: Duration::from_secs(settings.timeouts.total_s),
        ..OpenAiBackendConfig::default()
    })?);

    let deps = OrchestratorDeps {
        store: store.clone(),
        locks: ConversationLocks::new(),
        retriever,
        intent: Arc::new(IntentAnalyzer::new(
            intent_backend.clone(),
            settings.llm.intent.clone(),
        )),
        generator: main_backend,
        reviewer: Some(Arc::new(Reviewer::new(
            intent_backend,
            settings.llm.intent.clone(),
        ))),
        quality: Arc::new(QualityAnalyzer::new()),
        prompts: Arc::new(ResponsePromptBuilder::default()),
        rate_limiter: Arc::new(TokenBucket::new(
            settings.ratelimit.tokens_per_min,
            Duration::from_secs(settings.ratelimit.max_wait_s),
        )),
        discovery: Arc::new(AliasDiscovery::new()),
    };
    let orchestrator = Orchestrator::new(deps, settings.clone());

    let settings_arc = Arc::new(settings.clone());
    spawn_background_workers(Arc::clone(&settings_arc), store.clone(), aliases);

    let state = AppState::new(settings.clone(), store, orchestrator, ingest)
        .with_metrics(metrics_handle);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.bind, settings.server.port).parse()?;
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn init_qdrant(settings: &Settings) -> wiki_agent_core::Result<Arc<dyn VectorIndex>> {
    let index = QdrantIndex::connect(QdrantIndexConfig {
        endpoint: settings.vector_index.endpoint.clone(),
        collection: settings.vector_index.collection.clone(),
        dim: settings.embedding.dim,
        api_key: settings.vector_index.api_key.clone(),
    })
    .await?;
    index.ensure_collection().await?;
    Ok(Arc::new(index))
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

fn init_tracing(settings: &Settings) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("wiki_agent={},tower_http=info", settings.observability.log_level).into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
