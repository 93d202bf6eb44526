//! Application state
//!
//! Shared across all handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use wiki_agent_agent::Orchestrator;
use wiki_agent_config::Settings;
use wiki_agent_persistence::SqliteStore;
use wiki_agent_rag::IngestPipeline;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: SqliteStore,
    pub orchestrator: Arc<Orchestrator>,
    pub ingest: Arc<IngestPipeline>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: SqliteStore,
        orchestrator: Orchestrator,
        ingest: IngestPipeline,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
            orchestrator: Arc::new(orchestrator),
            ingest: Arc::new(ingest),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
