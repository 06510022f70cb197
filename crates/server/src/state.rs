//! Shared application state and the capture entry point used by the HTTP
//! surface, the CLI and the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use grantflow_core::{Config, Result, Source};
use grantflow_ingest::{
    adapter_for, normalizer_for, CaptureOrchestrator, CaptureRequest, CaptureStats, Enricher, PdfEnricher,
    SourceAdapter,
};
use grantflow_notify::{BatchReport, DeliveryService, HttpWebhookClient, RetryPolicy};
use grantflow_rules::{ProfileError, ProfileStore};
use grantflow_storage::{DeliveryLog, GrantStore};

pub struct AppState {
    pub config: Config,
    pub grants: Arc<dyn GrantStore>,
    pub log: Arc<dyn DeliveryLog>,
    pub profiles: Arc<ProfileStore>,
    /// `None` when no webhook URL is configured.
    pub delivery: Option<Arc<DeliveryService>>,
    pub enricher: Option<Arc<dyn Enricher>>,
    /// Adapter overrides; sources not listed use the HTTP adapters.
    adapters: HashMap<Source, Arc<dyn SourceAdapter>>,
}

/// Body of a capture response: run counters plus the auto-forward report.
#[derive(Debug, Serialize)]
pub struct CaptureOutcome {
    #[serde(flatten)]
    pub stats: CaptureStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<BatchReport>,
}

impl AppState {
    pub fn new(
        config: Config,
        grants: Arc<dyn GrantStore>,
        log: Arc<dyn DeliveryLog>,
        profiles: Arc<ProfileStore>,
    ) -> Self {
        Self {
            config,
            grants,
            log,
            profiles,
            delivery: None,
            enricher: None,
            adapters: HashMap::new(),
        }
    }

    /// Wire delivery and enrichment from the loaded configuration.
    pub fn from_config(
        config: Config,
        grants: Arc<dyn GrantStore>,
        log: Arc<dyn DeliveryLog>,
        profiles: Arc<ProfileStore>,
    ) -> Self {
        let delivery = match HttpWebhookClient::from_config(&config.delivery) {
            Ok(client) => Some(Arc::new(
                DeliveryService::new(Arc::new(client), Arc::clone(&grants), Arc::clone(&log))
                    .with_policy(RetryPolicy::from_config(&config.delivery))
                    .with_concurrency(config.delivery.batch_concurrency)
                    .with_catch_up(config.delivery.auto_forward),
            )),
            Err(e) => {
                warn!(error = %e, "webhook delivery disabled");
                None
            }
        };
        let enricher: Option<Arc<dyn Enricher>> = config
            .sources
            .process_pdfs
            .then(|| Arc::new(PdfEnricher::new(config.sources.timeout_secs)) as Arc<dyn Enricher>);

        let mut state = Self::new(config, grants, log, profiles);
        state.delivery = delivery;
        state.enricher = enricher;
        state
    }

    pub fn with_delivery(mut self, delivery: Arc<DeliveryService>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    /// Orchestrator for one run, with the source's configured default
    /// profiles and limits.
    pub fn orchestrator(&self, source: Source) -> CaptureOrchestrator {
        let adapter = self
            .adapters
            .get(&source)
            .cloned()
            .unwrap_or_else(|| adapter_for(source, &self.config.sources));

        let mut orchestrator = CaptureOrchestrator::new(
            adapter,
            Arc::from(normalizer_for(source)),
            Arc::clone(&self.grants),
            Arc::clone(&self.profiles),
        )
        .with_default_profiles(self.config.filters.profiles_for(source.prefix()))
        .with_limits(self.config.sources.max_pages, self.config.sources.max_results as usize);

        if let Some(enricher) = &self.enricher {
            orchestrator = orchestrator.with_enricher(Arc::clone(enricher));
        }
        orchestrator
    }

    /// Run one capture and, when auto-forward is on, deliver what it created.
    pub async fn capture(&self, source: Source, request: &CaptureRequest) -> Result<CaptureOutcome> {
        let stats = self.orchestrator(source).run(request).await?;

        let forwarded = match &self.delivery {
            Some(delivery) if self.config.delivery.auto_forward && !stats.new_grant_ids.is_empty() => {
                let report = delivery.forward_captured(&stats.new_grant_ids).await;
                info!(
                    source = %source,
                    delivered = report.successful,
                    retrying = report.retrying,
                    failed = report.failed,
                    "auto-forwarded captured grants"
                );
                Some(report)
            }
            _ => None,
        };

        Ok(CaptureOutcome { stats, forwarded })
    }
}

/// Load the profile document. A missing document is seeded with the
/// built-in profiles and written out so operators have something to edit.
pub fn open_profiles(config: &Config, watch: bool) -> std::result::Result<ProfileStore, ProfileError> {
    let mut store = ProfileStore::new(&config.filters.profiles_path);
    let loaded = store.load()?;
    if loaded == 0 && !store.path().exists() {
        store.init_defaults()?;
    }
    if watch {
        store.watch()?;
    }
    Ok(store)
}
