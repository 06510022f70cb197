//! Grant capture from the three public sources.
//!
//! - [`source`]: per-source adapters yielding pages of raw records
//! - [`normalize`]: raw record → [`GrantDraft`](grantflow_core::GrantDraft)
//! - [`capture`]: page loop, scoring, persistence and run statistics
//! - [`enrich`]: optional document text extraction for accepted drafts

pub mod capture;
pub mod enrich;
pub mod normalize;
pub mod source;

use std::sync::Arc;

use grantflow_core::config::SourcesConfig;
use grantflow_core::Source;

pub use capture::{CaptureOrchestrator, CaptureRequest, CaptureStats};
pub use enrich::{Enricher, PdfEnricher};
pub use normalize::{normalizer_for, Normalizer};
pub use source::{Cursor, FetchWindow, SourceAdapter, SourcePage};

/// Adapter for `source` built from the source settings.
pub fn adapter_for(source: Source, config: &SourcesConfig) -> Arc<dyn SourceAdapter> {
    match source {
        Source::Gazette => Arc::new(source::GazetteAdapter::from_config(config)),
        Source::SubsidyDb => Arc::new(source::SubsidyAdapter::from_config(config)),
        Source::Procurement => Arc::new(source::ProcurementAdapter::from_config(config)),
    }
}
