//! Multi-catalog search: routing, query synthesis, adapters, ranking.

mod civitai;
mod hub;
mod query;
mod ranker;
mod router;

pub use civitai::CivitaiAdapter;
pub use hub::HubAdapter;
pub use query::synthesize_queries;
pub use ranker::ResultRanker;
pub use router::SearchRouter;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::registry::ArtifactKind;
use crate::workflow::ArtifactRef;

/// Symbolic id of the HuggingFace-style catalog.
pub const CATALOG_HUB: &str = "hub";
/// Symbolic id of the Civitai-style catalog.
pub const CATALOG_CIVITAI: &str = "civitai";

/// How strongly a hit matches the requested artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Filename matches exactly.
    Exact,
    /// Filename matches after separator normalization.
    FilenameMatch,
    /// Keyword-set overlap above the floor.
    KeywordMatch,
    /// Related repository, no filename-level evidence.
    Suggestive,
}

/// One candidate from a remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub source_catalog: String,
    /// Repository id or author namespace the hit came from.
    pub repository: String,
    pub display_name: String,
    pub direct_url: String,
    pub size_bytes: Option<u64>,
    pub kind_hint: Option<ArtifactKind>,
    pub confidence: Confidence,
    /// Similarity behind a `KeywordMatch`, 0.0 otherwise.
    pub keyword_score: f32,
}

/// Result of asking one adapter about one artifact.
///
/// Failures travel as values: the ranker consumes this sum and never raises,
/// so one misbehaving catalog can't abort the pipeline.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Hits(Vec<SearchHit>),
    NotFound,
    Transient(String),
    Permanent(String),
    AuthRequired,
    Cancelled,
}

/// A hit with its final ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredHit {
    #[serde(flatten)]
    pub hit: SearchHit,
    /// 1-5 stars.
    pub score: u8,
    pub recommended: bool,
}

/// One artifact with its ordered, deduplicated candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub artifact: ArtifactRef,
    /// Star rating of the best hit; 0 when nothing was found.
    pub rating: u8,
    pub hits: Vec<ScoredHit>,
    /// Top queries that were tried, surfaced when nothing was found so the
    /// caller can supply a manual URL.
    pub suggestions: Vec<String>,
    /// Adapter failures encountered along the way.
    pub errors: Vec<String>,
}

/// A transport client for one remote catalog.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Symbolic id used by the router and the cache key.
    fn id(&self) -> &'static str;

    /// Search the catalog for an artifact, trying the synthesized queries in
    /// order. Must honor the per-call deadline and the cancellation signal.
    async fn search(
        &self,
        filename: &str,
        kind: ArtifactKind,
        queries: &[String],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> SearchOutcome;
}

/// Normalize a query for cache keying.
pub(crate) fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Separator-insensitive filename comparison (extension stripped).
pub(crate) fn filenames_equivalent(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        crate::registry::strip_model_extension(s)
            .to_lowercase()
            .replace(['-', ' ', '.'], "_")
    };
    norm(a) == norm(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  FLUX.1-dev GGUF "), "flux.1-dev gguf");
    }

    #[test]
    fn test_filenames_equivalent() {
        assert!(filenames_equivalent(
            "flux1-dev-Q4_0.gguf",
            "flux1_dev_q4_0.gguf"
        ));
        assert!(filenames_equivalent(
            "Cute 3d Cartoon.safetensors",
            "cute_3d_cartoon.safetensors"
        ));
        assert!(!filenames_equivalent(
            "flux1-dev.safetensors",
            "flux1-schnell.safetensors"
        ));
    }
}
