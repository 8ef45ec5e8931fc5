//! Vireo Core - Headless resolution pipeline for workflow model dependencies.
//!
//! Given a node-graph workflow document, this crate extracts the model
//! artifacts it references, checks which are already on disk, searches
//! remote catalogs for the missing ones, and manages their download into
//! kind-specific directories. It can be used programmatically without any
//! HTTP/RPC layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use vireo_core::{Resolver, ResolverConfig};
//!
//! #[tokio::main]
//! async fn main() -> vireo_core::Result<()> {
//!     let resolver = Resolver::new(ResolverConfig::default())?;
//!
//!     let document: serde_json::Value =
//!         serde_json::from_str(&std::fs::read_to_string("workflow.json")?)?;
//!     let report = resolver.resolve(&document).await?;
//!     println!(
//!         "{} artifacts, {} missing",
//!         report.summary.total, report.summary.missing
//!     );
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod download;
pub mod error;
pub mod inventory;
pub mod keywords;
pub mod network;
pub mod registry;
pub mod search;
pub mod workflow;

pub use cache::{CacheBackend, CacheStats, SqliteCache};
pub use cancel::CancellationToken;
pub use config::ResolverConfig;
pub use download::{
    DownloadManager, DownloadSpec, ProgressEvent, QueueStatus, TaskSnapshot, TaskStatus,
};
pub use error::{Result, VireoError};
pub use inventory::{LocalInventory, LocalModel, MatchResult, MatchStatus};
pub use registry::ArtifactKind;
pub use search::{
    CatalogAdapter, Confidence, RankedCandidate, ScoredHit, SearchHit, SearchOutcome,
};
pub use workflow::{ArtifactRef, DetectionStrategy};

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::info;

use download::AuthRules;
use inventory::match_artifact;
use search::{
    synthesize_queries, CivitaiAdapter, HubAdapter, ResultRanker, SearchRouter,
};

/// Full pipeline output for one workflow document.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub refs: Vec<ArtifactRef>,
    pub matches: Vec<MatchResult>,
    /// Ranked catalog candidates for the missing artifacts, in ref order.
    pub candidates: Vec<RankedCandidate>,
    pub summary: ResolutionSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSummary {
    pub total: usize,
    pub present: usize,
    pub partial: usize,
    pub missing: usize,
    /// Missing artifacts for which at least one catalog hit was found.
    pub with_hits: usize,
}

/// The resolver core: one value constructed from configuration and passed
/// explicitly wherever it is needed.
pub struct Resolver {
    config: ResolverConfig,
    cache: Arc<dyn CacheBackend>,
    inventory: LocalInventory,
    router: SearchRouter,
    ranker: ResultRanker,
    adapters: Vec<Arc<dyn CatalogAdapter>>,
    downloads: DownloadManager,
    cancel: CancellationToken,
    search_gate: Arc<Semaphore>,
}

impl Resolver {
    /// Build a resolver from configuration.
    ///
    /// Must be called within a tokio runtime: the download worker pool is
    /// spawned here.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        config.validate()?;

        let cache: Arc<dyn CacheBackend> = Arc::new(SqliteCache::new(
            config.paths.cache_dir.join("vireo.sqlite"),
        )?);

        let inventory = LocalInventory::new(cache.clone(), config.inventory_ttl());
        let router = SearchRouter::new(config.router.official_prefixes.clone());
        let ranker = ResultRanker::new(config.router.curated_authors.clone());

        let api_client = network::build_api_client(config.search_timeout())?;
        let adapters: Vec<Arc<dyn CatalogAdapter>> = vec![
            Arc::new(HubAdapter::new(
                api_client.clone(),
                config.hub.base_url.clone(),
                config.hub.token.clone(),
                Some(cache.clone()),
                config.search_ttl(),
            )),
            Arc::new(CivitaiAdapter::new(
                api_client,
                config.civitai.base_url.clone(),
                config.civitai.api_key.clone(),
                Some(cache.clone()),
                config.search_ttl(),
            )),
        ];

        let cancel = CancellationToken::new();
        let downloads = DownloadManager::new(
            config.download.clone(),
            AuthRules::from_config(&config.hub, &config.civitai),
            cancel.clone(),
        )?;
        let search_gate = Arc::new(Semaphore::new(config.search.concurrency));

        Ok(Self {
            config,
            cache,
            inventory,
            router,
            ranker,
            adapters,
            downloads,
            cancel,
            search_gate,
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Extract the artifact references from a workflow document and refine
    /// each kind from its filename.
    ///
    /// The filename overrides run exactly once, here; downstream stages
    /// consume the refined kinds as-is.
    pub fn analyze(&self, document: &Value) -> Result<Vec<ArtifactRef>> {
        let mut refs = workflow::analyze(document)?;
        for r in &mut refs {
            r.kind = classify::refine_kind(&r.filename, r.kind);
        }
        info!("Workflow analysis found {} artifact reference(s)", refs.len());
        Ok(refs)
    }

    /// Match artifact references against the local inventory.
    pub fn match_refs(&self, refs: &[ArtifactRef]) -> Result<Vec<MatchResult>> {
        self.inventory.index(&self.config.paths.models_root)?;
        let threshold = self.config.matching.fuzzy_threshold;
        Ok(refs
            .iter()
            .map(|r| {
                match_artifact(
                    &self.inventory,
                    r,
                    self.config.subdir_for(r.kind),
                    threshold,
                )
            })
            .collect())
    }

    /// Search remote catalogs for the given artifacts.
    ///
    /// Output order matches input order. `enabled_catalogs` restricts the
    /// routed catalog list when given. Adapter failures are attached to the
    /// candidates; the result always has one entry per input.
    pub async fn search(
        &self,
        refs: &[ArtifactRef],
        enabled_catalogs: Option<&[String]>,
    ) -> Vec<RankedCandidate> {
        let futures = refs
            .iter()
            .map(|r| self.search_one(r, enabled_catalogs));
        futures::future::join_all(futures).await
    }

    async fn search_one(
        &self,
        artifact: &ArtifactRef,
        enabled_catalogs: Option<&[String]>,
    ) -> RankedCandidate {
        let route = self.router.route(artifact);
        let catalogs: Vec<&str> = route
            .into_iter()
            .filter(|id| {
                enabled_catalogs
                    .map(|enabled| enabled.iter().any(|e| e == id))
                    .unwrap_or(true)
            })
            .collect();

        let mut outcomes: Vec<(String, SearchOutcome)> = Vec::new();
        let mut queries_tried: Vec<String> = Vec::new();

        for catalog_id in catalogs {
            let Some(adapter) = self.adapters.iter().find(|a| a.id() == catalog_id) else {
                continue;
            };

            let queries = synthesize_queries(
                &artifact.filename,
                adapter.id(),
                &self.config.router.curated_authors,
            );
            for q in &queries {
                if !queries_tried.contains(q) {
                    queries_tried.push(q.clone());
                }
            }

            let outcome = {
                let _permit = self
                    .search_gate
                    .acquire()
                    .await
                    .expect("search gate closed");
                adapter
                    .search(
                        &artifact.filename,
                        artifact.kind,
                        &queries,
                        self.config.search_timeout(),
                        &self.cancel,
                    )
                    .await
            };

            let exact_found = matches!(
                &outcome,
                SearchOutcome::Hits(hits)
                    if hits.iter().any(|h| h.confidence == Confidence::Exact)
            );
            outcomes.push((catalog_id.to_string(), outcome));

            // An exact hit on the primary catalog makes the rest redundant.
            if exact_found {
                break;
            }
        }

        self.ranker
            .rank(artifact.clone(), outcomes, &queries_tried)
    }

    /// Turn chosen candidates into download specs.
    ///
    /// `per_artifact_choice` maps a filename to the chosen hit's direct URL;
    /// unlisted artifacts take the recommended (first) hit. Zero-hit
    /// candidates are skipped.
    pub fn plan(
        &self,
        candidates: &[RankedCandidate],
        per_artifact_choice: &HashMap<String, String>,
    ) -> Vec<DownloadSpec> {
        candidates
            .iter()
            .filter_map(|candidate| {
                let chosen = match per_artifact_choice.get(&candidate.artifact.filename) {
                    Some(url) => candidate.hits.iter().find(|h| &h.hit.direct_url == url),
                    None => candidate.hits.first(),
                }?;
                Some(self.spec_for(
                    &candidate.artifact.filename,
                    candidate.artifact.kind,
                    &chosen.hit.direct_url,
                    chosen.hit.size_bytes,
                ))
            })
            .collect()
    }

    /// Build a download spec from a caller-supplied URL, bypassing search.
    pub fn plan_manual(&self, filename: &str, kind: ArtifactKind, url: &str) -> DownloadSpec {
        self.spec_for(filename, kind, url, None)
    }

    fn spec_for(
        &self,
        filename: &str,
        kind: ArtifactKind,
        url: &str,
        expected_size: Option<u64>,
    ) -> DownloadSpec {
        DownloadSpec {
            filename: filename.to_string(),
            kind,
            source_url: url.to_string(),
            target_path: self.config.target_path(kind, filename),
            expected_size,
        }
    }

    /// Run the full pipeline: analyze, match locally, search catalogs for
    /// whatever is missing.
    ///
    /// Partial matches are surfaced but not searched and never downloaded;
    /// that decision belongs to the caller.
    pub async fn resolve(&self, document: &Value) -> Result<ResolutionReport> {
        let refs = self.analyze(document)?;
        let matches = self.match_refs(&refs)?;

        let missing: Vec<ArtifactRef> = refs
            .iter()
            .zip(&matches)
            .filter(|(_, m)| m.status == MatchStatus::Missing)
            .map(|(r, _)| r.clone())
            .collect();

        let candidates = self.search(&missing, None).await;

        let summary = ResolutionSummary {
            total: refs.len(),
            present: matches
                .iter()
                .filter(|m| m.status == MatchStatus::Present)
                .count(),
            partial: matches
                .iter()
                .filter(|m| m.status == MatchStatus::Partial)
                .count(),
            missing: missing.len(),
            with_hits: candidates.iter().filter(|c| !c.hits.is_empty()).count(),
        };

        info!(
            "Resolution: {} total, {} present, {} partial, {} missing ({} with hits)",
            summary.total, summary.present, summary.partial, summary.missing, summary.with_hits
        );

        Ok(ResolutionReport {
            refs,
            matches,
            candidates,
            summary,
        })
    }

    /// The download manager for this resolver.
    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats()
    }

    /// Clear one cache namespace, or everything.
    pub fn cache_clear(&self, namespace: Option<&str>) -> Result<usize> {
        self.cache.clear(namespace)
    }

    /// Propagate cancellation to adapters, scans, and downloads.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }
}
