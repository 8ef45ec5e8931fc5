//! HuggingFace-style catalog adapter.
//!
//! Queries the models index, inspects each candidate's file listing, and
//! emits hits for exact or keyword-level filename matches. Results are
//! cached per `(adapter, normalized_query)` under the `search` namespace.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    filenames_equivalent, normalize_query, CatalogAdapter, Confidence, SearchHit, SearchOutcome,
    CATALOG_HUB,
};
use crate::cache::{self, CacheBackend, NS_SEARCH};
use crate::cancel::CancellationToken;
use crate::keywords;
use crate::registry::{has_model_extension, ArtifactKind};

/// Keyword-overlap floor below which a sibling is not worth reporting.
const KEYWORD_FLOOR: f32 = 0.5;

/// Model entry from the hub's search index.
#[derive(Debug, Deserialize)]
struct HubModel {
    #[serde(rename = "modelId")]
    model_id: String,
    #[serde(default)]
    siblings: Vec<HubSibling>,
}

/// File entry within a model repository.
#[derive(Debug, Deserialize)]
struct HubSibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Adapter for a HuggingFace-like catalog.
pub struct HubAdapter {
    client: Client,
    base_url: String,
    token: Option<String>,
    cache: Option<Arc<dyn CacheBackend>>,
    cache_ttl: Duration,
}

impl HubAdapter {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        token: Option<String>,
        cache: Option<Arc<dyn CacheBackend>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            client,
            base_url: trim_base(base_url.into()),
            token,
            cache,
            cache_ttl,
        }
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/api/models?search={}&full=true&limit=20",
            self.base_url,
            urlencoding::encode(query)
        )
    }

    /// Direct download URL for a file inside a repository.
    fn resolve_url(&self, repo_id: &str, filename: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.base_url, repo_id, filename)
    }

    fn cache_key(&self, query: &str) -> String {
        format!("{}:{}", self.id(), normalize_query(query))
    }

    fn cached_hits(&self, query: &str) -> Option<Vec<SearchHit>> {
        let cache = self.cache.as_ref()?;
        match cache::get_json::<Vec<SearchHit>>(cache.as_ref(), NS_SEARCH, &self.cache_key(query)) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Search cache read failed, querying live: {}", e);
                None
            }
        }
    }

    fn store_hits(&self, query: &str, hits: &[SearchHit]) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache::set_json(
            cache.as_ref(),
            NS_SEARCH,
            &self.cache_key(query),
            &hits.to_vec(),
            self.cache_ttl,
        ) {
            warn!("Failed to cache search results for '{}': {}", query, e);
        }
    }

    /// Run one query against the index and collect matching hits.
    async fn query_once(
        &self,
        query: &str,
        filename: &str,
        deadline: Duration,
    ) -> Result<Vec<SearchHit>, SearchOutcome> {
        if let Some(hits) = self.cached_hits(query) {
            debug!("Search cache hit for hub query '{}'", query);
            return Ok(hits);
        }

        let mut request = self.client.get(self.search_url(query));
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = tokio::time::timeout(deadline, request.send())
            .await
            .map_err(|_| SearchOutcome::Transient(format!("hub query '{}' timed out", query)))?
            .map_err(|e| SearchOutcome::Transient(format!("hub request failed: {}", e)))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SearchOutcome::AuthRequired)
            }
            StatusCode::NOT_FOUND => return Ok(Vec::new()),
            s if crate::network::is_retryable_status(s) => {
                return Err(SearchOutcome::Transient(format!("hub returned {}", s)))
            }
            s => return Err(SearchOutcome::Permanent(format!("hub returned {}", s))),
        }

        let models: Vec<HubModel> = response
            .json()
            .await
            .map_err(|e| SearchOutcome::Transient(format!("hub response parse failed: {}", e)))?;

        let wanted = keywords::extract(filename);
        let mut hits = Vec::new();

        for model in &models {
            if let Some(hit) = self.best_sibling_hit(model, filename, &wanted) {
                hits.push(hit);
            }
        }

        self.store_hits(query, &hits);
        Ok(hits)
    }

    /// Best hit within one repository's file list, if any.
    fn best_sibling_hit(
        &self,
        model: &HubModel,
        filename: &str,
        wanted: &[String],
    ) -> Option<SearchHit> {
        let mut best: Option<SearchHit> = None;

        for sibling in &model.siblings {
            let candidate_name = sibling.rfilename.rsplit('/').next().unwrap_or("");

            let (confidence, keyword_score) =
                if candidate_name.eq_ignore_ascii_case(filename) {
                    (Confidence::Exact, 1.0)
                } else if filenames_equivalent(candidate_name, filename) {
                    (Confidence::FilenameMatch, 1.0)
                } else {
                    let score = keywords::jaccard(wanted, &keywords::extract(candidate_name));
                    if score < KEYWORD_FLOOR {
                        continue;
                    }
                    (Confidence::KeywordMatch, score)
                };

            let hit = SearchHit {
                source_catalog: CATALOG_HUB.to_string(),
                repository: model.model_id.clone(),
                display_name: sibling.rfilename.clone(),
                direct_url: self.resolve_url(&model.model_id, &sibling.rfilename),
                size_bytes: sibling.size,
                kind_hint: None,
                confidence,
                keyword_score,
            };

            let better = match &best {
                None => true,
                Some(current) => hit_rank(&hit) > hit_rank(current),
            };
            if better {
                best = Some(hit);
            }
        }

        if best.is_none() {
            best = self.repository_level_hit(model, wanted);
        }
        best
    }

    /// Repository-level fallback: no file matched by name, but the repo
    /// name itself overlaps the requested keywords. The largest model file
    /// stands in as the link.
    fn repository_level_hit(&self, model: &HubModel, wanted: &[String]) -> Option<SearchHit> {
        let repo_name = model
            .model_id
            .rsplit('/')
            .next()
            .unwrap_or(&model.model_id);
        let repo_score = keywords::jaccard(wanted, &keywords::extract(repo_name));
        if repo_score < KEYWORD_FLOOR {
            return None;
        }

        let sibling = model
            .siblings
            .iter()
            .filter(|s| has_model_extension(&s.rfilename))
            .max_by_key(|s| s.size.unwrap_or(0))?;

        Some(SearchHit {
            source_catalog: CATALOG_HUB.to_string(),
            repository: model.model_id.clone(),
            display_name: sibling.rfilename.clone(),
            direct_url: self.resolve_url(&model.model_id, &sibling.rfilename),
            size_bytes: sibling.size,
            kind_hint: None,
            confidence: Confidence::Suggestive,
            keyword_score: 0.0,
        })
    }
}

fn hit_rank(hit: &SearchHit) -> (u8, f32) {
    let confidence = match hit.confidence {
        Confidence::Exact => 3,
        Confidence::FilenameMatch => 2,
        Confidence::KeywordMatch => 1,
        Confidence::Suggestive => 0,
    };
    (confidence, hit.keyword_score)
}

fn trim_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

#[async_trait]
impl CatalogAdapter for HubAdapter {
    fn id(&self) -> &'static str {
        CATALOG_HUB
    }

    async fn search(
        &self,
        filename: &str,
        _kind: ArtifactKind,
        queries: &[String],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> SearchOutcome {
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut last_failure: Option<SearchOutcome> = None;

        for query in queries {
            if cancel.is_cancelled() {
                return SearchOutcome::Cancelled;
            }

            match self.query_once(query, filename, deadline).await {
                Ok(found) => {
                    let had_exact = found.iter().any(|h| h.confidence == Confidence::Exact);
                    hits.extend(found);
                    if had_exact {
                        break;
                    }
                }
                Err(SearchOutcome::AuthRequired) => return SearchOutcome::AuthRequired,
                Err(failure) => {
                    debug!("Hub query '{}' failed: {:?}", query, failure);
                    last_failure = Some(failure);
                }
            }
        }

        if !hits.is_empty() {
            SearchOutcome::Hits(hits)
        } else if let Some(failure) = last_failure {
            failure
        } else {
            SearchOutcome::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> HubAdapter {
        HubAdapter::new(
            Client::new(),
            "https://huggingface.co/",
            None,
            None,
            Duration::from_secs(60),
        )
    }

    fn model(repo: &str, files: &[(&str, Option<u64>)]) -> HubModel {
        HubModel {
            model_id: repo.to_string(),
            siblings: files
                .iter()
                .map(|(name, size)| HubSibling {
                    rfilename: name.to_string(),
                    size: *size,
                })
                .collect(),
        }
    }

    #[test]
    fn test_resolve_url_pattern() {
        let url = adapter().resolve_url("city96/FLUX.1-dev-gguf", "flux1-dev-Q4_0.gguf");
        assert_eq!(
            url,
            "https://huggingface.co/city96/FLUX.1-dev-gguf/resolve/main/flux1-dev-Q4_0.gguf"
        );
    }

    #[test]
    fn test_exact_sibling_match() {
        let adapter = adapter();
        let model = model(
            "city96/FLUX.1-dev-gguf",
            &[
                ("flux1-dev-Q4_0.gguf", Some(6_900_000_000)),
                ("flux1-dev-Q8_0.gguf", Some(12_000_000_000)),
            ],
        );
        let wanted = keywords::extract("flux1-dev-Q4_0.gguf");
        let hit = adapter
            .best_sibling_hit(&model, "flux1-dev-Q4_0.gguf", &wanted)
            .unwrap();
        assert_eq!(hit.confidence, Confidence::Exact);
        assert_eq!(hit.repository, "city96/FLUX.1-dev-gguf");
        assert!(hit.direct_url.ends_with("/resolve/main/flux1-dev-Q4_0.gguf"));
    }

    #[test]
    fn test_separator_variant_is_filename_match() {
        let adapter = adapter();
        let model = model("acme/models", &[("flux1_dev_q4_0.gguf", None)]);
        let wanted = keywords::extract("flux1-dev-Q4_0.gguf");
        let hit = adapter
            .best_sibling_hit(&model, "flux1-dev-Q4_0.gguf", &wanted)
            .unwrap();
        assert_eq!(hit.confidence, Confidence::FilenameMatch);
    }

    #[test]
    fn test_weak_overlap_filtered() {
        let adapter = adapter();
        let model = model("acme/models", &[("totally_unrelated_weights.safetensors", None)]);
        let wanted = keywords::extract("flux1-dev-Q4_0.gguf");
        assert!(adapter
            .best_sibling_hit(&model, "flux1-dev-Q4_0.gguf", &wanted)
            .is_none());
    }

    #[test]
    fn test_suggestive_repository_fallback() {
        let adapter = adapter();
        // The repo name matches the request but its files are shard-named,
        // so no sibling carries filename-level evidence.
        let model = model(
            "city96/FLUX.1-dev-gguf",
            &[
                ("model-00001-of-00002.gguf", Some(4_000_000_000)),
                ("model-00002-of-00002.gguf", Some(2_900_000_000)),
                ("README.md", None),
            ],
        );
        let wanted = keywords::extract("flux1-dev-Q4_0.gguf");
        let hit = adapter
            .best_sibling_hit(&model, "flux1-dev-Q4_0.gguf", &wanted)
            .unwrap();
        assert_eq!(hit.confidence, Confidence::Suggestive);
        // The largest model file stands in as the link.
        assert_eq!(hit.display_name, "model-00001-of-00002.gguf");
        assert!(hit.direct_url.ends_with("/resolve/main/model-00001-of-00002.gguf"));
    }

    #[test]
    fn test_suggestive_needs_repo_overlap() {
        let adapter = adapter();
        let model = model("acme/cat-pictures", &[("weights-00001.gguf", Some(100))]);
        let wanted = keywords::extract("flux1-dev-Q4_0.gguf");
        assert!(adapter
            .best_sibling_hit(&model, "flux1-dev-Q4_0.gguf", &wanted)
            .is_none());
    }

    #[test]
    fn test_sibling_path_uses_last_component() {
        let adapter = adapter();
        let model = model("acme/models", &[("subdir/ae.safetensors", Some(100))]);
        let wanted = keywords::extract("ae.safetensors");
        let hit = adapter
            .best_sibling_hit(&model, "ae.safetensors", &wanted)
            .unwrap();
        assert_eq!(hit.confidence, Confidence::Exact);
        assert!(hit.direct_url.ends_with("/resolve/main/subdir/ae.safetensors"));
    }
}
