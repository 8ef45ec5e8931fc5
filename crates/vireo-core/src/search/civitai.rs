//! Civitai-style catalog adapter.
//!
//! Free-text model search with a remote type filter. Each model version may
//! carry several file variants; the one whose filename is closest to the
//! request wins, ties broken by smaller size. Download URLs go through the
//! catalog's version endpoint rather than per-file links.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    filenames_equivalent, normalize_query, CatalogAdapter, Confidence, SearchHit, SearchOutcome,
    CATALOG_CIVITAI,
};
use crate::cache::{self, CacheBackend, NS_SEARCH};
use crate::cancel::CancellationToken;
use crate::keywords;
use crate::registry::ArtifactKind;

const KEYWORD_FLOOR: f32 = 0.5;

#[derive(Debug, Deserialize)]
struct CivitaiPage {
    #[serde(default)]
    items: Vec<CivitaiModel>,
}

#[derive(Debug, Deserialize)]
struct CivitaiModel {
    name: String,
    #[serde(default, rename = "type")]
    model_type: Option<String>,
    #[serde(default)]
    creator: Option<CivitaiCreator>,
    #[serde(default, rename = "modelVersions")]
    versions: Vec<CivitaiVersion>,
}

#[derive(Debug, Deserialize)]
struct CivitaiCreator {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CivitaiVersion {
    id: u64,
    #[serde(default)]
    files: Vec<CivitaiFile>,
}

#[derive(Debug, Deserialize)]
struct CivitaiFile {
    name: String,
    #[serde(default, rename = "sizeKB")]
    size_kb: Option<f64>,
}

/// Adapter for a Civitai-like catalog.
pub struct CivitaiAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache: Option<Arc<dyn CacheBackend>>,
    cache_ttl: Duration,
}

impl CivitaiAdapter {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        cache: Option<Arc<dyn CacheBackend>>,
        cache_ttl: Duration,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            api_key,
            cache,
            cache_ttl,
        }
    }

    /// Remote type filter for an artifact kind, when the catalog has one.
    fn remote_type(kind: ArtifactKind) -> Option<&'static str> {
        match kind {
            ArtifactKind::Lora => Some("LORA"),
            ArtifactKind::Checkpoint => Some("Checkpoint"),
            ArtifactKind::Controlnet => Some("Controlnet"),
            ArtifactKind::Vae => Some("VAE"),
            ArtifactKind::Upscale => Some("Upscaler"),
            _ => None,
        }
    }

    fn kind_hint_of(model_type: Option<&str>) -> Option<ArtifactKind> {
        match model_type? {
            "LORA" | "LoCon" => Some(ArtifactKind::Lora),
            "Checkpoint" => Some(ArtifactKind::Checkpoint),
            "Controlnet" => Some(ArtifactKind::Controlnet),
            "VAE" => Some(ArtifactKind::Vae),
            "Upscaler" => Some(ArtifactKind::Upscale),
            "TextualInversion" => Some(ArtifactKind::Embeddings),
            _ => None,
        }
    }

    fn search_url(&self, query: &str, kind: ArtifactKind) -> String {
        let mut url = format!(
            "{}/api/v1/models?query={}&limit=20&sort=Most%20Downloaded",
            self.base_url,
            urlencoding::encode(query)
        );
        if let Some(remote_type) = Self::remote_type(kind) {
            url.push_str("&types=");
            url.push_str(remote_type);
        }
        url
    }

    /// Catalog download URL for a model version.
    fn download_url(&self, version_id: u64) -> String {
        format!("{}/api/download/models/{}", self.base_url, version_id)
    }

    fn cache_key(&self, query: &str, kind: ArtifactKind) -> String {
        format!("{}:{}:{}", self.id(), kind, normalize_query(query))
    }

    async fn query_once(
        &self,
        query: &str,
        filename: &str,
        kind: ArtifactKind,
        deadline: Duration,
    ) -> Result<Vec<SearchHit>, SearchOutcome> {
        let key = self.cache_key(query, kind);
        if let Some(cache) = self.cache.as_ref() {
            match cache::get_json::<Vec<SearchHit>>(cache.as_ref(), NS_SEARCH, &key) {
                Ok(Some(hits)) => {
                    debug!("Search cache hit for civitai query '{}'", query);
                    return Ok(hits);
                }
                Ok(None) => {}
                Err(e) => warn!("Search cache read failed, querying live: {}", e),
            }
        }

        let mut request = self.client.get(self.search_url(query, kind));
        if let Some(ref api_key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = tokio::time::timeout(deadline, request.send())
            .await
            .map_err(|_| {
                SearchOutcome::Transient(format!("civitai query '{}' timed out", query))
            })?
            .map_err(|e| SearchOutcome::Transient(format!("civitai request failed: {}", e)))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SearchOutcome::AuthRequired)
            }
            StatusCode::NOT_FOUND => return Ok(Vec::new()),
            s if crate::network::is_retryable_status(s) => {
                return Err(SearchOutcome::Transient(format!("civitai returned {}", s)))
            }
            s => return Err(SearchOutcome::Permanent(format!("civitai returned {}", s))),
        }

        let page: CivitaiPage = response.json().await.map_err(|e| {
            SearchOutcome::Transient(format!("civitai response parse failed: {}", e))
        })?;

        let wanted = keywords::extract(filename);
        let mut hits = Vec::new();
        for model in &page.items {
            for version in &model.versions {
                if let Some(hit) = self.version_hit(model, version, filename, &wanted) {
                    hits.push(hit);
                }
            }
        }

        if let Some(cache) = self.cache.as_ref() {
            if let Err(e) =
                cache::set_json(cache.as_ref(), NS_SEARCH, &key, &hits, self.cache_ttl)
            {
                warn!("Failed to cache search results for '{}': {}", query, e);
            }
        }
        Ok(hits)
    }

    /// Hit for one model version, built from its best file variant.
    ///
    /// Variant choice: highest keyword similarity to the requested filename,
    /// ties broken by smaller size.
    fn version_hit(
        &self,
        model: &CivitaiModel,
        version: &CivitaiVersion,
        filename: &str,
        wanted: &[String],
    ) -> Option<SearchHit> {
        let scored: Vec<(&CivitaiFile, f32)> = version
            .files
            .iter()
            .map(|f| {
                let score = keywords::jaccard(wanted, &keywords::extract(&f.name));
                (f, score)
            })
            .collect();

        let (file, score) = scored.iter().copied().max_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Inverted: on equal score the smaller file wins.
                .then_with(|| size_of(b.0).cmp(&size_of(a.0)))
        })?;
        let (confidence, keyword_score) = if file.name.eq_ignore_ascii_case(filename) {
            (Confidence::Exact, 1.0)
        } else if filenames_equivalent(&file.name, filename) {
            (Confidence::FilenameMatch, 1.0)
        } else if score >= KEYWORD_FLOOR {
            (Confidence::KeywordMatch, score)
        } else {
            // No filename-level evidence; the model's display name alone
            // may still suggest the artifact.
            let name_score = keywords::jaccard(wanted, &keywords::extract(&model.name));
            if name_score < KEYWORD_FLOOR {
                return None;
            }
            (Confidence::Suggestive, 0.0)
        };

        let repository = model
            .creator
            .as_ref()
            .and_then(|c| c.username.clone())
            .unwrap_or_else(|| model.name.clone());

        Some(SearchHit {
            source_catalog: CATALOG_CIVITAI.to_string(),
            repository,
            display_name: format!("{} / {}", model.name, file.name),
            direct_url: self.download_url(version.id),
            size_bytes: file.size_kb.map(|kb| (kb * 1024.0) as u64),
            kind_hint: Self::kind_hint_of(model.model_type.as_deref()),
            confidence,
            keyword_score,
        })
    }
}

fn size_of(file: &CivitaiFile) -> u64 {
    file.size_kb.map(|kb| (kb * 1024.0) as u64).unwrap_or(u64::MAX)
}

#[async_trait]
impl CatalogAdapter for CivitaiAdapter {
    fn id(&self) -> &'static str {
        CATALOG_CIVITAI
    }

    async fn search(
        &self,
        filename: &str,
        kind: ArtifactKind,
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

            match self.query_once(query, filename, kind, deadline).await {
                Ok(found) => {
                    let had_exact = found.iter().any(|h| h.confidence == Confidence::Exact);
                    hits.extend(found);
                    if had_exact {
                        break;
                    }
                }
                Err(SearchOutcome::AuthRequired) => return SearchOutcome::AuthRequired,
                Err(failure) => {
                    debug!("Civitai query '{}' failed: {:?}", query, failure);
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

    fn adapter() -> CivitaiAdapter {
        CivitaiAdapter::new(
            Client::new(),
            "https://civitai.com",
            None,
            None,
            Duration::from_secs(60),
        )
    }

    fn version(id: u64, files: &[(&str, Option<f64>)]) -> CivitaiVersion {
        CivitaiVersion {
            id,
            files: files
                .iter()
                .map(|(name, size_kb)| CivitaiFile {
                    name: name.to_string(),
                    size_kb: *size_kb,
                })
                .collect(),
        }
    }

    fn model(name: &str, model_type: &str, versions: Vec<CivitaiVersion>) -> CivitaiModel {
        CivitaiModel {
            name: name.to_string(),
            model_type: Some(model_type.to_string()),
            creator: Some(CivitaiCreator {
                username: Some("mista_creta".to_string()),
            }),
            versions,
        }
    }

    #[test]
    fn test_search_url_includes_type_filter() {
        let url = adapter().search_url("cute 3d cartoon", ArtifactKind::Lora);
        assert!(url.contains("types=LORA"));
        assert!(url.contains("query=cute%203d%20cartoon"));

        let url = adapter().search_url("whatever", ArtifactKind::TextEncoder);
        assert!(!url.contains("types="));
    }

    #[test]
    fn test_download_url_is_version_endpoint() {
        assert_eq!(
            adapter().download_url(987654),
            "https://civitai.com/api/download/models/987654"
        );
    }

    #[test]
    fn test_exact_file_match() {
        let adapter = adapter();
        let model = model(
            "Cute 3D Cartoon",
            "LORA",
            vec![version(42, &[("Cute_3d_Cartoon_Flux.safetensors", Some(140_000.0))])],
        );
        let wanted = keywords::extract("Cute_3d_Cartoon_Flux.safetensors");
        let hit = adapter
            .version_hit(
                &model,
                &model.versions[0],
                "Cute_3d_Cartoon_Flux.safetensors",
                &wanted,
            )
            .unwrap();
        assert_eq!(hit.confidence, Confidence::Exact);
        assert_eq!(hit.direct_url, "https://civitai.com/api/download/models/42");
        assert_eq!(hit.kind_hint, Some(ArtifactKind::Lora));
        assert_eq!(hit.repository, "mista_creta");
    }

    #[test]
    fn test_variant_choice_prefers_similarity_then_smaller() {
        let adapter = adapter();
        let model = model(
            "Pack",
            "LORA",
            vec![version(
                7,
                &[
                    ("bundle_everything.safetensors", Some(10_000.0)),
                    ("cute_cartoon_flux.safetensors", Some(90_000.0)),
                ],
            )],
        );
        let wanted = keywords::extract("cute_cartoon_flux.safetensors");
        let hit = adapter
            .version_hit(
                &model,
                &model.versions[0],
                "cute_cartoon_flux.safetensors",
                &wanted,
            )
            .unwrap();
        assert!(hit.display_name.ends_with("cute_cartoon_flux.safetensors"));

        // Equal similarity: the smaller variant wins.
        let model = model_with_equal_files(&adapter);
        let wanted = keywords::extract("style_pack.safetensors");
        let hit = adapter
            .version_hit(&model, &model.versions[0], "style_pack.safetensors", &wanted)
            .unwrap();
        assert_eq!(hit.size_bytes, Some((64_000.0_f64 * 1024.0) as u64));
    }

    fn model_with_equal_files(_adapter: &CivitaiAdapter) -> CivitaiModel {
        model(
            "Style Pack",
            "LORA",
            vec![version(
                9,
                &[
                    ("style_pack.safetensors", Some(128_000.0)),
                    ("style_pack.safetensors", Some(64_000.0)),
                ],
            )],
        )
    }

    #[test]
    fn test_unrelated_version_skipped() {
        let adapter = adapter();
        let model = model(
            "Something Else",
            "Checkpoint",
            vec![version(5, &[("unrelated_model_weights.safetensors", None)])],
        );
        let wanted = keywords::extract("cute_cartoon_flux.safetensors");
        assert!(adapter
            .version_hit(
                &model,
                &model.versions[0],
                "cute_cartoon_flux.safetensors",
                &wanted
            )
            .is_none());
    }

    #[test]
    fn test_suggestive_from_model_name() {
        let adapter = adapter();
        // Creators often publish under a descriptive listing name while the
        // file itself is version noise.
        let model = model(
            "Cute Cartoon Flux",
            "LORA",
            vec![version(11, &[("v2_final_release.safetensors", Some(140_000.0))])],
        );
        let wanted = keywords::extract("cute_cartoon_flux.safetensors");
        let hit = adapter
            .version_hit(
                &model,
                &model.versions[0],
                "cute_cartoon_flux.safetensors",
                &wanted,
            )
            .unwrap();
        assert_eq!(hit.confidence, Confidence::Suggestive);
        assert_eq!(hit.keyword_score, 0.0);
        assert_eq!(hit.direct_url, "https://civitai.com/api/download/models/11");
    }
}
