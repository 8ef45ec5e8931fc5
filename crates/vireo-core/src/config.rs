//! Typed configuration for the resolver core.
//!
//! Parsing from YAML/env lives outside the core: configuration enters as a
//! deserialized [`ResolverConfig`] value. Every default the pipeline relies
//! on ships here explicitly rather than as hidden constants.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VireoError};
use crate::registry::ArtifactKind;

/// Complete configuration consumed by [`crate::Resolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub paths: PathsConfig,
    /// Subdirectory under `models_root` for each artifact kind.
    pub subdirs: BTreeMap<ArtifactKind, String>,
    pub hub: HubConfig,
    pub civitai: CivitaiConfig,
    pub search: SearchConfig,
    pub download: DownloadConfig,
    pub cache: CacheConfig,
    pub router: RouterConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory scanned by the local inventory and used as target parent.
    pub models_root: PathBuf,
    /// Directory holding the persisted cache database.
    pub cache_dir: PathBuf,
}

/// HuggingFace-style catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub base_url: String,
    pub token: Option<String>,
}

/// Civitai-style catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CivitaiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Concurrency gate for catalog adapter calls.
    pub concurrency: usize,
    /// Per-request deadline in seconds.
    pub timeout_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub concurrency: usize,
    /// Retries after the first attempt, for transient failures.
    pub retries: u32,
    pub chunk_bytes: usize,
    pub per_task_timeout_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub search_ttl_s: u64,
    pub inventory_ttl_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Authors whose hits earn the +1 trust bonus, in priority order.
    pub curated_authors: Vec<String>,
    /// Filename prefixes treated as official checkpoints.
    pub official_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Similarity cutoff for fuzzy local matches.
    pub fuzzy_threshold: f32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            subdirs: default_subdirs(),
            hub: HubConfig::default(),
            civitai: CivitaiConfig::default(),
            search: SearchConfig::default(),
            download: DownloadConfig::default(),
            cache: CacheConfig::default(),
            router: RouterConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_root: PathBuf::from("/workspace/comfyui/models"),
            cache_dir: PathBuf::from("/workspace/comfyui/cache"),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://huggingface.co".to_string(),
            token: None,
        }
    }
}

impl Default for CivitaiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://civitai.com".to_string(),
            api_key: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout_s: 30,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retries: 3,
            chunk_bytes: 4 * 1024 * 1024,
            per_task_timeout_s: 3600,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_s: 24 * 60 * 60,
            inventory_ttl_s: 5 * 60,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            curated_authors: vec!["city96".to_string(), "Kijai".to_string()],
            official_prefixes: vec![
                "flux1-dev".to_string(),
                "flux1-schnell".to_string(),
                "sdxl-base".to_string(),
                "sd_xl_base".to_string(),
                "stable-diffusion-".to_string(),
            ],
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.7,
        }
    }
}

fn default_subdirs() -> BTreeMap<ArtifactKind, String> {
    ArtifactKind::all()
        .iter()
        .filter(|k| **k != ArtifactKind::Unknown)
        .map(|k| (*k, k.default_subdir().to_string()))
        .collect()
}

impl ResolverConfig {
    /// Validate the effective configuration.
    ///
    /// Invalid configuration aborts the whole pipeline; nothing else does.
    pub fn validate(&self) -> Result<()> {
        if !self.paths.models_root.is_absolute() {
            return Err(VireoError::InvalidConfig {
                message: format!(
                    "paths.models_root must be absolute, got {}",
                    self.paths.models_root.display()
                ),
            });
        }
        if !self.paths.cache_dir.is_absolute() {
            return Err(VireoError::InvalidConfig {
                message: format!(
                    "paths.cache_dir must be absolute, got {}",
                    self.paths.cache_dir.display()
                ),
            });
        }
        if self.search.concurrency == 0 {
            return Err(VireoError::InvalidConfig {
                message: "search.concurrency must be at least 1".to_string(),
            });
        }
        if self.download.concurrency == 0 {
            return Err(VireoError::InvalidConfig {
                message: "download.concurrency must be at least 1".to_string(),
            });
        }
        if self.download.chunk_bytes == 0 {
            return Err(VireoError::InvalidConfig {
                message: "download.chunk_bytes must be non-zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.matching.fuzzy_threshold) {
            return Err(VireoError::InvalidConfig {
                message: format!(
                    "matching.fuzzy_threshold must be within [0, 1], got {}",
                    self.matching.fuzzy_threshold
                ),
            });
        }
        Ok(())
    }

    /// Subdirectory name for a kind, falling back to the built-in default.
    pub fn subdir_for(&self, kind: ArtifactKind) -> &str {
        self.subdirs
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_subdir())
    }

    /// Target path for an artifact: `models_root / subdirs[kind] / filename`.
    pub fn target_path(&self, kind: ArtifactKind, filename: &str) -> PathBuf {
        self.paths
            .models_root
            .join(self.subdir_for(kind))
            .join(filename)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search.timeout_s)
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.search_ttl_s)
    }

    pub fn inventory_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.inventory_ttl_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResolverConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_default_subdir_map() {
        let config = ResolverConfig::default();
        assert_eq!(config.subdir_for(ArtifactKind::Lora), "loras");
        assert_eq!(config.subdir_for(ArtifactKind::TextEncoder), "text_encoders");
        assert_eq!(config.subdir_for(ArtifactKind::Upscale), "upscale_models");
    }

    #[test]
    fn test_target_path() {
        let config = ResolverConfig::default();
        let path = config.target_path(ArtifactKind::Lora, "Cute_3d_Cartoon_Flux.safetensors");
        assert!(path.ends_with("loras/Cute_3d_Cartoon_Flux.safetensors"));
    }

    #[test]
    fn test_relative_root_rejected() {
        let mut config = ResolverConfig::default();
        config.paths.models_root = PathBuf::from("relative/models");
        assert!(matches!(
            config.validate(),
            Err(VireoError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = ResolverConfig::default();
        config.matching.fuzzy_threshold = 1.5;
        assert!(config.validate().is_err());
        config.matching.fuzzy_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "paths": { "models_root": "/data/models", "cache_dir": "/data/cache" },
            "router": { "curated_authors": ["city96"] }
        }"#;
        let config: ResolverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.paths.models_root, PathBuf::from("/data/models"));
        assert_eq!(config.router.curated_authors, vec!["city96"]);
        // Unspecified sections keep their defaults.
        assert_eq!(config.search.concurrency, 5);
        assert_eq!(config.download.concurrency, 3);
    }
}
