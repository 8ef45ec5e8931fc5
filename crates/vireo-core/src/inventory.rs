//! Local model inventory: disk scan, exact and fuzzy lookup, matching.
//!
//! The scan result is cached under the `inventory` namespace keyed by the
//! absolute root, so repeated resolutions within the TTL don't re-walk the
//! model tree. Readers never block a refresh: the in-memory index is an
//! `Arc` snapshot replaced atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{self, CacheBackend, NS_INVENTORY};
use crate::error::Result;
use crate::keywords;
use crate::registry::{has_model_extension, ArtifactKind};
use crate::workflow::ArtifactRef;

/// A model file discovered on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModel {
    pub absolute_path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// First path component under the scan root; empty for root-level files.
    pub subdirectory: String,
    pub keywords: Vec<String>,
}

/// Serialized scan result, as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScanResult {
    root: PathBuf,
    models: Vec<LocalModel>,
    skipped: Vec<PathBuf>,
}

/// In-memory index over a scan result.
struct IndexState {
    models: Vec<LocalModel>,
    /// Lowercased filename -> index into `models`.
    by_name: HashMap<String, usize>,
    skipped: Vec<PathBuf>,
}

impl IndexState {
    fn from_scan(scan: ScanResult) -> Self {
        let mut by_name = HashMap::with_capacity(scan.models.len());
        for (i, model) in scan.models.iter().enumerate() {
            by_name.insert(model.filename.to_lowercase(), i);
        }
        Self {
            models: scan.models,
            by_name,
            skipped: scan.skipped,
        }
    }
}

/// Local inventory over one models root.
pub struct LocalInventory {
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
    index: RwLock<Option<Arc<IndexState>>>,
}

impl LocalInventory {
    pub fn new(cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            index: RwLock::new(None),
        }
    }

    /// Scan `root` recursively, indexing every regular file with a
    /// recognized model extension. Returns the number of models indexed.
    ///
    /// A cached scan within the TTL is reused. Unreadable subtrees are
    /// skipped and recorded; scanning itself is infallible at the top level.
    pub fn index(&self, root: &Path) -> Result<usize> {
        let key = root.to_string_lossy().to_string();

        let scan = match cache::get_json::<ScanResult>(self.cache.as_ref(), NS_INVENTORY, &key)? {
            Some(cached) => {
                debug!("Inventory cache hit for {}", root.display());
                cached
            }
            None => {
                let scan = scan_root(root);
                info!(
                    "Indexed {} model file(s) under {} ({} subtree(s) skipped)",
                    scan.models.len(),
                    root.display(),
                    scan.skipped.len()
                );
                if let Err(e) =
                    cache::set_json(self.cache.as_ref(), NS_INVENTORY, &key, &scan, self.ttl)
                {
                    warn!("Failed to cache inventory scan: {}", e);
                }
                scan
            }
        };

        let state = Arc::new(IndexState::from_scan(scan));
        let count = state.models.len();
        *self.index.write().expect("inventory lock poisoned") = Some(state);
        Ok(count)
    }

    /// Whether an index has been built in this process.
    pub fn is_indexed(&self) -> bool {
        self.index.read().expect("inventory lock poisoned").is_some()
    }

    /// Paths skipped by the last scan because they were unreadable.
    pub fn skipped(&self) -> Vec<PathBuf> {
        self.snapshot()
            .map(|s| s.skipped.clone())
            .unwrap_or_default()
    }

    /// Case-insensitive exact filename lookup.
    pub fn lookup_exact(&self, filename: &str) -> Option<LocalModel> {
        let state = self.snapshot()?;
        state
            .by_name
            .get(&filename.to_lowercase())
            .map(|&i| state.models[i].clone())
    }

    /// Best fuzzy match over stored keywords.
    ///
    /// When `subdirectory` is given, only models in that subdirectory are
    /// considered. Returns the best hit with similarity >= `threshold`.
    pub fn lookup_fuzzy(
        &self,
        keywords: &[String],
        subdirectory: Option<&str>,
        threshold: f32,
    ) -> Option<(LocalModel, f32)> {
        let state = self.snapshot()?;

        let mut best: Option<(usize, f32)> = None;
        for (i, model) in state.models.iter().enumerate() {
            if let Some(subdir) = subdirectory {
                if model.subdirectory != subdir {
                    continue;
                }
            }
            let score = keywords::jaccard(keywords, &model.keywords);
            if score >= threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        best.map(|(i, score)| (state.models[i].clone(), score))
    }

    fn snapshot(&self) -> Option<Arc<IndexState>> {
        self.index
            .read()
            .expect("inventory lock poisoned")
            .clone()
    }
}

fn scan_root(root: &Path) -> ScanResult {
    let mut models = Vec::new();
    let mut skipped = Vec::new();
    scan_dir(root, root, &mut models, &mut skipped);
    ScanResult {
        root: root.to_path_buf(),
        models,
        skipped,
    }
}

fn scan_dir(root: &Path, dir: &Path, models: &mut Vec<LocalModel>, skipped: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Skipping unreadable directory {}: {}", dir.display(), e);
            skipped.push(dir.to_path_buf());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            skipped.push(path);
            continue;
        };

        if file_type.is_dir() {
            scan_dir(root, &path, models, skipped);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !has_model_extension(filename) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", path.display(), e);
                skipped.push(path);
                continue;
            }
        };

        let subdirectory = path
            .strip_prefix(root)
            .ok()
            .and_then(|rel| rel.components().next())
            .filter(|_| path.parent() != Some(root))
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .unwrap_or_default();

        models.push(LocalModel {
            keywords: keywords::extract(filename),
            filename: filename.to_string(),
            size_bytes: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            subdirectory,
            absolute_path: path,
        });
    }
}

/// Outcome of pairing an [`ArtifactRef`] with the local inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Present,
    Partial,
    Missing,
}

/// Pairing of an artifact requirement with its best local candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub filename: String,
    pub kind: ArtifactKind,
    pub status: MatchStatus,
    pub score: f32,
    pub candidate: Option<LocalModel>,
}

/// Match one artifact against the inventory.
///
/// Exact filename hits are `present` with score 1.0; fuzzy hits within the
/// kind's canonical subdirectory (or anywhere for unknown kinds) are
/// `partial` and left to the caller, never auto-downloaded.
pub fn match_artifact(
    inventory: &LocalInventory,
    artifact: &ArtifactRef,
    subdirectory: &str,
    threshold: f32,
) -> MatchResult {
    if let Some(model) = inventory.lookup_exact(&artifact.filename) {
        return MatchResult {
            filename: artifact.filename.clone(),
            kind: artifact.kind,
            status: MatchStatus::Present,
            score: 1.0,
            candidate: Some(model),
        };
    }

    let wanted = keywords::extract(&artifact.filename);
    let subdir = if artifact.kind == ArtifactKind::Unknown {
        None
    } else {
        Some(subdirectory)
    };

    if let Some((model, score)) = inventory.lookup_fuzzy(&wanted, subdir, threshold) {
        return MatchResult {
            filename: artifact.filename.clone(),
            kind: artifact.kind,
            status: MatchStatus::Partial,
            score,
            candidate: Some(model),
        };
    }

    MatchResult {
        filename: artifact.filename.clone(),
        kind: artifact.kind,
        status: MatchStatus::Missing,
        score: 0.0,
        candidate: None,
    }
}
