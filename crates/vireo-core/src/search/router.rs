//! Catalog routing.
//!
//! Given an artifact, decide which catalogs to ask and in what order. The
//! rules are a table evaluated top to bottom; the first match wins, and the
//! final rule is a catch-all so routing is total.

use tracing::debug;

use super::{CATALOG_CIVITAI, CATALOG_HUB};
use crate::registry::{has_extension, ArtifactKind};
use crate::workflow::ArtifactRef;

/// Predicate half of a routing rule.
#[derive(Debug, Clone)]
enum RouteMatcher {
    KindIn(&'static [ArtifactKind]),
    GgufFile,
    OfficialCheckpoint,
    Always,
}

/// One routing rule: a predicate and the catalogs to query, primary first.
#[derive(Debug, Clone)]
struct RouteRule {
    matcher: RouteMatcher,
    catalogs: &'static [&'static str],
}

/// Routing table, in evaluation order.
const ROUTE_RULES: &[RouteRule] = &[
    // Community LoRAs live on the Civitai-style catalog.
    RouteRule {
        matcher: RouteMatcher::KindIn(&[ArtifactKind::Lora]),
        catalogs: &[CATALOG_CIVITAI, CATALOG_HUB],
    },
    // Model components are hub territory.
    RouteRule {
        matcher: RouteMatcher::KindIn(&[
            ArtifactKind::Unet,
            ArtifactKind::Vae,
            ArtifactKind::Clip,
            ArtifactKind::TextEncoder,
            ArtifactKind::Controlnet,
            ArtifactKind::Upscale,
            ArtifactKind::Embeddings,
        ]),
        catalogs: &[CATALOG_HUB],
    },
    // Quantized builds are hosted by hub quantization authors.
    RouteRule {
        matcher: RouteMatcher::GgufFile,
        catalogs: &[CATALOG_HUB],
    },
    RouteRule {
        matcher: RouteMatcher::OfficialCheckpoint,
        catalogs: &[CATALOG_HUB],
    },
    RouteRule {
        matcher: RouteMatcher::KindIn(&[ArtifactKind::Checkpoint]),
        catalogs: &[CATALOG_HUB, CATALOG_CIVITAI],
    },
    RouteRule {
        matcher: RouteMatcher::Always,
        catalogs: &[CATALOG_HUB, CATALOG_CIVITAI],
    },
];

/// Computes the ordered catalog list for an artifact.
pub struct SearchRouter {
    official_prefixes: Vec<String>,
}

impl SearchRouter {
    pub fn new(official_prefixes: Vec<String>) -> Self {
        Self { official_prefixes }
    }

    /// Ordered list of catalog ids to query. Never empty.
    pub fn route(&self, artifact: &ArtifactRef) -> Vec<&'static str> {
        for rule in ROUTE_RULES {
            if self.matches(&rule.matcher, artifact) {
                debug!(
                    "Routing {} ({}) -> {:?}",
                    artifact.filename, artifact.kind, rule.catalogs
                );
                return rule.catalogs.to_vec();
            }
        }
        unreachable!("routing table ends with a catch-all rule")
    }

    fn matches(&self, matcher: &RouteMatcher, artifact: &ArtifactRef) -> bool {
        match matcher {
            RouteMatcher::KindIn(kinds) => kinds.contains(&artifact.kind),
            RouteMatcher::GgufFile => has_extension(&artifact.filename, ".gguf"),
            RouteMatcher::OfficialCheckpoint => {
                artifact.kind == ArtifactKind::Checkpoint && {
                    let lower = artifact.filename.to_lowercase();
                    self.official_prefixes
                        .iter()
                        .any(|p| lower.starts_with(&p.to_lowercase()))
                }
            }
            RouteMatcher::Always => true,
        }
    }
}
