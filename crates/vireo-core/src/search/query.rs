//! Search query synthesis from model filenames.
//!
//! Community filenames carry personal noise (file sizes, download counts)
//! while catalog listings use canonical series names. Each decomposer below
//! contributes candidate queries; the union keeps first-seen order.

use super::CATALOG_HUB;
use crate::registry::{has_extension, strip_model_extension};

/// A recognized model family and its canonical catalog spellings.
struct SeriesPattern {
    variants: &'static [&'static str],
    versions: &'static [&'static str],
    /// Canonical query; `{version}` is substituted when a version is found.
    canonical: &'static str,
}

/// Known model families, checked in order.
const SERIES_PATTERNS: &[SeriesPattern] = &[
    SeriesPattern {
        variants: &["flux1", "flux-1", "flux_1", "flux.1", "flux"],
        versions: &["dev", "schnell", "pro"],
        canonical: "flux1-{version}",
    },
    SeriesPattern {
        variants: &["wan2.1", "wan2_1", "wan21", "wan2", "wan"],
        versions: &[],
        canonical: "Wan2.1",
    },
    SeriesPattern {
        variants: &["hunyuan", "hy"],
        versions: &[],
        canonical: "HunyuanDiT",
    },
];

/// Hub author namespaces known to host quantized GGUF builds, with each
/// author's repository naming style. `{version}` is the series version.
const GGUF_REPO_PATTERNS: &[(&str, &str)] = &[
    ("city96", "city96/FLUX.1-{version}-gguf"),
    ("Kijai", "Kijai/flux.1-{version}-gguf"),
];

/// Generate an ordered, duplicate-free list of search queries for a
/// filename, specialized per target catalog.
///
/// `curated_authors` scopes the GGUF repository hints: only patterns whose
/// author is on the list are emitted, in list order.
pub fn synthesize_queries(
    filename: &str,
    adapter_id: &str,
    curated_authors: &[String],
) -> Vec<String> {
    let stem = strip_model_extension(filename);
    let lower = stem.to_lowercase();

    let mut queries: Vec<String> = Vec::new();

    // Basename: the filename with the extension removed.
    push_unique(&mut queries, stem.to_string());

    // Technical: drop file-size markers, keep quant/precision tokens.
    push_unique(&mut queries, strip_size_markers(stem));

    // Normalized series: canonical family spelling.
    if let Some((pattern, version)) = detect_series(&lower) {
        let canonical = match version {
            Some(v) => pattern.canonical.replace("{version}", v),
            None => pattern.canonical.to_string(),
        };
        push_unique(&mut queries, canonical.clone());

        // Specialized repository hints for quantized builds on the hub.
        if adapter_id == CATALOG_HUB && has_extension(filename, ".gguf") {
            if let Some(v) = version {
                push_unique(&mut queries, format!("{}-gguf", canonical));
                push_unique(&mut queries, format!("FLUX.1-{}-gguf", v));
                push_unique(&mut queries, format!("flux.1-{}-gguf", v));
                for (author, repo_pattern) in GGUF_REPO_PATTERNS {
                    if curated_authors.iter().any(|a| a == author) {
                        push_unique(&mut queries, repo_pattern.replace("{version}", v));
                    }
                }
            } else {
                push_unique(&mut queries, format!("{}-gguf", canonical));
                for author in curated_authors {
                    push_unique(&mut queries, format!("{}/{}-gguf", author, canonical));
                }
            }
        }
    }

    // Separator variants: queries containing '.' or '_' also go out with
    // '-' and with spaces.
    let variants: Vec<String> = queries
        .iter()
        .filter(|q| q.contains('.') || q.contains('_'))
        .flat_map(|q| [q.replace(['.', '_'], "-"), q.replace(['.', '_'], " ")])
        .collect();
    for v in variants {
        push_unique(&mut queries, v);
    }

    queries
}

fn push_unique(queries: &mut Vec<String>, query: String) {
    if !query.is_empty() && !queries.contains(&query) {
        queries.push(query);
    }
}

/// Remove `<digits>gb` / `<digits>mb` size-marker tokens.
fn strip_size_markers(stem: &str) -> String {
    let kept: Vec<&str> = stem
        .split(['-', '_'])
        .filter(|token| !is_size_marker(token))
        .collect();
    kept.join("-")
}

fn is_size_marker(token: &str) -> bool {
    let lower = token.to_lowercase();
    let Some(digits) = lower.strip_suffix("gb").or_else(|| lower.strip_suffix("mb")) else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn detect_series(lower_stem: &str) -> Option<(&'static SeriesPattern, Option<&'static str>)> {
    for pattern in SERIES_PATTERNS {
        if pattern.variants.iter().any(|v| lower_stem.contains(v)) {
            let version = pattern
                .versions
                .iter()
                .find(|v| lower_stem.contains(*v))
                .copied();
            return Some((pattern, version));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curated() -> Vec<String> {
        vec!["city96".to_string(), "Kijai".to_string()]
    }

    #[test]
    fn test_basename_first() {
        let queries = synthesize_queries("dreamshaper_8.safetensors", CATALOG_HUB, &curated());
        assert_eq!(queries[0], "dreamshaper_8");
    }

    #[test]
    fn test_size_markers_dropped_quant_kept() {
        let queries =
            synthesize_queries("flux1-dev-11gb-fp8.safetensors", CATALOG_HUB, &curated());
        assert!(queries.contains(&"flux1-dev-fp8".to_string()));
        // The size marker never appears alone-stripped of quant.
        assert!(!queries.iter().any(|q| q.contains("11gb")));
    }

    #[test]
    fn test_gguf_synthesizer_scenario() {
        let queries = synthesize_queries("flux1-dev-Q4_0.gguf", CATALOG_HUB, &curated());
        assert!(queries.contains(&"flux1-dev-gguf".to_string()));
        assert!(queries.contains(&"FLUX.1-dev-gguf".to_string()));
        assert!(queries.contains(&"flux.1-dev-gguf".to_string()));
        assert!(queries.contains(&"city96/FLUX.1-dev-gguf".to_string()));
        assert!(queries.contains(&"Kijai/flux.1-dev-gguf".to_string()));
    }

    #[test]
    fn test_repo_hints_only_for_hub() {
        let queries = synthesize_queries("flux1-dev-Q4_0.gguf", "civitai", &curated());
        assert!(!queries.iter().any(|q| q.contains("city96/")));
        assert!(!queries.iter().any(|q| q.contains("Kijai/")));
    }

    #[test]
    fn test_repo_hints_respect_curated_list() {
        let only_city96 = vec!["city96".to_string()];
        let queries = synthesize_queries("flux1-dev-Q4_0.gguf", CATALOG_HUB, &only_city96);
        assert!(queries.contains(&"city96/FLUX.1-dev-gguf".to_string()));
        assert!(!queries.iter().any(|q| q.starts_with("Kijai/")));
    }

    #[test]
    fn test_wan_series_canonicalized() {
        let queries = synthesize_queries(
            "wan21_causvid_14b_t2v.safetensors",
            CATALOG_HUB,
            &curated(),
        );
        assert!(queries.contains(&"Wan2.1".to_string()));
    }

    #[test]
    fn test_separator_variants() {
        let queries = synthesize_queries("flux1-dev-Q4_0.gguf", CATALOG_HUB, &curated());
        assert!(queries.contains(&"flux1-dev-Q4-0".to_string()));
        assert!(queries.contains(&"flux1-dev-Q4 0".to_string()));
    }

    #[test]
    fn test_no_duplicates_first_seen_order() {
        let queries = synthesize_queries("plain-name.safetensors", CATALOG_HUB, &curated());
        let mut deduped = queries.clone();
        deduped.dedup();
        assert_eq!(queries, deduped);
        assert_eq!(queries[0], "plain-name");
    }
}
