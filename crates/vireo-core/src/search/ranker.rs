//! Hit scoring and candidate assembly.
//!
//! Consumes one `SearchOutcome` per queried adapter, primary first, and
//! produces exactly one `RankedCandidate` per artifact: failures become
//! attached error strings, never exceptions.

use std::collections::HashSet;

use tracing::debug;

use super::{Confidence, RankedCandidate, ScoredHit, SearchHit, SearchOutcome};
use crate::workflow::ArtifactRef;

/// Keyword score at or above which a keyword match earns three stars.
const STRONG_KEYWORD_SCORE: f32 = 0.8;

/// Scores hits and merges per-artifact candidate lists.
pub struct ResultRanker {
    curated_authors: Vec<String>,
}

impl ResultRanker {
    pub fn new(curated_authors: Vec<String>) -> Self {
        Self { curated_authors }
    }

    /// Build the ranked candidate for one artifact.
    ///
    /// `outcomes` are in adapter query order (primary catalog first);
    /// `queries_tried` feeds the suggestions list for zero-hit candidates.
    pub fn rank(
        &self,
        artifact: ArtifactRef,
        outcomes: Vec<(String, SearchOutcome)>,
        queries_tried: &[String],
    ) -> RankedCandidate {
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for (adapter_id, outcome) in outcomes {
            match outcome {
                SearchOutcome::Hits(found) => hits.extend(found),
                SearchOutcome::NotFound => {}
                SearchOutcome::Transient(message) => {
                    errors.push(format!("{}: transient failure: {}", adapter_id, message))
                }
                SearchOutcome::Permanent(message) => {
                    errors.push(format!("{}: permanent failure: {}", adapter_id, message))
                }
                SearchOutcome::AuthRequired => {
                    errors.push(format!("{}: authentication required", adapter_id))
                }
                SearchOutcome::Cancelled => errors.push(format!("{}: cancelled", adapter_id)),
            }
        }

        // Dedupe by direct URL, keeping the first (primary-adapter) copy.
        let mut seen: HashSet<String> = HashSet::new();
        hits.retain(|hit| seen.insert(hit.direct_url.clone()));

        // Score, then stable-sort descending: equal scores keep adapter order.
        let mut scored: Vec<ScoredHit> = hits
            .into_iter()
            .map(|hit| {
                let score = self.score(&hit);
                ScoredHit {
                    hit,
                    score,
                    recommended: false,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        if let Some(first) = scored.first_mut() {
            first.recommended = true;
        }

        let rating = scored.first().map(|s| s.score).unwrap_or(0);
        let suggestions = if scored.is_empty() {
            queries_tried.iter().take(2).cloned().collect()
        } else {
            Vec::new()
        };

        debug!(
            "Ranked {}: {} hit(s), rating {}",
            artifact.filename,
            scored.len(),
            rating
        );

        RankedCandidate {
            artifact,
            rating,
            hits: scored,
            suggestions,
            errors,
        }
    }

    /// Star score for one hit: confidence base plus a curated-author bonus,
    /// capped at five.
    fn score(&self, hit: &SearchHit) -> u8 {
        let base = match hit.confidence {
            Confidence::Exact => 5,
            Confidence::FilenameMatch => 4,
            Confidence::KeywordMatch if hit.keyword_score >= STRONG_KEYWORD_SCORE => 3,
            Confidence::KeywordMatch => 2,
            Confidence::Suggestive => 1,
        };

        let author = hit
            .repository
            .split('/')
            .next()
            .unwrap_or(&hit.repository);
        let trusted = self.curated_authors.iter().any(|a| a == author);

        if trusted {
            (base + 1).min(5)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ArtifactKind;
    use crate::workflow::DetectionStrategy;

    fn artifact() -> ArtifactRef {
        ArtifactRef {
            filename: "flux1-dev-Q4_0.gguf".to_string(),
            kind: ArtifactKind::Unet,
            node_id: "1".to_string(),
            node_type: "UnetLoaderGGUF".to_string(),
            strategy: DetectionStrategy::FluxSpecific,
        }
    }

    fn hit(url: &str, repository: &str, confidence: Confidence, keyword_score: f32) -> SearchHit {
        SearchHit {
            source_catalog: "hub".to_string(),
            repository: repository.to_string(),
            display_name: url.to_string(),
            direct_url: url.to_string(),
            size_bytes: None,
            kind_hint: None,
            confidence,
            keyword_score,
        }
    }

    fn ranker() -> ResultRanker {
        ResultRanker::new(vec!["city96".to_string(), "Kijai".to_string()])
    }

    #[test]
    fn test_confidence_scoring() {
        let ranker = ranker();
        assert_eq!(ranker.score(&hit("u", "acme/repo", Confidence::Exact, 1.0)), 5);
        assert_eq!(
            ranker.score(&hit("u", "acme/repo", Confidence::FilenameMatch, 1.0)),
            4
        );
        assert_eq!(
            ranker.score(&hit("u", "acme/repo", Confidence::KeywordMatch, 0.85)),
            3
        );
        assert_eq!(
            ranker.score(&hit("u", "acme/repo", Confidence::KeywordMatch, 0.6)),
            2
        );
        assert_eq!(
            ranker.score(&hit("u", "acme/repo", Confidence::Suggestive, 0.0)),
            1
        );
    }

    #[test]
    fn test_trust_bonus_capped() {
        let ranker = ranker();
        // Curated author gets +1.
        assert_eq!(
            ranker.score(&hit("u", "Kijai/flux.1-dev-gguf", Confidence::KeywordMatch, 0.9)),
            4
        );
        // But never above five.
        assert_eq!(
            ranker.score(&hit("u", "city96/FLUX.1-dev-gguf", Confidence::Exact, 1.0)),
            5
        );
    }

    #[test]
    fn test_duplicate_urls_removed() {
        let candidate = ranker().rank(
            artifact(),
            vec![
                (
                    "hub".to_string(),
                    SearchOutcome::Hits(vec![hit("https://x/a", "r1", Confidence::Exact, 1.0)]),
                ),
                (
                    "civitai".to_string(),
                    SearchOutcome::Hits(vec![hit("https://x/a", "r2", Confidence::Exact, 1.0)]),
                ),
            ],
            &[],
        );
        assert_eq!(candidate.hits.len(), 1);
        assert_eq!(candidate.hits[0].hit.repository, "r1");
    }

    #[test]
    fn test_stable_sort_preserves_adapter_order() {
        let candidate = ranker().rank(
            artifact(),
            vec![(
                "hub".to_string(),
                SearchOutcome::Hits(vec![
                    hit("https://x/1", "first", Confidence::KeywordMatch, 0.9),
                    hit("https://x/2", "second", Confidence::KeywordMatch, 0.9),
                    hit("https://x/3", "third", Confidence::Exact, 1.0),
                ]),
            )],
            &[],
        );
        let repos: Vec<&str> = candidate
            .hits
            .iter()
            .map(|h| h.hit.repository.as_str())
            .collect();
        // Exact first, then the two equal-score hits in adapter order.
        assert_eq!(repos, vec!["third", "first", "second"]);
        assert!(candidate.hits[0].recommended);
        assert!(!candidate.hits[1].recommended);
        assert_eq!(candidate.rating, 5);
    }

    #[test]
    fn test_curated_hit_rates_five() {
        // An exact hit inside a curated author's repo keeps a five-star
        // rating: the scenario for quantized community builds.
        let candidate = ranker().rank(
            artifact(),
            vec![(
                "hub".to_string(),
                SearchOutcome::Hits(vec![hit(
                    "https://huggingface.co/city96/FLUX.1-dev-gguf/resolve/main/flux1-dev-Q4_0.gguf",
                    "city96/FLUX.1-dev-gguf",
                    Confidence::Exact,
                    1.0,
                )]),
            )],
            &[],
        );
        assert_eq!(candidate.rating, 5);
    }

    #[test]
    fn test_zero_hits_carries_suggestions_and_errors() {
        let queries = vec![
            "flux1-dev-Q4_0".to_string(),
            "flux1-dev-gguf".to_string(),
            "flux1-dev".to_string(),
        ];
        let candidate = ranker().rank(
            artifact(),
            vec![
                ("hub".to_string(), SearchOutcome::NotFound),
                (
                    "civitai".to_string(),
                    SearchOutcome::Transient("503".to_string()),
                ),
            ],
            &queries,
        );
        assert_eq!(candidate.rating, 0);
        assert!(candidate.hits.is_empty());
        assert_eq!(
            candidate.suggestions,
            vec!["flux1-dev-Q4_0".to_string(), "flux1-dev-gguf".to_string()]
        );
        assert_eq!(candidate.errors.len(), 1);
    }
}
