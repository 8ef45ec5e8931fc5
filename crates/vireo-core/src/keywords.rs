//! Keyword extraction from model filenames.
//!
//! Pure, deterministic tokenization used for fuzzy matching: the extension
//! is stripped, the name is split on separators and at case/digit
//! transitions, version and quantization noise is dropped, and a small set
//! of model-family tokens is always preserved.

use std::collections::HashSet;

use crate::registry::strip_model_extension;

/// Version/quantization tokens treated as noise for matching.
const STOP_TOKENS: &[&str] = &[
    "q4", "q5", "q6", "q8", "q4_0", "q4_1", "q4_k", "q4_k_m", "q4_k_s", "q5_0", "q5_1", "q5_k",
    "q5_k_m", "q5_k_s", "q6_k", "q8_0", "gguf", "ggml", "fp16", "fp32", "bf16", "int8", "f16",
    "f32", "pruned", "ema", "emaonly", "vae", "novae", "inpainting", "refiner", "base", "full",
    "lite", "v1", "v2", "v3", "v4", "v5", "v1.0", "v1.5", "v2.0", "v2.1", "v2.5", "v3.0", "final",
    "latest", "alpha", "beta", "rc", "release", "512", "768", "1024", "2048", "xl", "xxl", "small",
    "medium", "large",
];

/// Model-family tokens that are never dropped, even when they would
/// otherwise be segmented or filtered.
const PRESERVE_TOKENS: &[&str] = &[
    "sdxl",
    "sd15",
    "sd21",
    "flux",
    "animatediff",
    "controlnet",
    "openpose",
    "canny",
    "depth",
    "normal",
    "semantic",
];

/// Extract an ordered, duplicate-free sequence of lowercase keywords from a
/// model filename.
pub fn extract(filename: &str) -> Vec<String> {
    let stem = strip_model_extension(filename);

    let mut seen: HashSet<String> = HashSet::new();
    let mut keywords: Vec<String> = Vec::new();

    for raw in stem.split(['_', '-', '.', ' ']) {
        if raw.is_empty() {
            continue;
        }
        let lower = raw.to_lowercase();

        // Preserve-listed tokens survive whole, without segmentation.
        if PRESERVE_TOKENS.contains(&lower.as_str()) {
            if seen.insert(lower.clone()) {
                keywords.push(lower);
            }
            continue;
        }

        // Stop tokens are matched against the whole separator token first:
        // segmentation would split q4 / v2 / fp16 apart before they could
        // ever match the list.
        if STOP_TOKENS.contains(&lower.as_str()) {
            continue;
        }

        for segment in segment_token(raw) {
            let segment = segment.to_lowercase();
            if STOP_TOKENS.contains(&segment.as_str()) {
                continue;
            }
            if seen.insert(segment.clone()) {
                keywords.push(segment);
            }
        }
    }

    keywords
}

/// Segment a token at lowercase-to-uppercase and letter/digit transitions.
fn segment_token(token: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in token.chars() {
        let boundary = match prev {
            Some(p) => {
                (p.is_lowercase() && c.is_uppercase())
                    || (p.is_alphabetic() && c.is_ascii_digit())
                    || (p.is_ascii_digit() && c.is_alphabetic())
            }
            None => false,
        };
        if boundary && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Jaccard similarity between two keyword sequences.
///
/// Both sides are expected to come from [`extract`]. Empty input on either
/// side scores 0.0.
pub fn jaccard(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}
