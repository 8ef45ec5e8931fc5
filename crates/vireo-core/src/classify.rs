//! Filename-based kind overrides.
//!
//! Loader node hints are frequently wrong for community workflows: LoRA
//! files get loaded through generic nodes and would otherwise be routed as
//! checkpoints, never reaching the catalog that hosts them. These rules run
//! exactly once, after analysis, with higher precedence than the node hint.
//!
//! The table is evaluated in declared order; the first matching rule wins.
//! Adding a rule is a data change, not a code change.

use crate::registry::ArtifactKind;

/// A single override rule.
///
/// A rule matches when the filename (compared case-insensitively) contains
/// any of `contains_any`, contains any of `and_contains_any` (when
/// non-empty), and ends with `extension` (when set).
#[derive(Debug, Clone, Copy)]
pub struct OverrideRule {
    pub contains_any: &'static [&'static str],
    pub and_contains_any: &'static [&'static str],
    pub extension: Option<&'static str>,
    pub kind: ArtifactKind,
}

/// The override table, in evaluation order.
pub const OVERRIDE_RULES: &[OverrideRule] = &[
    OverrideRule {
        contains_any: &["vae"],
        and_contains_any: &[],
        extension: None,
        kind: ArtifactKind::Vae,
    },
    OverrideRule {
        contains_any: &["lora", "rank"],
        and_contains_any: &[],
        extension: None,
        kind: ArtifactKind::Lora,
    },
    OverrideRule {
        contains_any: &["encoder", "umt5", "t5", "clip"],
        and_contains_any: &[],
        extension: Some(".gguf"),
        kind: ArtifactKind::TextEncoder,
    },
    OverrideRule {
        contains_any: &[],
        and_contains_any: &[],
        extension: Some(".gguf"),
        kind: ArtifactKind::Unet,
    },
    OverrideRule {
        contains_any: &[],
        and_contains_any: &[],
        extension: Some(".onnx"),
        kind: ArtifactKind::Reactor,
    },
    OverrideRule {
        contains_any: &["gfpgan"],
        and_contains_any: &[],
        extension: Some(".pth"),
        kind: ArtifactKind::Reactor,
    },
    OverrideRule {
        contains_any: &["lora", "style", "anime", "cartoon", "cute", "detail", "tweaker"],
        and_contains_any: &["flux", "sdxl", "sd15", "sd21"],
        extension: None,
        kind: ArtifactKind::Lora,
    },
];

impl OverrideRule {
    fn matches(&self, filename_lower: &str) -> bool {
        if let Some(ext) = self.extension {
            if !filename_lower.ends_with(ext) {
                return false;
            }
        }
        if !self.contains_any.is_empty()
            && !self.contains_any.iter().any(|t| filename_lower.contains(t))
        {
            return false;
        }
        if !self.and_contains_any.is_empty()
            && !self
                .and_contains_any
                .iter()
                .any(|t| filename_lower.contains(t))
        {
            return false;
        }
        true
    }
}

/// Refine an artifact kind from its filename.
///
/// Returns the forced kind of the first matching rule, or the node-derived
/// kind unchanged. Idempotent: the result depends only on the filename.
pub fn refine_kind(filename: &str, node_kind: ArtifactKind) -> ArtifactKind {
    let lower = filename.to_lowercase();
    for rule in OVERRIDE_RULES {
        if rule.matches(&lower) {
            return rule.kind;
        }
    }
    node_kind
}
