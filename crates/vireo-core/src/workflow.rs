//! Workflow document analysis.
//!
//! Walks every node of a workflow graph and extracts the model artifacts it
//! references. Six detection strategies run in order per node; the first one
//! that yields a filename wins for that node, and results are unioned across
//! nodes before a case-insensitive dedupe keeps the most specific kind per
//! filename.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, VireoError};
use crate::registry::{
    self, has_extension, has_model_extension, ArtifactKind,
};

/// How a reference was detected, for provenance and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    KnownLoader,
    FluxSpecific,
    PathWalk,
    WidgetScan,
    GgufHint,
    CustomNode,
}

/// A model requirement extracted from the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    pub kind: ArtifactKind,
    pub node_id: String,
    pub node_type: String,
    pub strategy: DetectionStrategy,
}

/// A workflow node as consumed by the analyzer. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct WorkflowNode {
    #[serde(default)]
    id: Value,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    widgets_values: Vec<Value>,
    #[serde(default)]
    inputs: Value,
}

impl WorkflowNode {
    fn id_string(&self) -> String {
        match &self.id {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => "unknown".to_string(),
        }
    }
}

/// Analyze a workflow document and return its deduplicated artifact list.
///
/// A malformed node is skipped and logged; a malformed top-level document
/// fails with `InvalidWorkflow`. An empty workflow yields an empty list.
pub fn analyze(document: &Value) -> Result<Vec<ArtifactRef>> {
    let nodes = document
        .as_object()
        .and_then(|o| o.get("nodes"))
        .and_then(Value::as_array)
        .ok_or_else(|| VireoError::InvalidWorkflow {
            message: "document has no `nodes` array".to_string(),
        })?;

    let mut refs: Vec<ArtifactRef> = Vec::new();

    for (index, raw) in nodes.iter().enumerate() {
        let node: WorkflowNode = match serde_json::from_value(raw.clone()) {
            Ok(node) => node,
            Err(e) => {
                warn!("Skipping malformed workflow node at index {}: {}", index, e);
                continue;
            }
        };
        refs.extend(analyze_node(&node));
    }

    Ok(deduplicate(refs))
}

/// Run the detection strategies against one node, in order. The first
/// strategy that yields at least one filename wins for this node.
fn analyze_node(node: &WorkflowNode) -> Vec<ArtifactRef> {
    let strategies: &[fn(&WorkflowNode) -> Vec<ArtifactRef>] = &[
        detect_known_loader,
        detect_flux_specific,
        detect_path_walk,
        detect_widget_scan,
        detect_gguf_hint,
        detect_custom_node,
    ];

    for strategy in strategies {
        let found = strategy(node);
        if !found.is_empty() {
            debug!(
                "Node {} ({}) yielded {} reference(s) via {:?}",
                node.id_string(),
                node.node_type,
                found.len(),
                found[0].strategy
            );
            return found;
        }
    }
    Vec::new()
}

fn make_ref(
    node: &WorkflowNode,
    filename: &str,
    kind: ArtifactKind,
    strategy: DetectionStrategy,
) -> ArtifactRef {
    ArtifactRef {
        filename: basename(filename).to_string(),
        kind,
        node_id: node.id_string(),
        node_type: node.node_type.clone(),
        strategy,
    }
}

/// Final path component of a possibly path-qualified widget value.
fn basename(value: &str) -> &str {
    value
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(value)
}

/// Strategy 1: the node type is a known loader; every widget string ending
/// in a recognized extension carries the registry's kind.
fn detect_known_loader(node: &WorkflowNode) -> Vec<ArtifactRef> {
    let Some(kind) = registry::known_loader_kind(&node.node_type) else {
        return Vec::new();
    };
    widget_strings(node)
        .filter(|s| has_model_extension(s))
        .map(|s| make_ref(node, s, kind, DetectionStrategy::KnownLoader))
        .collect()
}

/// Strategy 2: UNet / dual-CLIP / GGUF loaders with their own widget order.
fn detect_flux_specific(node: &WorkflowNode) -> Vec<ArtifactRef> {
    let Some(kind) = registry::flux_loader_kind(&node.node_type) else {
        return Vec::new();
    };
    widget_strings(node)
        .filter(|s| has_model_extension(s))
        .map(|s| make_ref(node, s, kind, DetectionStrategy::FluxSpecific))
        .collect()
}

/// Strategy 3: any string anywhere in the node's inputs that contains a
/// path separator and ends in a recognized extension.
fn detect_path_walk(node: &WorkflowNode) -> Vec<ArtifactRef> {
    let mut found = Vec::new();
    walk_strings(&node.inputs, &mut |s| {
        if (s.contains('/') || s.contains('\\')) && has_model_extension(s) {
            found.push(s.to_string());
        }
    });
    found
        .iter()
        .map(|s| make_ref(node, s, ArtifactKind::Unknown, DetectionStrategy::PathWalk))
        .collect()
}

/// Strategy 4: any widget string ending in a recognized extension, even for
/// unknown node types.
fn detect_widget_scan(node: &WorkflowNode) -> Vec<ArtifactRef> {
    widget_strings(node)
        .filter(|s| has_model_extension(s))
        .map(|s| make_ref(node, s, ArtifactKind::Unknown, DetectionStrategy::WidgetScan))
        .collect()
}

/// Strategy 5: strings ending in `.gguf` anywhere in the node. Encoder-ish
/// names are text encoders, everything else is a UNet.
fn detect_gguf_hint(node: &WorkflowNode) -> Vec<ArtifactRef> {
    let mut names: Vec<String> = Vec::new();
    for s in widget_strings(node) {
        if has_extension(s, ".gguf") {
            names.push(s.to_string());
        }
    }
    walk_strings(&node.inputs, &mut |s| {
        if has_extension(s, ".gguf") {
            names.push(s.to_string());
        }
    });

    names
        .iter()
        .map(|s| {
            let kind = gguf_kind(s);
            make_ref(node, s, kind, DetectionStrategy::GgufHint)
        })
        .collect()
}

/// Kind for a `.gguf` filename: text encoder when the name suggests one,
/// otherwise unet.
pub fn gguf_kind(filename: &str) -> ArtifactKind {
    let lower = filename.to_lowercase();
    if ["encoder", "t5", "umt5", "clip"]
        .iter()
        .any(|t| lower.contains(t))
    {
        ArtifactKind::TextEncoder
    } else {
        ArtifactKind::Unet
    }
}

/// Strategy 6: allow-listed community loaders whose widgets are objects
/// carrying the filename under a known key.
fn detect_custom_node(node: &WorkflowNode) -> Vec<ArtifactRef> {
    let Some((key, kind)) = registry::custom_loader(&node.node_type) else {
        return Vec::new();
    };
    let mut refs = Vec::new();
    for widget in &node.widgets_values {
        if let Some(name) = widget.get(key).and_then(Value::as_str) {
            if has_model_extension(name) {
                refs.push(make_ref(node, name, kind, DetectionStrategy::CustomNode));
            }
        }
    }
    refs
}

/// Iterate the node's widget values that are strings.
fn widget_strings(node: &WorkflowNode) -> impl Iterator<Item = &str> {
    node.widgets_values.iter().filter_map(Value::as_str)
}

/// Visit every string value in a JSON subtree.
fn walk_strings(value: &Value, visit: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => visit(s),
        Value::Array(items) => {
            for item in items {
                walk_strings(item, visit);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                walk_strings(item, visit);
            }
        }
        _ => {}
    }
}

/// Collapse references with the same filename (case-insensitive) into one,
/// keeping the most specific kind and first-seen provenance and order.
fn deduplicate(refs: Vec<ArtifactRef>) -> Vec<ArtifactRef> {
    let mut deduped: Vec<ArtifactRef> = Vec::new();

    for r in refs {
        let key = r.filename.to_lowercase();
        match deduped
            .iter_mut()
            .find(|existing| existing.filename.to_lowercase() == key)
        {
            Some(existing) => {
                if r.kind < existing.kind {
                    existing.kind = r.kind;
                }
            }
            None => deduped.push(r),
        }
    }

    deduped
}
