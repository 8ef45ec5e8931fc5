//! Artifact kinds, recognized model extensions, and the loader node registry.
//!
//! The node registry is a static table mapping loader node types to the kind
//! of artifact their widgets carry. Adding a loader is a table change.

use serde::{Deserialize, Serialize};

/// Semantic class of a model artifact.
///
/// The declaration order is the specificity order used when deduplicating
/// workflow references: earlier variants win over later ones when the same
/// filename is detected with different kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Vae,
    Lora,
    Clip,
    Unet,
    Reactor,
    Controlnet,
    Upscale,
    Checkpoint,
    Embeddings,
    ClipVision,
    Hypernetwork,
    TextEncoder,
    Unknown,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Vae => "vae",
            ArtifactKind::Lora => "lora",
            ArtifactKind::Clip => "clip",
            ArtifactKind::Unet => "unet",
            ArtifactKind::Reactor => "reactor",
            ArtifactKind::Controlnet => "controlnet",
            ArtifactKind::Upscale => "upscale",
            ArtifactKind::Checkpoint => "checkpoint",
            ArtifactKind::Embeddings => "embeddings",
            ArtifactKind::ClipVision => "clip_vision",
            ArtifactKind::Hypernetwork => "hypernetwork",
            ArtifactKind::TextEncoder => "text_encoder",
            ArtifactKind::Unknown => "unknown",
        }
    }

    /// All kinds, in specificity order.
    pub fn all() -> &'static [ArtifactKind] {
        &[
            ArtifactKind::Vae,
            ArtifactKind::Lora,
            ArtifactKind::Clip,
            ArtifactKind::Unet,
            ArtifactKind::Reactor,
            ArtifactKind::Controlnet,
            ArtifactKind::Upscale,
            ArtifactKind::Checkpoint,
            ArtifactKind::Embeddings,
            ArtifactKind::ClipVision,
            ArtifactKind::Hypernetwork,
            ArtifactKind::TextEncoder,
            ArtifactKind::Unknown,
        ]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        ArtifactKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
    }

    /// Default subdirectory name under the models root for this kind.
    pub fn default_subdir(&self) -> &'static str {
        match self {
            ArtifactKind::Vae => "vae",
            ArtifactKind::Lora => "loras",
            ArtifactKind::Clip => "clip",
            ArtifactKind::Unet => "unet",
            ArtifactKind::Reactor => "reactor",
            ArtifactKind::Controlnet => "controlnet",
            ArtifactKind::Upscale => "upscale_models",
            ArtifactKind::Checkpoint => "checkpoints",
            ArtifactKind::Embeddings => "embeddings",
            ArtifactKind::ClipVision => "clip_vision",
            ArtifactKind::Hypernetwork => "hypernetworks",
            ArtifactKind::TextEncoder => "text_encoders",
            ArtifactKind::Unknown => "checkpoints",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of recognized model file extensions.
pub const MODEL_EXTENSIONS: &[&str] = &[
    ".safetensors",
    ".ckpt",
    ".pt",
    ".pth",
    ".bin",
    ".onnx",
    ".gguf",
];

/// Check whether a filename ends in a recognized model extension.
pub fn has_model_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Strip a recognized model extension, if present.
pub fn strip_model_extension(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    for ext in MODEL_EXTENSIONS {
        if lower.ends_with(ext) {
            return &name[..name.len() - ext.len()];
        }
    }
    name
}

/// Check whether a filename has a specific extension (case-insensitive).
pub fn has_extension(name: &str, ext: &str) -> bool {
    name.to_ascii_lowercase().ends_with(ext)
}

/// Loader node types handled by the `known_loader` detection strategy.
const KNOWN_LOADERS: &[(&str, ArtifactKind)] = &[
    ("CheckpointLoaderSimple", ArtifactKind::Checkpoint),
    ("CheckpointLoader", ArtifactKind::Checkpoint),
    ("LoraLoader", ArtifactKind::Lora),
    ("LoraLoaderModelOnly", ArtifactKind::Lora),
    ("VAELoader", ArtifactKind::Vae),
    ("ControlNetLoader", ArtifactKind::Controlnet),
    ("DiffControlNetLoader", ArtifactKind::Controlnet),
    ("CLIPLoader", ArtifactKind::Clip),
    ("UNETLoader", ArtifactKind::Unet),
    ("UpscaleModelLoader", ArtifactKind::Upscale),
    ("CLIPVisionLoader", ArtifactKind::ClipVision),
    ("HypernetworkLoader", ArtifactKind::Hypernetwork),
];

/// UNet / dual-CLIP / GGUF loaders with non-standard widget ordering,
/// handled by the `flux_specific` strategy.
const FLUX_LOADERS: &[(&str, ArtifactKind)] = &[
    ("UnetLoaderGGUF", ArtifactKind::Unet),
    ("UnetLoaderGGUFAdvanced", ArtifactKind::Unet),
    ("CLIPLoaderGGUF", ArtifactKind::Clip),
    ("DualCLIPLoader", ArtifactKind::Clip),
    ("DualCLIPLoaderGGUF", ArtifactKind::Clip),
];

/// Community loader nodes whose widgets are objects rather than strings,
/// handled by the `custom_node` strategy. The value key names the widget
/// field that carries the filename.
const CUSTOM_LOADERS: &[(&str, &str, ArtifactKind)] = &[
    ("Power Lora Loader (rgthree)", "lora", ArtifactKind::Lora),
];

/// Look up the artifact kind for a known loader node type.
pub fn known_loader_kind(node_type: &str) -> Option<ArtifactKind> {
    KNOWN_LOADERS
        .iter()
        .find(|(t, _)| *t == node_type)
        .map(|(_, k)| *k)
}

/// Look up the artifact kind for a flux-family loader node type.
pub fn flux_loader_kind(node_type: &str) -> Option<ArtifactKind> {
    FLUX_LOADERS
        .iter()
        .find(|(t, _)| *t == node_type)
        .map(|(_, k)| *k)
}

/// Look up the widget key and kind for an allow-listed community loader.
pub fn custom_loader(node_type: &str) -> Option<(&'static str, ArtifactKind)> {
    CUSTOM_LOADERS
        .iter()
        .find(|(t, _, _)| *t == node_type)
        .map(|(_, key, k)| (*key, *k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_specificity_order() {
        assert!(ArtifactKind::Vae < ArtifactKind::Lora);
        assert!(ArtifactKind::Lora < ArtifactKind::Checkpoint);
        assert!(ArtifactKind::Checkpoint < ArtifactKind::Unknown);
        assert!(ArtifactKind::TextEncoder < ArtifactKind::Unknown);
    }

    #[test]
    fn test_kind_string_roundtrip() {
        for kind in ArtifactKind::all() {
            assert_eq!(ArtifactKind::from_str(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn test_model_extensions() {
        assert!(has_model_extension("model.safetensors"));
        assert!(has_model_extension("Model.SAFETENSORS"));
        assert!(has_model_extension("weights.GGUF"));
        assert!(!has_model_extension("notes.txt"));
        assert!(!has_model_extension("archive.zip"));
    }

    #[test]
    fn test_strip_model_extension() {
        assert_eq!(strip_model_extension("ae.safetensors"), "ae");
        assert_eq!(strip_model_extension("flux1-dev-Q4_0.gguf"), "flux1-dev-Q4_0");
        assert_eq!(strip_model_extension("no-extension"), "no-extension");
    }

    #[test]
    fn test_known_loader_lookup() {
        assert_eq!(
            known_loader_kind("CheckpointLoaderSimple"),
            Some(ArtifactKind::Checkpoint)
        );
        assert_eq!(known_loader_kind("LoraLoader"), Some(ArtifactKind::Lora));
        assert_eq!(known_loader_kind("Note"), None);
    }

    #[test]
    fn test_flux_loader_lookup() {
        assert_eq!(flux_loader_kind("UnetLoaderGGUF"), Some(ArtifactKind::Unet));
        assert_eq!(flux_loader_kind("DualCLIPLoader"), Some(ArtifactKind::Clip));
        assert_eq!(flux_loader_kind("CheckpointLoaderSimple"), None);
    }

    #[test]
    fn test_custom_loader_lookup() {
        let (key, kind) = custom_loader("Power Lora Loader (rgthree)").unwrap();
        assert_eq!(key, "lora");
        assert_eq!(kind, ArtifactKind::Lora);
    }
}
