//! Integration tests for the resolution pipeline.
//!
//! Everything here runs against temp directories and an offline resolver;
//! catalog adapters are exercised only where no live remote is needed.

use std::collections::HashMap;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use vireo_core::search::{synthesize_queries, SearchRouter, CATALOG_CIVITAI, CATALOG_HUB};
use vireo_core::{
    ArtifactKind, DetectionStrategy, MatchStatus, Resolver, ResolverConfig, TaskStatus,
};

struct Fixture {
    resolver: Resolver,
    _models: TempDir,
    _cache: TempDir,
}

fn fixture() -> Fixture {
    let models = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    let mut config = ResolverConfig::default();
    config.paths.models_root = models.path().to_path_buf();
    config.paths.cache_dir = cache.path().to_path_buf();
    // Closed local ports: catalog calls fail fast instead of going online.
    config.hub.base_url = "http://127.0.0.1:19840".to_string();
    config.civitai.base_url = "http://127.0.0.1:19841".to_string();

    Fixture {
        resolver: Resolver::new(config).unwrap(),
        _models: models,
        _cache: cache,
    }
}

fn write_model(root: &Path, relative: &str, len: usize) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, vec![0u8; len]).unwrap();
}

#[tokio::test]
async fn analyze_applies_kind_overrides_once() {
    let fx = fixture();

    // Scenario: a LoRA extracted by widget_scan with a wrong checkpoint-ish
    // hint gets reclassified from its filename.
    let document = json!({
        "nodes": [{
            "id": 5,
            "type": "SomeCommunityLoader",
            "widgets_values": ["Cute_3d_Cartoon_Flux.safetensors"]
        }]
    });

    let refs = fx.resolver.analyze(&document).unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].kind, ArtifactKind::Lora);
    assert_eq!(refs[0].strategy, DetectionStrategy::WidgetScan);

    // The router then sends it to the community catalog first.
    let router = SearchRouter::new(fx.resolver.config().router.official_prefixes.clone());
    assert_eq!(router.route(&refs[0]), vec![CATALOG_CIVITAI, CATALOG_HUB]);

    // And its target path lands in the loras subdirectory.
    let spec = fx.resolver.plan_manual(
        &refs[0].filename,
        refs[0].kind,
        "https://civitai.com/api/download/models/12345",
    );
    assert!(spec
        .target_path
        .ends_with("loras/Cute_3d_Cartoon_Flux.safetensors"));
}

#[tokio::test]
async fn gguf_classifier_routes_text_encoders() {
    let fx = fixture();

    // A GGUF text encoder loaded through a UNet loader still ends up in
    // text_encoders.
    let document = json!({
        "nodes": [{
            "id": 9,
            "type": "UnetLoaderGGUF",
            "widgets_values": ["t5-v1_1-xxl-encoder-Q4_K_S.gguf"]
        }]
    });

    let refs = fx.resolver.analyze(&document).unwrap();
    assert_eq!(refs[0].kind, ArtifactKind::TextEncoder);

    let spec = fx.resolver.plan_manual(
        &refs[0].filename,
        refs[0].kind,
        "https://huggingface.co/x/resolve/main/t5-v1_1-xxl-encoder-Q4_K_S.gguf",
    );
    assert!(spec
        .target_path
        .ends_with("text_encoders/t5-v1_1-xxl-encoder-Q4_K_S.gguf"));
}

#[test]
fn gguf_query_synthesis_covers_curated_repos() {
    let curated = vec!["city96".to_string(), "Kijai".to_string()];
    let queries = synthesize_queries("flux1-dev-Q4_0.gguf", CATALOG_HUB, &curated);

    for expected in ["flux1-dev-gguf", "FLUX.1-dev-gguf", "flux.1-dev-gguf"] {
        assert!(
            queries.iter().any(|q| q == expected),
            "missing query {expected}, got {queries:?}"
        );
    }
}

#[tokio::test]
async fn exact_local_match_short_circuits() {
    let fx = fixture();
    write_model(&fx.resolver.config().paths.models_root, "vae/ae.safetensors", 64);

    let document = json!({
        "nodes": [{
            "id": 2,
            "type": "VAELoader",
            "widgets_values": ["ae.safetensors"]
        }]
    });

    let report = fx.resolver.resolve(&document).await.unwrap();
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.present, 1);
    assert_eq!(report.summary.missing, 0);
    assert_eq!(report.matches[0].status, MatchStatus::Present);
    assert_eq!(report.matches[0].score, 1.0);
    // Nothing missing means no search was performed.
    assert!(report.candidates.is_empty());
}

#[tokio::test]
async fn partial_match_surfaced_not_downloaded() {
    let fx = fixture();
    write_model(
        &fx.resolver.config().paths.models_root,
        "vae/epicRealism_naturalSin.safetensors",
        128,
    );

    let document = json!({
        "nodes": [{
            "id": 3,
            "type": "VAELoader",
            "widgets_values": ["epicRealism_naturalSinRC1VAE.safetensors"]
        }]
    });

    let report = fx.resolver.resolve(&document).await.unwrap();
    assert_eq!(report.summary.partial, 1);
    assert_eq!(report.summary.missing, 0);

    let partial = &report.matches[0];
    assert_eq!(partial.status, MatchStatus::Partial);
    assert!(partial.score >= 0.7, "score was {}", partial.score);
    assert_eq!(
        partial.candidate.as_ref().unwrap().filename,
        "epicRealism_naturalSin.safetensors"
    );

    // Partial matches are not searched and nothing was enqueued.
    assert!(report.candidates.is_empty());
    assert!(fx.resolver.downloads().status().queued.is_empty());
}

#[tokio::test]
async fn analysis_is_idempotent_and_deduplicated() {
    let fx = fixture();
    let document = json!({
        "nodes": [
            { "id": 1, "type": "CheckpointLoaderSimple",
              "widgets_values": ["dreamshaper_8.safetensors"] },
            { "id": 2, "type": "SomethingElse",
              "widgets_values": ["DREAMSHAPER_8.safetensors"] },
            { "id": 3, "type": "LoraLoader",
              "widgets_values": ["add_detail.safetensors", 0.8, 1.0] }
        ]
    });

    let first = fx.resolver.analyze(&document).unwrap();
    let second = fx.resolver.analyze(&document).unwrap();

    assert_eq!(first.len(), 2);
    let names = |refs: &[vireo_core::ArtifactRef]| {
        refs.iter().map(|r| r.filename.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
}

#[tokio::test]
async fn empty_workflow_is_not_an_error() {
    let fx = fixture();
    let report = fx.resolver.resolve(&json!({ "nodes": [] })).await.unwrap();
    assert_eq!(report.summary.total, 0);
    assert!(report.refs.is_empty());
}

#[tokio::test]
async fn malformed_workflow_is_invalid_input() {
    let fx = fixture();
    let err = fx.resolver.analyze(&json!("not an object")).unwrap_err();
    assert!(matches!(err, vireo_core::VireoError::InvalidWorkflow { .. }));
}

#[tokio::test]
async fn plan_respects_choice_and_defaults_to_recommended() {
    let fx = fixture();
    let refs = fx
        .resolver
        .analyze(&json!({
            "nodes": [{
                "id": 1,
                "type": "CheckpointLoaderSimple",
                "widgets_values": ["dreamshaper_8.safetensors"]
            }]
        }))
        .unwrap();

    // Hand-build a candidate as the search layer would produce it.
    use vireo_core::search::ResultRanker;
    use vireo_core::{Confidence, SearchHit, SearchOutcome};

    let hit = |url: &str| SearchHit {
        source_catalog: "hub".to_string(),
        repository: "acme/dreamshaper".to_string(),
        display_name: "dreamshaper_8.safetensors".to_string(),
        direct_url: url.to_string(),
        size_bytes: Some(2048),
        kind_hint: None,
        confidence: Confidence::Exact,
        keyword_score: 1.0,
    };
    let ranker = ResultRanker::new(vec![]);
    let candidate = ranker.rank(
        refs[0].clone(),
        vec![(
            "hub".to_string(),
            SearchOutcome::Hits(vec![hit("https://a/1"), hit("https://a/2")]),
        )],
        &[],
    );

    let default_plan = fx.resolver.plan(&[candidate.clone()], &HashMap::new());
    assert_eq!(default_plan.len(), 1);
    assert_eq!(default_plan[0].source_url, "https://a/1");
    assert_eq!(default_plan[0].expected_size, Some(2048));
    assert!(default_plan[0]
        .target_path
        .ends_with("checkpoints/dreamshaper_8.safetensors"));

    let mut choice = HashMap::new();
    choice.insert(
        "dreamshaper_8.safetensors".to_string(),
        "https://a/2".to_string(),
    );
    let chosen_plan = fx.resolver.plan(&[candidate], &choice);
    assert_eq!(chosen_plan[0].source_url, "https://a/2");
}

#[tokio::test]
async fn existing_target_with_matching_size_bypasses_transfer() {
    let fx = fixture();
    let root = fx.resolver.config().paths.models_root.clone();
    write_model(&root, "loras/already_here.safetensors", 256);

    let spec = fx.resolver.plan_manual(
        "already_here.safetensors",
        ArtifactKind::Lora,
        "https://invalid.test/never-contacted",
    );
    // A manual spec has no expected size; attach the known one the way the
    // planner does for catalog hits.
    let spec = vireo_core::DownloadSpec {
        expected_size: Some(256),
        ..spec
    };

    let id = fx.resolver.downloads().enqueue(spec).unwrap();

    for _ in 0..100 {
        if let Some(task) = fx.resolver.downloads().task(id) {
            if task.status.is_terminal() {
                assert_eq!(task.status, TaskStatus::Succeeded);
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("download task never finished");
}

#[tokio::test]
async fn cache_stats_and_clear_roundtrip() {
    let fx = fixture();
    // An inventory scan populates the inventory namespace.
    let document = json!({
        "nodes": [{ "id": 1, "type": "VAELoader", "widgets_values": ["ae.safetensors"] }]
    });
    let _ = fx.resolver.resolve(&document).await.unwrap();

    let stats = fx.resolver.cache_stats().unwrap();
    assert!(stats.total_entries >= 1);

    let removed = fx.resolver.cache_clear(Some("inventory")).unwrap();
    assert!(removed >= 1);
    let stats = fx.resolver.cache_stats().unwrap();
    assert!(stats
        .namespaces
        .iter()
        .all(|ns| ns.namespace != "inventory" || ns.entry_count == 0));
}
