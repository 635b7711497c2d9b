//! End-to-end capture scenarios: graph in, parameter string out.
//!
//! Each test builds a workflow graph the way the host serializes one, runs
//! the capture pipeline against a temp artifact tree, and asserts on the
//! rendered parameter string.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};

use unimeta_capture::extract::ExtractionContext;
use unimeta_capture::fields::keys;
use unimeta_capture::format::{render_parameters, FormatOptions};
use unimeta_capture::pipeline::{run_capture, CaptureOptions};
use unimeta_capture::{DirArtifactIndex, HashCache, Resolver};
use unimeta_core::{ArtifactFamily, InputValue, NodeId, Settings, WorkflowGraph, WorkflowNode};
use unimeta_rules::{Registry, RegistryLoader, RegistryOptions, UserRulePaths};

struct Fixture {
    dir: tempfile::TempDir,
    resolver: Resolver,
    hashes: HashCache,
    registry: Registry,
    settings: Settings,
}

impl Fixture {
    fn new() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["checkpoints/sd15", "loras/LoRA", "vae", "embeddings", "unet"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        fs::write(
            dir.path().join("checkpoints/sd15/cyber_v33.safetensors"),
            b"sd15 checkpoint bytes",
        )
        .unwrap();
        fs::write(dir.path().join("loras/LoRA/a.safetensors"), b"lora a").unwrap();
        fs::write(dir.path().join("loras/LoRA/b.safetensors"), b"lora b").unwrap();
        fs::write(dir.path().join("loras/LoRA/c.safetensors"), b"lora c").unwrap();
        fs::write(dir.path().join("vae/orange.vae.pt"), b"vae bytes").unwrap();
        fs::write(
            dir.path().join("embeddings/easynegative.safetensors"),
            b"embedding bytes",
        )
        .unwrap();

        let index = DirArtifactIndex::new()
            .with_root(ArtifactFamily::Checkpoint, dir.path().join("checkpoints"))
            .with_root(ArtifactFamily::Lora, dir.path().join("loras"))
            .with_root(ArtifactFamily::Vae, dir.path().join("vae"))
            .with_root(ArtifactFamily::Embedding, dir.path().join("embeddings"))
            .with_root(ArtifactFamily::Unet, dir.path().join("unet"));

        let settings = Settings::default();
        let rule_paths = UserRulePaths::in_dir(dir.path().join("user_rules"));
        let registry = RegistryLoader::new()
            .build(&rule_paths, &settings, &RegistryOptions::default())
            .unwrap();

        Fixture {
            dir,
            resolver: Resolver::new(Arc::new(index)),
            hashes: HashCache::new(),
            registry,
            settings,
        }
    }

    fn ctx<'a>(&'a self, graph: &'a WorkflowGraph) -> ExtractionContext<'a> {
        ExtractionContext {
            graph,
            registry: &self.registry,
            resolver: &self.resolver,
            hashes: &self.hashes,
            settings: &self.settings,
        }
    }

    fn parameters(&self, graph: &WorkflowGraph, save_node: u64) -> String {
        let ctx = self.ctx(graph);
        let capture = run_capture(&ctx, NodeId(save_node), &CaptureOptions::default());
        render_parameters(
            &capture.field_map,
            &FormatOptions::default(),
            &self.settings,
            &capture.multi_entries,
        )
    }
}

fn expected_truncation(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fs::read(path).unwrap());
    format!("{:x}", hasher.finalize())[..10].to_string()
}

fn reference(source: u64) -> InputValue {
    InputValue::Ref {
        source: NodeId(source),
        output: 0,
    }
}

fn scalar(v: serde_json::Value) -> InputValue {
    InputValue::from_json(v)
}

/// Classic SD1.5 text-to-image graph: loader, two encoders, latent,
/// KSampler, save.
fn sd15_graph(positive: &str, negative: &str) -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    graph.insert(
        4u64,
        WorkflowNode::new("CheckpointLoaderSimple")
            .with_input("ckpt_name", scalar(json!("sd15/cyber_v33.safetensors"))),
    );
    graph.insert(
        6u64,
        WorkflowNode::new("CLIPTextEncode")
            .with_input("text", scalar(json!(positive)))
            .with_input("clip", reference(4)),
    );
    graph.insert(
        7u64,
        WorkflowNode::new("CLIPTextEncode")
            .with_input("text", scalar(json!(negative)))
            .with_input("clip", reference(4)),
    );
    graph.insert(
        5u64,
        WorkflowNode::new("EmptyLatentImage")
            .with_input("width", scalar(json!(512)))
            .with_input("height", scalar(json!(512)))
            .with_input("batch_size", scalar(json!(1))),
    );
    graph.insert(
        3u64,
        WorkflowNode::new("KSampler")
            .with_input("seed", scalar(json!(123)))
            .with_input("steps", scalar(json!(20)))
            .with_input("cfg", scalar(json!(8)))
            .with_input("sampler_name", scalar(json!("dpmpp_2m")))
            .with_input("scheduler", scalar(json!("karras")))
            .with_input("denoise", scalar(json!(1)))
            .with_input("model", reference(4))
            .with_input("positive", reference(6))
            .with_input("negative", reference(7))
            .with_input("latent_image", reference(5)),
    );
    graph.insert(
        9u64,
        WorkflowNode::new("SaveImage").with_input("images", reference(3)),
    );
    graph
}

#[test]
fn single_sampler_sd15_parameter_string() {
    let fixture = Fixture::new();
    let graph = sd15_graph("a cyberpunk cat in neon rain", "");
    let params = fixture.parameters(&graph, 9);

    assert!(params.starts_with("a cyberpunk cat in neon rain\n"));
    // Empty negative prompt is omitted.
    assert!(!params.contains("Negative prompt:"));
    for expected in [
        "Steps: 20",
        "Sampler: dpmpp_2m",
        "CFG scale: 8",
        "Seed: 123",
        "Size: 512x512",
        "Model: cyber_v33",
        "Denoise: 1",
        "Scheduler: karras",
    ] {
        assert!(params.contains(expected), "missing '{expected}' in:\n{params}");
    }
    let truncated = expected_truncation(
        &fixture
            .dir
            .path()
            .join("checkpoints/sd15/cyber_v33.safetensors"),
    );
    assert!(params.contains(&format!("Model hash: {truncated}")));
    assert!(params.contains(&format!("Hashes: {{\"model\":\"{truncated}\"}}")));
    assert!(!params.contains("Metadata Fallback:"));
    let version_at = params.find("Metadata generator version:").unwrap();
    assert_eq!(
        params[version_at..].lines().count(),
        1,
        "version must be the final field"
    );

    // The hash computation left a sidecar next to the artifact.
    assert!(fixture
        .dir
        .path()
        .join("checkpoints/sd15/cyber_v33.safetensors.sha256")
        .exists());
}

#[test]
fn capture_is_deterministic_across_runs() {
    let fixture = Fixture::new();
    let graph = sd15_graph("a cat", "lowres");
    let first = fixture.parameters(&graph, 9);
    let second = fixture.parameters(&graph, 9);
    assert_eq!(first, second);
}

#[test]
fn negative_prompt_identical_to_positive_is_dropped() {
    let fixture = Fixture::new();
    let graph = sd15_graph("same text", "same text");
    let params = fixture.parameters(&graph, 9);
    assert!(!params.contains("Negative prompt:"));
}

#[test]
fn multi_lora_stack_drops_disabled_slot_and_renumbers() {
    let fixture = Fixture::new();
    let mut graph = sd15_graph("a cat", "");
    graph.insert(
        20u64,
        WorkflowNode::new("LoRA Stacker")
            .with_input("lora_count", scalar(json!(4)))
            .with_input("lora_name_1", scalar(json!("LoRA/a.safetensors")))
            .with_input("lora_wt_1", scalar(json!(0.97)))
            .with_input("lora_name_2", scalar(json!("LoRA/b.safetensors")))
            .with_input("lora_wt_2", scalar(json!(0.6)))
            .with_input("lora_name_3", scalar(json!("None")))
            .with_input("lora_wt_3", scalar(json!(1.0)))
            .with_input("lora_name_4", scalar(json!("LoRA/c.safetensors")))
            .with_input("lora_wt_4", scalar(json!(0.5))),
    );
    // Wire the stack into the sampler path so the trace reaches it.
    graph.insert(
        3u64,
        WorkflowNode::new("KSampler")
            .with_input("seed", scalar(json!(1)))
            .with_input("steps", scalar(json!(20)))
            .with_input("cfg", scalar(json!(7)))
            .with_input("sampler_name", scalar(json!("euler")))
            .with_input("scheduler", scalar(json!("normal")))
            .with_input("model", reference(20))
            .with_input("positive", reference(6))
            .with_input("negative", reference(7))
            .with_input("latent_image", reference(5)),
    );
    let params = fixture.parameters(&graph, 9);

    assert!(params.contains("Lora_1 Model name: a.safetensors"));
    assert!(params.contains("Lora_1 Strength model: 0.97"));
    assert!(params.contains("Lora_2 Model name: b.safetensors"));
    assert!(params.contains("Lora_2 Strength model: 0.6"));
    assert!(params.contains("Lora_3 Model name: c.safetensors"));
    assert!(params.contains("Lora_3 Strength model: 0.5"));
    assert!(!params.contains("Lora_4"));
    assert!(!params.contains("None"));

    let hash = |name: &str| {
        expected_truncation(&fixture.dir.path().join(format!("loras/LoRA/{name}")))
    };
    for (key, file) in [
        ("lora:a", "a.safetensors"),
        ("lora:b", "b.safetensors"),
        ("lora:c", "c.safetensors"),
    ] {
        assert!(
            params.contains(&format!("\"{key}\":\"{}\"", hash(file))),
            "missing {key} in Hashes"
        );
    }
    assert!(!params.contains("lora:None"));
}

#[test]
fn hashes_summary_matches_primary_entries_exactly() {
    let fixture = Fixture::new();
    let mut graph = sd15_graph("a cat", "");
    graph.insert(
        21u64,
        WorkflowNode::new("LoraLoader")
            .with_input("lora_name", scalar(json!("LoRA/a.safetensors")))
            .with_input("strength_model", scalar(json!(0.8)))
            .with_input("strength_clip", scalar(json!(0.8)))
            .with_input("model", reference(4)),
    );
    graph.insert(
        3u64,
        WorkflowNode::new("KSampler")
            .with_input("seed", scalar(json!(1)))
            .with_input("steps", scalar(json!(10)))
            .with_input("cfg", scalar(json!(7)))
            .with_input("sampler_name", scalar(json!("euler")))
            .with_input("scheduler", scalar(json!("normal")))
            .with_input("model", reference(21))
            .with_input("positive", reference(6))
            .with_input("negative", reference(7))
            .with_input("latent_image", reference(5)),
    );
    let params = fixture.parameters(&graph, 9);

    // Every lora:X summary key has a matching Lora_N Model name, and the
    // other way round.
    let hashes_line = params
        .lines()
        .last()
        .unwrap()
        .split("Hashes: ")
        .nth(1)
        .unwrap()
        .split(", Metadata generator version")
        .next()
        .unwrap();
    let summary: serde_json::Value = serde_json::from_str(hashes_line).unwrap();
    let summary_loras: Vec<&str> = summary
        .as_object()
        .unwrap()
        .keys()
        .filter_map(|k| k.strip_prefix("lora:"))
        .collect();
    assert_eq!(summary_loras, vec!["a"]);
    assert!(params.contains("Lora_1 Model name: a.safetensors"));
}

#[test]
fn dual_encoder_prompts_replace_unified_header() {
    let fixture = Fixture::new();
    let mut graph = WorkflowGraph::new();
    graph.insert(
        2u64,
        WorkflowNode::new("DualCLIPLoader")
            .with_input("clip_name1", scalar(json!("clip_l.safetensors")))
            .with_input("clip_name2", scalar(json!("t5xxl_fp16.safetensors"))),
    );
    graph.insert(
        6u64,
        WorkflowNode::new("CLIPTextEncodeFlux")
            .with_input("t5xxl", scalar(json!("a grand canyon at dusk, detailed")))
            .with_input("clip_l", scalar(json!("grand canyon, dusk")))
            .with_input("guidance", scalar(json!(3.5)))
            .with_input("clip", reference(2)),
    );
    graph.insert(
        5u64,
        WorkflowNode::new("EmptyLatentImage")
            .with_input("width", scalar(json!(1024)))
            .with_input("height", scalar(json!(1024))),
    );
    graph.insert(
        3u64,
        WorkflowNode::new("KSampler")
            .with_input("seed", scalar(json!(7)))
            .with_input("steps", scalar(json!(28)))
            .with_input("cfg", scalar(json!(1)))
            .with_input("sampler_name", scalar(json!("euler")))
            .with_input("scheduler", scalar(json!("simple")))
            .with_input("positive", reference(6))
            .with_input("negative", reference(6))
            .with_input("latent_image", reference(5)),
    );
    graph.insert(
        9u64,
        WorkflowNode::new("SaveImage").with_input("images", reference(3)),
    );

    let params = fixture.parameters(&graph, 9);
    assert!(params.starts_with("T5 Prompt: a grand canyon at dusk, detailed\n"));
    assert!(params.contains("CLIP Prompt: grand canyon, dusk"));
    assert!(!params.contains("t5 prompt"));
    assert!(!params.contains("clip prompt"));
    assert!(params.contains("CLIP_1 Model name: clip_l"));
    assert!(params.contains("CLIP_2 Model name: t5xxl_fp16"));
    assert!(params.contains("Guidance: 3.5"));
}

#[test]
fn embeddings_are_resolved_named_and_hashed() {
    let fixture = Fixture::new();
    let graph = sd15_graph("a castle, embedding:easynegative", "");
    let params = fixture.parameters(&graph, 9);

    assert!(params.contains("Embedding_1 name: easynegative"));
    let truncated =
        expected_truncation(&fixture.dir.path().join("embeddings/easynegative.safetensors"));
    assert!(params.contains(&format!("Embedding_1 hash: {truncated}")));
    assert!(params.contains(&format!("\"embed:easynegative\":\"{truncated}\"")));
}

#[test]
fn no_loras_means_no_lora_fields_and_no_summary() {
    let fixture = Fixture::new();
    let graph = sd15_graph("plain prompt", "");
    let params = fixture.parameters(&graph, 9);
    assert!(!params.contains("Lora_"));
    assert!(!params.contains("LoRAs:"));
}

#[test]
fn missing_sampler_still_emits_partial_metadata() {
    let fixture = Fixture::new();
    let mut graph = WorkflowGraph::new();
    graph.insert(
        4u64,
        WorkflowNode::new("CheckpointLoaderSimple")
            .with_input("ckpt_name", scalar(json!("sd15/cyber_v33.safetensors"))),
    );
    graph.insert(
        9u64,
        WorkflowNode::new("SaveImage").with_input("images", reference(4)),
    );
    let ctx = fixture.ctx(&graph);
    let capture = run_capture(&ctx, NodeId(9), &CaptureOptions::default());
    assert!(capture.primary_sampler.is_none());
    assert_eq!(
        capture.field_map.get(keys::MODEL),
        Some(&json!("cyber_v33"))
    );
}

#[test]
fn extreme_seed_is_verbatim() {
    let fixture = Fixture::new();
    let mut graph = sd15_graph("a cat", "");
    graph.insert(
        3u64,
        WorkflowNode::new("KSampler")
            .with_input("seed", scalar(json!(1_000_000_000_000_000u64)))
            .with_input("steps", scalar(json!(20)))
            .with_input("cfg", scalar(json!(8)))
            .with_input("sampler_name", scalar(json!("euler")))
            .with_input("scheduler", scalar(json!("normal")))
            .with_input("model", reference(4))
            .with_input("positive", reference(6))
            .with_input("negative", reference(7))
            .with_input("latent_image", reference(5)),
    );
    let params = fixture.parameters(&graph, 9);
    assert!(params.contains("Seed: 1000000000000000"));
}
