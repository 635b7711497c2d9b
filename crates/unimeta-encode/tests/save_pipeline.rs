//! Save-surface integration: full graphs through pixel encoding, container
//! embedding, staged fallback, and on-disk results.

use std::fs;
use std::sync::Arc;

use image::RgbaImage;
use serde_json::json;

use unimeta_capture::{DirArtifactIndex, HashCache, Resolver};
use unimeta_core::{ArtifactFamily, InputValue, NodeId, WorkflowGraph, WorkflowNode};
use unimeta_encode::save::{save_images, FileFormat, SaveOptions, SaveTarget};
use unimeta_encode::{exif, jpeg, png, webp, FallbackStage};
use unimeta_rules::{RegistryLoader, UserRulePaths};

struct Host {
    _dir: tempfile::TempDir,
    out_dir: std::path::PathBuf,
    loader: RegistryLoader,
    rule_paths: UserRulePaths,
    resolver: Resolver,
    hashes: HashCache,
}

impl Host {
    fn new() -> Host {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("checkpoints")).unwrap();
        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(
            dir.path().join("checkpoints/cyber_v33.safetensors"),
            b"checkpoint bytes",
        )
        .unwrap();
        let index = DirArtifactIndex::new()
            .with_root(ArtifactFamily::Checkpoint, dir.path().join("checkpoints"));
        let rule_paths = UserRulePaths::in_dir(dir.path().join("user_rules"));
        Host {
            _dir: dir,
            out_dir,
            loader: RegistryLoader::new(),
            rule_paths,
            resolver: Resolver::new(Arc::new(index)),
            hashes: HashCache::new(),
        }
    }

    fn target(&self) -> SaveTarget<'_> {
        SaveTarget {
            output_dir: &self.out_dir,
            registry_loader: &self.loader,
            rule_paths: &self.rule_paths,
            resolver: &self.resolver,
            hashes: &self.hashes,
        }
    }
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

fn graph(workflow_padding: usize) -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    graph.insert(
        4u64,
        WorkflowNode::new("CheckpointLoaderSimple")
            .with_input("ckpt_name", scalar(json!("cyber_v33.safetensors"))),
    );
    graph.insert(
        6u64,
        WorkflowNode::new("CLIPTextEncode")
            .with_input("text", scalar(json!("a lighthouse in a storm")))
            .with_input("clip", reference(4)),
    );
    graph.insert(
        7u64,
        WorkflowNode::new("CLIPTextEncode")
            .with_input("text", scalar(json!("blurry, lowres")))
            .with_input("clip", reference(4)),
    );
    graph.insert(
        5u64,
        WorkflowNode::new("EmptyLatentImage")
            .with_input("width", scalar(json!(512)))
            .with_input("height", scalar(json!(512))),
    );
    let mut sampler = WorkflowNode::new("KSampler")
        .with_input("seed", scalar(json!(42)))
        .with_input("steps", scalar(json!(20)))
        .with_input("cfg", scalar(json!(7.5)))
        .with_input("sampler_name", scalar(json!("dpmpp_2m")))
        .with_input("scheduler", scalar(json!("karras")))
        .with_input("denoise", scalar(json!(1)))
        .with_input("model", reference(4))
        .with_input("positive", reference(6))
        .with_input("negative", reference(7))
        .with_input("latent_image", reference(5));
    if workflow_padding > 0 {
        sampler = sampler.with_input("notes", scalar(json!("n".repeat(workflow_padding))));
    }
    graph.insert(3u64, sampler);
    graph.insert(
        9u64,
        WorkflowNode::new("SaveImage").with_input("images", reference(3)),
    );
    graph
}

fn pixel(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, image::Rgba([64, 128, 192, 255]))
}

#[test]
fn png_save_embeds_parameters_and_workflow() {
    let host = Host::new();
    let outcome = save_images(
        &host.target(),
        &[pixel(8, 8)],
        &graph(0),
        NodeId(9),
        &SaveOptions::default(),
    )
    .unwrap();

    assert_eq!(outcome.stage_mirror, vec!["full"]);
    let saved = &outcome.images[0];
    assert!(saved.path.exists());
    assert!(!saved.parameters.contains("Metadata Fallback:"));

    let bytes = fs::read(&saved.path).unwrap();
    let entries = png::read_text_chunks(&bytes);
    let parameters = entries
        .iter()
        .find(|(k, _)| k == "parameters")
        .map(|(_, v)| v.clone())
        .unwrap();
    assert!(parameters.starts_with("a lighthouse in a storm\n"));
    assert!(parameters.contains("Negative prompt: blurry, lowres"));
    assert!(parameters.contains("Steps: 20"));
    let workflow = entries
        .iter()
        .find(|(k, _)| k == "prompt")
        .map(|(_, v)| v.clone())
        .unwrap();
    let decoded: WorkflowGraph = serde_json::from_str(&workflow).unwrap();
    assert!(decoded.contains(NodeId(3)));
    // Each emitted field also landed as its own entry.
    assert!(entries.iter().any(|(k, v)| k == "Seed" && v == "42"));
}

#[test]
fn jpeg_full_stage_under_generous_limit() {
    let host = Host::new();
    let outcome = save_images(
        &host.target(),
        &[pixel(8, 8)],
        &graph(0),
        NodeId(9),
        &SaveOptions {
            file_format: FileFormat::Jpeg,
            max_jpeg_exif_kb: 64,
            ..SaveOptions::default()
        },
    )
    .unwrap();
    assert_eq!(outcome.stage_mirror, vec!["full"]);
    let bytes = fs::read(&outcome.images[0].path).unwrap();
    let app1 = jpeg::find_segment(&bytes, 0xE1).unwrap();
    let comment = exif::read_user_comment(&app1).unwrap();
    assert!(comment.contains("Steps: 20"));
    assert!(!comment.contains("Metadata Fallback:"));
    // The workflow rides in the zeroth IFD at the full stage.
    assert!(app1
        .windows(b"prompt:{".len())
        .any(|w| w == b"prompt:{"));
}

#[test]
fn jpeg_oversize_workflow_reaches_reduced_stage() {
    let host = Host::new();
    // ~200 KB workflow, 8 KiB ceiling: full and reduced both overflow once
    // the parameter string (UTF-16 in UserComment) is accounted for.
    let outcome = save_images(
        &host.target(),
        &[pixel(8, 8)],
        &graph(200_000),
        NodeId(9),
        &SaveOptions {
            file_format: FileFormat::Jpeg,
            max_jpeg_exif_kb: 8,
            ..SaveOptions::default()
        },
    )
    .unwrap();

    assert_eq!(outcome.stage_mirror, vec!["reduced-exif"]);
    let saved = &outcome.images[0];
    assert!(saved
        .parameters
        .contains("Metadata Fallback: reduced-exif, Metadata generator version:"));
    let bytes = fs::read(&saved.path).unwrap();
    let app1 = jpeg::find_segment(&bytes, 0xE1).unwrap();
    // No workflow payload at the reduced stage.
    assert!(!app1.windows(b"prompt:{".len()).any(|w| w == b"prompt:{"));
}

#[test]
fn jpeg_huge_parameters_reach_minimal_and_trim_to_allowlist() {
    let host = Host::new();
    let outcome = save_images(
        &host.target(),
        &[pixel(8, 8)],
        &graph(200_000),
        NodeId(9),
        &SaveOptions {
            file_format: FileFormat::Jpeg,
            max_jpeg_exif_kb: 8,
            // A large extra-metadata value rides in the parameter string and
            // pushes the reduced stage over the ceiling too.
            extra_metadata: vec![("Session notes".to_string(), "y".repeat(8_000))],
            ..SaveOptions::default()
        },
    )
    .unwrap();

    assert_eq!(outcome.stage_mirror, vec!["minimal"]);
    let saved = &outcome.images[0];
    assert!(saved.parameters.contains("Metadata Fallback: minimal"));
    assert_eq!(saved.parameters.matches("Metadata Fallback:").count(), 1);
    let bytes = fs::read(&saved.path).unwrap();
    let app1 = jpeg::find_segment(&bytes, 0xE1).unwrap();
    let comment = exif::read_user_comment(&app1).unwrap();
    assert!(comment.contains("Steps: 20"));
    assert!(comment.contains("Model hash:"));
    assert!(!comment.contains("Session notes"));
    assert!(!comment.contains("Denoise"));
    assert!(!comment.contains("Scheduler"));
}

#[test]
fn one_kib_limit_reaches_com_marker() {
    let host = Host::new();
    // The prompt is kept by every stage, so a long one defeats even the
    // minimal stage at a 1 KiB ceiling.
    let long_prompt = "an extremely long prompt ".repeat(40);
    let mut workflow = graph(4_000);
    workflow.insert(
        6u64,
        WorkflowNode::new("CLIPTextEncode")
            .with_input("text", scalar(json!(long_prompt.clone())))
            .with_input("clip", reference(4)),
    );
    let outcome = save_images(
        &host.target(),
        &[pixel(8, 8)],
        &workflow,
        NodeId(9),
        &SaveOptions {
            file_format: FileFormat::Jpeg,
            max_jpeg_exif_kb: 1,
            ..SaveOptions::default()
        },
    )
    .unwrap();

    assert_eq!(outcome.stage_mirror, vec!["com-marker"]);
    let bytes = fs::read(&outcome.images[0].path).unwrap();
    assert!(jpeg::find_segment(&bytes, 0xE1).is_none());
    let com = jpeg::find_segment(&bytes, 0xFE).unwrap();
    let text = String::from_utf8_lossy(&com);
    assert!(text.contains("Metadata Fallback: com-marker"));
    assert!(text.contains("an extremely long prompt"));
}

#[test]
fn batch_images_stage_independently_with_batch_fields() {
    let host = Host::new();
    let outcome = save_images(
        &host.target(),
        &[pixel(8, 8), pixel(8, 8)],
        &graph(0),
        NodeId(9),
        &SaveOptions::default(),
    )
    .unwrap();

    assert_eq!(outcome.images.len(), 2);
    assert_eq!(outcome.stage_mirror.len(), 2);
    assert!(outcome.images[0].parameters.contains("Batch index: 0"));
    assert!(outcome.images[1].parameters.contains("Batch index: 1"));
    assert!(outcome.images[0].parameters.contains("Batch size: 2"));
    assert_ne!(outcome.images[0].path, outcome.images[1].path);
}

#[test]
fn webp_carries_exif_chunk() {
    let host = Host::new();
    let outcome = save_images(
        &host.target(),
        &[pixel(16, 8)],
        &graph(0),
        NodeId(9),
        &SaveOptions {
            file_format: FileFormat::Webp,
            ..SaveOptions::default()
        },
    )
    .unwrap();
    assert_eq!(outcome.images[0].stage, FallbackStage::Full);
    let bytes = fs::read(&outcome.images[0].path).unwrap();
    let exif_chunk = webp::find_chunk(&bytes, b"EXIF").unwrap();
    assert_eq!(&exif_chunk[..4], b"II*\0");
}

#[test]
fn filename_counter_increments_across_saves() {
    let host = Host::new();
    let options = SaveOptions {
        filename_prefix: "img_%seed%".to_string(),
        ..SaveOptions::default()
    };
    let first = save_images(&host.target(), &[pixel(4, 4)], &graph(0), NodeId(9), &options)
        .unwrap();
    let second = save_images(&host.target(), &[pixel(4, 4)], &graph(0), NodeId(9), &options)
        .unwrap();
    let name1 = first.images[0].path.file_name().unwrap().to_string_lossy().to_string();
    let name2 = second.images[0]
        .path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert_eq!(name1, "img_42_00001_.png");
    assert_eq!(name2, "img_42_00002_.png");
}

#[test]
fn workflow_sidecar_written_when_requested() {
    let host = Host::new();
    let outcome = save_images(
        &host.target(),
        &[pixel(4, 4)],
        &graph(0),
        NodeId(9),
        &SaveOptions {
            save_workflow_json: true,
            ..SaveOptions::default()
        },
    )
    .unwrap();
    let sidecar = outcome.images[0].path.with_extension("json");
    let decoded: WorkflowGraph =
        serde_json::from_str(&fs::read_to_string(sidecar).unwrap()).unwrap();
    assert_eq!(decoded.len(), 6);
}

#[test]
fn extra_metadata_values_are_comma_sanitized() {
    let host = Host::new();
    let outcome = save_images(
        &host.target(),
        &[pixel(4, 4)],
        &graph(0),
        NodeId(9),
        &SaveOptions {
            extra_metadata: vec![("Palette".to_string(), "red, gold".to_string())],
            ..SaveOptions::default()
        },
    )
    .unwrap();
    assert!(outcome.images[0].parameters.contains("Palette: red/ gold"));
}
