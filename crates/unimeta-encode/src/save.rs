//! The host-invoked save surface.
//!
//! One call captures metadata for the whole batch, then encodes and writes
//! each image, staging its container metadata independently. Metadata
//! problems never fail the save: the worst case is an image written with a
//! bare COM marker and the annotation recording the degradation.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage};
use serde_json::Value;
use tracing::{debug, warn};

use unimeta_capture::extract::ExtractionContext;
use unimeta_capture::fields::{keys, FieldMap};
use unimeta_capture::format::{render_parameters, FormatOptions};
use unimeta_capture::pipeline::{self, CaptureOptions};
use unimeta_capture::select::SelectionMethod;
use unimeta_capture::{HashCache, Resolver};
use unimeta_core::{NodeId, Settings, WorkflowGraph};
use unimeta_rules::{RegistryLoader, RegistryOptions, UserRulePaths};

use crate::error::EncodeError;
use crate::filename::format_filename;
use crate::jpeg;
use crate::png;
use crate::stage::{self, FallbackStage};
use crate::webp;

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Png,
    Jpeg,
    Webp,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Png => "png",
            FileFormat::Jpeg => "jpeg",
            FileFormat::Webp => "webp",
        }
    }
}

/// Parameters of one save invocation.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub filename_prefix: String,
    pub file_format: FileFormat,
    pub sampler_selection: SelectionMethod,
    pub civitai_sampler: bool,
    /// Replace `CFG scale` with the captured guidance and drop `Guidance`.
    pub guidance_as_cfg: bool,
    /// UI override for the aggregated LoRA summary line.
    pub include_lora_summary: Option<bool>,
    /// EXIF attempt ceiling for JPEG, in KiB. Clamped to `[1, 64]`.
    pub max_jpeg_exif_kb: u32,
    pub extra_metadata: Vec<(String, String)>,
    /// Embed the workflow graph in the image metadata.
    pub save_workflow_image: bool,
    /// Also write the workflow JSON next to the image.
    pub save_workflow_json: bool,
    pub add_counter_to_filename: bool,
    /// JPEG quality (1-100).
    pub quality: u8,
    pub multi_sampler_cap: usize,
    /// Node classes whose user rules always load.
    pub forced_classes: BTreeSet<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            filename_prefix: "output".to_string(),
            file_format: FileFormat::Png,
            sampler_selection: SelectionMethod::Farthest,
            civitai_sampler: false,
            guidance_as_cfg: false,
            include_lora_summary: None,
            max_jpeg_exif_kb: 60,
            extra_metadata: Vec::new(),
            save_workflow_image: true,
            save_workflow_json: false,
            add_counter_to_filename: true,
            quality: 100,
            multi_sampler_cap: 1,
            forced_classes: BTreeSet::new(),
        }
    }
}

/// Host-owned long-lived handles the save surface operates against.
pub struct SaveTarget<'a> {
    pub output_dir: &'a Path,
    pub registry_loader: &'a RegistryLoader,
    pub rule_paths: &'a UserRulePaths,
    pub resolver: &'a Resolver,
    pub hashes: &'a HashCache,
}

/// One written image.
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub path: PathBuf,
    pub stage: FallbackStage,
    pub parameters: String,
}

/// The per-call result, including the stage mirror for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SaveOutcome {
    pub images: Vec<SavedImage>,
    /// Stage names, one per image, in write order.
    pub stage_mirror: Vec<&'static str>,
}

fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn next_counter(dir: &Path, base: &str) -> u32 {
    let mut highest = 0u32;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(rest) = name.strip_prefix(&format!("{base}_")) {
                if let Some(digits) = rest.split('_').next() {
                    if let Ok(n) = digits.parse::<u32>() {
                        highest = highest.max(n);
                    }
                }
            }
        }
    }
    highest + 1
}

fn encode_pixels(
    image: &RgbaImage,
    format: FileFormat,
    quality: u8,
) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Cursor::new(Vec::new());
    match format {
        FileFormat::Png => image.write_to(&mut bytes, ImageFormat::Png)?,
        FileFormat::Jpeg => {
            let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut bytes,
                quality.clamp(1, 100),
            );
            rgb.write_with_encoder(encoder)?;
        }
        FileFormat::Webp => image.write_to(&mut bytes, ImageFormat::WebP)?,
    }
    Ok(bytes.into_inner())
}

/// Saves a batch of images with embedded metadata.
pub fn save_images(
    target: &SaveTarget<'_>,
    images: &[RgbaImage],
    graph: &WorkflowGraph,
    save_node: NodeId,
    options: &SaveOptions,
) -> Result<SaveOutcome, EncodeError> {
    let settings = Settings::from_env();

    // Restrict the user-rule merge to classes actually reachable from the
    // save node, plus anything force-included.
    let reachable = unimeta_capture::trace::trace(graph, save_node);
    let required: HashSet<String> = reachable
        .order
        .iter()
        .filter_map(|id| graph.get(*id).map(|n| n.class_name.clone()))
        .collect();
    let registry_options = RegistryOptions {
        required_classes: Some(required),
        forced_classes: options.forced_classes.iter().cloned().collect(),
    };
    let registry = target
        .registry_loader
        .build(target.rule_paths, &settings, &registry_options)
        .map_err(|err| {
            warn!(%err, "registry build failed; continuing with defaults only");
            err
        })
        .unwrap_or_default();

    let ctx = ExtractionContext {
        graph,
        registry: &registry,
        resolver: target.resolver,
        hashes: target.hashes,
        settings: &settings,
    };
    let capture = pipeline::run_capture(
        &ctx,
        save_node,
        &CaptureOptions {
            sampler_selection: options.sampler_selection,
            civitai_sampler: options.civitai_sampler,
            multi_sampler_cap: options.multi_sampler_cap,
        },
    );

    let workflow_json = options
        .save_workflow_image
        .then(|| serde_json::to_string(graph).unwrap_or_default());

    let format_options = FormatOptions {
        multiline: settings.test_mode,
        include_lora_summary: options.include_lora_summary,
        guidance_as_cfg: options.guidance_as_cfg,
    };

    fs::create_dir_all(target.output_dir)
        .map_err(|e| EncodeError::io(target.output_dir, e))?;

    let mut outcome = SaveOutcome::default();
    for (index, image) in images.iter().enumerate() {
        let mut map = capture.field_map.clone();
        if images.len() >= 2 {
            map.insert(keys::BATCH_INDEX.to_string(), Value::from(index as u64));
            map.insert(keys::BATCH_SIZE.to_string(), Value::from(images.len() as u64));
        }
        pipeline::merge_extra_metadata(
            &mut map,
            options
                .extra_metadata
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let parameters =
            render_parameters(&map, &format_options, &settings, &capture.multi_entries);

        let encoded = encode_pixels(image, options.file_format, options.quality)?;
        let (bytes, stage, parameters) = match options.file_format {
            FileFormat::Png => {
                let mut entries = vec![("parameters".to_string(), parameters.clone())];
                if let Some(workflow) = &workflow_json {
                    entries.push(("prompt".to_string(), workflow.clone()));
                }
                for (key, value) in &map {
                    entries.push((key.clone(), display_string(value)));
                }
                let bytes = png::insert_text_chunks(&encoded, &entries)?;
                (bytes, FallbackStage::Full, parameters)
            }
            FileFormat::Webp => {
                let block = stage::stage_exif(
                    &parameters,
                    workflow_json.as_deref(),
                    &[],
                    usize::MAX,
                );
                let bytes = match block.exif {
                    Some(exif) => {
                        match webp::insert_exif_chunk(&encoded, &exif, image.width(), image.height())
                        {
                            Ok(with_exif) => with_exif,
                            Err(err) => {
                                // Side metadata on WebP is best effort.
                                warn!(%err, "failed to embed WebP EXIF; writing image without it");
                                encoded
                            }
                        }
                    }
                    None => encoded,
                };
                (bytes, FallbackStage::Full, parameters)
            }
            FileFormat::Jpeg => {
                let limit = options.max_jpeg_exif_kb.clamp(1, 64) as usize * 1024;
                let staged = stage::stage_exif(
                    &parameters,
                    workflow_json.as_deref(),
                    &[],
                    limit,
                );
                match staged.exif {
                    Some(exif) => match jpeg::insert_app1_exif(&encoded, &exif) {
                        Ok(bytes) => (bytes, staged.stage, staged.parameters),
                        Err(EncodeError::EncoderRejected { size, limit }) => {
                            // The container refused the segment outright;
                            // escalate to the marker stage.
                            debug!(size, limit, "EXIF segment rejected; using COM marker");
                            let marker_params = stage::annotate(
                                &stage::minimal_parameters(&parameters),
                                FallbackStage::ComMarker,
                            );
                            let bytes = jpeg::append_com_marker(&encoded, &marker_params)?;
                            (bytes, FallbackStage::ComMarker, marker_params)
                        }
                        Err(other) => return Err(other),
                    },
                    None => {
                        let bytes = jpeg::append_com_marker(&encoded, &staged.parameters)?;
                        (bytes, FallbackStage::ComMarker, staged.parameters)
                    }
                }
            }
        };

        let base = format_filename(&options.filename_prefix, &map);
        let file_name = if options.add_counter_to_filename {
            let counter = next_counter(target.output_dir, &base);
            format!("{base}_{counter:05}_.{}", options.file_format.extension())
        } else {
            format!("{base}.{}", options.file_format.extension())
        };
        let path = target.output_dir.join(&file_name);
        fs::write(&path, &bytes).map_err(|e| EncodeError::io(&path, e))?;

        if options.save_workflow_json {
            if let Some(workflow) = &workflow_json {
                let sidecar = path.with_extension("json");
                if let Err(err) = fs::write(&sidecar, workflow) {
                    warn!(path = %sidecar.display(), %err, "failed to write workflow sidecar");
                }
            }
        }

        outcome.stage_mirror.push(stage.as_str());
        outcome.images.push(SavedImage {
            path,
            stage,
            parameters,
        });
    }
    Ok(outcome)
}

/// Renders the parameter string for a graph without writing any image.
/// Hosts use this for UI preview; tests use it for string-level assertions.
pub fn preview_parameters(
    target: &SaveTarget<'_>,
    graph: &WorkflowGraph,
    save_node: NodeId,
    options: &SaveOptions,
) -> (FieldMap, String) {
    let settings = Settings::from_env();
    let registry = target
        .registry_loader
        .build(target.rule_paths, &settings, &RegistryOptions::default())
        .unwrap_or_default();
    let ctx = ExtractionContext {
        graph,
        registry: &registry,
        resolver: target.resolver,
        hashes: target.hashes,
        settings: &settings,
    };
    let capture = pipeline::run_capture(
        &ctx,
        save_node,
        &CaptureOptions {
            sampler_selection: options.sampler_selection,
            civitai_sampler: options.civitai_sampler,
            multi_sampler_cap: options.multi_sampler_cap,
        },
    );
    let mut map = capture.field_map.clone();
    pipeline::merge_extra_metadata(
        &mut map,
        options
            .extra_metadata
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );
    let parameters = render_parameters(
        &map,
        &FormatOptions {
            multiline: settings.test_mode,
            include_lora_summary: options.include_lora_summary,
            guidance_as_cfg: options.guidance_as_cfg,
        },
        &settings,
        &capture.multi_entries,
    );
    (map, parameters)
}
