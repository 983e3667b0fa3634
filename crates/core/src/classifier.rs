//! Node classification and generation-parameter extraction.
//!
//! Every node is inspected on its own declared inputs only; references to
//! other nodes' outputs are never followed, so a referenced field simply
//! reads as absent.
//!
//! The base vs. refiner decision lives in [`classify_node`]. All other
//! parameters follow single-pass rules keyed on `class_type` substrings or
//! input names, with the first matching node winning for scalar fields.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::workflow::{NodeRecord, WorkflowGraph};

// ---------------------------------------------------------------------------
// Input keys and vocabularies
// ---------------------------------------------------------------------------

/// Inputs whose literal string value names a loaded checkpoint.
pub const CHECKPOINT_KEYS: &[&str] = &[
    "ckpt_name",
    "unet_name",
    "base_ckpt",
    "refiner_ckpt",
    "refiner_model",
];

/// Keys read, in order, for a node chosen as the primary model.
const PRIMARY_KEYS: &[&str] = &["ckpt_name", "unet_name", "base_ckpt"];

const REFINER_MODEL_KEYS: &[&str] = &["refiner_ckpt", "refiner_model"];

const DENOISE_RANGE_KEYS: &[&str] = &[
    "denoising_start",
    "denoising_end",
    "denoise_start",
    "denoise_end",
];

const SWITCH_KEYS: &[&str] = &["switch_at", "refiner_switch"];

const SAMPLING_KEYS: &[&str] = &["steps", "cfg", "sampler_name", "scheduler", "denoise"];

const SEED_KEYS: &[&str] = &["seed", "noise_seed"];

/// Node types whose seeds are auxiliary and not the generation seed.
const SEED_EXCLUDED_CLASSES: &[&str] = &["detailer", "noise"];

const UPSCALE_CLASS_TERMS: &[&str] = &["upscal", "esrgan", "swinir", "ldsr"];

const EMBEDDING_INPUT_KEYS: &[&str] = &["emb_name", "embedding_name"];

/// Phrases that mark a prompt as negative when its title gives no hint.
pub const STOCK_NEGATIVE_PHRASES: &[&str] = &[
    "worst quality",
    "low quality",
    "bad anatomy",
    "blurry",
    "ugly",
    "lowres",
    "watermark",
    "deformed",
];

/// Inline prompt syntaxes that look like `<...>` tokens but are not embeddings.
const NON_EMBEDDING_TAG_PREFIXES: &[&str] = &["lora:", "lyco:", "hypernet:"];

static ANGLE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>]+)>").expect("valid regex"));

static EMBEDDING_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bembedding:([\w.\-]+)").expect("valid regex"));

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Everything derived from one image's workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedParameters {
    pub primary_checkpoint: Option<String>,
    pub refiner: Option<RefinerInfo>,
    pub loras: Vec<LoraEntry>,
    pub vae: Option<String>,
    pub sampling: SamplingParams,
    pub prompts: Prompts,
    pub embeddings: Vec<EmbeddingEntry>,
    pub seeds: Vec<SeedEntry>,
    pub controlnets: Vec<ControlNetEntry>,
    pub upscaling: Option<UpscaleInfo>,
    pub image_params: Option<ImageParams>,
    /// Every distinct checkpoint name seen, in document order.
    pub checkpoints: Vec<String>,
}

impl ExtractedParameters {
    /// `true` when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinerInfo {
    pub model: Option<String>,
    pub base_model: Option<String>,
    pub switch_point: Option<f64>,
}

impl RefinerInfo {
    fn is_empty(&self) -> bool {
        self.model.is_none() && self.base_model.is_none() && self.switch_point.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraEntry {
    pub name: String,
    pub model_strength: Option<f64>,
    pub clip_strength: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
}

impl SamplingParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompts {
    pub positive: Option<String>,
    pub negative: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

/// Where an embedding reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    /// Inline token inside prompt text.
    PromptText,
    /// Dedicated embedding node input.
    NodeInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub name: String,
    pub polarity: Polarity,
    pub source: EmbeddingSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub class_type: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlNetEntry {
    pub class_type: String,
    pub model: Option<String>,
    pub strength: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscaleInfo {
    /// Class type of the first upscaling node.
    pub class_type: String,
    pub model: Option<String>,
    pub method: Option<String>,
    pub scale_by: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub batch_size: Option<i64>,
}

/// Role of a node in the base vs. refiner decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Loads the main generative model.
    Primary,
    /// Loads or drives a second-phase refiner model.
    Refiner,
    Ignore,
}

// ---------------------------------------------------------------------------
// Role classification
// ---------------------------------------------------------------------------

/// Decide a node's role. Pure; depends only on the node itself.
///
/// Precedence:
/// 1. checkpoint-loading or sampler node with any refiner signal: `Refiner`
/// 2. checkpoint-loading node otherwise: `Primary`
/// 3. anything else: `Ignore`
pub fn classify_node(node: &NodeRecord) -> NodeRole {
    let loads_checkpoint = is_checkpoint_loader(node);
    if !loads_checkpoint && !is_sampler(node) {
        return NodeRole::Ignore;
    }
    if has_refiner_signal(node) {
        NodeRole::Refiner
    } else if loads_checkpoint {
        NodeRole::Primary
    } else {
        NodeRole::Ignore
    }
}

/// A node loads a checkpoint if any checkpoint key holds a literal name.
pub fn is_checkpoint_loader(node: &NodeRecord) -> bool {
    CHECKPOINT_KEYS.iter().any(|k| node.input_str(k).is_some())
}

/// Any of the refiner signals: a "refiner" label, an explicit refiner
/// model input, a paired base/refiner node, SDXL refiner conditioning
/// (`ascore`), or for samplers a step range or denoising range.
pub fn has_refiner_signal(node: &NodeRecord) -> bool {
    let (class_type, title) = node.labels_lowercase();
    if class_type.contains("refiner") || title.contains("refiner") {
        return true;
    }

    let has_refiner_model = REFINER_MODEL_KEYS.iter().any(|k| node.has_input(k));
    // A paired node (base_ckpt + refiner_ckpt) is already caught here.
    if has_refiner_model || node.has_input("ascore") {
        return true;
    }

    if class_type.contains("sampler") {
        let step_range = node.has_input("start_at_step") && node.has_input("end_at_step");
        let denoise_range = DENOISE_RANGE_KEYS.iter().any(|k| node.has_input(k));
        return step_range || denoise_range;
    }

    false
}

fn is_sampler(node: &NodeRecord) -> bool {
    node.class_type.to_lowercase().contains("sampler")
}

// ---------------------------------------------------------------------------
// Parameter extraction
// ---------------------------------------------------------------------------

/// Build the parameter record for one workflow. Never fails; an empty
/// graph yields [`ExtractedParameters::default`].
pub fn extract_parameters(graph: &WorkflowGraph) -> ExtractedParameters {
    let mut params = ExtractedParameters::default();
    let mut first_primary: Option<String> = None;
    let mut first_any_checkpoint: Option<String> = None;
    let mut refiner = RefinerInfo::default();

    for node in graph.iter() {
        let role = classify_node(node);
        tracing::debug!(
            node_id = %node.id,
            class_type = %node.class_type,
            ?role,
            "Classified node"
        );

        match role {
            NodeRole::Primary if first_primary.is_none() => {
                first_primary = first_str(node, PRIMARY_KEYS);
            }
            NodeRole::Refiner => merge_refiner(node, &mut refiner),
            _ => {}
        }
        if first_any_checkpoint.is_none() {
            first_any_checkpoint = first_str(node, CHECKPOINT_KEYS);
        }

        collect_checkpoint_names(node, &mut params.checkpoints);
        collect_lora(node, &mut params.loras);

        if params.vae.is_none() {
            params.vae = node.input_str("vae_name").map(str::to_string);
        }
        if params.sampling.is_empty() && is_sampler(node) {
            params.sampling = sampling_of(node);
        }
        if params.image_params.is_none() {
            params.image_params = image_params_of(node);
        }

        collect_prompt(node, &mut params.prompts, &mut params.embeddings);
        collect_node_embeddings(node, &mut params.embeddings);
        collect_seeds(node, &mut params.seeds);
        collect_controlnet(node, &mut params.controlnets);
        merge_upscaling(node, &mut params.upscaling);
    }

    params.primary_checkpoint = first_primary.or(first_any_checkpoint);
    if !refiner.is_empty() {
        params.refiner = Some(refiner);
    }
    params
}

/// Polarity of a prompt: title tokens first, stock vocabulary second.
pub fn prompt_polarity(title: Option<&str>, text: &str) -> Polarity {
    if let Some(polarity) = title.and_then(title_polarity) {
        return polarity;
    }
    let lowered = text.to_lowercase();
    if STOCK_NEGATIVE_PHRASES.iter().any(|p| lowered.contains(p)) {
        Polarity::Negative
    } else {
        Polarity::Positive
    }
}

/// Embedding names referenced inline in prompt text, in order, deduplicated.
///
/// Both `<name>` and `embedding:name` forms are recognised.
pub fn inline_embeddings(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    for cap in ANGLE_TOKEN_RE.captures_iter(text) {
        let token = cap[1].trim();
        let lowered = token.to_lowercase();
        if NON_EMBEDDING_TAG_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
            continue;
        }
        push(strip_embedding_prefix(token));
    }
    for cap in EMBEDDING_PREFIX_RE.captures_iter(text) {
        push(&cap[1]);
    }
    names
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// `embedding:` prefix removed, matched without regard to case.
fn strip_embedding_prefix(token: &str) -> &str {
    const PREFIX: &str = "embedding:";
    match token.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => &token[PREFIX.len()..],
        _ => token,
    }
}

fn first_str(node: &NodeRecord, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| node.input_str(k))
        .map(str::to_string)
}

fn merge_refiner(node: &NodeRecord, refiner: &mut RefinerInfo) {
    if refiner.model.is_none() {
        refiner.model = first_str(node, REFINER_MODEL_KEYS)
            .or_else(|| first_str(node, &["ckpt_name", "unet_name"]));
    }
    if refiner.base_model.is_none() {
        refiner.base_model = first_str(node, &["base_ckpt"]);
    }
    if refiner.switch_point.is_none() {
        refiner.switch_point = SWITCH_KEYS
            .iter()
            .find_map(|k| node.input_f64(k))
            .or_else(|| {
                node.input_f64("start_at_step")
                    .filter(|step| *step > 0.0 && is_sampler(node))
            });
    }
}

fn collect_checkpoint_names(node: &NodeRecord, out: &mut Vec<String>) {
    for key in CHECKPOINT_KEYS {
        if let Some(name) = node.input_str(key) {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
    }
}

fn collect_lora(node: &NodeRecord, out: &mut Vec<LoraEntry>) {
    if let Some(name) = node.input_str("lora_name") {
        out.push(LoraEntry {
            name: name.to_string(),
            model_strength: node.input_f64("strength_model"),
            clip_strength: node.input_f64("strength_clip"),
        });
    }
}

fn sampling_of(node: &NodeRecord) -> SamplingParams {
    if !SAMPLING_KEYS.iter().any(|k| node.literal(k).is_some()) {
        return SamplingParams::default();
    }
    SamplingParams {
        steps: node.input_i64("steps"),
        cfg: node.input_f64("cfg"),
        sampler_name: node.input_str("sampler_name").map(str::to_string),
        scheduler: node.input_str("scheduler").map(str::to_string),
        denoise: node.input_f64("denoise"),
    }
}

fn image_params_of(node: &NodeRecord) -> Option<ImageParams> {
    let width = node.input_i64("width");
    let height = node.input_i64("height");
    let latent_like = node.class_type.to_lowercase().contains("emptylatent");
    if !latent_like && (width.is_none() || height.is_none()) {
        return None;
    }
    Some(ImageParams {
        width,
        height,
        batch_size: node.input_i64("batch_size"),
    })
}

fn collect_prompt(node: &NodeRecord, prompts: &mut Prompts, embeddings: &mut Vec<EmbeddingEntry>) {
    if !node.class_type.to_lowercase().contains("textencode") {
        return;
    }
    let Some(text) = node.input_str("text").or_else(|| node.input_str("text_g")) else {
        return;
    };

    let polarity = prompt_polarity(node.title.as_deref(), text);
    let slot = match polarity {
        Polarity::Positive => &mut prompts.positive,
        Polarity::Negative => &mut prompts.negative,
    };
    if slot.is_none() {
        *slot = Some(text.to_string());
    }

    for name in inline_embeddings(text) {
        push_embedding(embeddings, name, polarity, EmbeddingSource::PromptText);
    }
}

fn collect_node_embeddings(node: &NodeRecord, embeddings: &mut Vec<EmbeddingEntry>) {
    let Some(name) = EMBEDDING_INPUT_KEYS.iter().find_map(|k| node.input_str(k)) else {
        return;
    };
    let (class_type, title) = node.labels_lowercase();
    let negative = label_polarity(&class_type) == Some(Polarity::Negative)
        || label_polarity(&title) == Some(Polarity::Negative);
    let polarity = if negative {
        Polarity::Negative
    } else {
        Polarity::Positive
    };
    push_embedding(embeddings, name.to_string(), polarity, EmbeddingSource::NodeInput);
}

fn push_embedding(
    embeddings: &mut Vec<EmbeddingEntry>,
    name: String,
    polarity: Polarity,
    source: EmbeddingSource,
) {
    if embeddings
        .iter()
        .any(|e| e.name == name && e.polarity == polarity)
    {
        return;
    }
    embeddings.push(EmbeddingEntry {
        name,
        polarity,
        source,
    });
}

fn collect_seeds(node: &NodeRecord, seeds: &mut Vec<SeedEntry>) {
    let class_type = node.class_type.to_lowercase();
    if SEED_EXCLUDED_CLASSES.iter().any(|t| class_type.contains(t)) {
        return;
    }
    for key in SEED_KEYS {
        if let Some(value) = seed_value(node, key) {
            seeds.push(SeedEntry {
                class_type: node.class_type.clone(),
                value,
            });
        }
    }
}

fn seed_value(node: &NodeRecord, key: &str) -> Option<u64> {
    match node.literal(key)? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn collect_controlnet(node: &NodeRecord, out: &mut Vec<ControlNetEntry>) {
    let class_type = node.class_type.to_lowercase();
    let matches = class_type.contains("controlnet")
        || class_type.contains("control_net")
        || node.has_input("control_net_name");
    if !matches {
        return;
    }
    out.push(ControlNetEntry {
        class_type: node.class_type.clone(),
        model: node.input_str("control_net_name").map(str::to_string),
        strength: node.input_f64("strength"),
    });
}

fn merge_upscaling(node: &NodeRecord, upscaling: &mut Option<UpscaleInfo>) {
    let class_type = node.class_type.to_lowercase();
    if !UPSCALE_CLASS_TERMS.iter().any(|t| class_type.contains(t)) {
        return;
    }
    let info = upscaling.get_or_insert_with(|| UpscaleInfo {
        class_type: node.class_type.clone(),
        model: None,
        method: None,
        scale_by: None,
    });
    if info.model.is_none() {
        info.model = first_str(node, &["model_name", "upscale_model"]);
    }
    if info.method.is_none() {
        info.method = node.input_str("upscale_method").map(str::to_string);
    }
    if info.scale_by.is_none() {
        info.scale_by = node
            .input_f64("scale_by")
            .or_else(|| node.input_f64("upscale_by"));
    }
}

/// Polarity hinted by a label's words, if any.
fn title_polarity(title: &str) -> Option<Polarity> {
    label_polarity(&title.to_lowercase())
}

fn label_polarity(lowered: &str) -> Option<Polarity> {
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.iter().any(|w| *w == "neg" || w.starts_with("negative")) {
        Some(Polarity::Negative)
    } else if words.iter().any(|w| *w == "pos" || w.starts_with("positive")) {
        Some(Polarity::Positive)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
