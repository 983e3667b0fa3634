//! Embedded ComfyUI workflow graph model and parsing.
//!
//! A workflow is a flat mapping of node id to node object. Each node
//! carries a `class_type`, a map of `inputs` and optionally a
//! `_meta.title`. Inputs are literals or `[node_id, slot]` references to
//! another node's output; references are kept verbatim and never resolved.
//!
//! Two encodings are accepted: the API ("prompt") encoding keyed by node id,
//! and the UI ("workflow") encoding with a `nodes` array whose positional
//! `widgets_values` are mapped to input names for the common node types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum size of an embedded workflow text in bytes (10 MB).
pub const MAX_WORKFLOW_TEXT_BYTES: usize = 10_000_000;

// ---------------------------------------------------------------------------
// UI-encoding widget layouts
// ---------------------------------------------------------------------------

/// Positional widget names for node types whose UI encoding we can map back
/// onto named inputs.
const WIDGET_LAYOUTS: &[(&str, &[&str])] = &[
    ("CheckpointLoaderSimple", &["ckpt_name"]),
    ("CheckpointLoader", &["config_name", "ckpt_name"]),
    ("UNETLoader", &["unet_name", "weight_dtype"]),
    ("LoraLoader", &["lora_name", "strength_model", "strength_clip"]),
    ("LoraLoaderModelOnly", &["lora_name", "strength_model"]),
    ("VAELoader", &["vae_name"]),
    (
        "KSampler",
        &[
            "seed",
            "control_after_generate",
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "denoise",
        ],
    ),
    (
        "KSamplerAdvanced",
        &[
            "add_noise",
            "noise_seed",
            "control_after_generate",
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "start_at_step",
            "end_at_step",
            "return_with_leftover_noise",
        ],
    ),
    ("CLIPTextEncode", &["text"]),
    ("EmptyLatentImage", &["width", "height", "batch_size"]),
    ("ControlNetLoader", &["control_net_name"]),
    ("UpscaleModelLoader", &["model_name"]),
    ("LatentUpscaleBy", &["upscale_method", "scale_by"]),
];

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single node of an embedded workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node ID (string key from the JSON object).
    pub id: String,
    /// ComfyUI class type (e.g. "KSampler", "CLIPTextEncode").
    pub class_type: String,
    /// Optional human label from `_meta.title`.
    pub title: Option<String>,
    /// Raw input values for this node.
    pub inputs: Map<String, Value>,
}

impl NodeRecord {
    /// Whether the node declares `key` at all, literal or reference.
    pub fn has_input(&self, key: &str) -> bool {
        self.inputs.contains_key(key)
    }

    /// Literal (non-reference) value of an input.
    pub fn literal(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key).filter(|v| !is_reference(v))
    }

    /// Literal string input; empty strings read as absent.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.literal(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Literal numeric input. Numeric strings are accepted.
    pub fn input_f64(&self, key: &str) -> Option<f64> {
        match self.literal(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Literal integer input.
    pub fn input_i64(&self, key: &str) -> Option<i64> {
        match self.literal(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|u| u as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Lowercased class type and title, for substring heuristics.
    pub fn labels_lowercase(&self) -> (String, String) {
        (
            self.class_type.to_lowercase(),
            self.title.as_deref().unwrap_or_default().to_lowercase(),
        )
    }
}

/// One image's workflow graph, nodes kept in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<NodeRecord>,
}

impl WorkflowGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// `true` when a JSON value is a `[node_id, output_slot]` connection.
pub fn is_reference(value: &Value) -> bool {
    match value.as_array() {
        Some(arr) if arr.len() == 2 => {
            (arr[0].is_string() || arr[0].is_u64()) && arr[1].is_u64()
        }
        _ => false,
    }
}

/// Parse embedded workflow text into a graph.
pub fn parse_workflow_text(text: &str) -> Result<WorkflowGraph, CoreError> {
    if text.len() > MAX_WORKFLOW_TEXT_BYTES {
        return Err(CoreError::Validation(format!(
            "Workflow text exceeds maximum size of {MAX_WORKFLOW_TEXT_BYTES} bytes (got {} bytes)",
            text.len()
        )));
    }
    let json: Value = serde_json::from_str(text)
        .map_err(|e| CoreError::Validation(format!("Workflow text is not valid JSON: {e}")))?;
    parse_workflow(&json)
}

/// Parse a ComfyUI workflow JSON value into a [`WorkflowGraph`].
///
/// The API encoding is an object where each key is a node ID and each
/// value is an object with `class_type` and `inputs` fields:
///
/// ```json
/// {
///   "3": {
///     "class_type": "KSampler",
///     "inputs": { "seed": 42, "cfg": 7.5, "model": ["4", 0] },
///     "_meta": { "title": "KSampler" }
///   }
/// }
/// ```
///
/// Entries that are not node objects are skipped. A non-empty object with
/// no node entries at all is rejected, so that an unrelated JSON blob does
/// not masquerade as an empty workflow.
pub fn parse_workflow(json: &Value) -> Result<WorkflowGraph, CoreError> {
    let obj = json.as_object().ok_or_else(|| {
        CoreError::Validation("Workflow JSON must be an object".to_string())
    })?;

    if let Some(nodes) = obj.get("nodes").and_then(Value::as_array) {
        return Ok(parse_ui_nodes(nodes));
    }
    // `extra_pnginfo` wraps the UI workflow one level down.
    if let Some(inner) = obj.get("workflow").filter(|v| v.is_object()) {
        return parse_workflow(inner);
    }

    let mut nodes = Vec::with_capacity(obj.len());
    for (node_id, node_value) in obj {
        let Some(class_type) = node_value.get("class_type").and_then(Value::as_str) else {
            continue;
        };

        let inputs = node_value
            .get("inputs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let title = node_value
            .get("_meta")
            .and_then(|m| m.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string);

        nodes.push(NodeRecord {
            id: node_id.clone(),
            class_type: class_type.to_string(),
            title,
            inputs,
        });
    }

    if nodes.is_empty() && !obj.is_empty() {
        return Err(CoreError::Validation(
            "Workflow JSON contains no node with a 'class_type' field".to_string(),
        ));
    }

    Ok(WorkflowGraph { nodes })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Convert UI-encoded nodes into records, naming widget values where the
/// node type's layout is known.
fn parse_ui_nodes(nodes: &[Value]) -> WorkflowGraph {
    let records = nodes
        .iter()
        .filter_map(|node| {
            let class_type = node.get("type").and_then(Value::as_str)?;
            let id = match node.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return None,
            };
            let title = node
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string);

            let inputs = match node.get("widgets_values") {
                Some(Value::Object(map)) => map.clone(),
                Some(Value::Array(values)) => name_widgets(class_type, values),
                _ => Map::new(),
            };

            Some(NodeRecord {
                id,
                class_type: class_type.to_string(),
                title,
                inputs,
            })
        })
        .collect();

    WorkflowGraph { nodes: records }
}

fn name_widgets(class_type: &str, values: &[Value]) -> Map<String, Value> {
    let Some((_, names)) = WIDGET_LAYOUTS.iter().find(|(ct, _)| *ct == class_type) else {
        return Map::new();
    };
    names
        .iter()
        .zip(values)
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
