//! Workflow extraction from PNG text chunks.
//!
//! Producers embed the same logical graph under different field names, so
//! fields are tried in priority order and the first one that both exists and
//! parses wins. A field that exists but does not parse is skipped rather
//! than treated as fatal, so one malformed fallback field cannot mask a
//! valid field checked later.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::ExtractError;
use crate::workflow::{parse_workflow_text, WorkflowGraph, MAX_WORKFLOW_TEXT_BYTES};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Embedded text fields that may carry a workflow, highest priority first.
pub const WORKFLOW_FIELDS: &[&str] = &["prompt", "parameters", "workflow", "extra_pnginfo", "exif"];

/// Upper bound on memory the PNG decoder may allocate while reading
/// metadata (64 MiB).
pub const DECODER_MEMORY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// One text chunk read from the container.
///
/// `text` is `Err` when the chunk exists but its payload could not be
/// decoded (e.g. a broken zTXt stream).
#[derive(Debug, Clone, PartialEq)]
pub struct TextField {
    pub keyword: String,
    pub text: Result<String, String>,
}

impl TextField {
    pub fn new(keyword: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            text: Ok(text.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Extract the embedded workflow graph from the PNG at `path`.
pub fn extract_workflow(path: &Path) -> Result<WorkflowGraph, ExtractError> {
    let fields = read_text_fields(path)?;
    select_workflow(&fields)
}

/// Read every `tEXt`, `zTXt` and `iTXt` chunk preceding the image data.
pub fn read_text_fields(path: &Path) -> Result<Vec<TextField>, ExtractError> {
    let file = File::open(path)?;
    let limits = png::Limits {
        bytes: DECODER_MEMORY_LIMIT_BYTES,
    };
    let decoder = png::Decoder::new_with_limits(BufReader::new(file), limits);
    let reader = decoder.read_info().map_err(map_decoding_error)?;
    let info = reader.info();

    let mut fields = Vec::with_capacity(
        info.uncompressed_latin1_text.len()
            + info.compressed_latin1_text.len()
            + info.utf8_text.len(),
    );

    for chunk in &info.uncompressed_latin1_text {
        fields.push(TextField::new(chunk.keyword.clone(), chunk.text.clone()));
    }
    for chunk in &info.compressed_latin1_text {
        fields.push(TextField {
            keyword: chunk.keyword.clone(),
            text: chunk.get_text().map_err(|e| e.to_string()),
        });
    }
    for chunk in &info.utf8_text {
        fields.push(TextField {
            keyword: chunk.keyword.clone(),
            text: chunk.get_text().map_err(|e| e.to_string()),
        });
    }

    Ok(fields)
}

/// Pick the workflow from already-read text fields using the ordered
/// fallback in [`WORKFLOW_FIELDS`].
///
/// - No candidate field present (or all blank): [`ExtractError::NotFound`].
/// - Candidates present but none parse: the first candidate's failure.
pub fn select_workflow(fields: &[TextField]) -> Result<WorkflowGraph, ExtractError> {
    let mut first_failure: Option<ExtractError> = None;

    for &name in WORKFLOW_FIELDS {
        let Some(field) = fields.iter().find(|f| f.keyword == name) else {
            continue;
        };

        let text = match &field.text {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => text,
            Err(reason) => {
                tracing::debug!(field = name, %reason, "Undecodable text chunk");
                first_failure.get_or_insert_with(|| ExtractError::Corrupt {
                    field: name.to_string(),
                    reason: reason.clone(),
                });
                continue;
            }
        };

        if text.len() > MAX_WORKFLOW_TEXT_BYTES {
            tracing::warn!(field = name, bytes = text.len(), "Embedded workflow text too large");
            first_failure.get_or_insert_with(|| ExtractError::ResourceExhausted {
                reason: format!(
                    "field '{name}' is {} bytes, limit is {MAX_WORKFLOW_TEXT_BYTES}",
                    text.len()
                ),
            });
            continue;
        }

        match parse_workflow_text(text) {
            Ok(graph) => {
                tracing::debug!(field = name, nodes = graph.len(), "Workflow field parsed");
                return Ok(graph);
            }
            Err(e) => {
                tracing::debug!(field = name, error = %e, "Skipping unparseable workflow field");
                first_failure.get_or_insert_with(|| ExtractError::Corrupt {
                    field: name.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(first_failure.unwrap_or(ExtractError::NotFound))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn map_decoding_error(err: png::DecodingError) -> ExtractError {
    match err {
        png::DecodingError::IoError(e) => ExtractError::Io(e),
        png::DecodingError::LimitsExceeded => ExtractError::ResourceExhausted {
            reason: format!(
                "PNG metadata exceeds decoder limit of {DECODER_MEMORY_LIMIT_BYTES} bytes"
            ),
        },
        other => ExtractError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            other.to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
