//! Canonical group signatures.
//!
//! A signature identifies one (primary checkpoint, LoRA set) combination:
//! `<checkpoint or "None">[ | lora1,lora2,...]` with LoRA names sorted and
//! deduplicated. Checkpoint names are compared raw, so two files sharing a
//! basename in different folders stay distinct.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::ExtractedParameters;

/// Reserved signature for images without extractable metadata.
pub const NONE_SIGNATURE: &str = "None";

/// Separator between the checkpoint and the LoRA list.
const LORA_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupSignature(String);

impl GroupSignature {
    /// The reserved `"None"` signature.
    pub fn none() -> Self {
        Self(NONE_SIGNATURE.to_string())
    }

    pub fn is_none(&self) -> bool {
        self.0 == NONE_SIGNATURE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the signature of one image's parameters.
///
/// LoRA order, duplicates and strengths do not affect the result.
pub fn group_signature(params: &ExtractedParameters) -> GroupSignature {
    let base = params
        .primary_checkpoint
        .as_deref()
        .unwrap_or(NONE_SIGNATURE);

    let loras: BTreeSet<&str> = params.loras.iter().map(|l| l.name.as_str()).collect();
    if loras.is_empty() {
        return GroupSignature(base.to_string());
    }

    let joined = loras.into_iter().collect::<Vec<_>>().join(",");
    GroupSignature(format!("{base}{LORA_SEPARATOR}{joined}"))
}
