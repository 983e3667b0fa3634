//! Version-aware generation numbering.
//!
//! Every distinct signature in a batch gets an ordinal. Signatures are
//! ordered by the first `digits.digits` number they contain, compared as a
//! float (so `v1.10` reads as 1.1 and sorts before `v1.2`), then by the
//! signature text. Signatures without a version number sort last. The
//! reserved `"None"` signature is always generation 0.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::signature::GroupSignature;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+)").expect("valid regex"));

/// Generation of the reserved `"None"` signature.
pub const NONE_GENERATION: u32 = 0;

/// Numeric sort key: the first decimal number in `text`, or `+inf`.
pub fn version_key(text: &str) -> f64 {
    VERSION_RE
        .captures(text)
        .and_then(|cap| cap[1].parse::<f64>().ok())
        .unwrap_or(f64::INFINITY)
}

/// Total order used for signatures: `(version_key, text)`.
pub fn compare_signatures(a: &str, b: &str) -> Ordering {
    version_key(a)
        .total_cmp(&version_key(b))
        .then_with(|| a.cmp(b))
}

/// Signature to ordinal mapping for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationAssignment {
    ordinals: BTreeMap<GroupSignature, u32>,
}

impl GenerationAssignment {
    /// Generation of `signature`, or `None` if it was not in the batch.
    pub fn generation_of(&self, signature: &GroupSignature) -> Option<u32> {
        self.ordinals.get(signature).copied()
    }

    /// Number of distinct signatures, including `"None"` when present.
    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    /// `(signature, generation)` pairs in generation order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupSignature, u32)> {
        let mut pairs: Vec<_> = self.ordinals.iter().map(|(s, g)| (s, *g)).collect();
        pairs.sort_by_key(|(_, g)| *g);
        pairs.into_iter()
    }
}

/// Assign ordinals to every distinct signature in `signatures`.
///
/// Input order and multiplicity do not matter.
pub fn assign_generations<'a, I>(signatures: I) -> GenerationAssignment
where
    I: IntoIterator<Item = &'a GroupSignature>,
{
    let distinct: BTreeSet<&GroupSignature> = signatures.into_iter().collect();

    let mut ordered: Vec<&GroupSignature> = distinct
        .iter()
        .copied()
        .filter(|s| !s.is_none())
        .collect();
    ordered.sort_by(|a, b| compare_signatures(a.as_str(), b.as_str()));

    let mut ordinals = BTreeMap::new();
    if distinct.iter().any(|s| s.is_none()) {
        ordinals.insert(GroupSignature::none(), NONE_GENERATION);
    }
    for (index, signature) in ordered.into_iter().enumerate() {
        ordinals.insert(signature.clone(), index as u32 + 1);
    }

    tracing::debug!(groups = ordinals.len(), "Assigned generations");
    GenerationAssignment { ordinals }
}
