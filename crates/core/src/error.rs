use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Attach the offending path to an [`std::io::Error`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a workflow graph could not be obtained from an image container.
///
/// `NotFound` is the legitimate "no metadata" outcome, not a fault.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("No embedded workflow field present")]
    NotFound,

    #[error("Embedded field '{field}' is not a valid workflow: {reason}")]
    Corrupt { field: String, reason: String },

    #[error("Container unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction aborted: {reason}")]
    ResourceExhausted { reason: String },
}

/// A failed transfer of a single file during reorganization.
#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    #[error("Failed to create folder {path}: {source}")]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to transfer {from} -> {to}: {source}")]
    Transfer {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free file name for {0} after exhausting collision suffixes")]
    NameExhausted(String),
}
