use std::path::PathBuf;

use thiserror::Error;

/// Failures a memory operation can report to its caller.
///
/// An unknown entity in `add_observations` is not an error; it is reported
/// per item in the operation result.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A required field was empty or unusable. Nothing was mutated.
    #[error("{field} {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The in-memory change was applied but could not be written to disk.
    #[error("failed to persist memory graph to {}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl MemoryError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}
