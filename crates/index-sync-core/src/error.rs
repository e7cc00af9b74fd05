//! Error kinds callers need to branch on.

use thiserror::Error;

/// Failures raised by routing and live synchronization.
///
/// Everything except [`SyncError::Backend`] is a configuration problem:
/// the record or model cannot be mapped to an index target and retrying
/// will not help.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No configured index routes the record type.
    #[error("no index route for record type \"{model}\"")]
    NoRoute { model: String },

    /// The named index is not configured.
    #[error("unknown index \"{0}\"")]
    UnknownIndex(String),

    /// The culture is not configured for the index.
    #[error("culture \"{culture}\" is not configured for index \"{index}\"")]
    UnknownCulture { index: String, culture: String },

    /// The model is not configured in the index.
    #[error("model \"{model}\" is not configured in index \"{index}\"")]
    UnknownModel { index: String, model: String },

    /// Two index definitions share a name.
    #[error("index \"{0}\" is defined more than once")]
    DuplicateIndex(String),

    /// The `[types]` table does not describe a single-inheritance tree.
    #[error("invalid type hierarchy: {0}")]
    InvalidHierarchy(String),

    /// The search backend rejected a write.
    #[error("search backend error: {0:#}")]
    Backend(#[source] anyhow::Error),
}

impl SyncError {
    /// True for errors caused by route configuration rather than I/O.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, SyncError::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
