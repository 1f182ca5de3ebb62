//! # Assembly Errors

use std::any::Any;
use std::path::PathBuf;

/// Errors surfaced while assembling (or dispatching into) a network.
///
/// Every variant is fatal to assembly; nothing is recovered automatically.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unrecognized identifiers, unsupported resolutions, or incompatible
    /// option combinations.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The checkpoint is missing, unreadable, or does not match the
    /// instantiated architecture.
    #[error("failed to load weights from {path:?}: {reason}")]
    WeightLoad {
        /// The checkpoint path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The synthetic probe pass could not determine an output dimension.
    #[error("shape inference failed: {0}")]
    ShapeInference(String),

    /// The checkpoint retrieval collaborator failed.
    #[error("checkpoint retrieval failed: {0}")]
    Retrieval(#[from] anyhow::Error),
}

impl Error {
    /// Build a [`Error::Configuration`].
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build a [`Error::WeightLoad`].
    pub fn weight_load<P: Into<PathBuf>, S: ToString>(
        path: P,
        reason: S,
    ) -> Self {
        Self::WeightLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, Error>;
