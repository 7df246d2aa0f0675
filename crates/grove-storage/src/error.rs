//! Storage error types.

use crate::ObjectId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object is not stored.
    #[error("missing object: {0}")]
    MissingObject(ObjectId),

    /// Stored data does not have the expected structure.
    #[error("corrupt object{}: {reason}", fmt_id(.id))]
    CorruptObject {
        /// The object being read, when known.
        id: Option<ObjectId>,
        /// What was wrong with it.
        reason: String,
    },

    /// Writing a new object to disk failed.
    #[error("failed to write object at {}: {source}", .path.display())]
    ObjectWriteFailure {
        /// Path of the file being written (temp file or destination).
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A textual object id could not be parsed.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),
}

impl StorageError {
    /// Creates a corruption error for a known object.
    pub fn corrupt(id: ObjectId, reason: impl Into<String>) -> Self {
        Self::CorruptObject {
            id: Some(id),
            reason: reason.into(),
        }
    }

    /// Creates a corruption error where the object is not known.
    pub fn corrupt_data(reason: impl Into<String>) -> Self {
        Self::CorruptObject {
            id: None,
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the object does not exist.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingObject(_))
    }
}

fn fmt_id(id: &Option<ObjectId>) -> String {
    match id {
        Some(id) => format!(" {}", id),
        None => String::new(),
    }
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
