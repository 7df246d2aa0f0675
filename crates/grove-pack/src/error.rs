//! Pack storage error types.

use grove_storage::{ObjectId, StorageError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading packs, indexes and objects.
#[derive(Debug, Error)]
pub enum PackError {
    /// The object is not in the loose store nor in any open pack.
    #[error("missing object: {0}")]
    MissingObject(ObjectId),

    /// Structural violation in a pack, index or delta.
    #[error("corrupt object{}: {reason}", fmt_id(.id))]
    CorruptObject {
        /// The object being read, when known.
        id: Option<ObjectId>,
        /// What was wrong.
        reason: String,
    },

    /// A version 1 index cannot represent this offset.
    #[error("pack too large for a version 1 index: offset {offset}")]
    PackTooLarge {
        /// The offending object offset.
        offset: u64,
    },

    /// A delta chain is longer than the configured maximum.
    #[error("delta chain at offset {offset} in {} exceeds {max_depth} links", .pack.display())]
    DeltaChainTooDeep {
        /// Pack holding the object being resolved.
        pack: PathBuf,
        /// Offset of the object being resolved.
        offset: u64,
        /// Configured maximum chain depth.
        max_depth: usize,
    },

    /// The requested operation is not available for this index format.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Loose storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackError {
    /// Creates a corruption error not tied to a known object id.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptObject {
            id: None,
            reason: reason.into(),
        }
    }

    /// Creates a corruption error for a known object.
    pub fn corrupt_object(id: ObjectId, reason: impl Into<String>) -> Self {
        Self::CorruptObject {
            id: Some(id),
            reason: reason.into(),
        }
    }

    /// Returns true if the object does not exist, including when the loose
    /// store reported it missing.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::MissingObject(_) => true,
            Self::Storage(e) => e.is_missing(),
            _ => false,
        }
    }

    /// Returns true for structural corruption in either storage layer.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::CorruptObject { .. } | Self::Storage(StorageError::CorruptObject { .. })
        )
    }
}

fn fmt_id(id: &Option<ObjectId>) -> String {
    match id {
        Some(id) => format!(" {}", id),
        None => String::new(),
    }
}

/// Result type for pack operations.
pub type Result<T> = std::result::Result<T, PackError>;
