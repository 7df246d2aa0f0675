//! The read contract shared by every object source.

use crate::{ObjectId, RawObject};

/// Anything that can hand back the bytes of an object by id.
///
/// This is the single entry point used by collaborators outside the storage
/// engine (revision walkers, ref databases, tools). Implementations must
/// return a "missing object" error for ids they do not hold and must never
/// substitute default data for corrupt objects.
pub trait ObjectLoader: Send + Sync {
    /// Error type returned by this source.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens an object, returning its type, size and content.
    fn open(&self, id: &ObjectId) -> Result<RawObject, Self::Error>;

    /// Checks if the object exists, without materializing it where possible.
    fn has(&self, id: &ObjectId) -> Result<bool, Self::Error>;
}
