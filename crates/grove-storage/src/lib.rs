//! Object identity and loose object storage for Grove.
//!
//! This crate provides the content-addressed identity of git objects
//! (blobs, trees, commits, tags) and the loose object store, where each
//! object is kept in its own compressed file.

mod compression;
mod error;
mod loose;
mod object;
mod traits;

pub use compression::{CompressionLevel, LooseStatsSnapshot};
pub use error::{Result, StorageError};
pub use loose::{LooseObjectStore, LooseStoreConfig};
pub use object::{object_header, ObjectHasher, ObjectId, ObjectType, RawObject};
pub use traits::ObjectLoader;
