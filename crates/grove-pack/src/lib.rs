//! Pack storage engine for Grove.
//!
//! This crate reads git pack files: version 1 and 2 pack indexes, the
//! reverse (offset-ordered) index, windowed access to pack data through a
//! shared bounded cache, entry header decoding and iterative delta
//! resolution. [`ObjectDatabase`] combines the loose store with every open
//! pack behind the [`ObjectLoader`](grove_storage::ObjectLoader) contract.

mod cache;
mod config;
mod cursor;
mod database;
mod delta;
mod error;
mod index;
mod loader;
mod pack;
mod resolve;
mod reverse;
mod window;

pub use cache::{CacheStats, WindowCache};
pub use config::{ObjectDatabaseConfig, WindowCacheConfig, MIN_WINDOW_SIZE};
pub use cursor::WindowCursor;
pub use database::ObjectDatabase;
pub use delta::{apply_delta, delta_sizes};
pub use error::{PackError, Result};
pub use index::{
    parse_index, read_index, write_index, Entries, IndexEntry, IndexVersion, IndexedObject,
    PackIndex, PackIndexV1, PackIndexV2, INDEX_V2_SIGNATURE,
};
pub use loader::{decode_object_header, PackedObjectKind, PackedObjectLoader, MAX_HEADER_LEN};
pub use pack::{PackFile, PackHeader, PACK_HEADER_LEN, PACK_SIGNATURE, PACK_TRAILER_LEN};
pub use resolve::{BaseLocator, BaseObject, DeltaResolver, SamePackOnly};
pub use reverse::PackReverseIndex;
pub use window::{FileId, Window, WindowedFile};
