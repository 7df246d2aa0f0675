//! Delta chain resolution.
//!
//! Chains are walked iteratively: the resolver follows base links until it
//! reaches a whole object, remembering each delta on an explicit stack, then
//! unwinds the stack applying one delta at a time. Only the current result
//! and one delta are held in memory while unwinding.

use crate::delta::apply_delta;
use crate::loader::{PackedObjectKind, PackedObjectLoader};
use crate::pack::PackFile;
use crate::{PackError, Result};
use grove_storage::{ObjectId, ObjectType, RawObject};
use std::sync::Arc;
use tracing::trace;

/// Where a reference-delta base was found outside the pack holding the delta.
#[derive(Debug)]
pub enum BaseObject {
    /// An entry of another pack.
    Packed {
        /// Pack holding the base.
        pack: Arc<PackFile>,
        /// Offset of the base entry.
        offset: u64,
    },
    /// A loose object.
    Loose(RawObject),
}

/// Finds reference-delta bases that are not in the delta's own pack.
pub trait BaseLocator: Send + Sync {
    /// Looks up `id` anywhere except `origin`.
    fn locate(&self, id: &ObjectId, origin: &PackFile) -> Result<Option<BaseObject>>;
}

/// Locator for self-contained packs: every base must be in the same pack.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamePackOnly;

impl BaseLocator for SamePackOnly {
    fn locate(&self, _id: &ObjectId, _origin: &PackFile) -> Result<Option<BaseObject>> {
        Ok(None)
    }
}

/// Resolves packed entries into object bytes.
pub struct DeltaResolver<'a> {
    locator: &'a dyn BaseLocator,
    max_depth: usize,
}

impl<'a> DeltaResolver<'a> {
    /// Creates a resolver following at most `max_depth` delta links.
    pub fn new(locator: &'a dyn BaseLocator, max_depth: usize) -> Self {
        Self { locator, max_depth }
    }

    /// Produces the type and content of the object whose entry is `loader`
    /// in `pack`.
    ///
    /// Reference-delta bases are looked up in `pack` first and then through
    /// the locator.
    pub fn resolve(
        &self,
        pack: &Arc<PackFile>,
        loader: PackedObjectLoader,
    ) -> Result<(ObjectType, Vec<u8>)> {
        let mut pending: Vec<(Arc<PackFile>, PackedObjectLoader)> = Vec::new();
        let mut current_pack = pack.clone();
        let mut current = loader;

        let (object_type, mut data) = loop {
            let base = match current.kind() {
                PackedObjectKind::Whole(object_type) => {
                    break (object_type, current_pack.inflate(&current)?);
                }
                PackedObjectKind::OffsetDelta { base_distance } => {
                    Base::InPack(current_pack.clone(), current.header_offset() - base_distance)
                }
                PackedObjectKind::RefDelta { base_id } => {
                    match current_pack.find_offset(&base_id) {
                        Some(offset) => Base::InPack(current_pack.clone(), offset),
                        None => match self.locator.locate(&base_id, &current_pack)? {
                            Some(BaseObject::Packed { pack, offset }) => Base::InPack(pack, offset),
                            Some(BaseObject::Loose(object)) => Base::Loose(object),
                            None => return Err(PackError::MissingObject(base_id)),
                        },
                    }
                }
            };

            if pending.len() >= self.max_depth {
                return Err(PackError::DeltaChainTooDeep {
                    pack: pack.path().to_path_buf(),
                    offset: loader.header_offset(),
                    max_depth: self.max_depth,
                });
            }
            pending.push((current_pack, current));

            match base {
                Base::InPack(base_pack, offset) => {
                    current = base_pack.loader_at(offset)?;
                    current_pack = base_pack;
                }
                Base::Loose(object) => break (object.object_type, object.data.to_vec()),
            }
        };

        trace!(
            pack = %pack.path().display(),
            offset = loader.header_offset(),
            depth = pending.len(),
            "resolving delta chain"
        );
        while let Some((delta_pack, delta_loader)) = pending.pop() {
            let delta = delta_pack.inflate(&delta_loader)?;
            data = apply_delta(&data, &delta).map_err(|e| match e {
                PackError::CorruptObject { id: None, reason } => PackError::CorruptObject {
                    id: delta_pack
                        .reverse_index()
                        .ok()
                        .and_then(|rev| rev.find_object(delta_loader.header_offset())),
                    reason,
                },
                other => other,
            })?;
        }
        Ok((object_type, data))
    }
}

enum Base {
    InPack(Arc<PackFile>, u64),
    Loose(RawObject),
}
