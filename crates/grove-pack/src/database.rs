//! A repository object database: loose objects plus every pack under
//! `<objects>/pack/`.

use crate::cache::WindowCache;
use crate::config::ObjectDatabaseConfig;
use crate::pack::PackFile;
use crate::resolve::{BaseLocator, BaseObject, DeltaResolver};
use crate::{PackError, Result};
use grove_storage::{LooseObjectStore, ObjectId, ObjectLoader, ObjectType, RawObject};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Loose store and open packs behind one lookup.
pub struct ObjectDatabase {
    objects_dir: PathBuf,
    config: ObjectDatabaseConfig,
    loose: LooseObjectStore,
    cache: Arc<WindowCache>,
    packs: RwLock<PackList>,
}

/// Open packs in search order, plus the paths opened through `add_pack`.
#[derive(Default)]
struct PackList {
    packs: Vec<Arc<PackFile>>,
    added: HashSet<PathBuf>,
}

impl PackList {
    fn find(&self, path: &Path) -> Option<&Arc<PackFile>> {
        self.packs.iter().find(|pack| pack.path() == path)
    }
}

impl ObjectDatabase {
    /// Opens the database rooted at `objects_dir` with its own window cache.
    pub fn new(objects_dir: impl Into<PathBuf>, config: ObjectDatabaseConfig) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(WindowCache::new(config.window_cache.clone())?);
        Self::with_cache(objects_dir, config, cache)
    }

    /// Opens the database sharing an existing window cache.
    pub fn with_cache(
        objects_dir: impl Into<PathBuf>,
        config: ObjectDatabaseConfig,
        cache: Arc<WindowCache>,
    ) -> Result<Self> {
        config.validate()?;
        let objects_dir = objects_dir.into();
        let db = Self {
            loose: LooseObjectStore::new(objects_dir.clone(), config.loose.clone()),
            objects_dir,
            config,
            cache,
            packs: RwLock::new(PackList::default()),
        };
        db.rescan_packs()?;
        Ok(db)
    }

    /// Root objects directory.
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Directory scanned for packs.
    pub fn pack_dir(&self) -> PathBuf {
        self.objects_dir.join("pack")
    }

    /// Active configuration.
    pub fn config(&self) -> &ObjectDatabaseConfig {
        &self.config
    }

    /// The loose object store.
    pub fn loose(&self) -> &LooseObjectStore {
        &self.loose
    }

    /// The window cache shared by this database's packs.
    pub fn cache(&self) -> &Arc<WindowCache> {
        &self.cache
    }

    /// Snapshot of the open packs.
    pub fn packs(&self) -> Vec<Arc<PackFile>> {
        self.packs.read().packs.clone()
    }

    /// Re-reads the pack directory: opens new `pack-*.pack` files that have
    /// an `.idx`, and forgets packs that disappeared. Packs that fail to open
    /// are skipped with a warning. Packs opened with [`add_pack`] stay listed
    /// while their file exists, wherever it lives. Returns the number of open
    /// packs.
    ///
    /// [`add_pack`]: ObjectDatabase::add_pack
    pub fn rescan_packs(&self) -> Result<usize> {
        let found = self.list_pack_files()?;
        let known: HashSet<PathBuf> = self
            .packs
            .read()
            .packs
            .iter()
            .map(|pack| pack.path().to_path_buf())
            .collect();

        // Opened without the lock; merged below against the list as it is then.
        let mut opened = Vec::new();
        for path in &found {
            if known.contains(path) {
                continue;
            }
            match PackFile::open(path, self.cache.clone()) {
                Ok(pack) => opened.push(Arc::new(pack)),
                Err(e) => warn!(pack = %path.display(), error = %e, "skipping unreadable pack"),
            }
        }

        let found: HashSet<PathBuf> = found.into_iter().collect();
        let mut list = self.packs.write();
        let PackList { packs, added } = &mut *list;
        packs.retain(|pack| {
            let path = pack.path();
            let keep = found.contains(path) || (added.contains(path) && path.is_file());
            if !keep {
                debug!(pack = %path.display(), "pack removed from directory");
            }
            keep
        });
        added.retain(|path| packs.iter().any(|pack| pack.path() == path));
        for pack in opened {
            if packs.iter().all(|open| open.path() != pack.path()) {
                packs.push(pack);
            }
        }
        Ok(packs.len())
    }

    /// Opens one pack and adds it to the search list. A pack already open at
    /// `pack_path` is returned as is.
    pub fn add_pack(&self, pack_path: &Path) -> Result<Arc<PackFile>> {
        if let Some(pack) = self.packs.read().find(pack_path) {
            return Ok(pack.clone());
        }
        let pack = Arc::new(PackFile::open(pack_path, self.cache.clone())?);
        let mut list = self.packs.write();
        if let Some(existing) = list.find(pack_path) {
            return Ok(existing.clone());
        }
        list.packs.push(pack.clone());
        list.added.insert(pack_path.to_path_buf());
        Ok(pack)
    }

    fn list_pack_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.pack_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_pack = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("pack-") && name.ends_with(".pack"));
            if !is_pack {
                continue;
            }
            if !path.with_extension("idx").is_file() {
                warn!(pack = %path.display(), "pack has no index, ignoring");
                continue;
            }
            paths.push(path);
        }
        paths.sort();
        Ok(paths)
    }

    /// Reads an object from the loose store or any open pack.
    pub fn read(&self, id: &ObjectId) -> Result<RawObject> {
        match self.loose.read(id) {
            Ok(object) => return Ok(object),
            Err(e) if e.is_missing() => {}
            Err(e) => return Err(e.into()),
        }

        let resolver = DeltaResolver::new(self, self.config.max_delta_depth);
        for pack in self.packs() {
            if let Some(loader) = pack.get(id)? {
                let (object_type, data) = resolver.resolve(&pack, loader)?;
                return Ok(RawObject::with_id(*id, object_type, data));
            }
        }
        Err(PackError::MissingObject(*id))
    }

    /// Returns true if any source holds `id`, without inflating it.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.loose.has(id) || self.packs.read().packs.iter().any(|pack| pack.has(id))
    }

    /// Writes a loose object and returns its id.
    pub fn insert(&self, object_type: ObjectType, data: &[u8]) -> Result<ObjectId> {
        Ok(self.loose.write(object_type, data)?)
    }
}

impl BaseLocator for ObjectDatabase {
    fn locate(&self, id: &ObjectId, origin: &PackFile) -> Result<Option<BaseObject>> {
        for pack in self.packs() {
            if pack.file_id() == origin.file_id() {
                continue;
            }
            if let Some(offset) = pack.find_offset(id) {
                return Ok(Some(BaseObject::Packed { pack, offset }));
            }
        }
        match self.loose.read(id) {
            Ok(object) => Ok(Some(BaseObject::Loose(object))),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ObjectLoader for ObjectDatabase {
    type Error = PackError;

    fn open(&self, id: &ObjectId) -> Result<RawObject> {
        self.read(id)
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.contains(id))
    }
}

impl std::fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDatabase")
            .field("objects_dir", &self.objects_dir)
            .field("packs", &self.packs.read().packs.len())
            .finish()
    }
}
