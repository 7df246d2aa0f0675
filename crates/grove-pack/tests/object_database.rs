//! The object database: loose objects plus the pack directory.

mod common;

use common::{append_delta, PackFixture};
use grove_pack::{
    IndexVersion, ObjectDatabase, ObjectDatabaseConfig, PackError, WindowCache,
    WindowCacheConfig,
};
use grove_storage::{ObjectId, ObjectLoader, ObjectType};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn tiny_config() -> ObjectDatabaseConfig {
    ObjectDatabaseConfig {
        window_cache: WindowCacheConfig {
            capacity_bytes: 2048,
            window_size_bytes: 512,
            use_memory_map: false,
        },
        ..Default::default()
    }
}

/// Loads any object through the external read contract.
fn load<L: ObjectLoader>(loader: &L, id: &ObjectId) -> Result<Vec<u8>, L::Error> {
    loader.open(id).map(|object| object.data.to_vec())
}

#[test]
fn test_empty_directory() {
    let dir = TempDir::new().unwrap();
    let db = ObjectDatabase::new(dir.path(), ObjectDatabaseConfig::default()).unwrap();
    assert!(db.packs().is_empty());

    let id = ObjectId::from_bytes([0x12; 20]);
    let err = db.open(&id).unwrap_err();
    assert!(err.is_missing());
    assert!(!db.has(&id).unwrap());
}

#[test]
fn test_insert_and_read_loose() {
    let dir = TempDir::new().unwrap();
    let db = ObjectDatabase::new(dir.path(), ObjectDatabaseConfig::default()).unwrap();

    let id = db.insert(ObjectType::Blob, b"").unwrap();
    assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    assert!(db.has(&id).unwrap());
    assert!(dir.path().join("e6").join("9de29bb2d1d6434b8b29ae775ad8c2e48c5391").is_file());
    assert_eq!(load(&db, &id).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_reads_from_packs() {
    let dir = TempDir::new().unwrap();
    let mut fixture = PackFixture::new();
    let (id, _) = fixture.whole(ObjectType::Commit, b"tree abc\n\nmessage\n");
    fixture.write(&dir.path().join("pack"), IndexVersion::V2);

    let db = ObjectDatabase::new(dir.path(), tiny_config()).unwrap();
    assert_eq!(db.packs().len(), 1);
    let object = db.open(&id).unwrap();
    assert_eq!(object.object_type, ObjectType::Commit);
    assert_eq!(object.data.as_ref(), b"tree abc\n\nmessage\n");
    assert!(db.has(&id).unwrap());
}

#[test]
fn test_rescan_adds_and_removes_packs() {
    let dir = TempDir::new().unwrap();
    let pack_dir = dir.path().join("pack");
    let db = ObjectDatabase::new(dir.path(), tiny_config()).unwrap();

    let mut fixture = PackFixture::new();
    let (id, _) = fixture.whole(ObjectType::Blob, b"packed later");
    let path = fixture.write(&pack_dir, IndexVersion::V2);
    assert!(db.open(&id).unwrap_err().is_missing());

    assert_eq!(db.rescan_packs().unwrap(), 1);
    assert_eq!(load(&db, &id).unwrap(), b"packed later");
    assert_eq!(db.cache().stats().open_files, 1);

    // Rescanning an unchanged directory keeps the same pack instance
    let before = db.packs();
    db.rescan_packs().unwrap();
    assert!(Arc::ptr_eq(&before[0], &db.packs()[0]));
    drop(before);

    std::fs::remove_file(&path).unwrap();
    std::fs::remove_file(path.with_extension("idx")).unwrap();
    assert_eq!(db.rescan_packs().unwrap(), 0);
    assert_eq!(db.cache().stats().open_files, 0);
    assert!(!db.has(&id).unwrap());
}

#[test]
fn test_add_pack_reuses_open_pack() {
    let dir = TempDir::new().unwrap();
    let mut fixture = PackFixture::new();
    let (id, _) = fixture.whole(ObjectType::Blob, b"listed once");
    let path = fixture.write(&dir.path().join("pack"), IndexVersion::V2);

    let db = ObjectDatabase::new(dir.path(), tiny_config()).unwrap();
    let scanned = db.packs()[0].clone();
    let added = db.add_pack(&path).unwrap();

    assert!(Arc::ptr_eq(&scanned, &added));
    assert!(Arc::ptr_eq(&added, &db.add_pack(&path).unwrap()));
    assert_eq!(db.packs().len(), 1);
    assert_eq!(db.cache().stats().open_files, 1);
    assert_eq!(load(&db, &id).unwrap(), b"listed once");
}

#[test]
fn test_rescan_keeps_added_packs() {
    let dir = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    let db = ObjectDatabase::new(dir.path(), tiny_config()).unwrap();

    let mut outside = PackFixture::new();
    let (outside_id, _) = outside.whole(ObjectType::Blob, b"outside pack dir");
    let outside_path = outside.write(elsewhere.path(), IndexVersion::V2);
    let added = db.add_pack(&outside_path).unwrap();

    let mut inside = PackFixture::new();
    let (inside_id, _) = inside.whole(ObjectType::Blob, b"inside pack dir");
    inside.write(&dir.path().join("pack"), IndexVersion::V2);

    assert_eq!(db.rescan_packs().unwrap(), 2);
    assert!(db.packs().iter().any(|pack| Arc::ptr_eq(pack, &added)));
    assert_eq!(load(&db, &outside_id).unwrap(), b"outside pack dir");
    assert_eq!(load(&db, &inside_id).unwrap(), b"inside pack dir");
    assert_eq!(db.cache().stats().open_files, 2);
    drop(added);

    // Once its file is gone an added pack is forgotten like any other
    std::fs::remove_file(&outside_path).unwrap();
    assert_eq!(db.rescan_packs().unwrap(), 1);
    assert!(db.open(&outside_id).unwrap_err().is_missing());
    assert_eq!(db.cache().stats().open_files, 1);
}

#[test]
fn test_concurrent_add_and_rescan_lose_no_packs() {
    let dir = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    let db = Arc::new(ObjectDatabase::new(dir.path(), tiny_config()).unwrap());

    let mut ids = Vec::new();
    let mut outside_paths = Vec::new();
    for i in 0..4u8 {
        let mut inside = PackFixture::new();
        ids.push(inside.whole(ObjectType::Blob, &[b'i', i]).0);
        inside.write(&dir.path().join("pack"), IndexVersion::V2);

        let mut outside = PackFixture::new();
        ids.push(outside.whole(ObjectType::Blob, &[b'o', i]).0);
        outside_paths.push(outside.write(elsewhere.path(), IndexVersion::V2));
    }

    let barrier = Arc::new(std::sync::Barrier::new(outside_paths.len() + 2));
    let mut handles = Vec::new();
    for path in outside_paths {
        let db = db.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            db.add_pack(&path).unwrap();
        }));
    }
    for _ in 0..2 {
        let db = db.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            db.rescan_packs().unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    db.rescan_packs().unwrap();
    assert_eq!(db.packs().len(), 8);
    assert_eq!(db.cache().stats().open_files, 8);
    for id in &ids {
        assert!(db.contains(id));
    }
}

#[test]
fn test_skips_broken_packs() {
    let dir = TempDir::new().unwrap();
    let pack_dir = dir.path().join("pack");

    let mut good = PackFixture::new();
    let (good_id, _) = good.whole(ObjectType::Blob, b"good");
    good.write(&pack_dir, IndexVersion::V2);

    let mut bad = PackFixture::new();
    bad.whole(ObjectType::Blob, b"bad");
    let bad_path = bad.write(&pack_dir, IndexVersion::V2);
    let mut bytes = std::fs::read(&bad_path).unwrap();
    bytes[8..12].copy_from_slice(&9u32.to_be_bytes());
    std::fs::write(&bad_path, bytes).unwrap();

    // A pack without an index and a stray file are ignored
    std::fs::write(pack_dir.join("pack-orphan.pack"), b"PACK").unwrap();
    std::fs::write(pack_dir.join("README"), b"not a pack").unwrap();

    let db = ObjectDatabase::new(dir.path(), tiny_config()).unwrap();
    assert_eq!(db.packs().len(), 1);
    assert_eq!(load(&db, &good_id).unwrap(), b"good");
}

#[test]
fn test_loose_corruption_is_not_masked_by_packs() {
    let dir = TempDir::new().unwrap();
    let mut fixture = PackFixture::new();
    let (id, _) = fixture.whole(ObjectType::Blob, b"both places");
    fixture.write(&dir.path().join("pack"), IndexVersion::V2);

    let db = ObjectDatabase::new(dir.path(), tiny_config()).unwrap();
    let loose_path = db.loose().path_for(&id);
    std::fs::create_dir_all(loose_path.parent().unwrap()).unwrap();
    std::fs::write(&loose_path, b"not zlib at all").unwrap();

    let err = db.open(&id).unwrap_err();
    assert!(err.is_corrupt());
    assert!(matches!(err, PackError::Storage(_)));
}

#[test]
fn test_shared_cache_across_databases() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut fa = PackFixture::new();
    let (a, _) = fa.whole(ObjectType::Blob, b"in a");
    fa.write(&dir_a.path().join("pack"), IndexVersion::V2);
    let mut fb = PackFixture::new();
    let (b, _) = fb.whole(ObjectType::Blob, b"in b");
    fb.write(&dir_b.path().join("pack"), IndexVersion::V2);

    let cache = Arc::new(WindowCache::new(tiny_config().window_cache).unwrap());
    let db_a = ObjectDatabase::with_cache(dir_a.path(), tiny_config(), cache.clone()).unwrap();
    let db_b = ObjectDatabase::with_cache(dir_b.path(), tiny_config(), cache.clone()).unwrap();
    assert_eq!(load(&db_a, &a).unwrap(), b"in a");
    assert_eq!(load(&db_b, &b).unwrap(), b"in b");
    assert_eq!(cache.stats().open_files, 2);
    assert!(db_a.open(&b).unwrap_err().is_missing());
}

#[test]
fn test_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = ObjectDatabaseConfig {
        max_delta_depth: 0,
        ..Default::default()
    };
    assert!(matches!(
        ObjectDatabase::new(dir.path(), config),
        Err(PackError::InvalidConfig(_))
    ));
}

#[test]
fn test_concurrent_readers() {
    let dir = TempDir::new().unwrap();
    let mut fixture = PackFixture::new();
    let mut expected = Vec::new();
    let mut content = Vec::new();
    let mut previous: Option<u64> = None;
    for i in 0..40u32 {
        let line = format!("revision {} {}\n", i, "x".repeat((i * 13 % 97) as usize));
        let id_and_offset = match previous {
            Some(base_offset) if i % 8 != 0 => {
                let delta = append_delta(&content, line.as_bytes());
                content.extend_from_slice(line.as_bytes());
                let id = ObjectId::hash_object(ObjectType::Blob, &content);
                (id, fixture.ofs_delta(id, base_offset, &delta))
            }
            _ => {
                content.extend_from_slice(line.as_bytes());
                fixture.whole(ObjectType::Blob, &content)
            }
        };
        previous = Some(id_and_offset.1);
        expected.push((id_and_offset.0, content.clone()));
    }
    fixture.write(&dir.path().join("pack"), IndexVersion::V2);

    let db = Arc::new(ObjectDatabase::new(dir.path(), tiny_config()).unwrap());
    let expected = Arc::new(expected);
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let db = db.clone();
            let expected = expected.clone();
            thread::spawn(move || {
                for round in 0..5 {
                    for (i, (id, data)) in expected.iter().enumerate() {
                        if (i + t + round) % 3 == 0 {
                            assert_eq!(&load(db.as_ref(), id).unwrap(), data);
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = db.cache().stats();
    assert!(stats.resident_bytes <= 2048);
    assert!(stats.hits > 0);
}
