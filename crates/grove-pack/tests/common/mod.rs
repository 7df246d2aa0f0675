//! Builds small pack + index pairs on disk for integration tests.

#![allow(dead_code)]

use flate2::write::ZlibEncoder;
use flate2::Compression;
use grove_pack::{write_index, IndexEntry, IndexVersion};
use grove_storage::{ObjectId, ObjectType};
use sha1::{Digest, Sha1};
use std::io::Write;
use std::path::{Path, PathBuf};

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// Accumulates pack entries in memory.
pub struct PackFixture {
    buf: Vec<u8>,
    entries: Vec<IndexEntry>,
}

impl PackFixture {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PACK");
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        Self {
            buf,
            entries: Vec::new(),
        }
    }

    /// Appends a whole object; returns its id and entry offset.
    pub fn whole(&mut self, object_type: ObjectType, data: &[u8]) -> (ObjectId, u64) {
        let id = ObjectId::hash_object(object_type, data);
        let offset = self.buf.len() as u64;
        let mut entry = encode_object_header(object_type.pack_type(), data.len() as u64);
        entry.extend(deflate(data));
        self.push(id, entry);
        (id, offset)
    }

    /// Appends an offset delta producing object `id` from the entry at
    /// `base_offset`; returns the entry offset.
    pub fn ofs_delta(&mut self, id: ObjectId, base_offset: u64, delta: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        let mut entry = encode_object_header(OFS_DELTA, delta.len() as u64);
        entry.extend(encode_base_distance(offset - base_offset));
        entry.extend(deflate(delta));
        self.push(id, entry);
        offset
    }

    /// Appends a reference delta producing object `id` from `base`.
    pub fn ref_delta(&mut self, id: ObjectId, base: ObjectId, delta: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        let mut entry = encode_object_header(REF_DELTA, delta.len() as u64);
        entry.extend_from_slice(base.as_bytes());
        entry.extend(deflate(delta));
        self.push(id, entry);
        offset
    }

    fn push(&mut self, id: ObjectId, entry: Vec<u8>) {
        let offset = self.buf.len() as u64;
        self.entries
            .push(IndexEntry::new(id, offset, crc32fast::hash(&entry)));
        self.buf.extend(entry);
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Finishes the pack bytes: object count and trailing checksum.
    pub fn finish(mut self) -> (Vec<u8>, Vec<IndexEntry>, [u8; 20]) {
        let count = self.entries.len() as u32;
        self.buf[8..12].copy_from_slice(&count.to_be_bytes());
        let mut checksum = [0u8; 20];
        checksum.copy_from_slice(&Sha1::digest(&self.buf));
        self.buf.extend_from_slice(&checksum);
        (self.buf, self.entries, checksum)
    }

    /// Writes `pack-<checksum>.pack` and `.idx` into `dir`.
    pub fn write(self, dir: &Path, version: IndexVersion) -> PathBuf {
        let (pack, entries, checksum) = self.finish();
        write_pack_pair(dir, &pack, &entries, &checksum, version)
    }
}

pub fn write_pack_pair(
    dir: &Path,
    pack: &[u8],
    entries: &[IndexEntry],
    checksum: &[u8; 20],
    version: IndexVersion,
) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let name = format!("pack-{}", hex::encode(checksum));
    let pack_path = dir.join(format!("{}.pack", name));
    std::fs::write(&pack_path, pack).unwrap();
    let mut idx = Vec::new();
    write_index(&mut idx, version, entries, checksum).unwrap();
    std::fs::write(dir.join(format!("{}.idx", name)), idx).unwrap();
    pack_path
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn encode_object_header(type_code: u8, size: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest > 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
    out
}

pub fn encode_base_distance(mut distance: u64) -> Vec<u8> {
    let mut out = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance > 0 {
        distance -= 1;
        out.push(0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    out.reverse();
    out
}

fn delta_size(out: &mut Vec<u8>, mut n: u64) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Delta instruction stream builder.
pub struct DeltaBuilder {
    out: Vec<u8>,
}

impl DeltaBuilder {
    pub fn new(base_len: usize, result_len: usize) -> Self {
        let mut out = Vec::new();
        delta_size(&mut out, base_len as u64);
        delta_size(&mut out, result_len as u64);
        Self { out }
    }

    pub fn copy(mut self, offset: u32, len: u32) -> Self {
        let mut cmd = 0x80u8;
        let mut args = Vec::new();
        for i in 0..4 {
            let byte = (offset >> (8 * i)) as u8;
            if byte != 0 {
                cmd |= 1 << i;
                args.push(byte);
            }
        }
        for i in 0..3 {
            let byte = (len >> (8 * i)) as u8;
            if byte != 0 {
                cmd |= 0x10 << i;
                args.push(byte);
            }
        }
        self.out.push(cmd);
        self.out.extend(args);
        self
    }

    pub fn insert(mut self, data: &[u8]) -> Self {
        for chunk in data.chunks(127) {
            self.out.push(chunk.len() as u8);
            self.out.extend_from_slice(chunk);
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.out
    }
}

/// A delta turning `base` into `base + suffix`.
pub fn append_delta(base: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut builder = DeltaBuilder::new(base.len(), base.len() + suffix.len());
    if !base.is_empty() {
        builder = builder.copy(0, base.len() as u32);
    }
    builder.insert(suffix).build()
}
