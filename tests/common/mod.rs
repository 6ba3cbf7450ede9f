//! Fixture builders shared by the integration tests: real region files,
//! protection lists and gzip force-loaded ledgers.
#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use peeler::codec::{get_codec, CompressionType};
use peeler::region::{slot_index, HEADER_SIZE, SECTOR_SIZE};

pub const SECTOR: usize = SECTOR_SIZE as usize;

// ── NBT fragments ────────────────────────────────────────────────────────────

fn named(tag: u8, name: &str) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// A chunk root compound holding `InhabitedTime`, preceded by `filler`
/// bytes of noise.
pub fn chunk_nbt(inhabited: i64, filler: usize) -> Vec<u8> {
    let mut out = named(0x0A, "");
    out.extend(named(0x03, "DataVersion"));
    out.extend_from_slice(&3953i32.to_be_bytes());
    if filler > 0 {
        out.extend(named(0x07, "Filler"));
        out.extend_from_slice(&(filler as i32).to_be_bytes());
        out.extend(pseudo_random(filler, inhabited as u32 ^ 0x9E37_79B9));
    }
    out.extend(named(0x04, "InhabitedTime"));
    out.extend_from_slice(&inhabited.to_be_bytes());
    out.push(0x00);
    out
}

// ── Region files ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChunkSpec {
    pub local_x:     u8,
    pub local_z:     u8,
    pub inhabited:   i64,
    pub compression: CompressionType,
    pub oversized:   bool,
    pub filler:      usize,
    /// Raw payload used instead of a compressed `chunk_nbt`.
    pub raw:         Option<(u8, Vec<u8>)>,
}

impl ChunkSpec {
    pub fn new(local_x: u8, local_z: u8, inhabited: i64) -> Self {
        Self {
            local_x,
            local_z,
            inhabited,
            compression: CompressionType::Zlib,
            oversized: false,
            filler: 0,
            raw: None,
        }
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn oversized(mut self) -> Self {
        self.oversized = true;
        self
    }

    pub fn filler(mut self, filler: usize) -> Self {
        self.filler = filler;
        self
    }

    pub fn raw(mut self, tag: u8, payload: Vec<u8>) -> Self {
        self.raw = Some((tag, payload));
        self
    }

    fn record(&self) -> Vec<u8> {
        let (tag, payload) = if self.oversized {
            // External payload: the record holds nothing but the tag.
            (0x80 | self.compression.tag(), Vec::new())
        } else if let Some((tag, payload)) = &self.raw {
            (*tag, payload.clone())
        } else {
            let nbt = chunk_nbt(self.inhabited, self.filler);
            (self.compression.tag(), get_codec(self.compression).compress(&nbt).unwrap())
        };
        let mut out = Vec::with_capacity(payload.len() + 5);
        out.extend_from_slice(&(payload.len() as u32 + 1).to_be_bytes());
        out.push(tag);
        out.extend_from_slice(&payload);
        let padded = out.len().div_ceil(SECTOR) * SECTOR;
        out.resize(padded, 0);
        out
    }
}

pub fn timestamp_for(slot: usize) -> u32 {
    1_700_000_000 + slot as u32
}

/// A compact region file: records in slot order, contiguous from sector 2.
pub fn region_bytes(chunks: &[ChunkSpec]) -> Vec<u8> {
    let mut specs: Vec<&ChunkSpec> = chunks.iter().collect();
    specs.sort_by_key(|c| slot_index(c.local_x, c.local_z));

    let mut out = vec![0u8; HEADER_SIZE];
    for spec in specs {
        let slot = slot_index(spec.local_x, spec.local_z);
        let record = spec.record();
        let offset = (out.len() / SECTOR) as u32;
        let count = (record.len() / SECTOR) as u32;
        out[slot * 4..slot * 4 + 4].copy_from_slice(&((offset << 8) | count).to_be_bytes());
        out[SECTOR + slot * 4..SECTOR + slot * 4 + 4].copy_from_slice(&timestamp_for(slot).to_be_bytes());
        out.extend_from_slice(&record);
    }
    out
}

pub fn write_region_file(dir: &Path, region_x: i32, region_z: i32, chunks: &[ChunkSpec]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("r.{region_x}.{region_z}.mca"));
    fs::write(&path, region_bytes(chunks)).unwrap();
    path
}

/// One decoded location entry: `(slot, sector offset, sector count)`.
pub fn location_table(bytes: &[u8]) -> Vec<(usize, u32, u8)> {
    (0..1024)
        .filter_map(|slot| {
            let entry = u32::from_be_bytes(bytes[slot * 4..slot * 4 + 4].try_into().unwrap());
            (entry != 0).then_some((slot, entry >> 8, (entry & 0xFF) as u8))
        })
        .collect()
}

pub fn timestamp_table(bytes: &[u8]) -> Vec<u32> {
    (0..1024)
        .map(|slot| {
            let at = SECTOR + slot * 4;
            u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
        })
        .collect()
}

/// Overwrite the sector count of one slot in raw region bytes.
pub fn set_sector_count(bytes: &mut [u8], local_x: u8, local_z: u8, count: u8) {
    bytes[slot_index(local_x, local_z) * 4 + 3] = count;
}

// ── Worlds ───────────────────────────────────────────────────────────────────

/// `<root>/<name>/region`, created.
pub fn world_region_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name).join("region");
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A world with `regions` region files, each holding a mix of kept and
/// removable chunks. Returns the region file paths.
pub fn populate_world(region_dir: &Path, regions: i32) -> Vec<PathBuf> {
    (0..regions)
        .map(|i| {
            let chunks: Vec<ChunkSpec> = (0..8u8)
                .map(|n| {
                    let inhabited = if (n as i32 + i) % 3 == 0 { 500 } else { n as i64 % 4 };
                    ChunkSpec::new(n * 3, n, inhabited)
                        .filler(n as usize * 1500)
                        .compression(if n % 2 == 0 { CompressionType::Zlib } else { CompressionType::Gzip })
                })
                .collect();
            write_region_file(region_dir, i - regions / 2, i % 2, &chunks)
        })
        .collect()
}

// ── Force-loaded ledgers ─────────────────────────────────────────────────────

fn gzip_to(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut enc = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap();
}

fn data_version_field(version: Option<i32>) -> Vec<u8> {
    match version {
        Some(v) => {
            let mut out = named(0x03, "DataVersion");
            out.extend_from_slice(&v.to_be_bytes());
            out
        }
        None => Vec::new(),
    }
}

/// Legacy ledger bytes: a `Forced` long array, x in the low half.
pub fn legacy_ledger(data_version: Option<i32>, forced: &[(i32, i32)]) -> Vec<u8> {
    let mut out = named(0x0A, "");
    out.extend(named(0x0A, "data"));
    out.extend(named(0x0C, "Forced"));
    out.extend_from_slice(&(forced.len() as i32).to_be_bytes());
    for &(x, z) in forced {
        let packed = ((z as u32 as u64) << 32) | x as u32 as u64;
        out.extend_from_slice(&packed.to_be_bytes());
    }
    out.push(0x00);
    out.extend(data_version_field(data_version));
    out.push(0x00);
    out
}

/// Tickets ledger bytes: one compound per `(x, z, type)`.
pub fn tickets_ledger(data_version: i32, tickets: &[(i32, i32, &str)]) -> Vec<u8> {
    let mut out = named(0x0A, "");
    out.extend(named(0x0A, "data"));
    out.extend(named(0x09, "tickets"));
    out.push(0x0A);
    out.extend_from_slice(&(tickets.len() as i32).to_be_bytes());
    for &(x, z, kind) in tickets {
        out.extend(named(0x08, "type"));
        out.extend_from_slice(&(kind.len() as u16).to_be_bytes());
        out.extend_from_slice(kind.as_bytes());
        out.extend(named(0x03, "level"));
        out.extend_from_slice(&31i32.to_be_bytes());
        out.extend(named(0x04, "ticks_left"));
        out.extend_from_slice(&0i64.to_be_bytes());
        out.extend(named(0x0B, "chunk_pos"));
        out.extend_from_slice(&2i32.to_be_bytes());
        out.extend_from_slice(&x.to_be_bytes());
        out.extend_from_slice(&z.to_be_bytes());
        out.push(0x00);
    }
    out.push(0x00);
    out.extend(data_version_field(Some(data_version)));
    out.push(0x00);
    out
}

pub fn write_legacy_ledger(path: &Path, data_version: Option<i32>, forced: &[(i32, i32)]) {
    gzip_to(path, &legacy_ledger(data_version, forced));
}

pub fn write_tickets_ledger(path: &Path, data_version: i32, tickets: &[(i32, i32, &str)]) {
    gzip_to(path, &tickets_ledger(data_version, tickets));
}

/// Byte snapshot of every file under `root`, keyed by relative path.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.push((rel, fs::read(&path).unwrap()));
            }
        }
    }
    out.sort();
    out
}
