//! Region container codec.
//!
//! # File layout
//! ```text
//! sector 0   1024 × { offset: u24 BE (in sectors), count: u8 }
//! sector 1   1024 × timestamp: u32 BE (epoch seconds)
//! sector 2.. chunk records, each padded to a whole number of sectors
//! ```
//!
//! Slot `i` of both tables belongs to local chunk `(i % 32, i / 32)`, so the
//! x axis varies fastest. A location entry of zero marks an absent slot.
//!
//! Writing never re-encodes a payload: surviving records are copied sector
//! for sector from the source file into a freshly compacted layout.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use log::debug;

use crate::chunk::{decode_meta, Chunk};
use crate::error::{PeelError, Result};

pub const SECTOR_SIZE: u64 = 4096;
/// Chunks per region edge.
pub const REGION_EDGE: usize = 32;
pub const SLOT_COUNT: usize = REGION_EDGE * REGION_EDGE;
pub const HEADER_SECTORS: u64 = 2;
pub const HEADER_SIZE: usize = (HEADER_SECTORS * SECTOR_SIZE) as usize;
/// Largest sector offset a location entry can express.
const MAX_SECTOR_OFFSET: u64 = 0x00FF_FFFF;

#[inline]
pub fn slot_index(local_x: u8, local_z: u8) -> usize {
    local_x as usize + REGION_EDGE * local_z as usize
}

// ── Region ───────────────────────────────────────────────────────────────────

/// An opened region file: its header tables and the chunks present in it.
#[derive(Debug, Clone)]
pub struct Region {
    path:       PathBuf,
    region_x:   i32,
    region_z:   i32,
    /// Slot → index into `chunks`.
    slots:      Vec<Option<usize>>,
    timestamps: Vec<u32>,
    /// Present chunks in slot order; authoritative for every later pass.
    chunks:     Vec<Chunk>,
}

impl Region {
    pub fn path(&self) -> &Path { &self.path }
    pub fn region_x(&self) -> i32 { self.region_x }
    pub fn region_z(&self) -> i32 { self.region_z }

    pub fn chunk_at(&self, local_x: u8, local_z: u8) -> Option<&Chunk> {
        if local_x as usize >= REGION_EDGE || local_z as usize >= REGION_EDGE {
            return None;
        }
        self.slots[slot_index(local_x, local_z)].map(|i| &self.chunks[i])
    }

    pub fn timestamp_at(&self, local_x: u8, local_z: u8) -> Option<u32> {
        if local_x as usize >= REGION_EDGE || local_z as usize >= REGION_EDGE {
            return None;
        }
        Some(self.timestamps[slot_index(local_x, local_z)])
    }

    pub fn existing_chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Mutable view used by the filter pass to set removal marks.
    pub fn existing_chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    pub fn marked_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_marked_for_removal()).count()
    }

    /// Size in bytes of the file `write_region` would produce.
    pub fn compacted_size(&self) -> u64 {
        HEADER_SIZE as u64
            + self.chunks
                .iter()
                .filter(|c| !c.is_marked_for_removal())
                .map(Chunk::byte_len)
                .sum::<u64>()
    }
}

// ── File name ────────────────────────────────────────────────────────────────

/// Region coordinates from a file name of the form `r.<x>.<z>.mca`.
pub fn parse_region_coords(path: &Path) -> Result<(i32, i32)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PeelError::Format(format!("unreadable region file name: {}", path.display())))?;
    let bad = || PeelError::Format(format!("region file name '{name}' is not r.<x>.<z>.mca"));

    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("r"), Some(x), Some(z), Some("mca"), None) => {
            let x = x.parse::<i32>().map_err(|_| bad())?;
            let z = z.parse::<i32>().map_err(|_| bad())?;
            Ok((x, z))
        }
        _ => Err(bad()),
    }
}

// ── Read ─────────────────────────────────────────────────────────────────────

/// Open `path` and decode the metadata of every present chunk.
pub fn read_region(path: &Path) -> Result<Region> {
    let (region_x, region_z) = parse_region_coords(path)?;
    let mut reader = BufReader::new(File::open(path)?);
    read_region_from(&mut reader, path, region_x, region_z)
}

/// Decode a region from any seekable source. `path` is only used to label
/// errors and the returned value.
pub fn read_region_from<R: Read + Seek>(
    reader:   &mut R,
    path:     &Path,
    region_x: i32,
    region_z: i32,
) -> Result<Region> {
    let mut header = vec![0u8; HEADER_SIZE];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            PeelError::Format(format!("{}: region header truncated", path.display()))
        }
        _ => PeelError::Io(e),
    })?;
    let (locations, stamps) = header.split_at(SECTOR_SIZE as usize);

    let mut slots = vec![None; SLOT_COUNT];
    let mut timestamps = vec![0u32; SLOT_COUNT];
    let mut chunks = Vec::new();

    for slot in 0..SLOT_COUNT {
        timestamps[slot] = BigEndian::read_u32(&stamps[slot * 4..]);
        let entry = BigEndian::read_u32(&locations[slot * 4..]);
        if entry == 0 {
            continue;
        }
        let local_x = (slot % REGION_EDGE) as u8;
        let local_z = (slot / REGION_EDGE) as u8;
        let sector_offset = (entry >> 8) as u64;
        let sector_count = (entry & 0xFF) as u8;

        let decoded = if sector_offset < HEADER_SECTORS || sector_count == 0 {
            Err(PeelError::Format(format!(
                "location entry {sector_offset}/{sector_count} overlaps the header"
            )))
        } else {
            decode_meta(
                reader,
                sector_offset * SECTOR_SIZE,
                sector_count,
                local_x,
                local_z,
                region_x,
                region_z,
            )
        };
        let chunk = decoded.map_err(|source| PeelError::InRegion {
            path: path.to_path_buf(),
            local_x,
            local_z,
            source: Box::new(source),
        })?;

        slots[slot] = Some(chunks.len());
        chunks.push(chunk);
    }

    debug!("{}: {} chunk(s) present", path.display(), chunks.len());
    Ok(Region { path: path.to_path_buf(), region_x, region_z, slots, timestamps, chunks })
}

// ── Write ────────────────────────────────────────────────────────────────────

/// `Write` adapter that counts the bytes passing through it.
pub struct CountingWriter<W: Write> {
    inner: W,
    pub bytes_written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, bytes_written: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write the compacted form of `region` to `out`, copying surviving records
/// from `source`. Returns the number of bytes written.
///
/// Survivors keep their list order and are packed contiguously from
/// sector 2. Removed and absent slots are zero in both tables.
pub fn write_region<R, W>(region: &Region, source: &mut R, out: W) -> Result<u64>
where
    R: Read + Seek,
    W: Write,
{
    let mut out = CountingWriter::new(out);

    let mut locations = vec![0u32; SLOT_COUNT];
    let mut timestamps = vec![0u32; SLOT_COUNT];
    let mut next_sector = HEADER_SECTORS;
    for chunk in region.chunks.iter().filter(|c| !c.is_marked_for_removal()) {
        if next_sector > MAX_SECTOR_OFFSET {
            return Err(PeelError::Format("compacted region exceeds addressable sectors".into()));
        }
        let slot = slot_index(chunk.local_x, chunk.local_z);
        locations[slot] = ((next_sector as u32) << 8) | chunk.sector_count as u32;
        timestamps[slot] = region.timestamps[slot];
        next_sector += chunk.sector_count as u64;
    }

    for &entry in &locations {
        out.write_u32::<BigEndian>(entry)?;
    }
    for &stamp in &timestamps {
        out.write_u32::<BigEndian>(stamp)?;
    }

    for chunk in region.chunks.iter().filter(|c| !c.is_marked_for_removal()) {
        source.seek(SeekFrom::Start(chunk.offset))?;
        let want = chunk.byte_len();
        let copied = io::copy(&mut source.by_ref().take(want), &mut out)?;
        if copied != want {
            return Err(PeelError::Format(format!(
                "{}: source ended after {copied} of {want} bytes of chunk ({}, {})",
                region.path.display(),
                chunk.local_x,
                chunk.local_z
            )));
        }
    }

    out.flush()?;
    Ok(out.bytes_written)
}

/// Write `region` using `source_path` as the payload source.
///
/// With `dry_run` the output goes to a counting sink and `output` is
/// ignored; otherwise `output` is required and is created or truncated.
pub fn write_region_to(
    region:      &Region,
    source_path: &Path,
    output:      Option<&Path>,
    dry_run:     bool,
) -> Result<u64> {
    let mut source = BufReader::new(File::open(source_path)?);
    if dry_run {
        return write_region(region, &mut source, io::sink());
    }
    let output = output.ok_or_else(|| {
        PeelError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "an output path is required unless dry-run is set",
        ))
    })?;
    let mut out = BufWriter::new(File::create(output)?);
    let written = write_region(region, &mut source, &mut out)?;
    out.into_inner().map_err(|e| PeelError::Io(e.into_error()))?.sync_all()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_file_names() {
        assert_eq!(parse_region_coords(Path::new("r.0.0.mca")).unwrap(), (0, 0));
        assert_eq!(parse_region_coords(Path::new("/w/region/r.-3.12.mca")).unwrap(), (-3, 12));
        assert!(matches!(parse_region_coords(Path::new("r.0.mca")), Err(PeelError::Format(_))));
        assert!(matches!(parse_region_coords(Path::new("r.a.0.mca")), Err(PeelError::Format(_))));
        assert!(matches!(parse_region_coords(Path::new("r.0.0.mcr")), Err(PeelError::Format(_))));
        assert!(matches!(parse_region_coords(Path::new("r.0.0.mca.bak")), Err(PeelError::Format(_))));
    }

    #[test]
    fn slot_order_is_x_fastest() {
        assert_eq!(slot_index(0, 0), 0);
        assert_eq!(slot_index(1, 0), 1);
        assert_eq!(slot_index(0, 1), 32);
        assert_eq!(slot_index(31, 31), 1023);
    }

    #[test]
    fn short_header_is_format_error() {
        let mut cursor = io::Cursor::new(vec![0u8; 5000]);
        let err = read_region_from(&mut cursor, Path::new("r.0.0.mca"), 0, 0).unwrap_err();
        assert!(matches!(err, PeelError::Format(_)));
    }

    #[test]
    fn empty_region_writes_bare_header() {
        let mut cursor = io::Cursor::new(vec![0u8; HEADER_SIZE]);
        let region = read_region_from(&mut cursor, Path::new("r.0.0.mca"), 0, 0).unwrap();
        assert!(region.existing_chunks().is_empty());
        let mut out = Vec::new();
        let n = write_region(&region, &mut cursor, &mut out).unwrap();
        assert_eq!(n, HEADER_SIZE as u64);
        assert_eq!(out, vec![0u8; HEADER_SIZE]);
    }

    #[test]
    fn counting_writer_counts() {
        let mut w = CountingWriter::new(io::sink());
        w.write_all(&[0u8; 10]).unwrap();
        w.write_all(&[0u8; 7]).unwrap();
        assert_eq!(w.bytes_written, 17);
    }
}
