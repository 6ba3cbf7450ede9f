//! Per-chunk metadata decoding.
//!
//! A chunk record inside a region file is:
//!
//! ```text
//! length  4 B  BE, counts the compression tag plus the payload
//! tag     1 B  compression type; > 128 means stored in an external file
//! payload (length - 1) B
//! ```
//!
//! Only the `InhabitedTime` field is extracted. Oversized chunks (tag > 128)
//! are returned without touching their payload and are never removed.

use std::io::{BufReader, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use log::trace;

use crate::codec::{get_codec_by_tag, EXTERNAL_FLAG};
use crate::error::{PeelError, Result};
use crate::region::SECTOR_SIZE;
use crate::tag_scan;

/// Reported usage value for chunks whose payload was not read.
pub const UNKNOWN_INHABITED_TIME: i64 = -1;

/// One present slot of a region file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub global_x:       i32,
    pub global_z:       i32,
    pub local_x:        u8,
    pub local_z:        u8,
    /// Byte offset of the record from the start of the region file.
    pub offset:         u64,
    pub sector_count:   u8,
    pub inhabited_time: i64,
    pub oversized:      bool,
    pub(crate) marked_for_removal: bool,
}

impl Chunk {
    pub fn is_marked_for_removal(&self) -> bool {
        self.marked_for_removal
    }

    pub(crate) fn mark_for_removal(&mut self) {
        self.marked_for_removal = true;
    }

    /// Decoded and never inhabited. Oversized chunks are never unused.
    pub fn is_unused(&self) -> bool {
        !self.oversized && self.inhabited_time == 0
    }

    /// Bytes the record occupies on disk, padding included.
    pub fn byte_len(&self) -> u64 {
        self.sector_count as u64 * SECTOR_SIZE
    }
}

/// Global chunk coordinate from a region coordinate and a 5-bit local one.
#[inline]
pub fn global_coord(region: i32, local: u8) -> i32 {
    (region << 5) | (local as i32 & 31)
}

/// Decode the metadata of the chunk stored at `offset`.
///
/// `reader` is left positioned somewhere inside the record.
pub fn decode_meta<R: Read + Seek>(
    reader:       &mut R,
    offset:       u64,
    sector_count: u8,
    local_x:      u8,
    local_z:      u8,
    region_x:     i32,
    region_z:     i32,
) -> Result<Chunk> {
    let mut chunk = Chunk {
        global_x:       global_coord(region_x, local_x),
        global_z:       global_coord(region_z, local_z),
        local_x,
        local_z,
        offset,
        sector_count,
        inhabited_time: UNKNOWN_INHABITED_TIME,
        oversized:      false,
        marked_for_removal: false,
    };

    reader.seek(SeekFrom::Start(offset))?;
    let length = reader.read_u32::<BigEndian>().map_err(short_record)? as u64;
    let tag    = reader.read_u8().map_err(short_record)?;

    if tag > EXTERNAL_FLAG {
        trace!("chunk ({}, {}) stored externally, not decoded", chunk.global_x, chunk.global_z);
        chunk.oversized = true;
        return Ok(chunk);
    }
    if length == 0 {
        return Err(PeelError::Format("chunk length field is zero".into()));
    }
    if length + 4 > chunk.byte_len() {
        return Err(PeelError::Format(format!(
            "chunk length {length} exceeds its {sector_count} allocated sector(s)"
        )));
    }

    let codec = get_codec_by_tag(tag)?;
    let compressed = BufReader::new(reader.by_ref().take(length - 1));
    let mut payload = BufReader::new(codec.decoder(Box::new(compressed)));

    chunk.inhabited_time = tag_scan::find_inhabited_time(&mut payload)?
        .ok_or_else(|| PeelError::missing("InhabitedTime", format!(
            "chunk ({}, {}) payload", chunk.global_x, chunk.global_z
        )))?;
    Ok(chunk)
}

fn short_record(e: std::io::Error) -> PeelError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PeelError::Format("chunk record header truncated".into())
    } else {
        PeelError::Io(e)
    }
}
