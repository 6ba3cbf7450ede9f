//! Force-loaded chunk ledger (`data/chunks.dat`).
//!
//! The file is gzip-compressed NBT. Two incompatible layouts exist, chosen
//! by the root `DataVersion`:
//!
//! | Layout  | DataVersion | Shape |
//! |---------|-------------|-------|
//! | Legacy  | < 4325      | `Forced`: long array, x in the low 32 bits, z in the high 32 |
//! | Tickets | >= 4325     | `tickets`: list of compounds with `chunk_pos` (x high, z low) and `type` |
//!
//! A file without `DataVersion` is read with the oldest layout.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use log::{debug, info};

use crate::error::{PeelError, Result};
use crate::protection::ProtectionIndex;
use crate::tag_scan::{self, FORCED_TAG, TICKETS_TAG};

/// Assumed when the ledger carries no `DataVersion`.
pub const OLDEST_DATA_VERSION: i32 = 1343;
/// First version written with the tickets layout.
pub const TICKETS_DATA_VERSION: i32 = 4325;

// Record tags inside one ticket compound.
const TAG_END: u8 = 0x00;
const TAG_INT: u8 = 0x03;
const TAG_LONG: u8 = 0x04;
const TAG_STRING: u8 = 0x08;
const TAG_INT_ARRAY: u8 = 0x0B;

/// Bytes between a ticket field's tag byte and its value.
const CHUNK_POS_PREFIX: usize = 2 + 9 + 4;
const LEVEL_FIELD: usize = 2 + 5 + 4;
const TICKS_LEFT_FIELD: usize = 2 + 10 + 8;
const TYPE_PREFIX: usize = 2 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerLayout {
    Legacy,
    Tickets,
}

impl LedgerLayout {
    pub fn for_version(data_version: i32) -> Self {
        if data_version < TICKETS_DATA_VERSION {
            LedgerLayout::Legacy
        } else {
            LedgerLayout::Tickets
        }
    }

    /// Collect the force-loaded coordinates from decompressed ledger bytes.
    pub fn forced_chunks(self, data: &[u8]) -> Result<Vec<(i32, i32)>> {
        match self {
            LedgerLayout::Legacy => read_legacy(data),
            LedgerLayout::Tickets => read_tickets(data),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForcedLoadResult {
    pub index: ProtectionIndex,
    /// Coordinates that were not already protected before the load.
    pub count: u64,
}

/// Add every force-loaded chunk recorded in the ledger at `path` to `index`.
pub fn load_forced_chunks(index: ProtectionIndex, path: &Path) -> Result<ForcedLoadResult> {
    let mut data = Vec::new();
    GzDecoder::new(File::open(path)?).read_to_end(&mut data)?;
    let result = load_forced_chunks_from(index, &data)?;
    info!("{}: {} force-loaded chunk(s) protected", path.display(), result.count);
    Ok(result)
}

/// Same as [`load_forced_chunks`] over already decompressed ledger bytes.
pub fn load_forced_chunks_from(mut index: ProtectionIndex, data: &[u8]) -> Result<ForcedLoadResult> {
    let version = tag_scan::find_data_version(&mut &data[..])?.unwrap_or(OLDEST_DATA_VERSION);
    let layout = LedgerLayout::for_version(version);
    debug!("force-loaded ledger DataVersion {version}, {layout:?} layout");

    let mut count = 0;
    for (x, z) in layout.forced_chunks(data)? {
        if !index.contains(x, z) {
            index = index.add_point(x, z);
            count += 1;
        }
    }
    Ok(ForcedLoadResult { index, count })
}

fn truncated(context: &str) -> impl Fn(io::Error) -> PeelError + '_ {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => PeelError::missing("chunk coordinates", context),
        _ => PeelError::Io(e),
    }
}

fn read_legacy(data: &[u8]) -> Result<Vec<(i32, i32)>> {
    let mut reader = data;
    if !tag_scan::find_and_skip(&mut reader, &FORCED_TAG)? {
        return Ok(Vec::new());
    }
    let len = reader.read_i32::<BigEndian>().map_err(truncated("Forced array length"))?;
    // The declared length is untrusted; never reserve more than the bytes can hold.
    let mut chunks = Vec::with_capacity((len.max(0) as usize).min(reader.len() / 8));
    for _ in 0..len {
        let packed = reader.read_u64::<BigEndian>().map_err(truncated("Forced array"))?;
        chunks.push((packed as u32 as i32, (packed >> 32) as u32 as i32));
    }
    Ok(chunks)
}

fn skip(reader: &mut &[u8], n: usize, context: &str) -> Result<()> {
    if reader.len() < n {
        return Err(PeelError::missing("ticket field", context));
    }
    *reader = &reader[n..];
    Ok(())
}

fn read_tickets(data: &[u8]) -> Result<Vec<(i32, i32)>> {
    let mut reader = data;
    if !tag_scan::find_and_skip(&mut reader, &TICKETS_TAG)? {
        return Ok(Vec::new());
    }
    let len = reader.read_i32::<BigEndian>().map_err(truncated("tickets list length"))?;

    let mut forced = Vec::new();
    let mut seen = 0i32;
    let mut pos: Option<u64> = None;
    let mut kind: Option<String> = None;

    while seen < len {
        let Some((&tag, rest)) = reader.split_first() else {
            return Err(PeelError::missing(
                "ticket",
                format!("tickets list ({seen} of {len} records)"),
            ));
        };
        reader = rest;
        match tag {
            TAG_INT_ARRAY => {
                skip(&mut reader, CHUNK_POS_PREFIX, "chunk_pos")?;
                pos = Some(reader.read_u64::<BigEndian>().map_err(truncated("chunk_pos"))?);
            }
            TAG_INT => skip(&mut reader, LEVEL_FIELD, "level")?,
            TAG_LONG => skip(&mut reader, TICKS_LEFT_FIELD, "ticks_left")?,
            TAG_STRING => {
                skip(&mut reader, TYPE_PREFIX, "type")?;
                let n = reader.read_u16::<BigEndian>().map_err(truncated("type"))? as usize;
                if reader.len() < n {
                    return Err(PeelError::missing("type", "ticket string value"));
                }
                let (text, rest) = reader.split_at(n);
                kind = Some(String::from_utf8_lossy(text).into_owned());
                reader = rest;
            }
            TAG_END => {
                let packed = pos.take().ok_or_else(|| PeelError::missing("chunk_pos", "ticket"))?;
                let kind = kind.take().ok_or_else(|| PeelError::missing("type", "ticket"))?;
                if kind.contains("forced") {
                    forced.push(((packed >> 32) as u32 as i32, packed as u32 as i32));
                }
                seen += 1;
            }
            other => {
                return Err(PeelError::Format(format!("unexpected tag {other:#04x} in tickets list")));
            }
        }
    }
    Ok(forced)
}
