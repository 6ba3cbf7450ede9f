//! Targeted tag scanning over NBT byte streams.
//!
//! Instead of parsing the whole tag tree, the scanners here look for the
//! exact byte prefix of one named tag (type byte, big-endian name length,
//! name) and read the value that immediately follows it.
//!
//! Every signature below has no proper prefix that is also a suffix, so the
//! single-pointer matcher in [`find_and_skip`] never has to back up: on a
//! mismatch it restarts at 1 if the byte equals the first signature byte,
//! otherwise at 0.

use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt};

/// `TAG_Long` named `InhabitedTime`; followed by an 8-byte BE value.
pub const INHABITED_TIME_TAG: [u8; 16] = [
    0x04, 0x00, 0x0D,
    b'I', b'n', b'h', b'a', b'b', b'i', b't', b'e', b'd', b'T', b'i', b'm', b'e',
];

/// `TAG_Int` named `DataVersion`; followed by a 4-byte BE value.
pub const DATA_VERSION_TAG: [u8; 14] = [
    0x03, 0x00, 0x0B,
    b'D', b'a', b't', b'a', b'V', b'e', b'r', b's', b'i', b'o', b'n',
];

/// `TAG_Long_Array` named `Forced`; followed by a 4-byte BE element count.
pub const FORCED_TAG: [u8; 9] = [
    0x0C, 0x00, 0x06,
    b'F', b'o', b'r', b'c', b'e', b'd',
];

/// `TAG_List` named `tickets` whose element type is `TAG_Compound`;
/// followed by a 4-byte BE element count.
pub const TICKETS_TAG: [u8; 11] = [
    0x09, 0x00, 0x07,
    b't', b'i', b'c', b'k', b'e', b't', b's',
    0x0A,
];

/// Advance `reader` until just past the first occurrence of `signature`.
///
/// Returns `Ok(false)` if the stream ended without a match; the stream is
/// then fully consumed. `signature` must be non-empty and free of equal
/// proper prefix/suffix pairs.
pub fn find_and_skip<R: Read>(reader: &mut R, signature: &[u8]) -> io::Result<bool> {
    debug_assert!(!signature.is_empty());
    let mut matched = 0usize;
    let mut buf = [0u8; 64];
    loop {
        // Never request more than the bytes still needed to complete a match,
        // so nothing past the signature is consumed.
        let want = (signature.len() - matched).min(buf.len());
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => return Ok(false),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for &byte in &buf[..n] {
            if byte == signature[matched] {
                matched += 1;
            } else if byte == signature[0] {
                matched = 1;
            } else {
                matched = 0;
            }
        }
        if matched == signature.len() {
            return Ok(true);
        }
    }
}

/// Scan for `InhabitedTime` and return its value, or `None` if absent.
pub fn find_inhabited_time<R: Read>(reader: &mut R) -> io::Result<Option<i64>> {
    find_i64_after(reader, &INHABITED_TIME_TAG)
}

/// Scan for `DataVersion` and return its value, or `None` if absent.
pub fn find_data_version<R: Read>(reader: &mut R) -> io::Result<Option<i32>> {
    if !find_and_skip(reader, &DATA_VERSION_TAG)? {
        return Ok(None);
    }
    match reader.read_i32::<BigEndian>() {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn find_i64_after<R: Read>(reader: &mut R, signature: &[u8]) -> io::Result<Option<i64>> {
    if !find_and_skip(reader, signature)? {
        return Ok(None);
    }
    match reader.read_i64::<BigEndian>() {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// True if no proper prefix of `signature` equals a proper suffix of it.
pub fn is_border_free(signature: &[u8]) -> bool {
    (1..signature.len()).all(|k| signature[..k] != signature[signature.len() - k..])
}
