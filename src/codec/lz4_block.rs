//! Block-framed LZ4 stream, as produced by the JVM `LZ4BlockOutputStream`.
//!
//! # Layout
//! The stream is a sequence of blocks, each with a 21-byte header:
//!
//! ```text
//! magic      8 B   "LZ4Block"
//! token      1 B   method (0x10 raw, 0x20 lz4) | level (low nibble)
//! comp_len   4 B   LE
//! orig_len   4 B   LE
//! checksum   4 B   LE, xxhash32 of the original bytes (not verified here)
//! ```
//!
//! A header with `comp_len == orig_len == 0` terminates the stream.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub const MAGIC: &[u8; 8] = b"LZ4Block";
pub const HEADER_SIZE: usize = 21;
pub const METHOD_RAW: u8 = 0x10;
pub const METHOD_LZ4: u8 = 0x20;
/// Default block size used by the JVM writer (64 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
/// Upper bound on a single block; anything larger is treated as corruption.
const MAX_BLOCK_SIZE: usize = 32 * 1024 * 1024;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Streaming decoder. Decodes one block at a time, so memory stays bounded
/// by the block size no matter how long the stream is.
pub struct Lz4BlockReader<R: Read> {
    inner:    R,
    block:    Vec<u8>,
    pos:      usize,
    finished: bool,
}

impl<R: Read> Lz4BlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, block: Vec::new(), pos: 0, finished: false }
    }

    /// Load the next block into `self.block`. Returns `false` at end of stream.
    fn refill(&mut self) -> io::Result<bool> {
        let mut magic = [0u8; 8];
        match self.inner.read_exact(&mut magic) {
            Ok(()) => {}
            // A stream cut exactly at a block boundary is accepted as ended.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        }
        if &magic != MAGIC {
            return Err(invalid("lz4 block stream: bad magic"));
        }
        let token     = self.inner.read_u8()?;
        let comp_len  = self.inner.read_u32::<LittleEndian>()? as usize;
        let orig_len  = self.inner.read_u32::<LittleEndian>()? as usize;
        let _checksum = self.inner.read_u32::<LittleEndian>()?;

        if comp_len == 0 && orig_len == 0 {
            return Ok(false);
        }
        if comp_len > MAX_BLOCK_SIZE || orig_len > MAX_BLOCK_SIZE {
            return Err(invalid(format!("lz4 block stream: block too large ({comp_len}/{orig_len})")));
        }

        let mut compressed = vec![0u8; comp_len];
        self.inner.read_exact(&mut compressed)?;

        self.block = match token & 0xF0 {
            METHOD_RAW => {
                if comp_len != orig_len {
                    return Err(invalid("lz4 block stream: raw block length mismatch"));
                }
                compressed
            }
            METHOD_LZ4 => {
                let mut out = vec![0u8; orig_len];
                let n = lz4_flex::block::decompress_into(&compressed, &mut out)
                    .map_err(|e| invalid(format!("lz4 block stream: {e}")))?;
                if n != orig_len {
                    return Err(invalid("lz4 block stream: short block"));
                }
                out
            }
            other => return Err(invalid(format!("lz4 block stream: unknown method {other:#04x}"))),
        };
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for Lz4BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.block.len() {
            if self.finished || !self.refill()? {
                self.finished = true;
                return Ok(0);
            }
        }
        let n = buf.len().min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Encode `data` as a complete block stream, including the end marker.
/// Checksums are written as zero.
pub fn encode(data: &[u8], block_size: usize) -> Vec<u8> {
    let block_size = block_size.clamp(64, MAX_BLOCK_SIZE);
    let level = level_for(block_size);
    let mut out = Vec::with_capacity(data.len() / 2 + HEADER_SIZE * 2);

    for block in data.chunks(block_size) {
        let packed = lz4_flex::block::compress(block);
        let (method, payload) = if packed.len() < block.len() {
            (METHOD_LZ4, packed.as_slice())
        } else {
            (METHOD_RAW, block)
        };
        write_header(&mut out, method | level, payload.len(), block.len());
        out.extend_from_slice(payload);
    }
    write_header(&mut out, METHOD_RAW | level, 0, 0);
    out
}

fn level_for(block_size: usize) -> u8 {
    let bits = usize::BITS - (block_size - 1).leading_zeros();
    bits.saturating_sub(10).min(15) as u8
}

fn write_header(out: &mut Vec<u8>, token: u8, comp_len: usize, orig_len: usize) {
    out.extend_from_slice(MAGIC);
    out.push(token);
    // Writing into a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(comp_len as u32);
    let _ = out.write_u32::<LittleEndian>(orig_len as u32);
    let _ = out.write_u32::<LittleEndian>(0);
}
