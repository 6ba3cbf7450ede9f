//! Chunk payload codec registry.
//!
//! # Compression tags
//! Every chunk payload in a region file is prefixed by a one-byte tag:
//!
//! | Tag | Codec |
//! |-----|-------|
//! | 1   | gzip |
//! | 2   | zlib-wrapped deflate |
//! | 3   | stored (no compression) |
//! | 4   | LZ4 block stream (see [`lz4_block`]) |
//!
//! A tag above 128 means the payload lives in an external overflow file.
//! Those payloads are never decoded here; see [`crate::chunk`].
//!
//! Decoding is streaming only: the scanner in [`crate::tag_scan`] stops as
//! soon as it has the one field it needs, so a full decompression of the
//! chunk is almost never performed.

use std::io::{self, Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::error::{PeelError, Result};

pub mod lz4_block;

/// Tag values with this bit set point at an external overflow record.
pub const EXTERNAL_FLAG: u8 = 0x80;

// ── CompressionType enum ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    Gzip,
    Zlib,
    None,
    Lz4,
}

impl CompressionType {
    /// The on-disk tag byte.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            CompressionType::Gzip => 1,
            CompressionType::Zlib => 2,
            CompressionType::None => 3,
            CompressionType::Lz4  => 4,
        }
    }

    /// Resolve the low seven bits of a tag byte.
    ///
    /// Fails with [`PeelError::CompressionUnsupported`] for anything not in
    /// the table above.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag & !EXTERNAL_FLAG {
            1 => Ok(CompressionType::Gzip),
            2 => Ok(CompressionType::Zlib),
            3 => Ok(CompressionType::None),
            4 => Ok(CompressionType::Lz4),
            other => Err(PeelError::CompressionUnsupported(other)),
        }
    }

    /// Human-readable name (diagnostics only, never parsed).
    pub fn name(self) -> &'static str {
        match self {
            CompressionType::Gzip => "gzip",
            CompressionType::Zlib => "zlib",
            CompressionType::None => "none",
            CompressionType::Lz4  => "lz4",
        }
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression_type(&self) -> CompressionType;

    /// Wrap a compressed byte stream in a decoder yielding the raw payload.
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a>;

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Fully decode a payload held in memory.
    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decoder(Box::new(data)).read_to_end(&mut out)?;
        Ok(out)
    }
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct GzipCodec;
impl Codec for GzipCodec {
    fn compression_type(&self) -> CompressionType { CompressionType::Gzip }
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        Box::new(GzDecoder::new(compressed))
    }
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data)?;
        enc.finish()
    }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn compression_type(&self) -> CompressionType { CompressionType::Zlib }
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        Box::new(ZlibDecoder::new(compressed))
    }
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data)?;
        enc.finish()
    }
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression_type(&self) -> CompressionType { CompressionType::None }
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> { compressed }
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> { Ok(data.to_vec()) }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn compression_type(&self) -> CompressionType { CompressionType::Lz4 }
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        Box::new(lz4_block::Lz4BlockReader::new(compressed))
    }
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(lz4_block::encode(data, lz4_block::DEFAULT_BLOCK_SIZE))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CompressionType to a built-in codec.
pub fn get_codec(kind: CompressionType) -> Box<dyn Codec> {
    match kind {
        CompressionType::Gzip => Box::new(GzipCodec),
        CompressionType::Zlib => Box::new(ZlibCodec),
        CompressionType::None => Box::new(NoneCodec),
        CompressionType::Lz4  => Box::new(Lz4Codec),
    }
}

/// Resolve an on-disk tag byte to a built-in codec.
pub fn get_codec_by_tag(tag: u8) -> Result<Box<dyn Codec>> {
    CompressionType::from_tag(tag).map(get_codec)
}
