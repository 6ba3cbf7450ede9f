//! Crate-wide error type.
//!
//! Per-file failures inside a worker are logged and swallowed; only
//! `TaskInterrupted` and dispatcher misuse ever reach the caller of a run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeelError {
    /// Structural violation of a binary layout (region header, payload
    /// framing, file name, force-loaded ledger record).
    #[error("Format error: {0}")]
    Format(String),
    #[error("Compression type {0} unsupported")]
    CompressionUnsupported(u8),
    /// A targeted tag scan reached end of stream before the tag (or its
    /// value) was found.
    #[error("Missing field '{field}' in {context}")]
    MissingField { field: &'static str, context: String },
    #[error("Protection list line {line}: {reason}")]
    Ledger { line: usize, reason: String },
    #[error("No region files found: {0}")]
    RegionFilesNotFound(String),
    /// A chunk decode failure re-raised with the identity of its container.
    #[error("Chunk ({local_x}, {local_z}) in {}: {source}", .path.display())]
    InRegion {
        path:    PathBuf,
        local_x: u8,
        local_z: u8,
        #[source]
        source:  Box<PeelError>,
    },
    #[error("Region tasks were interrupted before completion")]
    TaskInterrupted,
    #[error("Region tasks have already been started")]
    AlreadyStarted,
    #[error("Region task not accepted: dispatcher already started")]
    NotAccepted,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PeelError>;

impl PeelError {
    pub(crate) fn missing(field: &'static str, context: impl Into<String>) -> Self {
        PeelError::MissingField { field, context: context.into() }
    }
}
