//! Centralized error types for tonieshell.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the tonieshell library.
#[derive(Error, Debug)]
pub enum TonieError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("Tonie file not found: {0}")]
    FileNotFound(PathBuf),

    /// Not enough bytes to decode the length prefix or the message body.
    #[error("Truncated input: needed {needed} bytes, only {available} available")]
    TruncatedInput { needed: usize, available: usize },

    /// The header bytes do not parse as a valid protobuf message.
    #[error("Malformed header message at byte {offset}: {reason}")]
    MalformedMessage { offset: usize, reason: String },

    /// Header claims do not match the actual payload.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// A chapter page entry is not strictly greater than its predecessor.
    #[error("Chapter pages not strictly increasing: entry {index} is {value}, previous was {previous}")]
    NonMonotonicChapters {
        index: usize,
        value: u32,
        previous: u32,
    },

    /// The Ogg stream is corrupt or not an Ogg stream at all.
    #[error("Invalid Ogg stream at offset {offset}: {reason}")]
    InvalidOgg { offset: u64, reason: String },

    /// A chapter number outside the container's chapter table.
    #[error("No such chapter: {requested} (container has {available})")]
    NoSuchChapter { requested: usize, available: usize },

    /// A container rewrite or chapter export failed.
    #[error("Export error: {0}")]
    ExportError(String),

    /// An Opus packet cannot be repacked into the page grid.
    #[error("Cannot repack Opus packet: {0}")]
    OpusRepack(String),
}

/// Outcome of a failed payload verification.
///
/// Both the hash and the length comparison always run, so a caller gets
/// every mismatch from a single call instead of fixing one and then
/// hitting the next.
#[derive(Debug)]
pub struct IntegrityError {
    /// Present when the SHA-1 of the payload differs from the header.
    pub hash: Option<HashMismatch>,
    /// Present when the payload length differs from the header.
    pub length: Option<LengthMismatch>,
}

/// Header hash vs. actual payload hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub expected: [u8; 20],
    pub actual: [u8; 20],
}

/// Header length vs. actual payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub expected: u64,
    pub actual: u64,
}

impl std::fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        if let Some(h) = &self.hash {
            write!(
                f,
                "payload hash mismatch: header says {}, payload hashes to {}",
                hex::encode(h.expected),
                hex::encode(h.actual)
            )?;
            first = false;
        }
        if let Some(l) = &self.length {
            if !first {
                write!(f, "; ")?;
            }
            write!(
                f,
                "payload length mismatch: header says {} bytes, payload is {} bytes",
                l.expected, l.actual
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for IntegrityError {}

/// Convenience alias for `Result<T, TonieError>`.
pub type Result<T> = std::result::Result<T, TonieError>;

impl TonieError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `TonieError`
/// when no path context is available (rare — prefer `TonieError::io`).
impl From<std::io::Error> for TonieError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
