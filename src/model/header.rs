//! The Tonie container header value type.

use serde::{Deserialize, Serialize};

/// Size of the SHA-1 digest stored in the header.
pub const HASH_LEN: usize = 20;

/// Decoded form of the protobuf `TonieHeader` message.
///
/// ```text
/// ┌───────────────────────────────────────────────┐
/// │ offset 0   : u32 big-endian message length L  │
/// │ offset 4   : L bytes of protobuf TonieHeader  │
/// │              1 dataHash      bytes[20]        │
/// │              2 dataLength    varint           │
/// │              3 timestamp     varint           │
/// │              4 chapterPages  repeated varint  │
/// │              5 padding       bytes            │
/// │ offset 4+L : Ogg Opus payload, page-aligned   │
/// └───────────────────────────────────────────────┘
/// ```
///
/// The value is transient: built once when composing a container and
/// once when decoding an existing one. It owns its own buffers and
/// never the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonieHeader {
    /// SHA-1 digest of the payload that follows the header page.
    pub data_hash: [u8; HASH_LEN],

    /// Total byte length of the payload.
    pub data_length: u64,

    /// Creation time, seconds since the Unix epoch.
    pub timestamp: u32,

    /// Ogg page number at which each chapter begins, in playback order.
    /// Strictly increasing; empty for a file without chapter markers.
    pub chapter_pages: Vec<u32>,

    /// Filler bytes sized so the header occupies exactly one page.
    /// Conventionally zero, but non-zero padding is accepted on decode.
    #[serde(skip)]
    pub padding: Vec<u8>,

    /// Raw bytes of any protobuf fields outside 1..=5, preserved
    /// verbatim (tags included) and re-emitted on encode.
    #[serde(skip)]
    pub unknown_fields: Vec<u8>,
}

impl TonieHeader {
    /// A header with every field empty or zero.
    pub fn empty() -> Self {
        Self {
            data_hash: [0u8; HASH_LEN],
            data_length: 0,
            timestamp: 0,
            chapter_pages: Vec::new(),
            padding: Vec::new(),
            unknown_fields: Vec::new(),
        }
    }

    /// Number of chapters the header describes.
    pub fn chapter_count(&self) -> usize {
        self.chapter_pages.len()
    }

    /// Hex rendering of the payload hash.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.data_hash)
    }
}
