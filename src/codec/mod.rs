//! Tonie container header codec.
//!
//! A container starts with a 4-byte big-endian length prefix followed by
//! a protobuf-encoded `TonieHeader` message, zero-padded so the payload
//! begins on a [`PAGE_SIZE`] boundary (in practice the header fills
//! exactly one page). This module converts between that byte layout and
//! [`TonieHeader`] and checks the header's claims against a payload.
//!
//! Everything here is a pure transformation over in-memory buffers: no
//! I/O, no logging, no shared state. File access lives in
//! [`crate::store`].

pub mod wire;

use byteorder::{BigEndian, ByteOrder};
use sha1::{Digest, Sha1};

use crate::error::{HashMismatch, IntegrityError, LengthMismatch, Result, TonieError};
use crate::model::header::{TonieHeader, HASH_LEN};
use wire::{WireReader, WIRE_LEN, WIRE_VARINT};

/// Alignment unit for the payload. The header page is padded out to
/// exactly this size by the original firmware's writer.
pub const PAGE_SIZE: usize = 0x1000;

/// Size of the big-endian length prefix.
pub const PREFIX_LEN: usize = 4;

// Protobuf field numbers, fixed for interoperability with existing
// Tonie containers.
const F_DATA_HASH: u32 = 1;
const F_DATA_LENGTH: u32 = 2;
const F_TIMESTAMP: u32 = 3;
const F_CHAPTER_PAGES: u32 = 4;
const F_PADDING: u32 = 5;

/// Decode a header from the start of a container.
///
/// Reads exactly `4 + L` bytes where `L` is the big-endian length
/// prefix. Performs no hash verification — see [`verify`] — so a caller
/// may inspect a header without holding the payload.
pub fn decode(bytes: &[u8]) -> Result<TonieHeader> {
    if bytes.len() < PREFIX_LEN {
        return Err(TonieError::TruncatedInput {
            needed: PREFIX_LEN,
            available: bytes.len(),
        });
    }
    let message_len = BigEndian::read_u32(&bytes[..PREFIX_LEN]) as usize;
    let message = bytes
        .get(PREFIX_LEN..PREFIX_LEN + message_len)
        .ok_or(TonieError::TruncatedInput {
            needed: PREFIX_LEN + message_len,
            available: bytes.len(),
        })?;
    decode_message(message)
}

/// Decode the protobuf message body (without the length prefix).
///
/// Fields outside 1..=5 are captured verbatim into
/// `unknown_fields` so a re-encode loses nothing. A known field with
/// the wrong wire type is malformed.
pub fn decode_message(message: &[u8]) -> Result<TonieHeader> {
    let mut header = TonieHeader::empty();
    let mut reader = WireReader::new(message);

    while !reader.is_at_end() {
        let field_start = reader.pos();
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (F_DATA_HASH, WIRE_LEN) => {
                let bytes = reader.read_len_delimited()?;
                if bytes.len() != HASH_LEN {
                    return Err(TonieError::MalformedMessage {
                        offset: field_start,
                        reason: format!("dataHash must be {HASH_LEN} bytes, got {}", bytes.len()),
                    });
                }
                header.data_hash.copy_from_slice(bytes);
            }
            (F_DATA_LENGTH, WIRE_VARINT) => {
                header.data_length = reader.read_varint()?;
            }
            (F_TIMESTAMP, WIRE_VARINT) => {
                // Protobuf uint32 semantics: out-of-range varints truncate.
                header.timestamp = reader.read_varint()? as u32;
            }
            (F_CHAPTER_PAGES, WIRE_LEN) => {
                // Packed encoding: a run of varints in one field.
                let packed = reader.read_len_delimited()?;
                let mut inner = WireReader::new(packed);
                while !inner.is_at_end() {
                    header.chapter_pages.push(inner.read_varint().map_err(
                        |_| TonieError::MalformedMessage {
                            offset: field_start,
                            reason: "truncated varint in packed chapterPages".into(),
                        },
                    )? as u32);
                }
            }
            (F_CHAPTER_PAGES, WIRE_VARINT) => {
                // Unpacked encoding: one field per entry.
                header.chapter_pages.push(reader.read_varint()? as u32);
            }
            (F_PADDING, WIRE_LEN) => {
                header.padding = reader.read_len_delimited()?.to_vec();
            }
            (field, wire_type) if field <= F_PADDING => {
                return Err(TonieError::MalformedMessage {
                    offset: field_start,
                    reason: format!("field {field} has unexpected wire type {wire_type}"),
                });
            }
            (_, wire_type) => {
                reader.skip_value(wire_type)?;
                header
                    .unknown_fields
                    .extend_from_slice(reader.raw_span(field_start, reader.pos()));
            }
        }
    }

    Ok(header)
}

/// Encode a header as length prefix + protobuf message.
///
/// Deterministic: the same logical header always yields byte-identical
/// output. Does not enforce page alignment; see [`pad_to_page`].
pub fn encode(header: &TonieHeader) -> Vec<u8> {
    let message = encode_message(header);
    let mut out = vec![0u8; PREFIX_LEN];
    BigEndian::write_u32(&mut out[..PREFIX_LEN], message.len() as u32);
    out.extend_from_slice(&message);
    out
}

/// Encode the protobuf message body (without the length prefix).
///
/// Proto3 field presence: default-valued fields are omitted. Known
/// fields come first in field order, then any preserved unknown fields
/// verbatim.
pub fn encode_message(header: &TonieHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + header.padding.len());

    if header.data_hash != [0u8; HASH_LEN] {
        wire::put_len_delimited(&mut out, F_DATA_HASH, &header.data_hash);
    }
    if header.data_length != 0 {
        wire::put_tag(&mut out, F_DATA_LENGTH, WIRE_VARINT);
        wire::put_varint(&mut out, header.data_length);
    }
    if header.timestamp != 0 {
        wire::put_tag(&mut out, F_TIMESTAMP, WIRE_VARINT);
        wire::put_varint(&mut out, u64::from(header.timestamp));
    }
    if !header.chapter_pages.is_empty() {
        let mut packed = Vec::with_capacity(header.chapter_pages.len() * 2);
        for &page in &header.chapter_pages {
            wire::put_varint(&mut packed, u64::from(page));
        }
        wire::put_len_delimited(&mut out, F_CHAPTER_PAGES, &packed);
    }
    if !header.padding.is_empty() {
        wire::put_len_delimited(&mut out, F_PADDING, &header.padding);
    }
    out.extend_from_slice(&header.unknown_fields);

    out
}

/// Check the header's hash and length claims against the payload.
///
/// Both checks always run; a combined [`IntegrityError`] reports every
/// mismatch in one call.
pub fn verify(header: &TonieHeader, payload: &[u8]) -> std::result::Result<(), IntegrityError> {
    let digest: [u8; HASH_LEN] = Sha1::digest(payload).into();
    check_integrity(header, digest, payload.len() as u64)
}

/// Integrity comparison against a precomputed digest and length.
///
/// Lets callers that stream the payload (hashing in chunks) share the
/// comparison logic with [`verify`].
pub fn check_integrity(
    header: &TonieHeader,
    actual_hash: [u8; HASH_LEN],
    actual_length: u64,
) -> std::result::Result<(), IntegrityError> {
    let hash = (actual_hash != header.data_hash).then(|| HashMismatch {
        expected: header.data_hash,
        actual: actual_hash,
    });
    let length = (actual_length != header.data_length).then_some(LengthMismatch {
        expected: header.data_length,
        actual: actual_length,
    });
    if hash.is_none() && length.is_none() {
        Ok(())
    } else {
        Err(IntegrityError { hash, length })
    }
}

/// Validate that chapter start pages are strictly increasing.
///
/// An empty sequence is valid (a file without chapter markers).
pub fn validate_chapter_pages(pages: &[u32]) -> Result<()> {
    for (index, window) in pages.windows(2).enumerate() {
        if window[1] <= window[0] {
            return Err(TonieError::NonMonotonicChapters {
                index: index + 1,
                value: window[1],
                previous: window[0],
            });
        }
    }
    Ok(())
}

/// Size a zero-filled padding field so `prefix + message` lands on a
/// `page_size` boundary.
///
/// The padding field's own tag and length bytes count against the
/// boundary, and the length varint grows with the padding, so the fit
/// is searched iteratively instead of computed in one shot. When the
/// shortfall is too small to hold even an empty padding field (or no
/// padding length lands exactly on it), the header grows by a whole
/// extra page.
pub fn pad_to_page(header: &mut TonieHeader, page_size: usize) {
    assert!(page_size > 0, "page size must be positive");

    header.padding.clear();
    let base = PREFIX_LEN + encode_message(header).len();
    let remainder = base % page_size;
    if remainder == 0 {
        return;
    }

    let mut shortfall = page_size - remainder;
    loop {
        if let Some(pad) = fit_padding(shortfall) {
            header.padding = vec![0u8; pad];
            debug_assert_eq!((PREFIX_LEN + encode_message(header).len()) % page_size, 0);
            return;
        }
        shortfall += page_size;
    }
}

/// Find a padding length whose encoded field (tag + length varint +
/// bytes) occupies exactly `shortfall` bytes, if one exists.
fn fit_padding(shortfall: usize) -> Option<usize> {
    let mut pad = shortfall.checked_sub(2)?;
    loop {
        let encoded = 1 + wire::varint_len(pad as u64) + pad;
        match encoded.cmp(&shortfall) {
            // Zero-length padding would be omitted on encode (proto3
            // default skipping), so it cannot fill anything.
            std::cmp::Ordering::Equal => return (pad > 0).then_some(pad),
            // Crossing a varint length boundary can skip the target.
            std::cmp::Ordering::Less => return None,
            std::cmp::Ordering::Greater => pad = pad.checked_sub(1)?,
        }
    }
}
