//! Streaming Ogg page parser.
//!
//! Reads pages sequentially from any `Read` source without loading the
//! whole stream at once (RFC 3533 §6). Tolerant of out-of-sequence page
//! numbers (logs a warning); strict about the capture pattern and
//! truncated pages.

use std::io::Read;

use tracing::warn;

use crate::error::{Result, TonieError};
use crate::model::page::{OggPage, OGG_MAGIC, PAGE_HEADER_LEN};

/// Parse every Ogg page until EOF.
///
/// `base_offset` is the byte position of the reader within the
/// underlying file, used only for error reporting (the payload starts
/// after the header page, not at offset 0).
pub fn parse_pages<R: Read>(reader: &mut R, base_offset: u64) -> Result<Vec<OggPage>> {
    let mut pages: Vec<OggPage> = Vec::new();
    let mut offset = base_offset;

    loop {
        let mut magic = [0u8; 4];
        match read_full(reader, &mut magic)? {
            0 => break, // clean EOF at a page boundary
            4 => {}
            n => {
                return Err(TonieError::InvalidOgg {
                    offset,
                    reason: format!("stream ends {n} bytes into a page capture pattern"),
                });
            }
        }
        if &magic != OGG_MAGIC {
            return Err(TonieError::InvalidOgg {
                offset,
                reason: format!("expected 'OggS', found {magic:02X?}"),
            });
        }

        let mut header = [0u8; PAGE_HEADER_LEN];
        read_exact_at(reader, &mut header, offset, "page header")?;
        let (mut page, segment_count) = OggPage::from_header_bytes(&header);

        if page.page_no as usize != pages.len() {
            warn!(
                offset,
                page_no = page.page_no,
                expected = pages.len(),
                "Ogg page number out of sequence"
            );
        }

        let mut lacing = vec![0u8; segment_count as usize];
        read_exact_at(reader, &mut lacing, offset, "segment table")?;

        page.segments.reserve(lacing.len());
        for &length in &lacing {
            let mut segment = vec![0u8; length as usize];
            read_exact_at(reader, &mut segment, offset, "segment data")?;
            page.segments.push(segment);
        }

        offset += page.serialized_len() as u64;
        pages.push(page);
    }

    Ok(pages)
}

/// Read as many bytes as fit in `buf`, returning the count (short only
/// at EOF).
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// `read_exact` that reports a truncated page as a format error
/// instead of a bare I/O error.
fn read_exact_at<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64, what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TonieError::InvalidOgg {
                offset,
                reason: format!("stream truncated inside {what}"),
            }
        } else {
            e.into()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::page::FLAG_BOS;

    fn make_page(page_no: u32, segments: Vec<Vec<u8>>) -> OggPage {
        let mut page = OggPage {
            version: 0,
            header_type: if page_no == 0 { FLAG_BOS } else { 0 },
            granule_position: 0,
            serial: 42,
            page_no,
            checksum: 0,
            segments,
        };
        page.update_checksum();
        page
    }

    #[test]
    fn test_parse_two_pages() {
        let first = make_page(0, vec![b"OpusHead".to_vec()]);
        let second = make_page(1, vec![vec![0xF8, 0x00], vec![]]);
        let mut stream = first.serialize();
        stream.extend_from_slice(&second.serialize());

        let pages = parse_pages(&mut stream.as_slice(), 0).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], first);
        assert_eq!(pages[1], second);
    }

    #[test]
    fn test_empty_stream_is_zero_pages() {
        let pages = parse_pages(&mut [].as_slice(), 0).unwrap();
        assert!(pages.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let err = parse_pages(&mut b"RIFF....".as_slice(), 0).unwrap_err();
        assert!(matches!(err, TonieError::InvalidOgg { .. }));
    }

    #[test]
    fn test_truncated_page() {
        let page = make_page(0, vec![vec![1, 2, 3]]);
        let bytes = page.serialize();
        let err = parse_pages(&mut &bytes[..bytes.len() - 2], 0).unwrap_err();
        assert!(matches!(err, TonieError::InvalidOgg { .. }));
    }

    #[test]
    fn test_zero_length_segments_roundtrip() {
        // A packet ending exactly at 255 bytes needs a 0-length
        // terminator segment; it must survive parsing untouched.
        let page = make_page(0, vec![vec![0xF8; 255], vec![]]);
        let bytes = page.serialize();
        let pages = parse_pages(&mut bytes.as_slice(), 0).unwrap();
        assert_eq!(pages[0].segments.len(), 2);
        assert_eq!(pages[0].serialize(), bytes);
    }
}
