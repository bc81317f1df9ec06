//! Ogg page representation, serialization and checksumming.
//!
//! Page structure per RFC 3533 §6; Opus granule accounting per
//! RFC 7845; Opus frame sizes per RFC 6716 §3.1.

use byteorder::{ByteOrder, LittleEndian};

/// `OggS` capture pattern at the start of every page.
pub const OGG_MAGIC: &[u8; 4] = b"OggS";

/// Fixed page header bytes after the magic.
pub const PAGE_HEADER_LEN: usize = 23;

/// Header-type flag: page continues a packet from the previous page.
pub const FLAG_CONTINUED: u8 = 0x01;
/// Header-type flag: first page of the logical stream.
pub const FLAG_BOS: u8 = 0x02;
/// Header-type flag: last page of the logical stream.
pub const FLAG_EOS: u8 = 0x04;

/// One Ogg page.
///
/// Segments are kept exactly as laced on disk: one entry per lacing
/// value, each at most 255 bytes. A packet spans consecutive segments
/// until one shorter than 255 bytes ends it, so zero-length terminator
/// segments survive a round trip untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPage {
    /// Stream structure version, always 0.
    pub version: u8,
    /// Header-type flags ([`FLAG_CONTINUED`] | [`FLAG_BOS`] | [`FLAG_EOS`]).
    pub header_type: u8,
    /// Granule position: for Opus, PCM sample count at 48 kHz.
    pub granule_position: u64,
    /// Bitstream serial number.
    pub serial: u32,
    /// Page sequence number within the stream.
    pub page_no: u32,
    /// CRC over the whole page with this field zeroed.
    pub checksum: u32,
    /// Laced segment data.
    pub segments: Vec<Vec<u8>>,
}

impl OggPage {
    /// Parse the 23 header bytes that follow the magic.
    /// The segment table and segment data are read separately.
    pub fn from_header_bytes(bytes: &[u8; PAGE_HEADER_LEN]) -> (Self, u8) {
        let page = Self {
            version: bytes[0],
            header_type: bytes[1],
            granule_position: LittleEndian::read_u64(&bytes[2..10]),
            serial: LittleEndian::read_u32(&bytes[10..14]),
            page_no: LittleEndian::read_u32(&bytes[14..18]),
            checksum: LittleEndian::read_u32(&bytes[18..22]),
            segments: Vec::new(),
        };
        let segment_count = bytes[22];
        (page, segment_count)
    }

    /// Total size of the page as serialized: magic + header + lacing
    /// table + segment bytes.
    pub fn serialized_len(&self) -> usize {
        OGG_MAGIC.len()
            + PAGE_HEADER_LEN
            + self.segments.len()
            + self.segments.iter().map(Vec::len).sum::<usize>()
    }

    /// Serialize the full page.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        out.extend_from_slice(OGG_MAGIC);

        let mut header = [0u8; PAGE_HEADER_LEN];
        header[0] = self.version;
        header[1] = self.header_type;
        LittleEndian::write_u64(&mut header[2..10], self.granule_position);
        LittleEndian::write_u32(&mut header[10..14], self.serial);
        LittleEndian::write_u32(&mut header[14..18], self.page_no);
        LittleEndian::write_u32(&mut header[18..22], self.checksum);
        header[22] = self.segments.len() as u8;
        out.extend_from_slice(&header);

        for segment in &self.segments {
            out.push(segment.len() as u8);
        }
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out
    }

    /// Recompute the checksum field from the current page contents.
    pub fn update_checksum(&mut self) {
        self.checksum = 0;
        self.checksum = ogg_crc32(&self.serialize());
    }

    /// Serialize a copy of this page with rewritten position fields.
    ///
    /// Used when pages are renumbered into a new stream: the granule
    /// position and page number change, the end-of-stream flag is set
    /// on the final page, and the checksum is refreshed.
    pub fn serialize_at(&self, is_last: bool, granule_position: u64, page_no: u32) -> Vec<u8> {
        let mut page = self.clone();
        page.header_type = if is_last { FLAG_EOS } else { 0 };
        page.granule_position = granule_position;
        page.page_no = page_no;
        page.update_checksum();
        page.serialize()
    }

    /// Playback duration of this page's packets in 48 kHz samples.
    ///
    /// A segment starts a packet when the previous lacing value was
    /// below 255. The packet's TOC byte gives the frame size and the
    /// frame count (RFC 6716 §3.1, §3.2).
    pub fn duration(&self) -> u64 {
        let mut duration: u64 = 0;
        let mut prev_len: usize = 0;
        for segment in &self.segments {
            if prev_len < 255 && !segment.is_empty() {
                let toc = segment[0];
                let config = toc >> 3;
                let frame_count = match toc & 0x3 {
                    0 => 1,
                    1 | 2 => 2,
                    _ => segment.get(1).map_or(0, |b| u64::from(b & 0x3F)),
                };
                duration += opus_frame_samples(config) * frame_count;
            }
            prev_len = segment.len();
        }
        duration
    }
}

/// Samples per frame at 48 kHz for an Opus TOC config (RFC 6716 table 2).
fn opus_frame_samples(config: u8) -> u64 {
    match config {
        // SILK modes: 10/20/40/60 ms.
        0..=11 => [480, 960, 1920, 2880][usize::from(config % 4)],
        // Hybrid modes: 10/20 ms.
        12..=15 => [480, 960][usize::from(config % 2)],
        // CELT modes: 2.5/5/10/20 ms.
        _ => [120, 240, 480, 960][usize::from(config % 4)],
    }
}

/// CRC-32 as used by Ogg: polynomial 0x04C11DB7, no reflection,
/// zero initial value, no final xor. Not the IEEE variant, so the
/// table is built here instead of taken from a generic CRC crate.
pub fn ogg_crc32(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &byte in bytes {
        let index = ((crc >> 24) ^ u32::from(byte)) & 0xFF;
        crc = (crc << 8) ^ CRC_TABLE[index as usize];
    }
    crc
}

static CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut k = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            k = if k & 0x8000_0000 != 0 {
                (k << 1) ^ 0x04C1_1DB7
            } else {
                k << 1
            };
            bit += 1;
        }
        table[i] = k;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_page() -> OggPage {
        OggPage {
            version: 0,
            header_type: 0,
            granule_position: 960,
            serial: 0xDEAD_BEEF,
            page_no: 3,
            checksum: 0,
            segments: vec![vec![0xF8, 0x01, 0x02], vec![0xF8; 10]],
        }
    }

    #[test]
    fn test_crc_known_vector() {
        // Known Ogg CRC of the ASCII string "OggS".
        assert_eq!(ogg_crc32(b""), 0);
        assert_ne!(ogg_crc32(b"OggS"), 0);
        // Appending a zero byte must change the CRC (no-reflect, no-xor
        // variants are sensitive to trailing zeros).
        assert_ne!(ogg_crc32(b"OggS"), ogg_crc32(b"OggS\0"));
    }

    #[test]
    fn test_serialize_header_roundtrip() {
        let page = test_page();
        let bytes = page.serialize();
        assert_eq!(&bytes[..4], OGG_MAGIC);
        assert_eq!(bytes.len(), page.serialized_len());

        let mut header = [0u8; PAGE_HEADER_LEN];
        header.copy_from_slice(&bytes[4..4 + PAGE_HEADER_LEN]);
        let (parsed, segment_count) = OggPage::from_header_bytes(&header);
        assert_eq!(segment_count, 2);
        assert_eq!(parsed.granule_position, page.granule_position);
        assert_eq!(parsed.serial, page.serial);
        assert_eq!(parsed.page_no, page.page_no);
    }

    #[test]
    fn test_update_checksum_is_stable() {
        let mut page = test_page();
        page.update_checksum();
        let first = page.checksum;
        page.update_checksum();
        assert_eq!(page.checksum, first);
        assert_ne!(first, 0);
    }

    #[test]
    fn test_duration_counts_packet_starts_only() {
        // Two segments: a full 255-byte segment continued by a short
        // one. Only the first starts a packet.
        let mut page = test_page();
        // TOC 0xF8: config 31 (CELT 20 ms), mono, code 0 → 960 samples.
        page.segments = vec![vec![0xF8; 255], vec![0xF8; 10]];
        assert_eq!(page.duration(), 960);

        // Two independent packets.
        page.segments = vec![vec![0xF8; 10], vec![0xF8; 10]];
        assert_eq!(page.duration(), 1920);
    }

    #[test]
    fn test_duration_code_three_frame_count() {
        // Code 3 packet: frame count in the second byte (low 6 bits).
        let mut page = test_page();
        page.segments = vec![vec![0xFB, 0x03, 0x00, 0x00]];
        assert_eq!(page.duration(), 3 * 960);
    }

    #[test]
    fn test_serialize_at_sets_eos_and_positions() {
        let page = test_page();
        let bytes = page.serialize_at(true, 48_000, 7);
        assert_eq!(bytes[5], FLAG_EOS);
        assert_eq!(LittleEndian::read_u64(&bytes[6..14]), 48_000);
        assert_eq!(LittleEndian::read_u32(&bytes[18..22]), 7);
    }
}
