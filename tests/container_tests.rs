//! Integration tests over whole container files: open, verify, export,
//! skip and swap, with synthetic containers built in a temp directory.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tempfile::TempDir;

use tonieshell::codec::{self, PAGE_SIZE};
use tonieshell::error::TonieError;
use tonieshell::export;
use tonieshell::model::header::TonieHeader;
use tonieshell::model::page::{OggPage, FLAG_BOS, FLAG_EOS};
use tonieshell::parser::ogg::parse_pages;
use tonieshell::store::reader::TonieStore;

// ─── Fixture builders ────────────────────────────────────────────────

const SERIAL: u32 = 0x0000_5C31;

fn page(page_no: u32, header_type: u8, granule: u64, segments: Vec<Vec<u8>>) -> OggPage {
    let mut page = OggPage {
        version: 0,
        header_type,
        granule_position: granule,
        serial: SERIAL,
        page_no,
        checksum: 0,
        segments,
    };
    page.update_checksum();
    page
}

fn opus_head_page() -> OggPage {
    let mut packet = b"OpusHead".to_vec();
    packet.push(1); // version
    packet.push(2); // channels
    packet.extend_from_slice(&312u16.to_le_bytes()); // pre-skip
    packet.extend_from_slice(&48_000u32.to_le_bytes());
    packet.extend_from_slice(&0i16.to_le_bytes()); // output gain
    packet.push(0); // mapping family
    page(0, FLAG_BOS, 0, vec![packet])
}

fn opus_tags_page() -> OggPage {
    let mut packet = b"OpusTags".to_vec();
    packet.extend_from_slice(&4u32.to_le_bytes());
    packet.extend_from_slice(b"test");
    packet.extend_from_slice(&0u32.to_le_bytes()); // no comments
    page(1, 0, 0, vec![packet])
}

/// One full-size audio page: a single Opus packet laced so the page
/// serializes to exactly `PAGE_SIZE` bytes (27 header + 16 lacing
/// entries + 4053 data).
fn audio_page(page_no: u32, granule: u64, fill: u8) -> OggPage {
    let mut packet = vec![fill; 4053];
    packet[0] = 0xF8; // CELT 20 ms, mono, code 0 → 960 samples
    let segments: Vec<Vec<u8>> = packet.chunks(255).map(<[u8]>::to_vec).collect();
    let page = page(page_no, 0, granule, segments);
    assert_eq!(page.serialized_len(), PAGE_SIZE);
    page
}

/// Write a complete container with `audio_pages` full-size pages and
/// the given chapter table.
fn build_container(dir: &Path, audio_pages: u32, chapter_pages: Vec<u32>) -> PathBuf {
    let mut pages = vec![opus_head_page(), opus_tags_page()];
    for i in 0..audio_pages {
        let mut p = audio_page(2 + i, 960 * u64::from(i + 1), (i % 251) as u8);
        if i == audio_pages - 1 {
            p.header_type = FLAG_EOS;
            p.update_checksum();
        }
        pages.push(p);
    }

    let mut payload = Vec::new();
    for p in &pages {
        payload.extend_from_slice(&p.serialize());
    }

    let mut header = TonieHeader::empty();
    header.data_hash = Sha1::digest(&payload).into();
    header.data_length = payload.len() as u64;
    header.timestamp = 1_688_000_000;
    header.chapter_pages = chapter_pages;
    codec::pad_to_page(&mut header, PAGE_SIZE);

    let mut bytes = codec::encode(&header);
    assert_eq!(bytes.len(), PAGE_SIZE, "header page must fill one page");
    bytes.extend_from_slice(&payload);

    let path = dir.join("500304E0");
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A small standalone Ogg Opus stream (pages of arbitrary size), as a
/// swap source would be.
fn build_source_ogg(audio_pages: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&opus_head_page().serialize());
    bytes.extend_from_slice(&opus_tags_page().serialize());
    for i in 0..audio_pages {
        // Two small packets per page, 960 samples each.
        let mut a = vec![0x11u8; 90];
        a[0] = 0xF8;
        let mut b = vec![0x22u8; 140];
        b[0] = 0xF8;
        let mut p = page(2 + i, 0, 1920 * u64::from(i + 1), vec![a, b]);
        if i == audio_pages - 1 {
            p.header_type = FLAG_EOS;
            p.update_checksum();
        }
        bytes.extend_from_slice(&p.serialize());
    }
    bytes
}

// ─── Test 1: Open parses header and pages ────────────────────────────

#[test]
fn test_open_parses_header_and_pages() {
    let dir = TempDir::new().unwrap();
    let path = build_container(dir.path(), 4, vec![0, 4]);

    let store = TonieStore::open(&path).unwrap();
    assert_eq!(store.payload_offset(), PAGE_SIZE as u64);
    assert_eq!(store.pages().len(), 6);
    assert_eq!(store.header().chapter_count(), 2);
    assert_eq!(store.header().timestamp, 1_688_000_000);

    // Chapter 0 spans the Opus headers and the first two audio pages.
    assert_eq!(store.chapter_page_range(0).unwrap(), 0..4);
    assert_eq!(store.chapter_page_range(1).unwrap(), 4..6);
    assert!(matches!(
        store.chapter_page_range(2),
        Err(TonieError::NoSuchChapter { requested: 2, .. })
    ));
}

// ─── Test 2: Missing file maps to FileNotFound ───────────────────────

#[test]
fn test_open_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = TonieStore::open(dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, TonieError::FileNotFound(_)));
}

// ─── Test 3: Streaming verification matches the header ───────────────

#[test]
fn test_verify_payload_ok_and_corrupted() {
    let dir = TempDir::new().unwrap();
    let path = build_container(dir.path(), 3, vec![0]);

    let store = TonieStore::open(&path).unwrap();
    store.verify_payload().unwrap();

    // Flip the last payload byte on disk; the hash fails, the length
    // still matches.
    let mut bytes = std::fs::read(&path).unwrap();
    *bytes.last_mut().unwrap() ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    match store.verify_payload().unwrap_err() {
        TonieError::Integrity(e) => {
            assert!(e.hash.is_some());
            assert!(e.length.is_none());
        }
        other => panic!("expected integrity error, got {other:?}"),
    }

    // Appending a byte fails both checks at once.
    bytes.push(0);
    std::fs::write(&path, &bytes).unwrap();
    match store.verify_payload().unwrap_err() {
        TonieError::Integrity(e) => {
            assert!(e.hash.is_some());
            assert!(e.length.is_some());
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

// ─── Test 4: Chapter export yields standalone Ogg streams ────────────

#[test]
fn test_export_chapters() {
    let dir = TempDir::new().unwrap();
    let path = build_container(dir.path(), 4, vec![0, 4]);
    let store = TonieStore::open(&path).unwrap();

    let out_dir = dir.path().join("out");
    let paths = export::ogg::export_all_chapters(&store, &out_dir, None).unwrap();
    assert_eq!(paths.len(), 2);
    assert!(paths[0].ends_with("chapter000.ogg"));
    assert!(paths[1].ends_with("chapter001.ogg"));

    for path in &paths {
        let bytes = std::fs::read(path).unwrap();
        let pages = parse_pages(&mut Cursor::new(&bytes), 0).unwrap();
        // Starts with OpusHead, ends with an end-of-stream page.
        assert!(pages[0].segments[0].starts_with(b"OpusHead"));
        assert_eq!(
            pages.last().unwrap().header_type & FLAG_EOS,
            FLAG_EOS,
            "{}",
            path.display()
        );
        // Page numbers are contiguous from 0.
        for (i, p) in pages.iter().enumerate() {
            assert_eq!(p.page_no as usize, i);
        }
    }
}

// ─── Test 5: Skip rewrites a container with fewer chapters ───────────

#[test]
fn test_skip_keeps_selected_chapters() {
    let dir = TempDir::new().unwrap();
    let path = build_container(dir.path(), 5, vec![0, 3, 5]);
    let store = TonieStore::open(&path).unwrap();

    let out = dir.path().join("skipped");
    let stats = export::tonie::compose_tonie(&store, &[1], &out, None).unwrap();
    assert_eq!(stats.chapter_pages, vec![0]);

    let rewritten = TonieStore::open(&out).unwrap();
    rewritten.verify_payload().unwrap();
    assert_eq!(rewritten.header().chapter_count(), 1);
    // Opus headers were prepended: pages 0..3 plus chapter 1's 2 pages.
    assert_eq!(rewritten.pages().len(), 5);
    // The original timestamp is carried over.
    assert_eq!(rewritten.header().timestamp, store.header().timestamp);
}

// ─── Test 6: Composed output still opens and verifies after reorder ──

#[test]
fn test_skip_reorders_chapters() {
    let dir = TempDir::new().unwrap();
    let path = build_container(dir.path(), 6, vec![0, 4, 6]);
    let store = TonieStore::open(&path).unwrap();

    let out = dir.path().join("reordered");
    let stats = export::tonie::compose_tonie(&store, &[2, 1], &out, None).unwrap();
    assert_eq!(stats.chapter_pages.len(), 2);

    let rewritten = TonieStore::open(&out).unwrap();
    rewritten.verify_payload().unwrap();
    assert_eq!(rewritten.header().chapter_count(), 2);
}

// ─── Test 7: Swap appends repacked chapters on the page grid ─────────

#[test]
fn test_swap_appends_and_composes() {
    let dir = TempDir::new().unwrap();
    let path = build_container(dir.path(), 2, vec![0]);
    let mut store = TonieStore::open(&path).unwrap();

    let source = build_source_ogg(3);
    let chapter =
        export::append::append_chapter(&mut store, &mut Cursor::new(&source)).unwrap();
    assert_eq!(chapter, 1);
    assert_eq!(store.header().chapter_pages, vec![0, 4]);

    // Every payload page after the Opus headers sits on the page grid.
    for p in &store.pages()[2..] {
        assert_eq!(p.serialized_len(), PAGE_SIZE, "page {}", p.page_no);
    }

    let out = dir.path().join("swapped");
    export::tonie::compose_tonie(&store, &[0, chapter], &out, None).unwrap();

    let rewritten = TonieStore::open(&out).unwrap();
    rewritten.verify_payload().unwrap();
    assert_eq!(rewritten.header().chapter_count(), 2);

    // The appended audio survived the repack: the audio pages' total
    // duration covers both the original packets (2 × 960) and the
    // source packets (3 pages × 2 packets × 960).
    let total: u64 = rewritten.pages()[2..].iter().map(OggPage::duration).sum();
    assert_eq!(total, 2 * 960 + 6 * 960);
}

// ─── Test 8: Truncated container reports TruncatedInput ──────────────

#[test]
fn test_open_truncated_header() {
    let dir = TempDir::new().unwrap();
    let path = build_container(dir.path(), 1, vec![0]);

    let bytes = std::fs::read(&path).unwrap();
    let short = dir.path().join("short");
    std::fs::write(&short, &bytes[..100]).unwrap();

    let err = TonieStore::open(&short).unwrap_err();
    assert!(matches!(err, TonieError::TruncatedInput { .. }));
}
