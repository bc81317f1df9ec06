//! Append an Ogg Opus file as a new chapter.
//!
//! Tonie payloads keep every Ogg page at exactly [`PAGE_SIZE`] bytes,
//! so appended audio cannot be copied page-for-page: the source
//! stream's packets are reassembled and repacked into the fixed page
//! grid. The final packet of each page is padded out with Opus padding
//! (RFC 6716 §3.2.5) so the page serializes to exactly one page size.
//!
//! The last page of the existing stream is popped and repacked along
//! with the new audio, mirroring how the firmware's own writer leaves
//! that page padded short of content.

use std::collections::VecDeque;
use std::io::Read;

use tracing::debug;

use crate::codec::PAGE_SIZE;
use crate::error::{Result, TonieError};
use crate::model::page::{OggPage, OGG_MAGIC, PAGE_HEADER_LEN};
use crate::parser::ogg::parse_pages;
use crate::store::reader::TonieStore;

/// Fixed per-page overhead: capture pattern plus header.
const PAGE_OVERHEAD: usize = OGG_MAGIC.len() + PAGE_HEADER_LEN;

/// Maximum lacing entries per page (RFC 3533).
const MAX_SEGMENTS: usize = 255;

/// Append the packets of an Ogg Opus stream as a new chapter.
///
/// The first two source pages (OpusHead, OpusTags) are skipped; the
/// container already carries its own. Returns the new chapter's index.
pub fn append_chapter(store: &mut TonieStore, source: &mut impl Read) -> Result<usize> {
    let src_pages = parse_pages(source, 0)?;
    if src_pages.len() < 3 {
        return Err(TonieError::ExportError(
            "source Ogg stream has no audio pages after OpusHead/OpusTags".into(),
        ));
    }

    let chapter = store.header().chapter_count();
    let chapter_start = store.pages().len() as u32;
    store.header_mut().chapter_pages.push(chapter_start);

    // Repack the existing final page together with the new audio: its
    // padding is reclaimed and the new chapter begins right after it.
    let popped = store
        .pages_mut()
        .pop()
        .ok_or_else(|| TonieError::ExportError("container has no audio pages".into()))?;
    let template = store
        .pages()
        .last()
        .cloned()
        .unwrap_or_else(|| popped.clone());
    let mut next_page_no = store.pages().len() as u32;
    let mut granule = template.granule_position;

    let mut queue: VecDeque<Vec<u8>> = collect_packets(std::slice::from_ref(&popped))
        .into_iter()
        .chain(collect_packets(&src_pages[2..]))
        .collect();

    let mut current: Vec<Vec<u8>> = Vec::new();
    while let Some(packet) = queue.pop_front() {
        let cost = packet_cost(packet.len());
        if PAGE_OVERHEAD + cost > PAGE_SIZE {
            return Err(TonieError::OpusRepack(format!(
                "packet of {} bytes does not fit a single page",
                packet.len()
            )));
        }

        let page_full = PAGE_OVERHEAD + page_cost(&current) + cost > PAGE_SIZE
            || lacing_entries(&current) + lacing_count(packet.len()) > MAX_SEGMENTS;

        if !current.is_empty() && page_full {
            queue.push_front(packet);
            let deferred = flush_page(store, &mut current, &template, &mut granule, &mut next_page_no)?;
            for d in deferred.into_iter().rev() {
                queue.push_front(d);
            }
            continue;
        }
        current.push(packet);
    }

    // Pad out the trailing page(s) as well; the container format keeps
    // every payload page on the grid.
    while !current.is_empty() {
        current = flush_page(store, &mut current, &template, &mut granule, &mut next_page_no)?;
    }

    debug!(
        chapter,
        start_page = chapter_start,
        pages = store.pages().len(),
        "Appended chapter"
    );

    Ok(chapter)
}

/// Reassemble packets from laced pages. A packet ends at the first
/// segment shorter than 255 bytes, continuing across page boundaries.
fn collect_packets(pages: &[OggPage]) -> Vec<Vec<u8>> {
    let mut packets: Vec<Vec<u8>> = Vec::new();
    let mut open = false;
    for page in pages {
        for segment in &page.segments {
            if !open {
                packets.push(Vec::new());
            }
            packets
                .last_mut()
                .expect("packet pushed when not open")
                .extend_from_slice(segment);
            open = segment.len() == 255;
        }
    }
    packets.retain(|p| !p.is_empty());
    packets
}

/// Lacing entries needed for a packet of `len` bytes, including the
/// zero-length terminator when the length is an exact 255 multiple.
fn lacing_count(len: usize) -> usize {
    len / 255 + 1
}

/// Bytes a packet contributes to a page: data plus lacing entries.
fn packet_cost(len: usize) -> usize {
    len + lacing_count(len)
}

fn page_cost(packets: &[Vec<u8>]) -> usize {
    packets.iter().map(|p| packet_cost(p.len())).sum()
}

fn lacing_entries(packets: &[Vec<u8>]) -> usize {
    packets.iter().map(|p| lacing_count(p.len())).sum()
}

/// Close out the current page: pad its final packet so the page
/// serializes to exactly [`PAGE_SIZE`], build the page and push it
/// into the store.
///
/// When no padding length lands exactly on the boundary (lacing
/// crossings make some sizes unreachable), trailing packets are
/// deferred to the next page and the fit is retried; the deferred
/// packets are returned in their original order.
fn flush_page(
    store: &mut TonieStore,
    current: &mut Vec<Vec<u8>>,
    template: &OggPage,
    granule: &mut u64,
    next_page_no: &mut u32,
) -> Result<Vec<Vec<u8>>> {
    let mut deferred: Vec<Vec<u8>> = Vec::new();

    loop {
        let last = match current.last() {
            Some(last) => last,
            None => {
                return Err(TonieError::OpusRepack(
                    "no packet combination fills the page exactly".into(),
                ));
            }
        };
        let others_cost = page_cost(&current[..current.len() - 1]);
        let others_entries = lacing_entries(&current[..current.len() - 1]);
        let budget = PAGE_SIZE - PAGE_OVERHEAD - others_cost;

        if let Some(target) = fit_packet_len(budget) {
            if target >= last.len() && others_entries + lacing_count(target) <= MAX_SEGMENTS {
                match pad_packet_to(last, target) {
                    Ok(padded) => {
                        *current.last_mut().expect("checked non-empty") = padded;
                        let page = build_page(template, current, *next_page_no, granule);
                        debug_assert_eq!(page.serialized_len(), PAGE_SIZE);
                        store.pages_mut().push(page);
                        *next_page_no += 1;
                        current.clear();
                        deferred.reverse();
                        return Ok(deferred);
                    }
                    // Already-padded packets cannot be padded further;
                    // defer and pad an earlier one instead.
                    Err(TonieError::OpusRepack(_)) if current.len() > 1 => {}
                    Err(e) => return Err(e),
                }
            }
        }
        deferred.push(current.pop().expect("checked non-empty"));
    }
}

/// Find the packet length whose cost (data + lacing) equals `budget`.
///
/// `cost` is strictly increasing in the length but skips one value at
/// every 255-byte lacing crossing, so some budgets have no solution.
fn fit_packet_len(budget: usize) -> Option<usize> {
    let mut len = budget.saturating_sub(1);
    loop {
        let cost = packet_cost(len);
        if cost == budget {
            return Some(len);
        }
        if cost < budget || len == 0 {
            return None;
        }
        len -= 1;
    }
}

/// Grow an Opus packet to exactly `target` bytes via RFC 6716 §3.2.5
/// padding.
///
/// Code 0–2 packets are first rewritten as code 3 (the only code that
/// carries a padding flag); the padding-length bytes go right after
/// the frame-count byte, before any VBR frame lengths.
fn pad_packet_to(packet: &[u8], target: usize) -> Result<Vec<u8>> {
    if packet.is_empty() {
        return Err(TonieError::OpusRepack("empty packet".into()));
    }
    if target == packet.len() {
        return Ok(packet.to_vec());
    }
    if target < packet.len() {
        return Err(TonieError::OpusRepack(format!(
            "target {target} smaller than packet ({} bytes)",
            packet.len()
        )));
    }

    let toc = packet[0];
    let mut out = Vec::with_capacity(target);
    match toc & 0x3 {
        3 => {
            let fcb = *packet.get(1).ok_or_else(|| {
                TonieError::OpusRepack("code 3 packet without frame count byte".into())
            })?;
            if fcb & 0x40 != 0 {
                return Err(TonieError::OpusRepack(
                    "packet already carries padding".into(),
                ));
            }
            out.extend_from_slice(packet);
        }
        code => {
            // Rewrite as code 3: CBR one frame, CBR two frames, or VBR
            // two frames (the existing frame-1 length byte stays put
            // and becomes the VBR length).
            let fcb: u8 = match code {
                0 => 1,
                1 => 2,
                _ => 0x80 | 2,
            };
            out.push(toc | 0x3);
            out.push(fcb);
            out.extend_from_slice(&packet[1..]);
        }
    }

    let extra = target - out.len();
    if extra == 0 {
        return Ok(out);
    }

    // Padding flag plus length bytes: each 255 marks 254 zeros and
    // another length byte; the final byte gives the remaining zeros.
    out[1] |= 0x40;
    let mut indicators: Vec<u8> = Vec::new();
    let mut zeros = 0usize;
    let mut remaining = extra;
    while remaining > 255 {
        indicators.push(255);
        zeros += 254;
        remaining -= 255;
    }
    indicators.push((remaining - 1) as u8);
    zeros += remaining - 1;

    out.splice(2..2, indicators);
    out.resize(out.len() + zeros, 0);

    debug_assert_eq!(out.len(), target);
    Ok(out)
}

/// Lace a packet into 255-byte segments, terminator included.
fn lace(packet: &[u8]) -> Vec<Vec<u8>> {
    let mut segments: Vec<Vec<u8>> = packet.chunks(255).map(<[u8]>::to_vec).collect();
    if segments.last().is_none_or(|s| s.len() == 255) {
        segments.push(Vec::new());
    }
    segments
}

/// Assemble a page from whole packets, advancing the granule position
/// by the page's duration.
fn build_page(template: &OggPage, packets: &[Vec<u8>], page_no: u32, granule: &mut u64) -> OggPage {
    let mut segments = Vec::new();
    for packet in packets {
        segments.extend(lace(packet));
    }
    let mut page = OggPage {
        version: template.version,
        header_type: 0,
        granule_position: 0,
        serial: template.serial,
        page_no,
        checksum: 0,
        segments,
    };
    *granule += page.duration();
    page.granule_position = *granule;
    page.update_checksum();
    page
}
