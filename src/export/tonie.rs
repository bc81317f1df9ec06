//! Compose a new Tonie container from selected chapters of an existing
//! one.
//!
//! Pages are renumbered from 0, granule positions are recomputed
//! cumulatively, the end-of-stream flag lands on the final page only,
//! and the payload is hashed while it is written. The header page is
//! written last, at offset 0, padded to exactly one page.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use sha1::{Digest, Sha1};
use tracing::info;

use crate::codec::{self, PAGE_SIZE};
use crate::error::TonieError;
use crate::model::header::{TonieHeader, HASH_LEN};
use crate::store::reader::TonieStore;

/// Outcome of a compose run.
#[derive(Debug)]
pub struct ComposeStats {
    /// Start pages of the chapters in the new container.
    pub chapter_pages: Vec<u32>,
    /// Payload bytes written (excluding the header page).
    pub payload_len: u64,
    /// Ogg pages written.
    pub page_count: u32,
}

/// Result of writing the page stream, before the header exists.
pub(crate) struct StreamStats {
    pub chapter_pages: Vec<u32>,
    pub payload_len: u64,
    pub page_count: u32,
    pub digest: [u8; HASH_LEN],
}

/// Write the pages of the selected chapters as a fresh Ogg stream.
///
/// The first two pages of the source (OpusHead and OpusTags) are
/// copied verbatim; when the first selected chapter is not chapter 0
/// they are prepended so the output still starts with a valid Opus
/// header. Every other page is rewritten with new page numbers and
/// granule positions.
pub(crate) fn write_stream<W: Write>(
    store: &TonieStore,
    chapters: &[usize],
    out: &mut W,
    progress: Option<&dyn Fn(usize, usize)>,
) -> anyhow::Result<StreamStats> {
    let mut hasher = Sha1::new();
    let mut chapter_pages = Vec::with_capacity(chapters.len());
    let mut granule: u64 = 0;
    let mut next_page_no: u32 = 0;
    let mut payload_len: u64 = 0;

    // Flatten the selection into one page-number list so the
    // end-of-stream flag can land on the true final page.
    let mut page_nums: Vec<usize> = Vec::new();
    for (i, &chapter) in chapters.iter().enumerate() {
        let range = store.chapter_page_range(chapter)?;
        // The chapter starts at the next page to be written; the first
        // entry stays 0 even when Opus header pages get prepended.
        chapter_pages.push(page_nums.len() as u32);
        if i == 0 && chapter > 0 {
            // Opus header pages plus the first audio page they share.
            page_nums.extend([0, 1, 2]);
        }
        page_nums.extend(range);
    }

    let total = page_nums.len();
    for (i, &page_num) in page_nums.iter().enumerate() {
        if let Some(cb) = progress {
            cb(i, total);
        }
        let page = store
            .pages()
            .get(page_num)
            .ok_or_else(|| TonieError::ExportError(format!("page {page_num} out of range")))?;

        let data = if page_num < 2 {
            // OpusHead / OpusTags pages keep their original numbering.
            page.serialize()
        } else {
            let is_last = i == total - 1;
            granule += page.duration();
            page.serialize_at(is_last, granule, next_page_no)
        };

        out.write_all(&data)?;
        hasher.update(&data);
        payload_len += data.len() as u64;
        next_page_no += 1;
    }
    if let Some(cb) = progress {
        cb(total, total);
    }

    Ok(StreamStats {
        chapter_pages,
        payload_len,
        page_count: next_page_no,
        digest: hasher.finalize().into(),
    })
}

/// Write a complete container with the given chapters to `out_path`.
///
/// A placeholder header page is written first so the payload streams
/// straight to its final position; the real header is built from the
/// accumulated hash and written back at offset 0.
pub fn compose_tonie(
    store: &TonieStore,
    chapters: &[usize],
    out_path: &Path,
    progress: Option<&dyn Fn(usize, usize)>,
) -> anyhow::Result<ComposeStats> {
    let file = File::create(out_path).map_err(|e| TonieError::io(out_path, e))?;
    let mut out = BufWriter::new(file);

    // Reserve the header page.
    out.write_all(&[0u8; PAGE_SIZE])?;

    let stats = write_stream(store, chapters, &mut out, progress)?;

    let mut header = TonieHeader::empty();
    header.data_hash = stats.digest;
    header.data_length = stats.payload_len;
    header.timestamp = store.header().timestamp;
    header.chapter_pages = stats.chapter_pages.clone();
    codec::validate_chapter_pages(&header.chapter_pages)?;
    codec::pad_to_page(&mut header, PAGE_SIZE);

    let encoded = codec::encode(&header);
    if encoded.len() != PAGE_SIZE {
        return Err(TonieError::ExportError(format!(
            "header page is {} bytes, expected {PAGE_SIZE}",
            encoded.len()
        ))
        .into());
    }

    let mut file = out.into_inner()?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&encoded)?;
    file.flush()?;

    info!(
        path = %out_path.display(),
        chapters = stats.chapter_pages.len(),
        pages = stats.page_count,
        payload = stats.payload_len,
        "Composed container"
    );

    Ok(ComposeStats {
        chapter_pages: stats.chapter_pages,
        payload_len: stats.payload_len,
        page_count: stats.page_count,
    })
}
