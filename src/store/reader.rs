//! Tonie container store: opens a file, decodes the header page and
//! enumerates the Ogg pages that follow.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::codec;
use crate::error::{Result, TonieError};
use crate::model::header::{TonieHeader, HASH_LEN};
use crate::model::page::OggPage;
use crate::parser::ogg;

/// Read buffer for sequential page parsing (1 MB for fast sequential
/// reads on modern SSDs and SD card readers).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Chunk size for the streaming payload hash.
const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// A fully parsed Tonie container.
///
/// The header and the page table are held in memory; the streaming
/// verification re-reads the payload from disk so a multi-hundred-MB
/// container is never hashed from a second in-memory copy.
#[derive(Debug)]
pub struct TonieStore {
    path: PathBuf,
    header: TonieHeader,
    payload_offset: u64,
    pages: Vec<OggPage>,
}

impl TonieStore {
    /// Open and parse a container file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TonieError::FileNotFound(path.clone())
            } else {
                TonieError::io(&path, e)
            }
        })?;

        let file = File::open(&path).map_err(|e| TonieError::io(&path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut prefix = [0u8; codec::PREFIX_LEN];
        read_header_bytes(&mut reader, &mut prefix, 0)?;
        let message_len = BigEndian::read_u32(&prefix) as usize;

        let mut message = vec![0u8; message_len];
        read_header_bytes(&mut reader, &mut message, codec::PREFIX_LEN)?;
        let header = codec::decode_message(&message)?;

        let payload_offset = (codec::PREFIX_LEN + message_len) as u64;
        let pages = ogg::parse_pages(&mut reader, payload_offset)?;

        debug!(
            path = %path.display(),
            file_size = metadata.len(),
            chapters = header.chapter_count(),
            pages = pages.len(),
            "Opened Tonie container"
        );

        Ok(Self {
            path,
            header,
            payload_offset,
            pages,
        })
    }

    /// Path to the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded container header.
    pub fn header(&self) -> &TonieHeader {
        &self.header
    }

    /// Mutable header access for container rewriting.
    pub fn header_mut(&mut self) -> &mut TonieHeader {
        &mut self.header
    }

    /// The parsed Ogg pages of the payload, in stream order.
    pub fn pages(&self) -> &[OggPage] {
        &self.pages
    }

    /// Mutable page access for container rewriting.
    pub fn pages_mut(&mut self) -> &mut Vec<OggPage> {
        &mut self.pages
    }

    /// Byte offset at which the payload begins (`4 + L`).
    pub fn payload_offset(&self) -> u64 {
        self.payload_offset
    }

    /// Page indices belonging to a chapter: from its start page up to
    /// the next chapter's start page (or the end of the stream).
    pub fn chapter_page_range(&self, chapter: usize) -> Result<std::ops::Range<usize>> {
        let starts = &self.header.chapter_pages;
        let start = *starts.get(chapter).ok_or(TonieError::NoSuchChapter {
            requested: chapter,
            available: starts.len(),
        })? as usize;
        let end = starts
            .get(chapter + 1)
            .map_or(self.pages.len(), |&p| p as usize);
        Ok(start..end.min(self.pages.len()))
    }

    /// Verify the header's hash and length claims against the payload,
    /// streaming the file in chunks.
    ///
    /// Both checks run and every mismatch is reported together, via
    /// [`codec::check_integrity`].
    pub fn verify_payload(&self) -> Result<()> {
        let mut file = File::open(&self.path).map_err(|e| TonieError::io(&self.path, e))?;
        file.seek(SeekFrom::Start(self.payload_offset))
            .map_err(|e| TonieError::io(&self.path, e))?;

        let mut hasher = Sha1::new();
        let mut length: u64 = 0;
        let mut chunk = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file
                .read(&mut chunk)
                .map_err(|e| TonieError::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            length += n as u64;
        }

        let digest: [u8; HASH_LEN] = hasher.finalize().into();
        codec::check_integrity(&self.header, digest, length)?;
        Ok(())
    }
}

/// `read_exact` for the header page, reporting EOF as `TruncatedInput`
/// so a cut-off file surfaces as a format error rather than bare I/O.
fn read_header_bytes<R: Read>(reader: &mut R, buf: &mut [u8], offset: usize) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TonieError::TruncatedInput {
                needed: offset + buf.len(),
                available: offset,
            }
        } else {
            e.into()
        }
    })
}
