//! Export chapters as standalone Ogg Opus files.
//!
//! A chapter export is the compose path without the Tonie header: the
//! Opus header pages followed by the chapter's audio pages, renumbered
//! into a self-contained stream.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::TonieError;
use crate::export::tonie::write_stream;
use crate::store::reader::TonieStore;

/// Export a single chapter as an `.ogg` file.
///
/// Returns the path of the created file.
pub fn export_chapter(
    store: &TonieStore,
    chapter: usize,
    output_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let path = output_dir.join(chapter_filename(chapter));
    let file = File::create(&path).map_err(|e| TonieError::io(&path, e))?;
    let mut out = BufWriter::new(file);

    write_stream(store, &[chapter], &mut out, None)?;

    Ok(path)
}

/// Export every chapter of the container into `output_dir`.
///
/// The progress callback receives `(current, total)` chapters.
pub fn export_all_chapters(
    store: &TonieStore,
    output_dir: &Path,
    progress: Option<&dyn Fn(usize, usize)>,
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let total = store.header().chapter_count();
    let mut paths = Vec::with_capacity(total);

    for chapter in 0..total {
        if let Some(cb) = progress {
            cb(chapter, total);
        }
        paths.push(export_chapter(store, chapter, output_dir)?);
    }
    if let Some(cb) = progress {
        cb(total, total);
    }

    Ok(paths)
}

/// Filename for an exported chapter: `chapter003.ogg`.
fn chapter_filename(chapter: usize) -> String {
    format!("chapter{chapter:03}.ogg")
}
