//! Segment math and byte access to manifest files.
//!
//! The analyzers never download whole archives. They read volume bytes
//! through the embedder's [`SegmentFetch`] implementation (an NNTP pool, a
//! cache, a test buffer) and translate the byte ranges of discovered inner
//! files back onto manifest [`Segment`]s, so the streaming layer can later
//! serve those files directly.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::warn;

use crate::error::{ArchiveError, Error, Result};
use crate::types::{ParsedFile, Segment};
use crate::utils;

/// Blanket read+seek trait object bound for volume readers.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Byte access to the files described by a segment manifest.
///
/// Implemented by the embedding application; the production implementation
/// streams article ranges from a connection pool, honoring the analyzer
/// settings (workers, cache size, preload) it was built with.
pub trait SegmentFetch: Send + Sync {
    /// Opens a sequential, seekable reader over one manifest file's bytes.
    fn open(&self, file: &ParsedFile) -> Result<Box<dyn ReadSeek + Send>>;
}

/// In-memory [`SegmentFetch`] backed by an article store.
///
/// Files resolve through their segment lists, never by name — which is what
/// makes nested archives work: a file discovered inside an archive is
/// nothing but a segment slice of its parent volumes, and opening it
/// reassembles those same articles. Suitable for tests and for embedders
/// that already hold the article payloads.
#[derive(Default)]
pub struct MemorySegmentFetch {
    /// message id → (usable-range base offset, usable-range bytes)
    articles: HashMap<String, (u64, Vec<u8>)>,
}

impl MemorySegmentFetch {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one article's usable bytes. `base_offset` is the article
    /// offset at which `bytes` begins (segment offsets are article-relative).
    pub fn insert_article(&mut self, id: impl Into<String>, base_offset: u64, bytes: Vec<u8>) {
        self.articles.insert(id.into(), (base_offset, bytes));
    }

    /// Registers every article of a manifest file, carving `bytes` up
    /// according to the file's segment list.
    pub fn insert_file(&mut self, file: &ParsedFile, bytes: &[u8]) {
        let mut pos = 0usize;
        for seg in &file.segments {
            let len = seg.len() as usize;
            let chunk = bytes[pos..pos + len].to_vec();
            self.insert_article(seg.message_id.clone(), seg.start_offset, chunk);
            pos += len;
        }
    }

    /// Assembles the bytes a segment list describes.
    pub fn assemble(&self, segments: &[Segment]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for seg in segments {
            let (base, bytes) = self.articles.get(&seg.message_id).ok_or_else(|| {
                Error::Archive(ArchiveError::VolumeNotFound {
                    name: seg.message_id.clone(),
                })
            })?;
            let start = (seg.start_offset - base) as usize;
            let end = (seg.end_offset - base) as usize;
            if end >= bytes.len() {
                return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                    "segment {} range exceeds article size",
                    seg.message_id
                ))));
            }
            out.extend_from_slice(&bytes[start..=end]);
        }
        Ok(out)
    }
}

impl SegmentFetch for MemorySegmentFetch {
    fn open(&self, file: &ParsedFile) -> Result<Box<dyn ReadSeek + Send>> {
        let bytes = self.assemble(&file.segments)?;
        Ok(Box::new(io::Cursor::new(bytes)))
    }
}

/// Name-indexed view over an ordered set of archive volumes.
///
/// Lookup succeeds on either the declared filename or its basename, since
/// archive headers sometimes reference volumes by bare name while manifests
/// carry a directory prefix.
pub struct VolumeSet {
    fetch: Arc<dyn SegmentFetch>,
    files: Vec<ParsedFile>,
    index: HashMap<String, usize>,
}

impl VolumeSet {
    /// Builds a volume set over files in the given (already sorted) order.
    pub fn new(fetch: Arc<dyn SegmentFetch>, files: Vec<ParsedFile>) -> Self {
        let mut index = HashMap::with_capacity(files.len() * 2);
        for (i, file) in files.iter().enumerate() {
            index.insert(file.name.clone(), i);
            index
                .entry(utils::file_name(&file.name).to_string())
                .or_insert(i);
        }
        Self {
            fetch,
            files,
            index,
        }
    }

    /// The volumes in analysis order.
    pub fn files(&self) -> &[ParsedFile] {
        &self.files
    }

    /// Resolves a volume by full name or basename.
    pub fn file(&self, name: &str) -> Option<&ParsedFile> {
        self.index
            .get(name)
            .or_else(|| self.index.get(utils::file_name(name)))
            .map(|&i| &self.files[i])
    }

    /// Opens a reader over one volume's bytes.
    pub fn open(&self, name: &str) -> Result<Box<dyn ReadSeek + Send>> {
        let file = self.file(name).ok_or_else(|| {
            Error::Archive(ArchiveError::VolumeNotFound {
                name: name.to_string(),
            })
        })?;
        self.fetch.open(file)
    }

    /// Declared size of one volume.
    pub fn size(&self, name: &str) -> Option<u64> {
        self.file(name).map(|f| f.size)
    }

    /// Total declared size across all volumes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// A reader spanning all volumes concatenated in order, for formats
    /// whose central structures cross part boundaries (7z).
    pub fn concatenated(&self) -> MultiVolumeReader<'_> {
        MultiVolumeReader::new(self)
    }
}

/// `Read + Seek` over the concatenation of a [`VolumeSet`]'s files.
///
/// Volumes open lazily; a seek outside the current volume drops its reader.
pub struct MultiVolumeReader<'a> {
    set: &'a VolumeSet,
    starts: Vec<u64>,
    total: u64,
    pos: u64,
    current: Option<(usize, Box<dyn ReadSeek + Send>)>,
}

impl<'a> MultiVolumeReader<'a> {
    fn new(set: &'a VolumeSet) -> Self {
        let mut starts = Vec::with_capacity(set.files.len());
        let mut total = 0u64;
        for file in &set.files {
            starts.push(total);
            total += file.size;
        }
        Self {
            set,
            starts,
            total,
            pos: 0,
            current: None,
        }
    }

    fn volume_for(&self, pos: u64) -> Option<usize> {
        (0..self.starts.len())
            .rev()
            .find(|&i| pos >= self.starts[i] && pos < self.starts[i] + self.set.files[i].size)
    }
}

impl Read for MultiVolumeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.total || buf.is_empty() {
            return Ok(0);
        }
        let idx = self.volume_for(self.pos).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "position outside all volumes")
        })?;

        let reopen = match &self.current {
            Some((i, _)) => *i != idx,
            None => true,
        };
        if reopen {
            let reader = self
                .set
                .open(&self.set.files[idx].name)
                .map_err(io::Error::other)?;
            self.current = Some((idx, reader));
        }

        let offset_in_volume = self.pos - self.starts[idx];
        let remaining = self.set.files[idx].size - offset_in_volume;
        let want = buf.len().min(remaining as usize);

        let (_, reader) = self.current.as_mut().unwrap_or_else(|| unreachable!());
        reader.seek(SeekFrom::Start(offset_in_volume))?;
        let n = reader.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MultiVolumeReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(n) => self.total as i128 + n as i128,
            SeekFrom::Current(n) => self.pos as i128 + n as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        if target > self.total as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past end of volume set",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// Slices a part file's segment list down to the byte window
/// `[offset, offset + len)` of that part, cloning and trimming segments.
///
/// Segment offsets stay relative to their own decoded article; only the
/// usable range shrinks. Returns the trimmed segments and the number of
/// bytes actually covered (callers log a warning when coverage falls short
/// rather than aborting — materialization is best-effort per entry).
pub fn slice_segments(segments: &[Segment], offset: u64, len: u64) -> (Vec<Segment>, u64) {
    if len == 0 {
        return (Vec::new(), 0);
    }

    let target_start = offset;
    let target_end = offset + len - 1;
    let mut covered = 0u64;
    let mut out = Vec::new();

    // cumulative position of the current segment within the part file
    let mut abs_pos = 0u64;
    for seg in segments {
        let seg_len = seg.len();
        if seg_len == 0 {
            continue;
        }
        let seg_abs_start = abs_pos;
        let seg_abs_end = abs_pos + seg_len - 1;

        if seg_abs_end < target_start {
            abs_pos += seg_len;
            continue;
        }
        if seg_abs_start > target_end {
            break;
        }

        let overlap_start = seg_abs_start.max(target_start);
        let overlap_end = seg_abs_end.min(target_end);

        let rel_start = seg.start_offset + (overlap_start - seg_abs_start);
        let rel_end = seg.start_offset + (overlap_end - seg_abs_start);
        out.push(Segment {
            message_id: seg.message_id.clone(),
            start_offset: rel_start,
            end_offset: rel_end,
            article_size: seg.article_size,
        });
        covered += rel_end - rel_start + 1;

        if overlap_end == target_end {
            break;
        }
        abs_pos += seg_len;
    }

    (out, covered)
}

/// Maps a byte range of a concatenated multi-part archive onto the segments
/// of the individual parts.
///
/// `parts` must be in concatenation order. Used by the 7z analyzer, whose
/// entry offsets are absolute within the joined pack data.
pub fn map_range_to_segments(parts: &[ParsedFile], offset: u64, len: u64) -> Vec<Segment> {
    if len == 0 {
        return Vec::new();
    }

    let range_end = offset + len - 1;
    let mut segments = Vec::new();
    let mut part_start = 0u64;

    for part in parts {
        let part_end = part_start + part.size; // exclusive
        if part_end <= offset || part_start > range_end {
            part_start = part_end;
            continue;
        }

        let overlap_start = offset.max(part_start);
        let overlap_end = range_end.min(part_end - 1);
        let within_offset = overlap_start - part_start;
        let within_len = overlap_end - overlap_start + 1;

        let (sliced, covered) = slice_segments(&part.segments, within_offset, within_len);
        if covered != within_len {
            warn!(
                part = %part.name,
                expected = within_len,
                covered,
                "part segment coverage mismatch"
            );
        }
        segments.extend(sliced);
        part_start = part_end;
    }

    segments
}
