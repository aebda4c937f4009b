//! Core data types shared across the import pipeline.
//!
//! These are the transient records produced by the external manifest parser
//! and consumed once by the [`crate::import::Processor`]: the archive-level
//! [`ParsedArchive`], its per-file [`ParsedFile`] entries, and the byte-range
//! [`Segment`] descriptors that map file content onto remotely fetchable
//! articles.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Classification of a parsed segment manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// A single standalone file
    SingleFile,
    /// Multiple unrelated files (no archive container)
    MultiFile,
    /// A RAR archive, possibly multi-volume
    Rar,
    /// A 7z archive, possibly multi-part (`.7z.001` style)
    SevenZip,
    /// A link-only placeholder file wrapping exactly one remote file
    Strm,
}

impl ArchiveKind {
    /// Short tag used in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::SingleFile => "single_file",
            ArchiveKind::MultiFile => "multi_file",
            ArchiveKind::Rar => "rar",
            ArchiveKind::SevenZip => "7z",
            ArchiveKind::Strm => "strm",
        }
    }
}

/// One remotely fetchable byte range of a file.
///
/// Offsets are relative to the decoded article payload itself (a segment's
/// usable bytes are `[start_offset, end_offset]`, inclusive), matching the
/// manifest parser's output. `article_size` is the full decoded article size,
/// which can exceed the usable range when an analyzer has trimmed the segment
/// to an inner file's byte window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Message identifier used to fetch the article
    pub message_id: String,
    /// First usable byte within the decoded article (inclusive)
    pub start_offset: u64,
    /// Last usable byte within the decoded article (inclusive)
    pub end_offset: u64,
    /// Size of the full decoded article in bytes
    pub article_size: u64,
}

impl Segment {
    /// Number of usable bytes this segment contributes.
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset + 1
    }

    /// True when the segment contributes no bytes.
    pub fn is_empty(&self) -> bool {
        self.end_offset < self.start_offset
    }
}

/// Encryption metadata attached to a manifest file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encryption {
    /// Cipher name as declared by the manifest
    pub cipher: String,
    /// Optional password
    pub password: Option<String>,
    /// Optional salt
    pub salt: Option<String>,
}

/// One file entry inside a parsed manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedFile {
    /// Declared filename (may contain a relative directory prefix)
    pub name: String,
    /// Declared file size in bytes
    pub size: u64,
    /// Ordered segment list; segment lengths must sum to `size`
    pub segments: Vec<Segment>,
    /// True when the filename matches a RAR volume pattern
    #[serde(default)]
    pub is_rar_part: bool,
    /// True when the filename matches a 7z part pattern
    #[serde(default)]
    pub is_sevenz_part: bool,
    /// Optional encryption metadata
    #[serde(default)]
    pub encryption: Option<Encryption>,
}

impl ParsedFile {
    /// Sum of segment lengths.
    pub fn segment_bytes(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }
}

/// Archive-level record produced by the external manifest parser.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedArchive {
    /// Archive classification
    pub kind: ArchiveKind,
    /// Declared archive filename (used to name the container directory)
    pub filename: String,
    /// Path of the source manifest on disk (recorded in metadata as the
    /// source reference, and used for watch-root-relative placement)
    pub source_path: String,
    /// Total declared size across all files
    pub total_size: u64,
    /// Files described by the manifest
    pub files: Vec<ParsedFile>,
}

impl ParsedArchive {
    /// Validates the manifest invariants before import.
    ///
    /// Each file's segment lengths must sum to its declared size, and the
    /// manifest must describe at least one file. Violations are permanent
    /// errors — the manifest bytes will never parse differently.
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(Error::InvalidManifest("manifest describes no files".into()));
        }
        for file in &self.files {
            let covered = file.segment_bytes();
            if covered != file.size {
                return Err(Error::InvalidManifest(format!(
                    "segments of {} cover {} bytes but file declares {}",
                    file.name, covered, file.size
                )));
            }
        }
        Ok(())
    }
}
