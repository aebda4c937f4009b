//! 7z structural analyzer.
//!
//! Computes byte-exact offsets of every file inside a store-mode 7z archive
//! so the streaming layer can serve ranges straight out of the pack data.
//! The archive is never decompressed: analysis succeeds only when every
//! coder of every folder is the identity/store method, and fails permanently
//! otherwise. Unlike the RAR analyzer this one is not progressive — 7z
//! keeps its central header at the end of the archive, and nothing is
//! addressable until that header has been fully parsed.

mod header;
mod reader;

pub use header::{ArchiveHeader, SIGNATURE_HEADER_SIZE, method_name};

use tracing::{debug, info};

use crate::config::AnalyzerConfig;
use crate::error::{ArchiveError, Error, Result};
use crate::segments::{VolumeSet, map_range_to_segments};
use crate::types::Segment;
use crate::utils;

/// One addressable file inside an uncompressed 7z archive.
#[derive(Clone, Debug)]
pub struct SevenZipEntry {
    /// Path within the archive, forward-slash separated
    pub internal_path: String,
    /// Basename of the entry
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Absolute byte offset of the entry's data within the concatenated
    /// archive: pack start + folder base + intra-folder offset. Only
    /// meaningful because the archive is confirmed store-mode.
    pub offset: u64,
    /// Index of the folder backing this entry; entries sharing an index are
    /// backed by the same pack stream
    pub folder_index: usize,
    /// Manifest segments covering exactly `[offset, offset + size)`
    pub segments: Vec<Segment>,
}

/// Result of a successful 7z analysis.
#[derive(Clone, Debug, Default)]
pub struct SevenZipArchiveInfo {
    /// Addressable media entries in archive order
    pub entries: Vec<SevenZipEntry>,
}

/// Analyzer for 7z archive sets.
pub struct SevenZipAnalyzer {
    settings: AnalyzerConfig,
}

impl SevenZipAnalyzer {
    /// Creates an analyzer with the given settings snapshot.
    pub fn new(settings: AnalyzerConfig) -> Self {
        Self { settings }
    }

    /// Analyzes a 7z archive spanning the volume set's parts (in part
    /// order), returning offsets and segment mappings for its media files.
    pub fn analyze(&self, volumes: &VolumeSet) -> Result<SevenZipArchiveInfo> {
        let parts = volumes.files();
        if parts.is_empty() {
            return Err(Error::Archive(ArchiveError::NoVolumes));
        }

        info!(
            parts = parts.len(),
            total_size = volumes.total_size(),
            workers = self.settings.max_workers,
            "starting 7z analysis"
        );

        let mut reader = volumes.concatenated();
        let header = header::read_archive_header(&mut reader).map_err(|e| match e {
            Error::Io(io) => Error::Archive(ArchiveError::InvalidFormat(format!(
                "truncated or unreadable 7z header: {}",
                io
            ))),
            other => other,
        })?;

        // Establish compression mode before touching any offset: a single
        // non-Copy coder anywhere makes every offset meaningless.
        for folder in header.folders() {
            for coder in &folder.coders {
                if coder.is_aes() {
                    return Err(Error::Archive(ArchiveError::SevenZipEncrypted));
                }
                if !coder.is_copy() {
                    return Err(Error::Archive(ArchiveError::SevenZipCompressed {
                        method: method_name(&coder.method_id).to_string(),
                    }));
                }
            }
        }

        let entries = self.compute_entries(&header, volumes);
        info!(files = entries.len(), "7z archive analyzed as store-mode");

        Ok(SevenZipArchiveInfo { entries })
    }

    fn compute_entries(&self, header: &ArchiveHeader, volumes: &VolumeSet) -> Vec<SevenZipEntry> {
        let Some(pack_info) = header.pack_info.as_ref() else {
            return Vec::new();
        };
        let Some(files_info) = header.files_info.as_ref() else {
            return Vec::new();
        };

        let pack_start = SIGNATURE_HEADER_SIZE + pack_info.pack_pos;

        // Base offset of each folder: preceding folders' packed streams
        let folders = header.folders();
        let mut folder_bases = Vec::with_capacity(folders.len());
        let mut pack_index = 0usize;
        let mut offset = 0u64;
        for folder in folders {
            folder_bases.push(pack_start + offset);
            for _ in 0..folder.num_packed_streams {
                if let Some(size) = pack_info.pack_sizes.get(pack_index) {
                    offset += size;
                }
                pack_index += 1;
            }
        }

        // Walk files with streams in order, assigning each to its folder and
        // accumulating the intra-folder offset.
        let streams_per_folder = header.streams_per_folder();
        let mut folder_index = 0usize;
        let mut stream_in_folder = 0u64;
        let mut intra_offset = 0u64;

        let mut entries = Vec::new();
        for entry in &files_info.entries {
            if entry.is_directory {
                debug!(path = %entry.name, "skipping directory in 7z archive");
                continue;
            }
            if !entry.has_stream {
                continue;
            }

            while folder_index < streams_per_folder.len()
                && stream_in_folder >= streams_per_folder[folder_index]
            {
                folder_index += 1;
                stream_in_folder = 0;
                intra_offset = 0;
            }
            if folder_index >= folders.len() {
                break;
            }

            let absolute = folder_bases[folder_index] + intra_offset;
            let internal_path = entry.name.replace('\\', "/");

            stream_in_folder += 1;
            let size = entry.size;
            intra_offset += size;

            if !utils::is_media_file(&internal_path) {
                debug!(path = %internal_path, "skipping non-media file in 7z archive");
                continue;
            }

            let segments = map_range_to_segments(volumes.files(), absolute, size);
            debug!(
                path = %internal_path,
                offset = absolute,
                size,
                folder = folder_index,
                segments = segments.len(),
                "mapped 7z entry"
            );

            entries.push(SevenZipEntry {
                name: utils::file_name(&internal_path).to_string(),
                internal_path,
                size,
                offset: absolute,
                folder_index,
                segments,
            });
        }

        entries
    }
}
