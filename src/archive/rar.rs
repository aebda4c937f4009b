//! RAR structural analyzer.
//!
//! Scans a (possibly multi-volume) RAR set and maps every store-mode entry
//! onto the manifest segments that back its bytes. Analysis is progressive:
//! volumes are parsed in numeric order and each entry is handed to the
//! caller as soon as its final chunk is located, so the caller can react to
//! the first playable file before the remaining volumes are read.
//!
//! Both RAR4 and RAR5 block formats are recognized. Compressed entries are
//! skipped (the streaming model cannot seek into them); encrypted archives
//! abort immediately. A set with no store-mode entries at all fails
//! permanently.

use std::io::{Read, Seek, SeekFrom};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AnalyzerConfig;
use crate::error::{ArchiveError, Error, Result};
use crate::segments::{ReadSeek, VolumeSet, slice_segments};
use crate::types::Segment;
use crate::utils;

const RAR4_SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
const RAR5_SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

// RAR4 block types
const RAR4_BLOCK_ARCHIVE: u8 = 0x73;
const RAR4_BLOCK_FILE: u8 = 0x74;
const RAR4_BLOCK_END: u8 = 0x7B;

// RAR4 header flags
const RAR4_MAIN_PASSWORD: u16 = 0x0080;
const RAR4_FILE_SPLIT_BEFORE: u16 = 0x0001;
const RAR4_FILE_SPLIT_AFTER: u16 = 0x0002;
const RAR4_FILE_PASSWORD: u16 = 0x0004;
const RAR4_FILE_LARGE: u16 = 0x0100;
const RAR4_DIRECTORY_MASK: u16 = 0x00E0;
const RAR4_LONG_BLOCK: u16 = 0x8000;

const RAR4_METHOD_STORE: u8 = 0x30;

// RAR5 header types
const RAR5_TYPE_FILE: u64 = 2;
const RAR5_TYPE_ENCRYPTION: u64 = 4;
const RAR5_TYPE_END: u64 = 5;

// RAR5 block flags
const RAR5_FLAG_EXTRA_AREA: u64 = 0x0001;
const RAR5_FLAG_DATA_AREA: u64 = 0x0002;
const RAR5_FLAG_SPLIT_BEFORE: u64 = 0x0008;
const RAR5_FLAG_SPLIT_AFTER: u64 = 0x0010;

// RAR5 file flags
const RAR5_FILE_DIRECTORY: u64 = 0x0001;
const RAR5_FILE_HAS_MTIME: u64 = 0x0002;
const RAR5_FILE_HAS_CRC: u64 = 0x0004;

// RAR5 extra-record type for file encryption
const RAR5_EXTRA_CRYPT: u64 = 0x01;

/// One file discovered inside a RAR set.
#[derive(Clone, Debug)]
pub struct RarEntry {
    /// Path within the archive, forward-slash separated
    pub internal_path: String,
    /// Basename of the entry
    pub name: String,
    /// File size in bytes (store mode: packed equals unpacked)
    pub size: u64,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Manifest segments covering the entry's bytes, in order
    pub segments: Vec<Segment>,
}

/// One contiguous byte run of an entry within a single volume.
#[derive(Debug)]
struct Chunk {
    volume: String,
    data_offset: u64,
    size: u64,
}

/// Entry whose chunks are still being collected across volumes.
struct PendingEntry {
    internal_path: String,
    unpacked_size: u64,
    chunks: Vec<Chunk>,
}

/// Raw file-header facts shared by the RAR4 and RAR5 scanners.
struct ScannedFile {
    name: String,
    unpacked_size: u64,
    packed_size: u64,
    data_offset: u64,
    is_directory: bool,
    is_stored: bool,
    split_before: bool,
    split_after: bool,
}

/// Analyzer for RAR volume sets.
pub struct RarAnalyzer {
    settings: AnalyzerConfig,
}

impl RarAnalyzer {
    /// Creates an analyzer with the given settings snapshot.
    pub fn new(settings: AnalyzerConfig) -> Self {
        Self { settings }
    }

    /// Analyzes the volume set progressively.
    ///
    /// `on_entry` runs on the analyzer's thread once per completed entry;
    /// returning `false` stops the scan early and returns what has been
    /// collected so far. Cancellation is checked between volumes.
    pub fn analyze(
        &self,
        volumes: &VolumeSet,
        cancel: &CancellationToken,
        mut on_entry: impl FnMut(RarEntry) -> bool,
    ) -> Result<Vec<RarEntry>> {
        if volumes.files().is_empty() {
            return Err(Error::Archive(ArchiveError::NoVolumes));
        }

        info!(
            parts = volumes.files().len(),
            total_size = volumes.total_size(),
            workers = self.settings.max_workers,
            "starting progressive RAR analysis"
        );

        let mut entries: Vec<RarEntry> = Vec::new();
        let mut pending: Option<PendingEntry> = None;
        let mut skipped_compressed = 0usize;
        let mut stopped_early = false;

        'volumes: for volume in volumes.files() {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            let mut reader = volumes.open(&volume.name)?;
            let scanned = scan_volume(&mut reader, volume.size, &volume.name).map_err(|e| {
                match e {
                    Error::Io(io) => Error::Archive(ArchiveError::InvalidFormat(format!(
                        "unreadable RAR volume {}: {}",
                        volume.name, io
                    ))),
                    other => other,
                }
            })?;

            debug!(
                volume = %volume.name,
                headers = scanned.len(),
                "scanned RAR volume"
            );

            for file in scanned {
                if file.is_directory {
                    let entry = RarEntry {
                        name: utils::file_name(&file.name).to_string(),
                        internal_path: file.name.clone(),
                        size: 0,
                        is_directory: true,
                        segments: Vec::new(),
                    };
                    entries.push(entry.clone());
                    if !on_entry(entry) {
                        stopped_early = true;
                        break 'volumes;
                    }
                    continue;
                }

                if !file.is_stored {
                    skipped_compressed += 1;
                    warn!(
                        entry = %file.name,
                        volume = %volume.name,
                        "skipping compressed RAR entry (cannot stream)"
                    );
                    continue;
                }

                let chunk = Chunk {
                    volume: volume.name.clone(),
                    data_offset: file.data_offset,
                    size: file.packed_size,
                };

                if file.split_before {
                    match pending.as_mut() {
                        Some(p) if p.internal_path == file.name => p.chunks.push(chunk),
                        _ => {
                            // Continuation without a head chunk: the first
                            // volumes of this file are missing from the set
                            warn!(
                                entry = %file.name,
                                volume = %volume.name,
                                "continuation chunk without preceding part, skipping"
                            );
                            continue;
                        }
                    }
                } else {
                    if let Some(stale) = pending.take() {
                        warn!(
                            entry = %stale.internal_path,
                            "entry never completed across volumes, emitting partial"
                        );
                        if let Some(entry) = finalize_entry(stale, volumes) {
                            entries.push(entry.clone());
                            if !on_entry(entry) {
                                stopped_early = true;
                                break 'volumes;
                            }
                        }
                    }
                    pending = Some(PendingEntry {
                        internal_path: file.name.clone(),
                        unpacked_size: file.unpacked_size,
                        chunks: vec![chunk],
                    });
                }

                if !file.split_after {
                    if let Some(done) = pending.take() {
                        if let Some(entry) = finalize_entry(done, volumes) {
                            entries.push(entry.clone());
                            if !on_entry(entry) {
                                stopped_early = true;
                                break 'volumes;
                            }
                        }
                    }
                }
            }
        }

        if !stopped_early {
            if let Some(tail) = pending.take() {
                warn!(
                    entry = %tail.internal_path,
                    "final entry missing its last chunk, emitting partial"
                );
                if let Some(entry) = finalize_entry(tail, volumes) {
                    entries.push(entry.clone());
                    on_entry(entry);
                }
            }
        }

        if !stopped_early && entries.iter().all(|e| e.is_directory) {
            debug!(skipped_compressed, "RAR analysis found nothing streamable");
            return Err(Error::Archive(ArchiveError::RarNoStreamableFiles));
        }

        info!(
            files = entries.len(),
            skipped_compressed,
            stopped_early,
            "RAR analysis complete"
        );
        Ok(entries)
    }
}

/// Builds the final entry from its collected chunks, slicing each chunk's
/// byte window out of the owning volume's segment list.
fn finalize_entry(pending: PendingEntry, volumes: &VolumeSet) -> Option<RarEntry> {
    let mut segments = Vec::new();
    let mut covered = 0u64;

    for chunk in &pending.chunks {
        let Some(volume) = volumes.file(&chunk.volume) else {
            warn!(volume = %chunk.volume, entry = %pending.internal_path, "chunk volume missing");
            continue;
        };
        let (sliced, chunk_covered) =
            slice_segments(&volume.segments, chunk.data_offset, chunk.size);
        if chunk_covered != chunk.size {
            warn!(
                entry = %pending.internal_path,
                volume = %chunk.volume,
                expected = chunk.size,
                covered = chunk_covered,
                "chunk segment coverage mismatch"
            );
        }
        covered += chunk_covered;
        segments.extend(sliced);
    }

    if covered != pending.unpacked_size {
        warn!(
            entry = %pending.internal_path,
            expected = pending.unpacked_size,
            covered,
            "entry coverage mismatch"
        );
    }

    let internal_path = pending.internal_path.replace('\\', "/");
    Some(RarEntry {
        name: utils::file_name(&internal_path).to_string(),
        internal_path,
        size: pending.unpacked_size,
        is_directory: false,
        segments,
    })
}

/// Scans one volume's block headers, returning its file-header facts in
/// order. Never reads file data — data runs are seeked over.
fn scan_volume(
    reader: &mut Box<dyn ReadSeek + Send>,
    volume_size: u64,
    volume_name: &str,
) -> Result<Vec<ScannedFile>> {
    let mut sig = [0u8; 8];
    reader.seek(SeekFrom::Start(0))?;
    let got = read_up_to(reader.as_mut(), &mut sig)?;

    if got >= 8 && sig == RAR5_SIGNATURE {
        scan_rar5(reader, volume_size, 8)
    } else if got >= 7 && sig[..7] == RAR4_SIGNATURE {
        scan_rar4(reader, volume_size, 7)
    } else {
        Err(Error::Archive(ArchiveError::InvalidFormat(format!(
            "{} is not a RAR volume (bad signature)",
            volume_name
        ))))
    }
}

fn read_up_to(reader: &mut dyn ReadSeek, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// --- RAR4 ------------------------------------------------------------------

fn scan_rar4(
    reader: &mut Box<dyn ReadSeek + Send>,
    volume_size: u64,
    start: u64,
) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let mut offset = start;

    // Shortest meaningful block is the 7-byte common header
    while offset + 7 <= volume_size {
        reader.seek(SeekFrom::Start(offset))?;
        let mut common = [0u8; 7];
        if read_up_to(reader.as_mut(), &mut common)? < 7 {
            break;
        }

        let block_type = common[2];
        let flags = u16::from_le_bytes([common[3], common[4]]);
        let head_size = u16::from_le_bytes([common[5], common[6]]) as u64;
        if head_size < 7 {
            return Err(Error::Archive(ArchiveError::CorruptHeader {
                offset,
                reason: format!("block header size {} below minimum", head_size),
            }));
        }

        match block_type {
            RAR4_BLOCK_END => break,
            RAR4_BLOCK_ARCHIVE => {
                if flags & RAR4_MAIN_PASSWORD != 0 {
                    return Err(Error::Archive(ArchiveError::RarEncrypted));
                }
                offset += head_size;
            }
            RAR4_BLOCK_FILE => {
                let body_len = (head_size - 7) as usize;
                let body = read_exact_vec(reader.as_mut(), body_len, offset)?;
                let file = parse_rar4_file_header(&body, flags, offset, head_size)?;
                let advance = head_size + file.packed_size;
                files.push(file);
                offset += advance;
            }
            _ => {
                // Unknown block: skip header plus trailing data if flagged
                let mut advance = head_size;
                if flags & RAR4_LONG_BLOCK != 0 && head_size >= 11 {
                    let body = read_exact_vec(reader.as_mut(), 4, offset)?;
                    advance += u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as u64;
                }
                offset += advance;
            }
        }
    }

    Ok(files)
}

fn parse_rar4_file_header(
    body: &[u8],
    flags: u16,
    block_offset: u64,
    head_size: u64,
) -> Result<ScannedFile> {
    // PACK_SIZE UNP_SIZE HOST_OS FILE_CRC FTIME UNP_VER METHOD NAME_SIZE ATTR
    if body.len() < 25 {
        return Err(Error::Archive(ArchiveError::CorruptHeader {
            offset: block_offset,
            reason: "file header truncated".into(),
        }));
    }

    if flags & RAR4_FILE_PASSWORD != 0 {
        return Err(Error::Archive(ArchiveError::RarEncrypted));
    }

    let mut packed_size = u32::from_le_bytes(body[0..4].try_into().unwrap_or_default()) as u64;
    let mut unpacked_size = u32::from_le_bytes(body[4..8].try_into().unwrap_or_default()) as u64;
    let method = body[18];
    let name_size = u16::from_le_bytes([body[19], body[20]]) as usize;

    let mut name_offset = 25;
    if flags & RAR4_FILE_LARGE != 0 {
        if body.len() < 33 {
            return Err(Error::Archive(ArchiveError::CorruptHeader {
                offset: block_offset,
                reason: "large file header truncated".into(),
            }));
        }
        let high_pack = u32::from_le_bytes(body[25..29].try_into().unwrap_or_default()) as u64;
        let high_unp = u32::from_le_bytes(body[29..33].try_into().unwrap_or_default()) as u64;
        packed_size |= high_pack << 32;
        unpacked_size |= high_unp << 32;
        name_offset = 33;
    }

    if body.len() < name_offset + name_size {
        return Err(Error::Archive(ArchiveError::CorruptHeader {
            offset: block_offset,
            reason: "file name extends past header".into(),
        }));
    }
    let name_bytes = &body[name_offset..name_offset + name_size];
    // Unicode names store "ascii\0packed-unicode"; keep the ascii portion
    let ascii = match name_bytes.iter().position(|&b| b == 0) {
        Some(idx) => &name_bytes[..idx],
        None => name_bytes,
    };
    let name = String::from_utf8_lossy(ascii).into_owned();

    Ok(ScannedFile {
        name,
        unpacked_size,
        packed_size,
        data_offset: block_offset + head_size,
        is_directory: flags & RAR4_DIRECTORY_MASK == RAR4_DIRECTORY_MASK,
        is_stored: method == RAR4_METHOD_STORE,
        split_before: flags & RAR4_FILE_SPLIT_BEFORE != 0,
        split_after: flags & RAR4_FILE_SPLIT_AFTER != 0,
    })
}

fn read_exact_vec(reader: &mut dyn ReadSeek, len: usize, offset: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let got = read_up_to(reader, &mut buf)?;
    if got < len {
        return Err(Error::Archive(ArchiveError::CorruptHeader {
            offset,
            reason: format!("expected {} header bytes, got {}", len, got),
        }));
    }
    Ok(buf)
}

// --- RAR5 ------------------------------------------------------------------

fn scan_rar5(
    reader: &mut Box<dyn ReadSeek + Send>,
    volume_size: u64,
    start: u64,
) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let mut offset = start;

    // CRC32 plus at least a one-byte size vint and one-byte header
    while offset + 6 <= volume_size {
        reader.seek(SeekFrom::Start(offset))?;

        let mut crc = [0u8; 4];
        if read_up_to(reader.as_mut(), &mut crc)? < 4 {
            break;
        }
        let (header_size, size_len) = read_vint(reader.as_mut())?;
        let header_start = offset + 4 + size_len as u64;

        let header = read_exact_vec(reader.as_mut(), header_size as usize, offset)?;
        let mut cursor = VintCursor::new(&header);

        let header_type = cursor.vint()?;
        let block_flags = cursor.vint()?;
        let extra_size = if block_flags & RAR5_FLAG_EXTRA_AREA != 0 {
            cursor.vint()?
        } else {
            0
        };
        let data_size = if block_flags & RAR5_FLAG_DATA_AREA != 0 {
            cursor.vint()?
        } else {
            0
        };

        match header_type {
            RAR5_TYPE_END => break,
            RAR5_TYPE_ENCRYPTION => {
                return Err(Error::Archive(ArchiveError::RarEncrypted));
            }
            RAR5_TYPE_FILE => {
                let file_flags = cursor.vint()?;
                let unpacked_size = cursor.vint()?;
                let _attributes = cursor.vint()?;
                if file_flags & RAR5_FILE_HAS_MTIME != 0 {
                    cursor.skip(4)?;
                }
                if file_flags & RAR5_FILE_HAS_CRC != 0 {
                    cursor.skip(4)?;
                }
                let compression_info = cursor.vint()?;
                let _host_os = cursor.vint()?;
                let name_len = cursor.vint()? as usize;
                let name_bytes = cursor.take(name_len)?;
                let name = String::from_utf8_lossy(name_bytes).into_owned();

                if extra_size > 0 {
                    check_rar5_extra_encryption(&header, extra_size, offset)?;
                }

                let method = (compression_info >> 7) & 0x7;
                let is_directory = file_flags & RAR5_FILE_DIRECTORY != 0;

                files.push(ScannedFile {
                    name,
                    unpacked_size,
                    packed_size: data_size,
                    data_offset: header_start + header_size,
                    is_directory,
                    is_stored: method == 0,
                    split_before: block_flags & RAR5_FLAG_SPLIT_BEFORE != 0,
                    split_after: block_flags & RAR5_FLAG_SPLIT_AFTER != 0,
                });
            }
            _ => {}
        }

        offset = header_start + header_size + data_size;
    }

    Ok(files)
}

/// The extra area sits at the tail of the header; a crypt record there means
/// the entry (and for our purposes the archive) is encrypted.
fn check_rar5_extra_encryption(header: &[u8], extra_size: u64, block_offset: u64) -> Result<()> {
    let extra_size = extra_size as usize;
    if extra_size > header.len() {
        return Err(Error::Archive(ArchiveError::CorruptHeader {
            offset: block_offset,
            reason: "extra area larger than header".into(),
        }));
    }
    let mut cursor = VintCursor::new(&header[header.len() - extra_size..]);
    while !cursor.is_empty() {
        let record_size = match cursor.vint() {
            Ok(v) => v,
            Err(_) => break,
        };
        let record_start = cursor.position();
        let record_type = match cursor.vint() {
            Ok(v) => v,
            Err(_) => break,
        };
        if record_type == RAR5_EXTRA_CRYPT {
            return Err(Error::Archive(ArchiveError::RarEncrypted));
        }
        let consumed = cursor.position() - record_start;
        if cursor.skip(record_size.saturating_sub(consumed as u64) as usize).is_err() {
            break;
        }
    }
    Ok(())
}

/// RAR5 variable-length integer: 7 data bits per byte, low bits first, high
/// bit set on all but the final byte.
fn read_vint(reader: &mut dyn ReadSeek) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut len = 0usize;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        value |= ((byte[0] & 0x7F) as u64) << (7 * len);
        len += 1;
        if byte[0] & 0x80 == 0 {
            break;
        }
        if len >= 10 {
            return Err(Error::Archive(ArchiveError::InvalidFormat(
                "unterminated variable-length integer".into(),
            )));
        }
    }
    Ok((value, len))
}

/// Byte-slice cursor for RAR5 header fields.
struct VintCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> VintCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn vint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut len = 0usize;
        loop {
            let byte = *self.data.get(self.pos).ok_or_else(|| {
                Error::Archive(ArchiveError::InvalidFormat(
                    "truncated variable-length integer".into(),
                ))
            })?;
            self.pos += 1;
            value |= ((byte & 0x7F) as u64) << (7 * len);
            len += 1;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            if len >= 10 {
                return Err(Error::Archive(ArchiveError::InvalidFormat(
                    "unterminated variable-length integer".into(),
                )));
            }
        }
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        if self.pos + count > self.data.len() {
            return Err(Error::Archive(ArchiveError::InvalidFormat(
                "header field extends past header".into(),
            )));
        }
        self.pos += count;
        Ok(())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count > self.data.len() {
            return Err(Error::Archive(ArchiveError::InvalidFormat(
                "header field extends past header".into(),
            )));
        }
        let out = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(out)
    }
}
