//! 7z header structures.
//!
//! Parses just enough of the 7z container format to answer two questions:
//! is every coder the identity/store method, and at which absolute byte
//! offset does each file's data start. Nothing here decompresses anything.

use std::io::{Read, Seek, SeekFrom};

use super::reader::{
    read_all_or_bits, read_bit_vector, read_bytes, read_number, read_u8, read_u32_le,
    read_utf16_name,
};
use crate::error::{ArchiveError, Error, Result};

/// The 7z magic bytes: `'7' 'z' 0xBC 0xAF 0x27 0x1C`.
pub const SIGNATURE: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Size of the signature header: signature + version + start-header CRC +
/// next-header offset/size/CRC. Pack data begins here.
pub const SIGNATURE_HEADER_SIZE: u64 = 32;

/// Method ID of the Copy (store) coder.
pub const METHOD_COPY: &[u8] = &[0x00];

/// Method ID of the AES-256 coder.
pub const METHOD_AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];

/// Header property IDs.
pub mod property {
    pub const END: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const MAIN_STREAMS_INFO: u8 = 0x04;
    pub const FILES_INFO: u8 = 0x05;
    pub const PACK_INFO: u8 = 0x06;
    pub const UNPACK_INFO: u8 = 0x07;
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    pub const SIZE: u8 = 0x09;
    pub const CRC: u8 = 0x0A;
    pub const FOLDER: u8 = 0x0B;
    pub const CODERS_UNPACK_SIZE: u8 = 0x0C;
    pub const NUM_UNPACK_STREAM: u8 = 0x0D;
    pub const EMPTY_STREAM: u8 = 0x0E;
    pub const EMPTY_FILE: u8 = 0x0F;
    pub const ANTI: u8 = 0x10;
    pub const NAME: u8 = 0x11;
    pub const ENCODED_HEADER: u8 = 0x17;
}

/// Human-readable name for a 7z method ID, for error messages.
pub fn method_name(id: &[u8]) -> &'static str {
    match id {
        [0x00] => "Copy (uncompressed)",
        [0x03] => "Delta",
        [0x03, 0x01, 0x01] => "LZMA",
        [0x21] => "LZMA2",
        [0x04, 0x01, 0x08] => "Deflate",
        [0x04, 0x02, 0x02] => "BZip2",
        [0x04, 0xF7, 0x11, 0x01] => "Zstandard",
        [0x04, 0xF7, 0x11, 0x02] => "Brotli",
        [0x04, 0xF7, 0x11, 0x04] => "LZ4",
        [0x06, 0xF1, 0x07, 0x01] => "AES-256 (encrypted)",
        id if id.starts_with(&[0x03, 0x03]) => "BCJ filter",
        _ => "unknown",
    }
}

/// The fixed-size structure at the start of every 7z file.
#[derive(Debug, Clone)]
pub struct StartHeader {
    /// Offset from the end of the signature header to the next header
    pub next_header_offset: u64,
    /// Size of the next header in bytes
    pub next_header_size: u64,
    /// CRC32 of the next header bytes
    pub next_header_crc: u32,
}

impl StartHeader {
    /// Parses and CRC-validates the signature header.
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let mut sig = [0u8; 6];
        r.read_exact(&mut sig)?;
        if sig != SIGNATURE {
            return Err(Error::Archive(ArchiveError::InvalidFormat(
                "not a 7z archive (bad signature)".into(),
            )));
        }

        // version major/minor — tolerated, 7z readers are expected to be lenient
        let _ = read_u8(r)?;
        let _ = read_u8(r)?;

        let start_header_crc = read_u32_le(r)?;
        let mut tail = [0u8; 20];
        r.read_exact(&mut tail)?;

        let actual = crc32fast::hash(&tail);
        if actual != start_header_crc {
            return Err(Error::Archive(ArchiveError::CorruptHeader {
                offset: 12,
                reason: format!(
                    "start header CRC mismatch: expected {:#x}, got {:#x}",
                    start_header_crc, actual
                ),
            }));
        }

        Ok(Self {
            next_header_offset: u64::from_le_bytes(tail[0..8].try_into().unwrap_or_default()),
            next_header_size: u64::from_le_bytes(tail[8..16].try_into().unwrap_or_default()),
            next_header_crc: u32::from_le_bytes(tail[16..20].try_into().unwrap_or_default()),
        })
    }

    /// Absolute position of the next header within the archive.
    pub fn next_header_position(&self) -> u64 {
        SIGNATURE_HEADER_SIZE + self.next_header_offset
    }
}

/// One coder in a folder's chain.
#[derive(Debug, Clone)]
pub struct Coder {
    /// Raw method ID bytes
    pub method_id: Vec<u8>,
    /// Number of input streams
    pub num_in_streams: u64,
    /// Number of output streams
    pub num_out_streams: u64,
}

impl Coder {
    /// True when this coder is the identity/store method.
    pub fn is_copy(&self) -> bool {
        self.method_id == METHOD_COPY
    }

    /// True when this coder encrypts.
    pub fn is_aes(&self) -> bool {
        self.method_id == METHOD_AES
    }
}

/// A folder: one coder chain over one or more packed streams.
#[derive(Debug, Clone)]
pub struct Folder {
    /// Coders in this folder
    pub coders: Vec<Coder>,
    /// Number of packed streams feeding this folder
    pub num_packed_streams: u64,
    /// Output sizes per coder stream
    pub unpack_sizes: Vec<u64>,
    /// Optional CRC of the unpacked data
    pub unpack_crc: Option<u32>,
}

impl Folder {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let num_coders = read_number(r)?;
        if num_coders == 0 || num_coders > 16 {
            return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                "implausible coder count in folder: {}",
                num_coders
            ))));
        }

        let mut coders = Vec::with_capacity(num_coders as usize);
        let mut total_in = 0u64;
        let mut total_out = 0u64;

        for _ in 0..num_coders {
            let flags = read_u8(r)?;
            let id_size = (flags & 0x0F) as usize;
            let is_complex = flags & 0x10 != 0;
            let has_attributes = flags & 0x20 != 0;

            let method_id = read_bytes(r, id_size)?;
            let (num_in, num_out) = if is_complex {
                (read_number(r)?, read_number(r)?)
            } else {
                (1, 1)
            };
            if has_attributes {
                let props_size = read_number(r)? as usize;
                let _ = read_bytes(r, props_size)?;
            }

            total_in += num_in;
            total_out += num_out;
            coders.push(Coder {
                method_id,
                num_in_streams: num_in,
                num_out_streams: num_out,
            });
        }

        // Bind pairs connect coder outputs to inputs; we only need to consume
        // them and derive the packed stream count.
        let num_bind_pairs = total_out.saturating_sub(1);
        for _ in 0..num_bind_pairs {
            let _ = read_number(r)?;
            let _ = read_number(r)?;
        }

        let num_packed = total_in.saturating_sub(num_bind_pairs);
        if num_packed != 1 {
            for _ in 0..num_packed {
                let _ = read_number(r)?;
            }
        }

        Ok(Self {
            coders,
            num_packed_streams: num_packed,
            unpack_sizes: Vec::new(),
            unpack_crc: None,
        })
    }

    /// Total output streams across the coder chain.
    pub fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Size of the folder's final output (for Copy folders, also its packed
    /// size).
    pub fn unpacked_size(&self) -> u64 {
        self.unpack_sizes.last().copied().unwrap_or(0)
    }
}

/// Pack-stream layout.
#[derive(Debug, Clone, Default)]
pub struct PackInfo {
    /// Position of the first pack stream, relative to the end of the
    /// signature header
    pub pack_pos: u64,
    /// Size of each packed stream
    pub pack_sizes: Vec<u64>,
}

impl PackInfo {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let pack_pos = read_number(r)?;
        let num_streams = read_number(r)? as usize;

        let mut pack_sizes = Vec::new();
        loop {
            match read_u8(r)? {
                property::END => break,
                property::SIZE => {
                    pack_sizes.reserve(num_streams);
                    for _ in 0..num_streams {
                        pack_sizes.push(read_number(r)?);
                    }
                }
                property::CRC => {
                    let defined = read_all_or_bits(r, num_streams)?;
                    for has_crc in defined {
                        if has_crc {
                            let _ = read_u32_le(r)?;
                        }
                    }
                }
                other => {
                    return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                        "unexpected property {:#x} in pack info",
                        other
                    ))));
                }
            }
        }

        Ok(Self {
            pack_pos,
            pack_sizes,
        })
    }
}

/// Folder definitions.
#[derive(Debug, Clone, Default)]
pub struct UnpackInfo {
    /// Folders in archive order
    pub folders: Vec<Folder>,
}

impl UnpackInfo {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let mut folders = Vec::new();

        loop {
            match read_u8(r)? {
                property::END => break,
                property::FOLDER => {
                    let num_folders = read_number(r)?;
                    if num_folders > 1_000_000 {
                        return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                            "implausible folder count: {}",
                            num_folders
                        ))));
                    }
                    let external = read_u8(r)?;
                    if external != 0 {
                        return Err(Error::Archive(ArchiveError::InvalidFormat(
                            "external folder definitions are not supported".into(),
                        )));
                    }
                    for _ in 0..num_folders {
                        folders.push(Folder::parse(r)?);
                    }
                }
                property::CODERS_UNPACK_SIZE => {
                    for folder in &mut folders {
                        let count = folder.total_out_streams() as usize;
                        folder.unpack_sizes = Vec::with_capacity(count);
                        for _ in 0..count {
                            folder.unpack_sizes.push(read_number(r)?);
                        }
                    }
                }
                property::CRC => {
                    let defined = read_all_or_bits(r, folders.len())?;
                    for (folder, has_crc) in folders.iter_mut().zip(defined) {
                        if has_crc {
                            folder.unpack_crc = Some(read_u32_le(r)?);
                        }
                    }
                }
                other => {
                    return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                        "unexpected property {:#x} in unpack info",
                        other
                    ))));
                }
            }
        }

        Ok(Self { folders })
    }
}

/// Per-file stream layout within folders (solid archives pack several files
/// into one folder).
#[derive(Debug, Clone, Default)]
pub struct SubStreamsInfo {
    /// Number of files in each folder
    pub num_unpack_streams: Vec<u64>,
    /// Unpacked size of each substream, in file order
    pub unpack_sizes: Vec<u64>,
}

impl SubStreamsInfo {
    fn parse<R: Read>(r: &mut R, folders: &[Folder]) -> Result<Self> {
        let mut num_unpack_streams = vec![1u64; folders.len()];
        let mut unpack_sizes = Vec::new();

        loop {
            match read_u8(r)? {
                property::END => break,
                property::NUM_UNPACK_STREAM => {
                    for count in num_unpack_streams.iter_mut() {
                        *count = read_number(r)?;
                    }
                }
                property::SIZE => {
                    // n-1 sizes per folder; the last is implied by the folder size
                    for (folder, &count) in folders.iter().zip(num_unpack_streams.iter()) {
                        if count == 0 {
                            continue;
                        }
                        let mut remaining = folder.unpacked_size();
                        for _ in 0..count - 1 {
                            let size = read_number(r)?;
                            unpack_sizes.push(size);
                            remaining = remaining.saturating_sub(size);
                        }
                        unpack_sizes.push(remaining);
                    }
                }
                property::CRC => {
                    let mut needing = 0usize;
                    for (folder, &count) in folders.iter().zip(num_unpack_streams.iter()) {
                        if folder.unpack_crc.is_none() || count != 1 {
                            needing += count as usize;
                        }
                    }
                    let defined = read_all_or_bits(r, needing)?;
                    for has_crc in defined {
                        if has_crc {
                            let _ = read_u32_le(r)?;
                        }
                    }
                }
                other => {
                    return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                        "unexpected property {:#x} in substreams info",
                        other
                    ))));
                }
            }
        }

        if unpack_sizes.is_empty() {
            for (folder, &count) in folders.iter().zip(num_unpack_streams.iter()) {
                if count == 1 {
                    unpack_sizes.push(folder.unpacked_size());
                }
            }
        }

        Ok(Self {
            num_unpack_streams,
            unpack_sizes,
        })
    }
}

/// One file entry from the files-info section.
#[derive(Debug, Clone, Default)]
pub struct FileEntry {
    /// Path within the archive
    pub name: String,
    /// Whether the entry has a data stream
    pub has_stream: bool,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Unpacked size in bytes
    pub size: u64,
}

/// The files-info section: names, directory flags, and sizes.
#[derive(Debug, Clone, Default)]
pub struct FilesInfo {
    /// Entries in archive order
    pub entries: Vec<FileEntry>,
}

impl FilesInfo {
    fn parse<R: Read>(r: &mut R, stream_sizes: &[u64]) -> Result<Self> {
        let num_files = read_number(r)? as usize;
        if num_files > 1_000_000 {
            return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                "implausible file count: {}",
                num_files
            ))));
        }

        let mut entries: Vec<FileEntry> = (0..num_files).map(|_| FileEntry::default()).collect();
        let mut empty_streams = vec![false; num_files];
        let mut empty_files: Vec<bool> = Vec::new();

        loop {
            let prop_id = read_u8(r)?;
            if prop_id == property::END {
                break;
            }
            let prop_size = read_number(r)? as usize;

            match prop_id {
                property::NAME => {
                    let external = read_u8(r)?;
                    if external != 0 {
                        return Err(Error::Archive(ArchiveError::InvalidFormat(
                            "external file names are not supported".into(),
                        )));
                    }
                    for entry in &mut entries {
                        entry.name = read_utf16_name(r)?;
                    }
                }
                property::EMPTY_STREAM => {
                    empty_streams = read_bit_vector(r, num_files)?;
                }
                property::EMPTY_FILE => {
                    let num_empty = empty_streams.iter().filter(|&&e| e).count();
                    empty_files = read_bit_vector(r, num_empty)?;
                }
                property::ANTI => {
                    let num_empty = empty_streams.iter().filter(|&&e| e).count();
                    let _ = read_bit_vector(r, num_empty)?;
                }
                _ => {
                    // timestamps, attributes, comments — not needed for offsets
                    let _ = read_bytes(r, prop_size)?;
                }
            }
        }

        let mut empty_idx = 0;
        for (i, &is_empty) in empty_streams.iter().enumerate() {
            if is_empty {
                entries[i].has_stream = false;
                // An empty stream is a directory unless flagged as an empty file
                entries[i].is_directory = !empty_files.get(empty_idx).copied().unwrap_or(false);
                empty_idx += 1;
            } else {
                entries[i].has_stream = true;
            }
        }

        let mut stream_idx = 0;
        for entry in &mut entries {
            if entry.has_stream {
                entry.size = stream_sizes.get(stream_idx).copied().unwrap_or(0);
                stream_idx += 1;
            }
        }

        Ok(Self { entries })
    }
}

/// Fully parsed archive header.
#[derive(Debug, Clone, Default)]
pub struct ArchiveHeader {
    /// Pack-stream layout
    pub pack_info: Option<PackInfo>,
    /// Folder definitions
    pub unpack_info: Option<UnpackInfo>,
    /// Per-file stream layout
    pub substreams_info: Option<SubStreamsInfo>,
    /// File entries
    pub files_info: Option<FilesInfo>,
}

impl ArchiveHeader {
    /// The folders, or an empty slice.
    pub fn folders(&self) -> &[Folder] {
        self.unpack_info.as_ref().map_or(&[], |u| &u.folders)
    }

    /// Per-file sizes, preferring substream info over folder sizes.
    pub fn stream_sizes(&self) -> Vec<u64> {
        if let Some(sub) = &self.substreams_info {
            return sub.unpack_sizes.clone();
        }
        self.folders().iter().map(|f| f.unpacked_size()).collect()
    }

    /// Number of files in each folder (defaults to one per folder).
    pub fn streams_per_folder(&self) -> Vec<u64> {
        if let Some(sub) = &self.substreams_info {
            return sub.num_unpack_streams.clone();
        }
        vec![1; self.folders().len()]
    }
}

fn parse_streams_info<R: Read>(r: &mut R, header: &mut ArchiveHeader) -> Result<()> {
    loop {
        match read_u8(r)? {
            property::END => break,
            property::PACK_INFO => {
                header.pack_info = Some(PackInfo::parse(r)?);
            }
            property::UNPACK_INFO => {
                header.unpack_info = Some(UnpackInfo::parse(r)?);
            }
            property::SUBSTREAMS_INFO => {
                let folders = header.unpack_info.as_ref().map_or(&[][..], |u| &u.folders);
                header.substreams_info = Some(SubStreamsInfo::parse(r, folders)?);
            }
            other => {
                return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                    "unexpected property {:#x} in streams info",
                    other
                ))));
            }
        }
    }
    Ok(())
}

fn parse_main_header<R: Read>(r: &mut R) -> Result<ArchiveHeader> {
    let mut header = ArchiveHeader::default();
    loop {
        match read_u8(r)? {
            property::END => break,
            property::MAIN_STREAMS_INFO => {
                parse_streams_info(r, &mut header)?;
            }
            property::FILES_INFO => {
                let sizes = header.stream_sizes();
                header.files_info = Some(FilesInfo::parse(r, &sizes)?);
            }
            other => {
                return Err(Error::Archive(ArchiveError::InvalidFormat(format!(
                    "unexpected property {:#x} in header",
                    other
                ))));
            }
        }
    }
    Ok(header)
}

/// Reads a 7z archive's headers from a seekable reader.
///
/// Plain headers parse directly. Encoded headers are only followed when
/// their own coder chain is pure Copy (in which case the "encoded" bytes are
/// read verbatim); an encoded header using any real compression or an AES
/// coder fails with the corresponding permanent error, because a compressed
/// header already proves the archive cannot be byte-range addressed.
pub fn read_archive_header<R: Read + Seek>(r: &mut R) -> Result<ArchiveHeader> {
    r.seek(SeekFrom::Start(0))?;
    let start = StartHeader::parse(r)?;

    if start.next_header_size == 0 {
        return Ok(ArchiveHeader::default());
    }

    let header_pos = start.next_header_position();
    r.seek(SeekFrom::Start(header_pos))?;
    let header_data = read_bytes(r, start.next_header_size as usize)?;

    let actual = crc32fast::hash(&header_data);
    if actual != start.next_header_crc {
        return Err(Error::Archive(ArchiveError::CorruptHeader {
            offset: header_pos,
            reason: format!(
                "next header CRC mismatch: expected {:#x}, got {:#x}",
                start.next_header_crc, actual
            ),
        }));
    }

    let mut cursor = std::io::Cursor::new(&header_data[1..]);
    match header_data.first() {
        Some(&property::HEADER) => parse_main_header(&mut cursor),
        Some(&property::ENCODED_HEADER) => {
            let mut streams = ArchiveHeader::default();
            parse_streams_info(&mut cursor, &mut streams)?;
            read_copy_encoded_header(r, &streams)
        }
        Some(&other) => Err(Error::Archive(ArchiveError::InvalidFormat(format!(
            "expected header marker, got {:#x}",
            other
        )))),
        None => Err(Error::Archive(ArchiveError::InvalidFormat(
            "empty header data".into(),
        ))),
    }
}

/// Follows a Copy-coded encoded header; rejects anything that would need a
/// decoder.
fn read_copy_encoded_header<R: Read + Seek>(
    r: &mut R,
    streams: &ArchiveHeader,
) -> Result<ArchiveHeader> {
    for folder in streams.folders() {
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

    let pack_info = streams.pack_info.as_ref().ok_or_else(|| {
        Error::Archive(ArchiveError::InvalidFormat(
            "encoded header missing pack info".into(),
        ))
    })?;
    let pack_size = *pack_info.pack_sizes.first().ok_or_else(|| {
        Error::Archive(ArchiveError::InvalidFormat(
            "encoded header missing pack size".into(),
        ))
    })?;

    r.seek(SeekFrom::Start(SIGNATURE_HEADER_SIZE + pack_info.pack_pos))?;
    let inner = read_bytes(r, pack_size as usize)?;

    match inner.first() {
        Some(&property::HEADER) => {
            let mut cursor = std::io::Cursor::new(&inner[1..]);
            parse_main_header(&mut cursor)
        }
        _ => Err(Error::Archive(ArchiveError::InvalidFormat(
            "unexpected marker in encoded header payload".into(),
        ))),
    }
}
