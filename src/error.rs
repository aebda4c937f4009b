//! Error types for nzb-vfs
//!
//! Every failure in the import pipeline classifies as either **retryable**
//! (transient I/O, cancellation) or **non-retryable** (malformed input,
//! unsupported compression or encryption, validation failures — the same
//! bytes will never succeed). Callers such as an external retry/queue layer
//! use [`Error::is_retryable`] to decide whether to re-attempt.

use thiserror::Error;

/// Result type alias for nzb-vfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nzb-vfs
#[derive(Debug, Error)]
pub enum Error {
    /// Import pipeline error
    #[error("import error: {0}")]
    Import(#[from] ImportError),

    /// Archive analysis error (RAR or 7z structural parsing)
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// The parsed manifest failed validation
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// I/O error (directory creation, metadata writes)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was canceled via its cancellation token
    #[error("operation canceled")]
    Canceled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Import-processor errors
#[derive(Debug, Error)]
pub enum ImportError {
    /// The archive carries a kind the processor cannot dispatch
    #[error("unknown archive kind: {kind}")]
    UnknownKind {
        /// The unrecognized kind tag
        kind: String,
    },

    /// A strm manifest must describe exactly one file
    #[error("strm manifest must contain exactly one file, got {count}")]
    StrmFileCount {
        /// Number of files the manifest actually contained
        count: usize,
    },

    /// The manifest contains no importable files
    #[error("manifest contains no importable files")]
    NoFiles,
}

/// Archive-analyzer errors
///
/// The 7z variants mirror the streaming model's hard constraints: byte-offset
/// addressing is only possible when every coder is the identity/store method,
/// and encrypted payloads cannot be ranged into at all.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The 7z archive contains at least one non-Copy coder
    #[error(
        "7z archive uses {method} compression; only uncompressed (store mode) archives are supported for streaming"
    )]
    SevenZipCompressed {
        /// Human-readable name of the offending compression method
        method: String,
    },

    /// The 7z archive (or its header) is encrypted
    #[error("encrypted 7z archives are not supported for streaming")]
    SevenZipEncrypted,

    /// The RAR archive is encrypted
    #[error("encrypted RAR archives are not supported for streaming")]
    RarEncrypted,

    /// Every entry in the RAR set was compressed or otherwise unreadable
    #[error(
        "no streamable files found in RAR archive; compressed or encrypted RARs are not supported"
    )]
    RarNoStreamableFiles,

    /// No volume files were provided to the analyzer
    #[error("no archive volumes provided")]
    NoVolumes,

    /// No valid first volume could be identified among the provided parts
    #[error("no valid first volume found in archive set")]
    NoFirstVolume,

    /// A referenced volume is missing from the manifest's file list
    #[error("volume {name} not found among manifest files")]
    VolumeNotFound {
        /// The volume filename that could not be resolved
        name: String,
    },

    /// Structurally invalid archive data
    #[error("invalid archive format: {0}")]
    InvalidFormat(String),

    /// A header failed CRC or bounds validation
    #[error("corrupt archive header at offset {offset}: {reason}")]
    CorruptHeader {
        /// Byte offset of the failing structure
        offset: u64,
        /// What failed
        reason: String,
    },
}

impl Error {
    /// Whether an external retry layer should re-attempt the operation.
    ///
    /// Transient I/O and cancellation are retryable; parse, validation, and
    /// unsupported-format failures are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Canceled)
    }
}
