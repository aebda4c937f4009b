//! # nzb-vfs
//!
//! Library for importing release archives delivered as segment manifests
//! (NZB-style) and making their contents playable as ordinary seekable
//! files — without downloading or decompressing the archive.
//!
//! ## Design Philosophy
//!
//! - **Never materialize** - archives are analyzed structurally; only
//!   metadata records are written
//! - **Store-mode only** - byte-offset addressing requires uncompressed
//!   archive entries; anything compressed or encrypted fails permanently
//! - **Library-first** - no CLI or network layer, purely a Rust crate for
//!   embedding; manifest parsing, article fetching, and the streaming
//!   surface are collaborator traits
//! - **Classified failures** - every error is retryable or permanent, so an
//!   external queue layer knows whether to re-attempt
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nzb_vfs::{
//!     FsMetadataStore, ImportConfig, MemorySegmentFetch, Processor,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(archive: nzb_vfs::ParsedArchive) -> nzb_vfs::Result<()> {
//! let store = Arc::new(FsMetadataStore::new("/var/lib/nzb-vfs/metadata"));
//! let fetch = Arc::new(MemorySegmentFetch::new());
//! let processor = Processor::new(store, fetch, ImportConfig::default());
//!
//! let cancel = CancellationToken::new();
//! let path = processor.import(archive, "/watch", &cancel).await?;
//! println!("playable at {}", path);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive content analyzers (RAR, 7z)
pub mod archive;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Import processor and worker pool
pub mod import;
/// Virtual-file metadata records and store interface
pub mod metadata;
/// Segment math and byte access to manifest files
pub mod segments;
/// Candidate selection for multi-file releases
pub mod selection;
/// Core manifest types
pub mod types;
/// Virtual-path helpers and filename classification
pub mod utils;


// Re-export commonly used types
pub use archive::{RarAnalyzer, RarEntry, SevenZipAnalyzer, SevenZipArchiveInfo, SevenZipEntry};
pub use config::{AnalyzerConfig, ImportConfig};
pub use error::{ArchiveError, Error, ImportError, Result};
pub use import::{ImportPool, Processor};
pub use metadata::{FileMetadata, FileStatus, FsMetadataStore, MetadataStore};
pub use segments::{MemorySegmentFetch, SegmentFetch, VolumeSet};
pub use selection::{Candidate, Selection, SelectionHints, select_best_candidate};
pub use types::{ArchiveKind, Encryption, ParsedArchive, ParsedFile, Segment};
