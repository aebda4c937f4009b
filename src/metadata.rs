//! Virtual-file metadata records and the store interface.
//!
//! A [`FileMetadata`] record is the only durable artifact of the import
//! pipeline: it maps a virtual path to everything the streaming layer needs
//! to serve the file's bytes (segment list, size, source manifest). Records
//! are created once per discovered file and never mutated afterwards except
//! for status transitions performed by a separate health subsystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Encryption, Segment};

/// Health status of a virtual file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// All segments are believed fetchable
    Healthy,
    /// One or more segments failed a health check
    Unhealthy,
    /// The source articles are gone
    Missing,
}

/// The persisted virtual-file record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File size in bytes
    pub file_size: u64,
    /// Path of the manifest this file came from
    pub source_manifest_path: String,
    /// Health status
    pub status: FileStatus,
    /// Ordered segments backing the file's bytes
    pub segments: Vec<Segment>,
    /// Optional encryption metadata carried over from the manifest
    #[serde(default)]
    pub encryption: Option<Encryption>,
    /// Creation time (unix seconds)
    pub created_at: i64,
    /// Last modification time (unix seconds)
    pub modified_at: i64,
}

impl FileMetadata {
    /// Builds a new record stamped with the current time.
    pub fn new(
        file_size: u64,
        source_manifest_path: impl Into<String>,
        status: FileStatus,
        segments: Vec<Segment>,
        encryption: Option<Encryption>,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            file_size,
            source_manifest_path: source_manifest_path.into(),
            status,
            segments,
            encryption,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Store interface the import pipeline writes through.
///
/// Implemented by the embedding application's metadata subsystem. Writes
/// must overwrite by virtual path so that re-importing an archive is
/// idempotent.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persists a record under the given virtual path, overwriting any
    /// existing record at that path.
    async fn write_file_metadata(&self, virtual_path: &str, meta: FileMetadata) -> Result<()>;

    /// Real filesystem directory backing a virtual directory, used by the
    /// processor to materialize the directory tree with `create_dir_all`.
    fn metadata_directory_path(&self, virtual_dir: &str) -> PathBuf;
}

/// Filesystem-backed [`MetadataStore`]: one JSON document per virtual file
/// under a metadata root directory.
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    /// Creates a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, virtual_path: &str) -> PathBuf {
        let rel = virtual_path.trim_start_matches('/');
        self.root.join(format!("{}.meta.json", rel))
    }

    /// Reads a record back, primarily for the streaming layer and tests.
    pub async fn read_file_metadata(&self, virtual_path: &str) -> Result<FileMetadata> {
        let bytes = tokio::fs::read(self.record_path(virtual_path)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether a record exists at the given virtual path.
    pub fn contains(&self, virtual_path: &str) -> bool {
        self.record_path(virtual_path).is_file()
    }

    /// Lists the record names directly under a virtual directory.
    pub fn list_directory(&self, virtual_dir: &str) -> Result<Vec<String>> {
        let dir = self.metadata_directory_path(virtual_dir);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".meta.json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn write_file_metadata(&self, virtual_path: &str, meta: FileMetadata) -> Result<()> {
        let path = self.record_path(virtual_path);
        let json = serde_json::to_vec_pretty(&meta)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }

    fn metadata_directory_path(&self, virtual_dir: &str) -> PathBuf {
        let rel = virtual_dir.trim_start_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(Path::new(rel))
        }
    }
}
