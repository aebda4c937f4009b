//! Import dispatch and per-archive-type processing.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Processor;
use crate::archive::volumes;
use crate::archive::{RarAnalyzer, RarEntry, SevenZipAnalyzer};
use crate::error::{Error, ImportError, Result};
use crate::metadata::{FileMetadata, FileStatus};
use crate::segments::VolumeSet;
use crate::types::{ArchiveKind, ParsedArchive, ParsedFile};
use crate::utils;

/// Result of materializing one RAR set.
struct RarSetOutcome {
    files_written: usize,
    first_video: Option<String>,
    nested: Vec<ParsedFile>,
}

impl Processor {
    /// Imports a parsed archive, writing one virtual-file record per
    /// discovered file under a base directory derived from the manifest's
    /// location relative to `watch_root`.
    ///
    /// Returns the first-discovered playable file's virtual path when
    /// analysis found one (playback can start before the rest of the
    /// archive is materialized), otherwise the container directory path.
    ///
    /// Re-running an import over the same archive is safe: directory
    /// creation is a no-op when present and record writes overwrite by
    /// virtual path.
    pub async fn import(
        &self,
        archive: ParsedArchive,
        watch_root: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        archive.validate()?;
        if archive.kind == ArchiveKind::Strm && archive.files.len() != 1 {
            return Err(Error::Import(ImportError::StrmFileCount {
                count: archive.files.len(),
            }));
        }

        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let virtual_dir = self.virtual_directory(&archive.source_path, watch_root);
        info!(
            source = %archive.source_path,
            virtual_dir = %virtual_dir,
            kind = archive.kind.as_str(),
            total_size = archive.total_size,
            files = archive.files.len(),
            "processing manifest"
        );

        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        match archive.kind {
            ArchiveKind::SingleFile => self.process_single(&archive, &virtual_dir).await,
            ArchiveKind::MultiFile => self.process_multi(&archive, &virtual_dir).await,
            ArchiveKind::Rar => self.process_rar(&archive, &virtual_dir, cancel).await,
            ArchiveKind::SevenZip => self.process_sevenz(&archive, &virtual_dir, cancel).await,
            ArchiveKind::Strm => self.process_strm(&archive, &virtual_dir).await,
        }
    }

    /// Virtual base directory for a manifest: queue items land at the root,
    /// watched files mirror their position under the watch root.
    fn virtual_directory(&self, source_path: &str, watch_root: &str) -> String {
        let queue_marker_unix = format!("/{}/", self.config().queue_dir_name);
        let queue_marker_win = format!("\\{}\\", self.config().queue_dir_name);
        if source_path.contains(&queue_marker_unix) || source_path.contains(&queue_marker_win) {
            return "/".to_string();
        }

        if watch_root.is_empty() {
            return "/".to_string();
        }

        let normalized = source_path.replace('\\', "/");
        let root = watch_root.replace('\\', "/");
        let root = root.trim_end_matches('/');

        let Some(rel) = normalized.strip_prefix(root) else {
            return "/".to_string();
        };
        let rel = rel.trim_start_matches('/');
        match utils::relative_dir(rel) {
            Some(dir) => utils::join_virtual("/", dir),
            None => "/".to_string(),
        }
    }

    async fn process_single(&self, archive: &ParsedArchive, virtual_dir: &str) -> Result<String> {
        let file = archive
            .files
            .iter()
            .find(|f| !utils::is_par2_file(&f.name))
            .ok_or(Error::Import(ImportError::NoFiles))?;

        self.ensure_directory(virtual_dir).await?;

        let virtual_path = utils::join_virtual(virtual_dir, &file.name);
        self.write_record(&virtual_path, file, &archive.source_path)
            .await?;

        info!(
            file = %file.name,
            virtual_path = %virtual_path,
            size = file.size,
            "imported single-file manifest"
        );
        Ok(virtual_path)
    }

    async fn process_multi(&self, archive: &ParsedArchive, virtual_dir: &str) -> Result<String> {
        let container = utils::join_virtual(virtual_dir, utils::strip_extension(&archive.filename));

        let regular: Vec<&ParsedFile> = archive
            .files
            .iter()
            .filter(|f| !utils::is_par2_file(&f.name))
            .collect();

        for dir in directory_paths(&regular, &container) {
            self.ensure_directory(&dir).await?;
        }
        self.ensure_directory(&container).await?;

        for file in &regular {
            let (parent, name) = file_location(file, &container);
            self.ensure_directory(&parent).await?;
            let virtual_path = utils::join_virtual(&parent, name);
            self.write_record(&virtual_path, file, &archive.source_path)
                .await?;
            debug!(file = %name, virtual_path = %virtual_path, size = file.size, "created record");
        }

        info!(
            container = %container,
            files = regular.len(),
            "imported multi-file manifest"
        );
        Ok(container)
    }

    async fn process_rar(
        &self,
        archive: &ParsedArchive,
        virtual_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let container = utils::join_virtual(virtual_dir, utils::strip_extension(&archive.filename));

        let (rar_parts, rest): (Vec<ParsedFile>, Vec<ParsedFile>) = archive
            .files
            .iter()
            .cloned()
            .partition(|f| f.is_rar_part);
        let regular: Vec<ParsedFile> = rest
            .into_iter()
            .filter(|f| !utils::is_par2_file(&f.name))
            .collect();

        self.write_regular_files(&regular, &container, &archive.source_path)
            .await?;

        if rar_parts.is_empty() {
            return Ok(container);
        }

        info!(
            archive = %archive.filename,
            parts = rar_parts.len(),
            container = %container,
            "analyzing RAR archive progressively"
        );

        let mut outcome = self
            .materialize_rar_set(rar_parts, &container, &archive.source_path, 1, cancel)
            .await?;

        // Nested archives found on the first pass are only worth a second
        // pass when the top level produced nothing playable.
        if outcome.first_video.is_none() && !outcome.nested.is_empty() {
            info!(
                nested = outcome.nested.len(),
                container = %container,
                "processing nested RAR archives"
            );
            let nested_parts = std::mem::take(&mut outcome.nested);
            match self
                .materialize_rar_set(nested_parts, &container, &archive.source_path, 2, cancel)
                .await
            {
                Ok(nested_outcome) => {
                    if nested_outcome.first_video.is_some() {
                        outcome.first_video = nested_outcome.first_video;
                    }
                    outcome.files_written += nested_outcome.files_written;
                }
                Err(e) if matches!(e, Error::Canceled) => return Err(e),
                Err(e) => {
                    warn!(error = %e, "failed to process nested RAR archives");
                }
            }
        }

        info!(
            archive = %archive.filename,
            files = outcome.files_written,
            first_video = outcome.first_video.as_deref().unwrap_or(""),
            "RAR archive materialized"
        );

        match outcome.first_video {
            Some(path) => Ok(path),
            None => Ok(container),
        }
    }

    /// Runs one progressive analysis pass over a RAR volume set, writing a
    /// record per emitted entry. Entry-level failures are logged and
    /// skipped; materialization is best-effort per entry.
    async fn materialize_rar_set(
        &self,
        parts: Vec<ParsedFile>,
        dir: &str,
        source: &str,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<RarSetOutcome> {
        let sorted = volumes::rename_rar_volumes(&parts);
        let names: Vec<String> = sorted.iter().map(|f| f.name.clone()).collect();
        let main = volumes::first_rar_part(&names)?;
        let settings = self.analyzer_settings().await;

        debug!(
            main = %main,
            parts = sorted.len(),
            depth,
            "starting RAR volume scan"
        );

        let (tx, mut rx) = mpsc::channel::<RarEntry>(32);
        let volume_set = VolumeSet::new(self.fetch().clone(), sorted);
        let analyzer = RarAnalyzer::new((*settings).clone());
        let scan_cancel = cancel.clone();
        let scan = tokio::task::spawn_blocking(move || {
            analyzer.analyze(&volume_set, &scan_cancel, move |entry| {
                tx.blocking_send(entry).is_ok()
            })
        });

        let max_depth = self.config().max_nested_depth;
        let mut outcome = RarSetOutcome {
            files_written: 0,
            first_video: None,
            nested: Vec::new(),
        };

        while let Some(entry) = rx.recv().await {
            if entry.is_directory {
                debug!(path = %entry.internal_path, "skipping directory in RAR archive");
                continue;
            }

            if utils::is_rar_file(&entry.name) {
                if depth >= max_depth {
                    warn!(
                        file = %entry.name,
                        internal_path = %entry.internal_path,
                        "deeply nested RAR (level {}+) skipped",
                        max_depth + 1
                    );
                } else {
                    info!(
                        file = %entry.name,
                        internal_path = %entry.internal_path,
                        size = entry.size,
                        "found nested RAR inside archive"
                    );
                    outcome.nested.push(ParsedFile {
                        name: entry.name.clone(),
                        size: entry.size,
                        segments: entry.segments.clone(),
                        is_rar_part: true,
                        is_sevenz_part: false,
                        encryption: None,
                    });
                }
                continue;
            }

            let virtual_path = utils::join_virtual(dir, &entry.internal_path);
            let parent = utils::parent_virtual(&virtual_path).to_string();
            if let Err(e) = self.ensure_directory(&parent).await {
                warn!(file = %entry.name, error = %e, "failed to create parent directory");
                continue;
            }

            let meta = FileMetadata::new(
                entry.size,
                source,
                FileStatus::Healthy,
                entry.segments.clone(),
                None,
            );
            if let Err(e) = self.store().write_file_metadata(&virtual_path, meta).await {
                warn!(file = %entry.name, error = %e, "failed to write record");
                continue;
            }
            outcome.files_written += 1;

            let is_video = utils::is_video_file(&entry.name);
            debug!(
                file = %entry.name,
                virtual_path = %virtual_path,
                size = entry.size,
                is_video,
                segments = entry.segments.len(),
                "created record for RAR entry"
            );

            if is_video && outcome.first_video.is_none() {
                info!(
                    file = %entry.name,
                    path = %virtual_path,
                    "first video file discovered, playback can start"
                );
                outcome.first_video = Some(virtual_path);
            }
        }

        scan.await
            .map_err(|e| Error::Other(format!("RAR analysis task failed: {}", e)))??;

        Ok(outcome)
    }

    async fn process_sevenz(
        &self,
        archive: &ParsedArchive,
        virtual_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let container = utils::join_virtual(virtual_dir, utils::strip_extension(&archive.filename));

        let (sz_parts, rest): (Vec<ParsedFile>, Vec<ParsedFile>) = archive
            .files
            .iter()
            .cloned()
            .partition(|f| f.is_sevenz_part);
        let regular: Vec<ParsedFile> = rest
            .into_iter()
            .filter(|f| !utils::is_par2_file(&f.name))
            .collect();

        self.write_regular_files(&regular, &container, &archive.source_path)
            .await?;

        if sz_parts.is_empty() {
            return Ok(container);
        }

        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let sorted = volumes::rename_sevenz_volumes(&sz_parts);
        let names: Vec<String> = sorted.iter().map(|f| f.name.clone()).collect();
        let main = volumes::first_sevenz_part(&names)?;
        let settings = self.analyzer_settings().await;

        info!(
            archive = %archive.filename,
            main = %main,
            parts = sorted.len(),
            container = %container,
            "analyzing 7z archive"
        );

        let volume_set = VolumeSet::new(self.fetch().clone(), sorted);
        let analyzer = SevenZipAnalyzer::new((*settings).clone());
        let info = tokio::task::spawn_blocking(move || analyzer.analyze(&volume_set))
            .await
            .map_err(|e| Error::Other(format!("7z analysis task failed: {}", e)))??;

        let mut first_video: Option<String> = None;
        let mut files_written = 0usize;

        for entry in &info.entries {
            let virtual_path = utils::join_virtual(&container, &entry.internal_path);
            let parent = utils::parent_virtual(&virtual_path).to_string();
            if let Err(e) = self.ensure_directory(&parent).await {
                warn!(file = %entry.name, error = %e, "failed to create parent directory");
                continue;
            }

            let meta = FileMetadata::new(
                entry.size,
                &archive.source_path,
                FileStatus::Healthy,
                entry.segments.clone(),
                None,
            );
            if let Err(e) = self.store().write_file_metadata(&virtual_path, meta).await {
                warn!(file = %entry.name, error = %e, "failed to write record");
                continue;
            }
            files_written += 1;

            let is_video = utils::is_video_file(&entry.name);
            debug!(
                file = %entry.name,
                virtual_path = %virtual_path,
                offset = entry.offset,
                size = entry.size,
                is_video,
                "created record for 7z entry"
            );

            if is_video && first_video.is_none() {
                info!(
                    file = %entry.name,
                    path = %virtual_path,
                    "first video file discovered, playback can start"
                );
                first_video = Some(virtual_path);
            }
        }

        info!(
            archive = %archive.filename,
            files = files_written,
            "7z archive materialized"
        );

        match first_video {
            Some(path) => Ok(path),
            None => Ok(container),
        }
    }

    async fn process_strm(&self, archive: &ParsedArchive, virtual_dir: &str) -> Result<String> {
        // Count validated at dispatch; a strm wraps exactly one file
        let file = archive
            .files
            .first()
            .ok_or(Error::Import(ImportError::NoFiles))?;

        self.ensure_directory(virtual_dir).await?;

        let virtual_path = utils::join_virtual(virtual_dir, &file.name);
        self.write_record(&virtual_path, file, &archive.source_path)
            .await?;

        info!(
            file = %file.name,
            virtual_path = %virtual_path,
            size = file.size,
            segments = file.segments.len(),
            "imported strm manifest"
        );
        Ok(virtual_dir.to_string())
    }

    /// Writes records for the non-archive files accompanying an archive
    /// (samples, subtitles, a loose video next to the volumes).
    async fn write_regular_files(
        &self,
        regular: &[ParsedFile],
        container: &str,
        source: &str,
    ) -> Result<()> {
        if regular.is_empty() {
            return Ok(());
        }

        let refs: Vec<&ParsedFile> = regular.iter().collect();
        for dir in directory_paths(&refs, container) {
            self.ensure_directory(&dir).await?;
        }
        self.ensure_directory(container).await?;

        for file in regular {
            let (parent, name) = file_location(file, container);
            self.ensure_directory(&parent).await?;
            let virtual_path = utils::join_virtual(&parent, name);
            self.write_record(&virtual_path, file, source).await?;
            debug!(file = %name, virtual_path = %virtual_path, "created record for regular file");
        }
        Ok(())
    }

    async fn write_record(
        &self,
        virtual_path: &str,
        file: &ParsedFile,
        source: &str,
    ) -> Result<()> {
        let meta = FileMetadata::new(
            file.size,
            source,
            FileStatus::Healthy,
            file.segments.clone(),
            file.encryption.clone(),
        );
        self.store().write_file_metadata(virtual_path, meta).await
    }

    /// Materializes a virtual directory in the metadata filesystem.
    /// Creation is a no-op when the directory already exists; failures are
    /// retryable I/O errors.
    async fn ensure_directory(&self, virtual_dir: &str) -> Result<()> {
        if virtual_dir == "/" {
            return Ok(());
        }
        let path = self.store().metadata_directory_path(virtual_dir);
        tokio::fs::create_dir_all(&path).await?;
        Ok(())
    }
}

/// Distinct directory paths implied by the files' relative prefixes, in
/// deterministic order.
fn directory_paths(files: &[&ParsedFile], base: &str) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for file in files {
        if let Some(dir) = utils::relative_dir(&file.name) {
            dirs.insert(utils::join_virtual(base, dir));
        }
    }
    dirs.into_iter().collect()
}

/// Placement of one file within the container: its relative directory when
/// it has one, otherwise the container itself.
fn file_location<'a>(file: &'a ParsedFile, base: &str) -> (String, &'a str) {
    let name = utils::file_name(&file.name);
    match utils::relative_dir(&file.name) {
        Some(dir) => (utils::join_virtual(base, dir), name),
        None => (base.to_string(), name),
    }
}
