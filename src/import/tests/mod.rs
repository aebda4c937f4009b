//! Import processor tests: dispatch, virtual placement, idempotency, and
//! the nested-archive recursion policy.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{AnalyzerConfig, ImportConfig};
use crate::error::{ArchiveError, Error, ImportError};
use crate::import::{ImportPool, Processor};
use crate::metadata::FsMetadataStore;
use crate::segments::MemorySegmentFetch;
use crate::test_fixtures::{RAR4_NORMAL, Rar4Entry, build_rar4, volume_file};
use crate::types::{ArchiveKind, ParsedArchive, ParsedFile, Segment};

struct TestEnv {
    store: Arc<FsMetadataStore>,
    processor: Processor,
    _dir: tempfile::TempDir,
}

fn env() -> TestEnv {
    env_with_fetch(MemorySegmentFetch::new())
}

fn env_with_fetch(fetch: MemorySegmentFetch) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsMetadataStore::new(dir.path()));
    let processor = Processor::new(store.clone(), Arc::new(fetch), ImportConfig::default());
    TestEnv {
        store,
        processor,
        _dir: dir,
    }
}

/// A plain manifest file whose single segment covers its declared size.
fn simple_file(name: &str, size: u64) -> ParsedFile {
    ParsedFile {
        name: name.to_string(),
        size,
        segments: vec![Segment {
            message_id: format!("{}@test", name),
            start_offset: 0,
            end_offset: size - 1,
            article_size: size,
        }],
        is_rar_part: false,
        is_sevenz_part: false,
        encryption: None,
    }
}

fn archive(kind: ArchiveKind, filename: &str, source: &str, files: Vec<ParsedFile>) -> ParsedArchive {
    ParsedArchive {
        kind,
        filename: filename.to_string(),
        source_path: source.to_string(),
        total_size: files.iter().map(|f| f.size).sum(),
        files,
    }
}

// -- placement and dispatch --------------------------------------------------

#[tokio::test]
async fn single_file_lands_at_watch_root() {
    let env = env();
    let a = archive(
        ArchiveKind::SingleFile,
        "movie.nzb",
        "/watch/movie.nzb",
        vec![simple_file("Movie.2024.mkv", 100), simple_file("repair.par2", 10)],
    );

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(path, "/Movie.2024.mkv");
    assert!(env.store.contains("/Movie.2024.mkv"));
    assert!(!env.store.contains("/repair.par2"));

    let meta = env.store.read_file_metadata(&path).await.unwrap();
    assert_eq!(meta.file_size, 100);
    assert_eq!(meta.source_manifest_path, "/watch/movie.nzb");
}

#[tokio::test]
async fn watch_subdirectory_maps_into_virtual_tree() {
    let env = env();
    let a = archive(
        ArchiveKind::SingleFile,
        "release.nzb",
        "/watch/tv/show/release.nzb",
        vec![simple_file("episode.mkv", 50)],
    );

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(path, "/tv/show/episode.mkv");
    assert!(env.store.contains("/tv/show/episode.mkv"));
}

#[tokio::test]
async fn queue_items_map_to_virtual_root() {
    let env = env();
    let a = archive(
        ArchiveKind::SingleFile,
        "queued.nzb",
        "/tmp/nzbvfs-queue/queued.nzb",
        vec![simple_file("queued.mkv", 10)],
    );

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(path, "/queued.mkv");
}

#[tokio::test]
async fn invalid_manifest_is_permanent_error() {
    let env = env();
    let mut file = simple_file("movie.mkv", 100);
    file.size = 200; // segments no longer cover the declared size
    let a = archive(ArchiveKind::SingleFile, "m.nzb", "/watch/m.nzb", vec![file]);

    let err = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidManifest(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn cancellation_aborts_before_processing() {
    let env = env();
    let a = archive(
        ArchiveKind::SingleFile,
        "m.nzb",
        "/watch/m.nzb",
        vec![simple_file("movie.mkv", 10)],
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = env.processor.import(a, "/watch", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert!(err.is_retryable());
    assert!(!env.store.contains("/movie.mkv"));
}

// -- multi-file --------------------------------------------------------------

#[tokio::test]
async fn multi_file_builds_container_and_subdirectories() {
    let env = env();
    let a = archive(
        ArchiveKind::MultiFile,
        "Some.Release.nzb",
        "/watch/Some.Release.nzb",
        vec![
            simple_file("Show.S01E01.mkv", 100),
            simple_file("Subs/Show.S01E01.srt", 20),
            simple_file("repair.vol01+02.par2", 5),
        ],
    );

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(path, "/Some.Release");
    assert!(env.store.contains("/Some.Release/Show.S01E01.mkv"));
    assert!(env.store.contains("/Some.Release/Subs/Show.S01E01.srt"));
    assert!(!env.store.contains("/Some.Release/repair.vol01+02.par2"));
}

#[tokio::test]
async fn importing_twice_is_idempotent() {
    let env = env();
    let make = || {
        archive(
            ArchiveKind::MultiFile,
            "Pack.nzb",
            "/watch/Pack.nzb",
            vec![
                simple_file("e1.mkv", 10),
                simple_file("Subs/e1.srt", 2),
            ],
        )
    };

    let first = env
        .processor
        .import(make(), "/watch", &CancellationToken::new())
        .await
        .unwrap();
    let second = env
        .processor
        .import(make(), "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(
        env.store.list_directory("/Pack").unwrap(),
        vec!["e1.mkv"]
    );
    assert_eq!(
        env.store.list_directory("/Pack/Subs").unwrap(),
        vec!["e1.srt"]
    );
}

// -- strm --------------------------------------------------------------------

#[tokio::test]
async fn strm_requires_exactly_one_file() {
    let env = env();
    let a = archive(
        ArchiveKind::Strm,
        "link.strm",
        "/watch/link.strm",
        vec![simple_file("a.mkv", 1), simple_file("b.mkv", 1)],
    );

    let err = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Import(ImportError::StrmFileCount { count: 2 })
    ));
}

#[tokio::test]
async fn strm_writes_record_and_returns_directory() {
    let env = env();
    let a = archive(
        ArchiveKind::Strm,
        "link.strm",
        "/watch/link.strm",
        vec![simple_file("remote.mkv", 77)],
    );

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(path, "/");
    assert!(env.store.contains("/remote.mkv"));
}

// -- RAR ---------------------------------------------------------------------

/// Builds a fetch + archive pair around a single RAR volume.
fn rar_archive(volume_bytes: Vec<u8>, extra: Vec<ParsedFile>) -> (MemorySegmentFetch, ParsedArchive) {
    let mut fetch = MemorySegmentFetch::new();
    let volume = volume_file("Show.Pack.rar", &volume_bytes);
    fetch.insert_file(&volume, &volume_bytes);

    let mut files = vec![volume];
    files.extend(extra);
    let a = ParsedArchive {
        kind: ArchiveKind::Rar,
        filename: "Show.Pack.nzb".to_string(),
        source_path: "/watch/Show.Pack.nzb".to_string(),
        total_size: files.iter().map(|f| f.size).sum(),
        files,
    };
    (fetch, a)
}

#[tokio::test]
async fn rar_import_returns_first_video_and_writes_regular_files() {
    let video = vec![0xEEu8; 120];
    let volume = build_rar4(&[
        Rar4Entry::stored("Sample/preview.jpg", &[1, 2, 3]),
        Rar4Entry::stored("Show.S01E01.mkv", &video),
    ]);
    let (fetch, a) = rar_archive(volume, vec![simple_file("info.nfo", 9)]);
    let env = env_with_fetch(fetch);

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(path, "/Show.Pack/Show.S01E01.mkv");
    assert!(env.store.contains("/Show.Pack/Show.S01E01.mkv"));
    assert!(env.store.contains("/Show.Pack/Sample/preview.jpg"));
    assert!(env.store.contains("/Show.Pack/info.nfo"));

    let meta = env
        .store
        .read_file_metadata("/Show.Pack/Show.S01E01.mkv")
        .await
        .unwrap();
    assert_eq!(meta.file_size, 120);
    assert!(!meta.segments.is_empty());
}

#[tokio::test]
async fn nested_rar_is_analyzed_when_top_level_has_no_video() {
    let video = vec![0x99u8; 80];
    let inner = build_rar4(&[Rar4Entry::stored("episode.mkv", &video)]);
    let outer = build_rar4(&[Rar4Entry::stored("inner.rar", &inner)]);
    let (fetch, a) = rar_archive(outer, vec![]);
    let env = env_with_fetch(fetch);

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(path, "/Show.Pack/episode.mkv");
    let meta = env
        .store
        .read_file_metadata("/Show.Pack/episode.mkv")
        .await
        .unwrap();
    assert_eq!(meta.file_size, 80);
    // The nested archive itself is never materialized as a virtual file
    assert!(!env.store.contains("/Show.Pack/inner.rar"));
}

#[tokio::test]
async fn third_level_nested_rar_is_skipped_not_recursed() {
    let video = vec![0x44u8; 60];
    let innermost = build_rar4(&[Rar4Entry::stored("episode.mkv", &video)]);
    let mid = build_rar4(&[Rar4Entry::stored("deep.rar", &innermost)]);
    let outer = build_rar4(&[Rar4Entry::stored("mid.rar", &mid)]);
    let (fetch, a) = rar_archive(outer, vec![]);
    let env = env_with_fetch(fetch);

    let path = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap();

    // Level 3 is never recursed into: no video surfaces and the container
    // directory comes back instead
    assert_eq!(path, "/Show.Pack");
    assert!(!env.store.contains("/Show.Pack/episode.mkv"));
    assert!(!env.store.contains("/Show.Pack/deep.rar"));
    assert!(!env.store.contains("/Show.Pack/mid.rar"));
}

#[tokio::test]
async fn compressed_rar_import_fails_permanently() {
    let data = vec![0u8; 40];
    let volume = build_rar4(&[Rar4Entry {
        name: "movie.mkv",
        content: &data,
        unpacked: 40,
        method: RAR4_NORMAL,
        flags: 0x8000,
    }]);
    let (fetch, a) = rar_archive(volume, vec![]);
    let env = env_with_fetch(fetch);

    let err = env
        .processor
        .import(a, "/watch", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::RarNoStreamableFiles)
    ));
    assert!(!err.is_retryable());
}

// -- analyzer settings -------------------------------------------------------

#[tokio::test]
async fn analyzer_settings_reload_swaps_snapshot() {
    let env = env();

    let before = env.processor.analyzer_settings().await;
    assert_eq!(before.max_workers, 40);

    // Same settings: snapshot pointer is unchanged
    env.processor
        .reload_analyzer_settings(AnalyzerConfig::default())
        .await;
    let unchanged = env.processor.analyzer_settings().await;
    assert!(Arc::ptr_eq(&before, &unchanged));

    // Different settings: snapshot is swapped
    let desired = AnalyzerConfig {
        max_workers: 8,
        ..AnalyzerConfig::default()
    };
    env.processor.reload_analyzer_settings(desired).await;
    let after = env.processor.analyzer_settings().await;
    assert_eq!(after.max_workers, 8);
    assert!(!Arc::ptr_eq(&before, &after));
}

// -- worker pool -------------------------------------------------------------

#[tokio::test]
async fn import_pool_runs_spawned_imports() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsMetadataStore::new(dir.path()));
    let processor = Arc::new(Processor::new(
        store.clone(),
        Arc::new(MemorySegmentFetch::new()),
        ImportConfig::default(),
    ));
    let pool = ImportPool::new(processor);

    let a = archive(
        ArchiveKind::SingleFile,
        "pooled.nzb",
        "/watch/pooled.nzb",
        vec![simple_file("pooled.mkv", 5)],
    );

    let handle = pool.spawn(a, "/watch".to_string(), CancellationToken::new());
    let path = handle.await.unwrap().unwrap();
    assert_eq!(path, "/pooled.mkv");
    assert!(store.contains("/pooled.mkv"));
}
