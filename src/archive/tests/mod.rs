//! Analyzer tests over synthesized store-mode archives.
//!
//! Fixtures build minimal RAR4/RAR5/7z archives byte-by-byte, wrap them in
//! manifest files whose segments chop the volume into small articles, and
//! verify that the analyzers' segment mappings reproduce the original file
//! contents exactly.

use tokio_util::sync::CancellationToken;

use crate::archive::volumes;
use crate::archive::{RarAnalyzer, SevenZipAnalyzer};
use crate::error::{ArchiveError, Error};
use crate::test_fixtures::{
    RAR4_NORMAL, RAR4_STORE, Rar4Entry, SevenZipFixture, analyzer_settings, build_7z, build_rar4,
    build_rar5, volume_set,
};
use crate::types::ParsedFile;

// ---------------------------------------------------------------------------
// Volume naming and ordering
// ---------------------------------------------------------------------------

#[test]
fn rar_part_numbers_are_numeric() {
    assert_eq!(volumes::rar_part_number("x.part1.rar"), 0);
    assert_eq!(volumes::rar_part_number("x.part2.rar"), 1);
    assert_eq!(volumes::rar_part_number("x.part10.rar"), 9);
    assert_eq!(volumes::rar_part_number("x.rar"), 0);
    assert_eq!(volumes::rar_part_number("x.r00"), 0);
    assert_eq!(volumes::rar_part_number("x.r07"), 7);
    assert_eq!(volumes::rar_part_number("x.001"), 0);
    assert_eq!(volumes::rar_part_number("x.002"), 1);
}

#[test]
fn rar_volume_ordering_is_numeric_not_lexical() {
    let files: Vec<ParsedFile> = ["x.part2.rar", "x.part10.rar", "x.part1.rar"]
        .iter()
        .map(|name| ParsedFile {
            name: name.to_string(),
            size: 1,
            segments: vec![],
            is_rar_part: true,
            is_sevenz_part: false,
            encryption: None,
        })
        .collect();

    let sorted = volumes::rename_rar_volumes(&files);
    let names: Vec<&str> = sorted.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["x.part1.rar", "x.part2.rar", "x.part10.rar"]);
}

#[test]
fn rar_volume_rename_unifies_base_names() {
    let files: Vec<ParsedFile> = ["release.part1.rar", "other-base.part02.rar"]
        .iter()
        .map(|name| ParsedFile {
            name: name.to_string(),
            size: 1,
            segments: vec![],
            is_rar_part: true,
            is_sevenz_part: false,
            encryption: None,
        })
        .collect();

    let sorted = volumes::rename_rar_volumes(&files);
    assert_eq!(sorted[0].name, "release.part1.rar");
    assert_eq!(sorted[1].name, "release.part2.rar");
}

#[test]
fn first_rar_part_prefers_plain_rar() {
    let names = vec![
        "x.r00".to_string(),
        "x.rar".to_string(),
        "x.part1.rar".to_string(),
    ];
    assert_eq!(volumes::first_rar_part(&names).unwrap(), "x.rar");
}

#[test]
fn sevenz_part_ordering() {
    assert_eq!(volumes::sevenz_part_number("x.7z"), 0);
    assert_eq!(volumes::sevenz_part_number("x.7z.001"), 1);
    assert_eq!(volumes::sevenz_part_number("x.7z.010"), 10);

    let names = vec!["x.7z.002".to_string(), "x.7z.001".to_string()];
    assert_eq!(volumes::first_sevenz_part(&names).unwrap(), "x.7z.001");
}

// ---------------------------------------------------------------------------
// RAR analyzer
// ---------------------------------------------------------------------------

#[test]
fn rar4_store_entries_round_trip() {
    let video = vec![0xABu8; 100];
    let notes = b"episode notes".to_vec();
    let bytes = build_rar4(&[
        Rar4Entry::directory("Extras"),
        Rar4Entry::stored("Show.S01E01.mkv", &video),
        Rar4Entry::stored("Extras/notes.txt", &notes),
    ]);

    let (set, fetch) = volume_set(vec![("show.rar".to_string(), bytes)]);

    let analyzer = RarAnalyzer::new(analyzer_settings());
    let entries = analyzer
        .analyze(&set, &CancellationToken::new(), |_| true)
        .unwrap();

    assert_eq!(entries.len(), 3);
    assert!(entries[0].is_directory);
    assert_eq!(entries[0].internal_path, "Extras");

    let mkv = &entries[1];
    assert_eq!(mkv.internal_path, "Show.S01E01.mkv");
    assert_eq!(mkv.size, 100);
    assert_eq!(fetch.assemble(&mkv.segments).unwrap(), video);

    let txt = &entries[2];
    assert_eq!(txt.internal_path, "Extras/notes.txt");
    assert_eq!(fetch.assemble(&txt.segments).unwrap(), notes);
}

#[test]
fn rar4_multi_volume_split_file_round_trip() {
    let content: Vec<u8> = (0..255u8).cycle().take(300).collect();
    let (a, rest) = content.split_at(120);
    let (b, c) = rest.split_at(120);

    let vol1 = build_rar4(&[Rar4Entry {
        name: "movie.mkv",
        content: a,
        unpacked: 300,
        method: RAR4_STORE,
        flags: 0x8000 | 0x0002, // split after
    }]);
    let vol2 = build_rar4(&[Rar4Entry {
        name: "movie.mkv",
        content: b,
        unpacked: 300,
        method: RAR4_STORE,
        flags: 0x8000 | 0x0001 | 0x0002, // split before and after
    }]);
    let vol3 = build_rar4(&[Rar4Entry {
        name: "movie.mkv",
        content: c,
        unpacked: 300,
        method: RAR4_STORE,
        flags: 0x8000 | 0x0001, // split before
    }]);

    let (set, fetch) = volume_set(
        vec![
            ("movie.part1.rar".to_string(), vol1),
            ("movie.part2.rar".to_string(), vol2),
            ("movie.part3.rar".to_string(), vol3),
        ],
    );

    let mut seen = Vec::new();
    let analyzer = RarAnalyzer::new(analyzer_settings());
    let entries = analyzer
        .analyze(&set, &CancellationToken::new(), |entry| {
            seen.push(entry.internal_path.clone());
            true
        })
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(seen, vec!["movie.mkv"]);
    assert_eq!(entries[0].size, 300);
    assert_eq!(fetch.assemble(&entries[0].segments).unwrap(), content);
}

#[test]
fn rar4_compressed_only_archive_is_rejected() {
    let data = vec![0u8; 50];
    let bytes = build_rar4(&[Rar4Entry {
        name: "movie.mkv",
        content: &data,
        unpacked: 50,
        method: RAR4_NORMAL,
        flags: 0x8000,
    }]);

    let (set, _fetch) = volume_set(vec![("show.rar".to_string(), bytes)]);

    let analyzer = RarAnalyzer::new(analyzer_settings());
    let err = analyzer
        .analyze(&set, &CancellationToken::new(), |_| true)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::RarNoStreamableFiles)
    ));
}

#[test]
fn rar4_encrypted_archive_aborts() {
    let data = vec![0u8; 50];
    let bytes = build_rar4(&[Rar4Entry {
        name: "movie.mkv",
        content: &data,
        unpacked: 50,
        method: RAR4_STORE,
        flags: 0x8000 | 0x0004, // password
    }]);

    let (set, _fetch) = volume_set(vec![("show.rar".to_string(), bytes)]);

    let analyzer = RarAnalyzer::new(analyzer_settings());
    let err = analyzer
        .analyze(&set, &CancellationToken::new(), |_| true)
        .unwrap_err();
    assert!(matches!(err, Error::Archive(ArchiveError::RarEncrypted)));
}

#[test]
fn rar5_store_entry_round_trip() {
    let content: Vec<u8> = (0..200u8).collect();
    let bytes = build_rar5("Show.S02E03.mkv", &content, 0);

    let (set, fetch) = volume_set(vec![("show.rar".to_string(), bytes)]);

    let analyzer = RarAnalyzer::new(analyzer_settings());
    let entries = analyzer
        .analyze(&set, &CancellationToken::new(), |_| true)
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].internal_path, "Show.S02E03.mkv");
    assert_eq!(fetch.assemble(&entries[0].segments).unwrap(), content);
}

#[test]
fn rar5_compressed_entry_is_rejected() {
    let content = vec![0u8; 64];
    let bytes = build_rar5("movie.mkv", &content, 3);

    let (set, _fetch) = volume_set(vec![("show.rar".to_string(), bytes)]);

    let analyzer = RarAnalyzer::new(analyzer_settings());
    let err = analyzer
        .analyze(&set, &CancellationToken::new(), |_| true)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::RarNoStreamableFiles)
    ));
}

#[test]
fn rar_progressive_callback_stops_early() {
    let a = vec![1u8; 30];
    let b = vec![2u8; 30];
    let bytes = build_rar4(&[
        Rar4Entry::stored("first.mkv", &a),
        Rar4Entry::stored("second.mkv", &b),
    ]);

    let (set, _fetch) = volume_set(vec![("show.rar".to_string(), bytes)]);

    let analyzer = RarAnalyzer::new(analyzer_settings());
    let entries = analyzer
        .analyze(&set, &CancellationToken::new(), |_| false)
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].internal_path, "first.mkv");
}

#[test]
fn rar_cancellation_is_checked_between_volumes() {
    let a = vec![1u8; 30];
    let bytes = build_rar4(&[Rar4Entry::stored("first.mkv", &a)]);

    let (set, _fetch) = volume_set(vec![("show.rar".to_string(), bytes)]);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let analyzer = RarAnalyzer::new(analyzer_settings());
    let err = analyzer.analyze(&set, &cancel, |_| true).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

// ---------------------------------------------------------------------------
// 7z analyzer
// ---------------------------------------------------------------------------

#[test]
fn sevenz_store_offsets_round_trip() {
    let video = vec![0x5Au8; 150];
    let audio = vec![0xC3u8; 90];
    let bytes = build_7z(&SevenZipFixture {
        files: vec![("Show.S01E01.mkv", &video), ("theme.mp3", &audio)],
        dirs: vec![],
        coder_id: &[0x00],
        single_folder: false,
    });

    let archive_bytes = bytes.clone();
    let (set, fetch) = volume_set(vec![("show.7z".to_string(), bytes)]);

    let analyzer = SevenZipAnalyzer::new(analyzer_settings());
    let info = analyzer.analyze(&set).unwrap();

    assert_eq!(info.entries.len(), 2);

    let mkv = &info.entries[0];
    assert_eq!(mkv.internal_path, "Show.S01E01.mkv");
    assert_eq!(mkv.size, 150);
    assert_eq!(mkv.folder_index, 0);
    // Byte-range property: [offset, offset+size) of the raw archive is the
    // file content
    let range = &archive_bytes[mkv.offset as usize..(mkv.offset + mkv.size) as usize];
    assert_eq!(range, &video[..]);
    assert_eq!(fetch.assemble(&mkv.segments).unwrap(), video);

    let mp3 = &info.entries[1];
    assert_eq!(mp3.folder_index, 1);
    let range = &archive_bytes[mp3.offset as usize..(mp3.offset + mp3.size) as usize];
    assert_eq!(range, &audio[..]);
    assert_eq!(fetch.assemble(&mp3.segments).unwrap(), audio);
}

#[test]
fn sevenz_single_folder_substreams_share_folder_index() {
    let first = vec![0x11u8; 70];
    let second = vec![0x22u8; 50];
    let bytes = build_7z(&SevenZipFixture {
        files: vec![("e1.mkv", &first), ("e2.mkv", &second)],
        dirs: vec![],
        coder_id: &[0x00],
        single_folder: true,
    });

    let archive_bytes = bytes.clone();
    let (set, fetch) = volume_set(vec![("pack.7z".to_string(), bytes)]);

    let analyzer = SevenZipAnalyzer::new(analyzer_settings());
    let info = analyzer.analyze(&set).unwrap();

    assert_eq!(info.entries.len(), 2);
    assert_eq!(info.entries[0].folder_index, 0);
    assert_eq!(info.entries[1].folder_index, 0);
    // Second file's intra-folder offset follows the first
    assert_eq!(
        info.entries[1].offset,
        info.entries[0].offset + info.entries[0].size
    );

    let range = &archive_bytes
        [info.entries[1].offset as usize..(info.entries[1].offset + 50) as usize];
    assert_eq!(range, &second[..]);
    assert_eq!(fetch.assemble(&info.entries[1].segments).unwrap(), second);
}

#[test]
fn sevenz_multi_part_archive_maps_across_parts() {
    let video = vec![0x77u8; 200];
    let bytes = build_7z(&SevenZipFixture {
        files: vec![("movie.mkv", &video)],
        dirs: vec![],
        coder_id: &[0x00],
        single_folder: false,
    });

    // Split the archive in the middle of the pack data
    let cut = 100;
    let (p1, p2) = bytes.split_at(cut);

    let (set, fetch) = volume_set(
        vec![
            ("movie.7z.001".to_string(), p1.to_vec()),
            ("movie.7z.002".to_string(), p2.to_vec()),
        ],
    );

    let analyzer = SevenZipAnalyzer::new(analyzer_settings());
    let info = analyzer.analyze(&set).unwrap();

    assert_eq!(info.entries.len(), 1);
    assert_eq!(fetch.assemble(&info.entries[0].segments).unwrap(), video);
}

#[test]
fn sevenz_compressed_coder_fails_permanently() {
    let data = vec![0u8; 80];
    let bytes = build_7z(&SevenZipFixture {
        files: vec![("movie.mkv", &data)],
        dirs: vec![],
        coder_id: &[0x21], // LZMA2
        single_folder: false,
    });

    let (set, _fetch) = volume_set(vec![("show.7z".to_string(), bytes)]);

    let analyzer = SevenZipAnalyzer::new(analyzer_settings());
    let err = analyzer.analyze(&set).unwrap_err();
    assert!(!err.is_retryable());
    match err {
        Error::Archive(ArchiveError::SevenZipCompressed { method }) => {
            assert_eq!(method, "LZMA2");
        }
        other => panic!("expected compressed error, got {:?}", other),
    }
}

#[test]
fn sevenz_encrypted_coder_fails_permanently() {
    let data = vec![0u8; 80];
    let bytes = build_7z(&SevenZipFixture {
        files: vec![("movie.mkv", &data)],
        dirs: vec![],
        coder_id: &[0x06, 0xF1, 0x07, 0x01], // AES-256
        single_folder: false,
    });

    let (set, _fetch) = volume_set(vec![("show.7z".to_string(), bytes)]);

    let analyzer = SevenZipAnalyzer::new(analyzer_settings());
    let err = analyzer.analyze(&set).unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::SevenZipEncrypted)
    ));
    assert!(!err.is_retryable());
}

#[test]
fn sevenz_skips_directories_and_non_media() {
    let video = vec![0x42u8; 60];
    let text = b"readme contents".to_vec();
    let bytes = build_7z(&SevenZipFixture {
        files: vec![("movie.mkv", &video), ("readme.txt", &text)],
        dirs: vec!["Extras"],
        coder_id: &[0x00],
        single_folder: false,
    });

    let (set, _fetch) = volume_set(vec![("show.7z".to_string(), bytes)]);

    let analyzer = SevenZipAnalyzer::new(analyzer_settings());
    let info = analyzer.analyze(&set).unwrap();

    let paths: Vec<&str> = info.entries.iter().map(|e| e.internal_path.as_str()).collect();
    assert_eq!(paths, vec!["movie.mkv"]);
}

#[test]
fn sevenz_garbage_input_is_invalid_format() {
    let (set, _fetch) = volume_set(vec![("junk.7z".to_string(), vec![0u8; 64])]);

    let analyzer = SevenZipAnalyzer::new(analyzer_settings());
    let err = analyzer.analyze(&set).unwrap_err();
    assert!(!err.is_retryable());
}
