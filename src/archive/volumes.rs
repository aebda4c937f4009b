//! Multi-volume naming: part-number parsing, normalization, and ordering.
//!
//! Volume ordering must be numeric, never lexicographic — a lexical sort
//! puts `part10` before `part2` and produces garbage offsets. Three RAR
//! naming schemes are recognized (`name.partNNN.rar`, `name.rNN`,
//! `name.NNN`) plus the 7z `name.7z` / `name.7z.NNN` scheme. Posters
//! occasionally mix base names within one set, so volumes are renamed to
//! the first part's base before sorting.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ArchiveError, Error, Result};
use crate::types::ParsedFile;
use crate::utils;

/// Part number that sorts unknown-format volumes last.
const UNKNOWN_PART: u64 = 999_999;

// filename.part001.rar, filename.part01.rar
static PART_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+)\.part(\d+)\.rar$").unwrap());

// filename.r00, filename.r01
static R_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(.+)\.r(\d+)$").unwrap());

// filename.001, filename.002
static NUMERIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+)\.(\d+)$").unwrap());

// filename.7z
static SEVENZ_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(.+)\.7z$").unwrap());

// filename.7z.001, filename.7z.002
static SEVENZ_MULTI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+)\.7z\.(\d+)$").unwrap());

/// Zero-based part number of a RAR volume filename.
///
/// `name.part001.rar` and `name.001` are 1-based on disk and map to part 0;
/// `name.rar` is the first volume; `name.r00` counts from 0 already.
pub fn rar_part_number(name: &str) -> u64 {
    if let Some(caps) = PART_PATTERN.captures(name) {
        if let Ok(n) = caps[2].parse::<u64>() {
            return n.saturating_sub(1);
        }
    }
    if name.to_ascii_lowercase().ends_with(".rar") {
        return 0;
    }
    if let Some(caps) = R_PATTERN.captures(name) {
        if let Ok(n) = caps[2].parse::<u64>() {
            return n;
        }
    }
    if let Some(caps) = NUMERIC_PATTERN.captures(name) {
        if let Ok(n) = caps[2].parse::<u64>() {
            return n.saturating_sub(1);
        }
    }
    UNKNOWN_PART
}

/// Base filename of a RAR volume with its part suffix removed.
pub fn rar_base_name(name: &str) -> String {
    for pattern in [&*PART_PATTERN, &*R_PATTERN, &*NUMERIC_PATTERN] {
        if let Some(caps) = pattern.captures(name) {
            return caps[1].to_string();
        }
    }
    utils::strip_extension(name).to_string()
}

/// Normalized part suffix of a RAR volume filename.
///
/// `.partNNN.rar` suffixes lose their leading zeros so that renamed sets
/// sort numerically by the parsed number, not the padded string.
fn rar_part_suffix(name: &str) -> String {
    if let Some(caps) = PART_PATTERN.captures(name) {
        return format!(".part{}.rar", strip_leading_zeros(&caps[2]));
    }
    if let Some(caps) = R_PATTERN.captures(name) {
        return format!(".r{}", &caps[2]);
    }
    if let Some(caps) = NUMERIC_PATTERN.captures(name) {
        return format!(".{}", &caps[2]);
    }
    match name.rfind('.') {
        Some(idx) => name[idx..].to_string(),
        None => String::new(),
    }
}

/// Renames RAR volumes to the first file's base name and sorts them
/// numerically by part number (stable).
///
/// The rename step lets sets whose volumes carry inconsistent base names
/// (obfuscated posts renamed mid-upload) still parse as one archive.
pub fn rename_rar_volumes(files: &[ParsedFile]) -> Vec<ParsedFile> {
    if files.is_empty() {
        return Vec::new();
    }

    let base = rar_base_name(&files[0].name);
    let mut renamed: Vec<(u64, ParsedFile)> = files
        .iter()
        .map(|f| {
            let mut file = f.clone();
            file.name = format!("{}{}", base, rar_part_suffix(&f.name));
            let part = rar_part_number(&file.name);
            (part, file)
        })
        .collect();

    renamed.sort_by_key(|(part, _)| *part);
    renamed.into_iter().map(|(_, f)| f).collect()
}

/// Priority of a RAR filename when choosing the first volume to open.
/// Lower is better: plain `.rar` beats `.partNNN.rar` beats `.rNN` beats
/// bare numeric extensions.
fn rar_first_part_priority(name: &str) -> u8 {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".rar") && !lower.contains(".part") {
        return 1;
    }
    if lower.contains(".part") && lower.ends_with(".rar") {
        return 2;
    }
    if lower.contains(".r0") {
        return 3;
    }
    if lower.len() > 4 && lower.as_bytes()[lower.len() - 4] == b'.' {
        return 4;
    }
    5
}

/// Picks the filename of the first part of a RAR set.
pub fn first_rar_part(names: &[String]) -> Result<String> {
    if names.is_empty() {
        return Err(Error::Archive(ArchiveError::NoVolumes));
    }
    if names.len() == 1 {
        return Ok(names[0].clone());
    }

    let mut best: Option<(&String, u8)> = None;
    for name in names {
        if rar_part_number(name) != 0 {
            continue;
        }
        let priority = rar_first_part_priority(name);
        best = match best {
            None => Some((name, priority)),
            Some((bn, bp)) if priority < bp || (priority == bp && name < bn) => {
                Some((name, priority))
            }
            other => other,
        };
    }

    best.map(|(name, _)| name.clone())
        .ok_or(Error::Archive(ArchiveError::NoFirstVolume))
}

/// Zero-based part number of a 7z filename: `.7z` is part 0, `.7z.NNN`
/// counts as written.
pub fn sevenz_part_number(name: &str) -> u64 {
    if let Some(caps) = SEVENZ_MULTI_PATTERN.captures(name) {
        if let Ok(n) = caps[2].parse::<u64>() {
            return n;
        }
    }
    if name.to_ascii_lowercase().ends_with(".7z") {
        return 0;
    }
    UNKNOWN_PART
}

/// Base filename of a 7z part with its suffix removed.
pub fn sevenz_base_name(name: &str) -> String {
    if let Some(caps) = SEVENZ_MULTI_PATTERN.captures(name) {
        return caps[1].to_string();
    }
    if let Some(caps) = SEVENZ_PATTERN.captures(name) {
        return caps[1].to_string();
    }
    utils::strip_extension(name).to_string()
}

fn sevenz_part_suffix(name: &str) -> String {
    if let Some(caps) = SEVENZ_MULTI_PATTERN.captures(name) {
        return format!(".7z.{}", &caps[2]);
    }
    if SEVENZ_PATTERN.is_match(name) {
        return ".7z".to_string();
    }
    match name.rfind('.') {
        Some(idx) => name[idx..].to_string(),
        None => String::new(),
    }
}

/// Renames 7z parts to the first file's base name and sorts them by part
/// number (stable).
pub fn rename_sevenz_volumes(files: &[ParsedFile]) -> Vec<ParsedFile> {
    if files.is_empty() {
        return Vec::new();
    }

    let base = sevenz_base_name(&files[0].name);
    let mut renamed: Vec<(u64, ParsedFile)> = files
        .iter()
        .map(|f| {
            let mut file = f.clone();
            file.name = format!("{}{}", base, sevenz_part_suffix(&f.name));
            let part = sevenz_part_number(&file.name);
            (part, file)
        })
        .collect();

    renamed.sort_by_key(|(part, _)| *part);
    renamed.into_iter().map(|(_, f)| f).collect()
}

/// Picks the filename of the first part of a 7z set. A plain `.7z` beats
/// `.7z.001`; when neither is numbered zero, `.7z.001` is accepted as the
/// first part.
pub fn first_sevenz_part(names: &[String]) -> Result<String> {
    if names.is_empty() {
        return Err(Error::Archive(ArchiveError::NoVolumes));
    }
    if names.len() == 1 {
        return Ok(names[0].clone());
    }

    let mut best: Option<(&String, u8)> = None;
    for name in names {
        if sevenz_part_number(name) != 0 {
            continue;
        }
        let priority = if SEVENZ_MULTI_PATTERN.is_match(name) {
            2
        } else {
            1
        };
        best = match best {
            None => Some((name, priority)),
            Some((bn, bp)) if priority < bp || (priority == bp && name < bn) => {
                Some((name, priority))
            }
            other => other,
        };
    }

    if let Some((name, _)) = best {
        return Ok(name.clone());
    }

    for name in names {
        if let Some(caps) = SEVENZ_MULTI_PATTERN.captures(name) {
            if caps[2].parse::<u64>() == Ok(1) {
                return Ok(name.clone());
            }
        }
    }

    Err(Error::Archive(ArchiveError::NoFirstVolume))
}

fn strip_leading_zeros(s: &str) -> &str {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() { "0" } else { trimmed }
}
