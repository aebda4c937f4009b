//! Candidate selection for multi-file releases.
//!
//! Given the playable files discovered inside a release (a season pack, an
//! anime batch, a daily-show bundle) and the metadata of the episode being
//! requested, this module picks the single correct file — or refuses.
//! Refusal is deliberate: when a target episode was specified and nothing
//! matches it, returning *any* file would silently serve the wrong episode,
//! so the selector rejects the whole candidate set instead of falling back
//! to title similarity.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

/// A playable file under consideration.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// Virtual path or filename of the candidate
    pub label: String,
    /// Container-format preference; lower is more preferred
    pub priority: i32,
}

/// Release metadata used to narrow down multi-file selections.
///
/// Ephemeral — constructed per resolution request, never persisted.
#[derive(Clone, Debug, Default)]
pub struct SelectionHints {
    /// Release title from the indexer
    pub release_title: String,
    /// Name of the queue item
    pub queue_name: String,
    /// Directory the files landed in
    pub directory: String,
    /// Target season number
    pub target_season: Option<u32>,
    /// Target episode number within the season
    pub target_episode: Option<u32>,
    /// Explicit episode code string ("S02E05")
    pub target_episode_code: Option<String>,
    /// Absolute episode number for anime-style numbering
    pub absolute_episode: Option<u32>,
    /// Air date for daily shows
    pub target_air_date: Option<NaiveDate>,
    /// True for daily shows (talk shows, news)
    pub is_daily: bool,
}

/// Outcome of a selection pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Index of the chosen candidate, or `None` when no safe choice exists
    pub index: Option<usize>,
    /// Short human-readable explanation of the decision
    pub reason: String,
}

impl Selection {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            index: None,
            reason: reason.into(),
        }
    }

    fn chosen(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            reason: reason.into(),
        }
    }
}

/// A parsed `SxxEyy` code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpisodeCode {
    /// Season number
    pub season: u32,
    /// Episode number within the season
    pub episode: u32,
}

const RELEASE_NAME_EXTENSIONS: &[&str] = &[
    "nzb", "mkv", "mp4", "m4v", "avi", "mov", "mpg", "mpeg", "ts", "m2ts", "mts", "rar", "zip",
    "7z",
];

static EPISODE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)s(\d{1,2})\s*e(\d{1,2})").unwrap());

// "Ep. 01", "Episode 01", "Ep01"
static EPISODE_ALT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ep(?:isode)?\.?\s*(\d{1,2})").unwrap());

// " - 01 - ", "_01_", "_01[", "_01." — bare episode numbers in season packs
static EPISODE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[-_\s](\d{1,2})[-_\s\[\.]").unwrap());

// Absolute episode patterns (anime, 2-4 digit numbering). Ordered from most
// to least specific; numbers that coincide with a resolution marker, a
// bracketed year, or a checksum are excluded before matching.

// "One Piece - 1153 [1080p]", "Show - 1153v2", "Anime_-_1153_"
static ABSOLUTE_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-–][\s_]*(\d{2,4})(?:v\d)?[\s_]*[\[\(\s_]").unwrap());

// "Episode 1153", "Ep.42", "episode 42.mkv"
static ABSOLUTE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:episode|ep\.?)\s*(\d{2,4})(?:\s|$|[\[\(\.])").unwrap());

// " E01 ", "[E42]", "Show E01 'Title'" — but never the E of "S01E01"
static STANDALONE_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|[^\d])e(\d{1,4})(?:[\s\]\)\-_\.'"v]|$)"#).unwrap()
});

// "#1153", "# 042"
static ABSOLUTE_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*(\d{2,4})(?:\s|$|[\[\(])").unwrap());

// "S01E1153" — long-running anime released with the absolute number in
// S01E form instead of the real season split
static S01_ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)s01e(\d{3,4})(?:\s|$|[\.\-\[\(])").unwrap());

static RESOLUTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d{3,4})p").unwrap());

static BRACKETED_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\(\[](\d{4})[\)\]]").unwrap());

static CHECKSUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[\(]([A-Fa-f0-9]{8})[\]\)]").unwrap());

// "2026.01.21", "2026-01-21", "2026 01 21"
static DAILY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[.\-_\s])(\d{4})[.\-\s](\d{2})[.\-\s](\d{2})(?:[.\-_\s]|$)").unwrap()
});

/// Applies `SxxEyy` matching and fuzzy title similarity against a list of
/// candidates.
///
/// See the module documentation for the rejection semantics; the selector
/// itself never errors.
pub fn select_best_candidate(candidates: &[Candidate], hints: &SelectionHints) -> Selection {
    if candidates.is_empty() {
        return Selection::rejected("no candidates");
    }

    let release_part = normalize_release_part(&hints.release_title);
    let queue_part = normalize_release_part(&hints.queue_name);
    let dir_part = normalize_release_part(&hints.directory);

    let release_tokens = tokenize_parts(&[&release_part, &queue_part, &dir_part]);
    let release_flat = release_tokens.concat();

    let target = resolve_target_episode(hints, &release_part, &queue_part, &dir_part);

    if let Some(target) = target {
        debug!(
            season = target.season,
            episode = target.episode,
            candidates = candidates.len(),
            "matching candidates against target episode"
        );
        let mut matching: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidate_matches_episode(&candidates[i].label, target))
            .collect();

        if matching.len() == 1 {
            return Selection::chosen(
                matching[0],
                format!(
                    "matched episode code S{:02}E{:02}",
                    target.season, target.episode
                ),
            );
        }
        if matching.len() > 1 {
            if !release_tokens.is_empty() {
                if let Some((idx, score)) =
                    pick_by_similarity(candidates, Some(matching.as_slice()), &release_tokens, &release_flat)
                {
                    return Selection::chosen(
                        idx,
                        format!("episode match + title similarity score {}", score),
                    );
                }
            }
            if let Some(idx) = pick_best_priority(candidates, &matching) {
                return Selection::chosen(
                    idx,
                    format!(
                        "episode match fallback to extension priority (S{:02}E{:02})",
                        target.season, target.episode
                    ),
                );
            }
        }

        // No S##E## matches — try absolute episode numbering (anime)
        if matching.is_empty() {
            if let Some(absolute) = hints.absolute_episode.filter(|&n| n > 0) {
                debug!(absolute, "no code matches, trying absolute episode");
                let absolute_matching: Vec<usize> = (0..candidates.len())
                    .filter(|&i| candidate_matches_absolute(&candidates[i].label, absolute))
                    .collect();

                if absolute_matching.len() == 1 {
                    return Selection::chosen(
                        absolute_matching[0],
                        format!("matched absolute episode {}", absolute),
                    );
                }
                if absolute_matching.len() > 1 {
                    if !release_tokens.is_empty() {
                        if let Some((idx, score)) = pick_by_similarity(
                            candidates,
                            Some(absolute_matching.as_slice()),
                            &release_tokens,
                            &release_flat,
                        ) {
                            return Selection::chosen(
                                idx,
                                format!(
                                    "absolute episode match + title similarity score {}",
                                    score
                                ),
                            );
                        }
                    }
                    if let Some(idx) = pick_best_priority(candidates, &absolute_matching) {
                        return Selection::chosen(
                            idx,
                            format!(
                                "absolute episode match fallback to extension priority ({})",
                                absolute
                            ),
                        );
                    }
                }
                if !absolute_matching.is_empty() {
                    matching = absolute_matching;
                }
            }
        }

        // Still nothing — exact air-date matching for daily shows. Adjacent
        // calendar dates are different episodes, so no tolerance is allowed.
        if matching.is_empty() && hints.is_daily {
            if let Some(air_date) = hints.target_air_date {
                debug!(%air_date, "no code matches, trying exact daily date");
                let date_matching: Vec<usize> = (0..candidates.len())
                    .filter(|&i| candidate_matches_daily_date(&candidates[i].label, air_date, 0))
                    .collect();

                if date_matching.len() == 1 {
                    return Selection::chosen(
                        date_matching[0],
                        format!("matched daily date {}", air_date),
                    );
                }
                if date_matching.len() > 1 {
                    if !release_tokens.is_empty() {
                        if let Some((idx, score)) = pick_by_similarity(
                            candidates,
                            Some(date_matching.as_slice()),
                            &release_tokens,
                            &release_flat,
                        ) {
                            return Selection::chosen(
                                idx,
                                format!("daily date match + title similarity score {}", score),
                            );
                        }
                    }
                    if let Some(idx) = pick_best_priority(candidates, &date_matching) {
                        return Selection::chosen(
                            idx,
                            format!(
                                "daily date match fallback to extension priority ({})",
                                air_date
                            ),
                        );
                    }
                }
                if !date_matching.is_empty() {
                    matching = date_matching;
                }
            }
        }

        // A target was specified but nothing matched through any strategy:
        // reject rather than risk serving the wrong episode via similarity.
        if matching.is_empty() {
            if hints.is_daily {
                if let Some(air_date) = hints.target_air_date {
                    return Selection::rejected(format!(
                        "no file matches target episode S{:02}E{:02} or date {}",
                        target.season, target.episode, air_date
                    ));
                }
            }
            if let Some(absolute) = hints.absolute_episode.filter(|&n| n > 0) {
                return Selection::rejected(format!(
                    "no file matches target episode S{:02}E{:02} (abs: {})",
                    target.season, target.episode, absolute
                ));
            }
            return Selection::rejected(format!(
                "no file matches target episode S{:02}E{:02}",
                target.season, target.episode
            ));
        }
    }

    if release_tokens.is_empty() {
        return Selection::rejected("no target episode and no release tokens");
    }

    if let Some((idx, score)) = pick_by_similarity(candidates, None, &release_tokens, &release_flat)
    {
        return Selection::chosen(idx, format!("title similarity score {}", score));
    }

    Selection::rejected("no candidate scored above zero")
}

/// Resolves the target episode code from hints in priority order: explicit
/// season+episode, explicit code string, then best-effort extraction from
/// the release title / queue name / directory.
fn resolve_target_episode(
    hints: &SelectionHints,
    release_part: &str,
    queue_part: &str,
    dir_part: &str,
) -> Option<EpisodeCode> {
    if let (Some(season), Some(episode)) = (hints.target_season, hints.target_episode) {
        if season > 0 && episode > 0 {
            return Some(EpisodeCode { season, episode });
        }
    }
    if let Some(code) = hints.target_episode_code.as_deref() {
        if let Some(parsed) = parse_episode_code(code) {
            return Some(parsed);
        }
    }
    extract_episode_code(&[
        &hints.release_title,
        &hints.queue_name,
        &hints.directory,
        release_part,
        queue_part,
        dir_part,
    ])
}

/// Finds an `SxxEyy` pattern across multiple strings, first match wins.
pub fn extract_episode_code(parts: &[&str]) -> Option<EpisodeCode> {
    parts.iter().find_map(|part| parse_episode_code(part))
}

fn parse_episode_code(value: &str) -> Option<EpisodeCode> {
    let caps = EPISODE_CODE.captures(value.trim())?;
    let season = caps[1].parse().ok()?;
    let episode = caps[2].parse().ok()?;
    Some(EpisodeCode { season, episode })
}

/// Whether the candidate label carries the target episode code.
///
/// Season-pack labels without an explicit code alternate-match on a bare
/// episode number — but only when the target season is 1. For higher
/// seasons a bare "- 01 -" is ambiguous in a multi-season pack (it is far
/// more likely S01E01 than S02E01), so an explicit code is required there.
pub fn candidate_matches_episode(label: &str, target: EpisodeCode) -> bool {
    if let Some(parsed) = parse_episode_code(label) {
        if parsed == target {
            return true;
        }
    }

    if target.season == 1 {
        if let Some(episode) = parse_episode_number(label) {
            return episode == target.episode;
        }
    }

    false
}

/// Extracts a bare episode number from "Ep. 01" / "Episode 01" / " - 01 - "
/// style labels.
fn parse_episode_number(value: &str) -> Option<u32> {
    if value.trim().is_empty() {
        return None;
    }
    if let Some(caps) = EPISODE_ALT.captures(value) {
        if let Ok(episode) = caps[1].parse::<u32>() {
            if episode > 0 {
                return Some(episode);
            }
        }
    }
    if let Some(caps) = EPISODE_NUMBER.captures(value) {
        if let Ok(episode) = caps[1].parse::<u32>() {
            if episode > 0 {
                return Some(episode);
            }
        }
    }
    None
}

/// Extracts an absolute episode number (anime numbering) from a label.
///
/// Numbers that also appear as a resolution marker (`1080p`), a bracketed
/// year, or an 8-hex-digit checksum are excluded before any pattern runs.
pub fn parse_absolute_episode(value: &str) -> Option<u32> {
    if value.trim().is_empty() {
        return None;
    }

    let mut excluded: Vec<u32> = Vec::new();
    for caps in RESOLUTION.captures_iter(value) {
        if let Ok(n) = caps[1].parse() {
            excluded.push(n);
        }
    }
    for caps in BRACKETED_YEAR.captures_iter(value) {
        if let Ok(n) = caps[1].parse() {
            excluded.push(n);
        }
    }
    for caps in CHECKSUM.captures_iter(value) {
        if let Ok(n) = caps[1].parse() {
            excluded.push(n);
        }
    }

    let accept = |caps: regex::Captures<'_>| -> Option<u32> {
        let episode: u32 = caps[1].parse().ok()?;
        (episode > 0 && !excluded.contains(&episode)).then_some(episode)
    };

    ABSOLUTE_DASH
        .captures(value)
        .and_then(accept)
        .or_else(|| ABSOLUTE_KEYWORD.captures(value).and_then(accept))
        .or_else(|| STANDALONE_EPISODE.captures(value).and_then(accept))
        .or_else(|| ABSOLUTE_HASH.captures(value).and_then(accept))
        .or_else(|| S01_ABSOLUTE.captures(value).and_then(accept))
}

/// Whether the candidate label carries the target absolute episode number.
pub fn candidate_matches_absolute(label: &str, target: u32) -> bool {
    if target == 0 {
        return false;
    }
    parse_absolute_episode(label) == Some(target)
}

/// Extracts a `YYYY.MM.DD`-style date from a daily-show label.
pub fn parse_daily_date(value: &str) -> Option<NaiveDate> {
    let caps = DAILY_DATE.captures(value.trim())?;
    let year: i32 = caps[1].parse().ok()?;
    if !(1900..=2100).contains(&year) {
        return None;
    }
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Whether two dates fall within `tolerance_days` of each other.
pub fn dates_match_with_tolerance(file: NaiveDate, target: NaiveDate, tolerance_days: i64) -> bool {
    file.signed_duration_since(target).num_days().abs() <= tolerance_days
}

/// Whether the candidate label contains a date matching the target air date
/// within the given tolerance. Daily-show selection always passes 0.
pub fn candidate_matches_daily_date(label: &str, target: NaiveDate, tolerance_days: i64) -> bool {
    match parse_daily_date(label) {
        Some(date) => dates_match_with_tolerance(date, target, tolerance_days),
        None => false,
    }
}

fn pick_by_similarity(
    candidates: &[Candidate],
    subset: Option<&[usize]>,
    release_tokens: &[String],
    release_flat: &str,
) -> Option<(usize, i32)> {
    if release_tokens.is_empty() {
        return None;
    }

    let indices: Vec<usize> = match subset {
        Some(s) if !s.is_empty() => s.to_vec(),
        _ => (0..candidates.len()).collect(),
    };

    let mut best: Option<(usize, i32)> = None;
    for idx in indices {
        let score = similarity_score(&candidates[idx].label, release_tokens, release_flat);
        if score <= 0 {
            continue;
        }
        best = match best {
            None => Some((idx, score)),
            Some((best_idx, best_score)) => {
                if score > best_score
                    || (score == best_score
                        && candidates[idx].priority < candidates[best_idx].priority)
                {
                    Some((idx, score))
                } else {
                    Some((best_idx, best_score))
                }
            }
        };
    }
    best
}

fn pick_best_priority(candidates: &[Candidate], indices: &[usize]) -> Option<usize> {
    indices
        .iter()
        .copied()
        .min_by_key(|&i| candidates[i].priority)
}

/// Rough token-overlap similarity between a candidate name and the release
/// tokens. Exact token matches score 10 each; substring containment between
/// the flattened forms adds 25; "sample"/"extras" labels are penalized.
pub fn similarity_score(candidate: &str, release_tokens: &[String], release_flat: &str) -> i32 {
    if release_tokens.is_empty() {
        return 0;
    }

    let mut normalized = normalize_release_part(candidate);
    if normalized.is_empty() {
        normalized = candidate.to_string();
    }

    let candidate_tokens = tokenize_parts(&[&normalized]);
    let mut score = 0;
    for token in release_tokens {
        if token.len() <= 2 {
            continue;
        }
        if candidate_tokens.iter().any(|t| t == token) {
            score += 10;
        }
    }

    let candidate_flat = candidate_tokens.concat();
    if !candidate_flat.is_empty()
        && !release_flat.is_empty()
        && (candidate_flat.contains(release_flat) || release_flat.contains(&candidate_flat))
    {
        score += 25;
    }

    let lower = normalized.to_lowercase();
    if (lower.contains("sample") || lower.contains("extras")) && score > 0 {
        score = (score - 20).max(0);
    }

    score
}

/// Splits release components into lowercase alphanumeric tokens.
pub fn tokenize_parts(parts: &[&str]) -> Vec<String> {
    let mut tokens = Vec::new();
    for part in parts {
        let part = part.trim().to_lowercase();
        if part.is_empty() {
            continue;
        }
        for field in part.split(|c: char| !c.is_ascii_alphanumeric()) {
            if !field.is_empty() {
                tokens.push(field.to_string());
            }
        }
    }
    tokens
}

/// Flattens a release string: trims whitespace, takes the final path
/// component, and drops a known media/archive extension.
pub fn normalize_release_part(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let normalized = trimmed.replace('\\', "/");
    let mut base = normalized
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(trimmed);
    if base == "." {
        base = trimmed;
    }

    if let Some(idx) = base.rfind('.') {
        let ext = base[idx + 1..].to_lowercase();
        if RELEASE_NAME_EXTENSIONS.contains(&ext.as_str()) {
            return base[..idx].to_string();
        }
    }

    base.to_string()
}
