//! Virtual-path helpers and filename classification.
//!
//! Virtual paths are forward-slash separated and rooted at `/` regardless of
//! the host platform.

/// Extensions considered directly playable video containers.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "m2ts", "ts", "vob",
    "ogv",
];

/// Extensions worth materializing out of a 7z archive: video, audio, and
/// subtitle files.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "m2ts", "mp3",
    "flac", "aac", "ogg", "wav", "wma", "m4a", "srt", "ass", "ssa", "sub", "idx",
];

/// Lowercased extension of a filename, without the dot.
pub fn extension(name: &str) -> Option<String> {
    let base = file_name(name);
    let idx = base.rfind('.')?;
    if idx + 1 == base.len() {
        return None;
    }
    Some(base[idx + 1..].to_ascii_lowercase())
}

/// Whether a filename has a common video container extension.
pub fn is_video_file(name: &str) -> bool {
    extension(name).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether a filename is a media file (video, audio, or subtitle).
pub fn is_media_file(name: &str) -> bool {
    extension(name).is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether a filename is a PAR2 repair file. PAR2 files are never
/// represented as virtual files.
pub fn is_par2_file(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".par2")
}

/// Loose RAR-part check used for nested-archive detection: `.rar`, or a
/// `.rN`/`.rNN` numeric extension.
pub fn is_rar_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".rar") {
        return true;
    }
    if let Some(ext) = extension(&lower) {
        if let Some(rest) = ext.strip_prefix('r') {
            return !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit());
        }
    }
    false
}

/// Filename with its final extension stripped.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Final component of a slash- or backslash-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Directory component of a virtual path (everything before the final `/`),
/// or `/` when the path sits at the root.
pub fn parent_virtual(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &trimmed[..idx],
    }
}

/// Joins virtual path components with forward slashes, collapsing duplicate
/// separators. The result is rooted when `base` is.
pub fn join_virtual(base: &str, rest: &str) -> String {
    let rest = rest.replace('\\', "/");
    let rest = rest.trim_matches('/');
    if rest.is_empty() {
        return base.to_string();
    }
    if base == "/" || base.is_empty() {
        format!("/{}", rest)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rest)
    }
}

/// Relative directory prefix of a declared filename (`dir/sub/file.mkv` →
/// `Some("dir/sub")`); `None` when the file sits at the archive root.
pub fn relative_dir(name: &str) -> Option<&str> {
    let normalized = name.trim_start_matches(['/', '\\']);
    let idx = normalized.rfind(['/', '\\'])?;
    let dir = &normalized[..idx];
    if dir.is_empty() { None } else { Some(dir) }
}
