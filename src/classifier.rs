//! Decides which filesystem entries belong in the catalog

use std::path::Path;

/// Video extensions that are indexed (lowercase, without dot)
pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mkv", "avi", "mov"];

/// Check whether a path names an indexable video file.
///
/// Only the extension is consulted, case-insensitively. The file itself is
/// never touched.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
