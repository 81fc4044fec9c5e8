//! MIME type guessing from file extensions.

use std::path::Path;

/// Guess the MIME type of a media file from its extension.
///
/// Matching is case-insensitive; unknown or missing extensions fall back to
/// `application/octet-stream`.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "ts" => "video/mp2t",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mjpeg" | "mjpg" => "video/x-motion-jpeg",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
