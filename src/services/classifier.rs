use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Category assigned to an upload from its declared filename.
///
/// Derived once per pipeline run and never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Document,
    Video,
    Audio,
    Archive,
    Blocked,
    Unsupported,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Document => "document",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Archive => "archive",
            FileCategory::Blocked => "blocked",
            FileCategory::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extensions that are refused outright, before scanning or conversion.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "com", "bat", "cmd", "ps1", "sh", "bash", "msi", "scr", "pif",
    "cpl", "vbs", "js", "jar", "apk", "app",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf", "txt", "csv",
    "md",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "webm", "mpg", "mpeg", "wmv", "flv", "m4v", "ts",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "wma", "opus",
];

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "tgz"];

/// Classify a filename by its last extension, case-insensitively.
///
/// Pure and total: no extension (or a trailing dot) yields
/// `Unsupported`. Blocked extensions win over every other set.
pub fn classify(filename: &str) -> FileCategory {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
        _ => return FileCategory::Unsupported,
    };
    let ext = ext.as_str();

    if BLOCKED_EXTENSIONS.contains(&ext) {
        FileCategory::Blocked
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        FileCategory::Image
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        FileCategory::Document
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        FileCategory::Video
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        FileCategory::Audio
    } else if ARCHIVE_EXTENSIONS.contains(&ext) {
        FileCategory::Archive
    } else {
        FileCategory::Unsupported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_categories() {
        assert_eq!(classify("photo.JPG"), FileCategory::Image);
        assert_eq!(classify("report.pdf"), FileCategory::Document);
        assert_eq!(classify("notes.txt"), FileCategory::Document);
        assert_eq!(classify("clip.mp4"), FileCategory::Video);
        assert_eq!(classify("song.flac"), FileCategory::Audio);
        assert_eq!(classify("backup.tar"), FileCategory::Archive);
    }

    #[test]
    fn test_blocked_takes_precedence() {
        assert_eq!(classify("payload.exe"), FileCategory::Blocked);
        assert_eq!(classify("SCRIPT.SH"), FileCategory::Blocked);
        // Blocked wins even when the name looks like something else.
        assert_eq!(classify("image.png.exe"), FileCategory::Blocked);
    }

    #[test]
    fn test_unsupported_fallbacks() {
        assert_eq!(classify("README"), FileCategory::Unsupported);
        assert_eq!(classify("weird.xyz123"), FileCategory::Unsupported);
        assert_eq!(classify("trailing."), FileCategory::Unsupported);
        assert_eq!(classify(""), FileCategory::Unsupported);
    }

    #[test]
    fn test_only_last_extension_counts() {
        assert_eq!(classify("archive.tar.gz"), FileCategory::Archive);
        assert_eq!(classify("doc.pdf.zip"), FileCategory::Archive);
    }
}
