use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};

/// Extensions the Freesound server accepts for audio uploads.
pub const ALLOWED_AUDIO_EXTENSIONS: &[&str] =
    &["wav", "aiff", "aif", "ogg", "flac", "mp3", "m4a", "wv"];

fn upload_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^https?://[^\s/?#]+(/[^\s]*)?$").unwrap())
}

fn unsafe_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap())
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_upload_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("url", "Upload URL cannot be empty"));
        }

        if trimmed.len() > 2000 {
            return Err(AppError::validation("url", "Upload URL too long"));
        }

        if !upload_url_pattern().is_match(trimmed) {
            return Err(AppError::invalid_upload_url(trimmed));
        }

        Ok(())
    }

    pub fn validate_file_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }

        if !path_obj.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        Ok(())
    }

    /// The server rejects other extensions; the client only warns about them
    /// and still queues the file.
    pub fn is_allowed_audio_file(path: &str) -> bool {
        Path::new(path)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| ALLOWED_AUDIO_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = unsafe_filename_chars().replace_all(filename.trim(), "_");

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized.to_string()
        }
    }
}

pub struct FileSystemGuard;

impl FileSystemGuard {
    pub fn get_file_size(path: &str) -> AppResult<u64> {
        let metadata = std::fs::metadata(path)?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_upload_url() {
        assert!(InputValidator::validate_upload_url("https://freesound.org/home/upload/html/").is_ok());
        assert!(InputValidator::validate_upload_url("http://127.0.0.1:8000/upload").is_ok());
        assert!(InputValidator::validate_upload_url("  ").is_err());

        match InputValidator::validate_upload_url("javascript:alert(1)") {
            Err(AppError::InvalidUploadUrl { url }) => assert_eq!(url, "javascript:alert(1)"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_file_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"RIFF").unwrap();
        let path = file.path().to_string_lossy().to_string();

        assert!(InputValidator::validate_file_path(&path).is_ok());
        assert_eq!(FileSystemGuard::get_file_size(&path).unwrap(), 4);

        assert!(matches!(
            InputValidator::validate_file_path("definitely_missing.wav"),
            Err(AppError::FileNotFound { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_string_lossy().to_string();
        assert!(InputValidator::validate_file_path(&dir_path).is_err());
    }

    #[test]
    fn test_audio_extension_check() {
        assert!(InputValidator::is_allowed_audio_file("kick.WAV"));
        assert!(InputValidator::is_allowed_audio_file("field/recording.flac"));
        assert!(!InputValidator::is_allowed_audio_file("notes.txt"));
        assert!(!InputValidator::is_allowed_audio_file("no_extension"));
    }

    #[test]
    fn test_sanitize_filename() {
        let safe = InputValidator::sanitize_filename("bird<song>|take:2.wav");
        assert_eq!(safe, "bird_song__take_2.wav");

        let long = "a".repeat(300);
        let truncated = InputValidator::sanitize_filename(&long);
        assert_eq!(truncated.chars().count(), 255);
        assert!(truncated.ends_with("..."));
    }
}
