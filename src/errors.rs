use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid upload URL: {url}")]
    InvalidUploadUrl { url: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Upload page error: {0}")]
    PageParse(String),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn invalid_upload_url(url: &str) -> Self {
        Self::InvalidUploadUrl {
            url: url.to_string(),
        }
    }

    pub fn page_parse(message: &str) -> Self {
        Self::PageParse(message.to_string())
    }

    /// Errors the user can fix by editing the command line or the config file.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::InvalidUploadUrl { .. }
                | AppError::FileNotFound { .. }
                | AppError::Validation { .. }
                | AppError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message() {
        let err = AppError::validation("max_upload_size", "Must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Validation error: max_upload_size - Must be greater than 0"
        );
        assert!(err.is_permanent());
    }

    #[test]
    fn test_io_error_is_not_permanent() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(!err.is_permanent());
        assert_eq!(err.to_string(), "IO error: disk gone");
    }

    #[test]
    fn test_page_parse_message() {
        let err = AppError::page_parse("No element with id \"upload-form\" found");
        assert!(err.to_string().starts_with("Upload page error:"));
        assert!(!err.is_permanent());
    }
}
