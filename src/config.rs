use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, AppResult};

const APP_DIR_NAME: &str = "Freesound Uploader";

/// Persisted defaults for the command-line host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub page_url: Option<String>,
    pub session_cookie: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub confirm_before_upload: bool,
    pub output_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_url: None,
            session_cookie: None,
            request_timeout_secs: None,
            confirm_before_upload: false,
            output_path: None,
            log_level: "info".to_string(),
        }
    }
}

/// Settings of a single upload form, read from the host page.
///
/// `max_upload_size` is the combined byte budget of every queued file; the
/// queue always stays strictly below it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFormConfig {
    pub submit_url: String,
    pub max_upload_size: u64,
    pub max_upload_size_mb: u64,
    pub csrf_token: String,
    pub request_timeout: Option<Duration>,
}

impl UploadFormConfig {
    /// Builds a form config where the MB figure is derived from the byte
    /// budget the same way the server renders it.
    pub fn new(submit_url: &str, max_upload_size: u64, csrf_token: &str) -> Self {
        Self {
            submit_url: submit_url.to_string(),
            max_upload_size,
            max_upload_size_mb: bytes_to_rounded_mb(max_upload_size),
            csrf_token: csrf_token.to_string(),
            request_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_upload_size == 0 {
            return Err(AppError::validation(
                "max_upload_size",
                "Must be greater than 0",
            ));
        }

        crate::security::InputValidator::validate_upload_url(&self.submit_url)?;

        if let Some(timeout) = self.request_timeout {
            if timeout.is_zero() {
                return Err(AppError::validation(
                    "request_timeout",
                    "Must be greater than 0 when set",
                ));
            }
        }

        Ok(())
    }
}

pub fn bytes_to_rounded_mb(bytes: u64) -> u64 {
    (bytes as f64 / (1024.0 * 1024.0)).round() as u64
}

fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &PathBuf) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config)?;

        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config(config: &Config) -> AppResult<()> {
    validate_config(config)?;
    save_config_to(&get_config_path()?, config)
}

fn save_config_to(config_path: &PathBuf, config: &Config) -> AppResult<()> {
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if let Some(url) = &config.page_url {
        crate::security::InputValidator::validate_upload_url(url)?;
    }

    if config.request_timeout_secs == Some(0) {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be greater than 0 when set",
        ));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

// Reset configuration to defaults
pub fn reset_config() -> AppResult<()> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.reset_backup");
        fs::copy(&config_path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    save_config_to(&config_path, &Config::default())?;

    log::info!("Configuration reset to defaults");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounded_mb_matches_server_rendering() {
        assert_eq!(bytes_to_rounded_mb(0), 0);
        assert_eq!(bytes_to_rounded_mb(1024 * 1024), 1);
        assert_eq!(bytes_to_rounded_mb(1024 * 1024 * 3 / 2), 2);
        assert_eq!(bytes_to_rounded_mb(1024 * 1024 * 1024), 1024);
    }

    #[test]
    fn test_form_config_validation() {
        let config = UploadFormConfig::new("https://freesound.org/home/upload/html/", 100, "tok");
        assert!(config.validate().is_ok());

        let zero_budget = UploadFormConfig::new("https://freesound.org/home/upload/html/", 0, "tok");
        assert!(zero_budget.validate().is_err());

        let zero_timeout = config.clone().with_timeout(Some(Duration::ZERO));
        assert!(zero_timeout.validate().is_err());

        let bad_url = UploadFormConfig::new("ftp://example.com/upload", 100, "tok");
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_validate_config_log_level() {
        let mut config = Config::default();
        assert!(validate_config(&config).is_ok());

        config.log_level = "verbose".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_creates_default_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, Config::default());
        assert!(path.exists());

        let mut custom = Config::default();
        custom.request_timeout_secs = Some(30);
        custom.page_url = Some("https://freesound.org/home/upload/".to_string());
        save_config_to(&path, &custom).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), custom);
        assert!(path.with_extension("json.bak").exists());
    }

    #[test]
    fn test_unparseable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_config_from(&path).unwrap(), Config::default());
    }
}
