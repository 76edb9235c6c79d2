//! Reads the upload form settings from the Freesound upload page.
//!
//! The page renders an element with `id="upload-form"` carrying
//! `data-upload-url`, `data-max-file-size` (bytes) and `data-max-file-size-mb`.
//! The CSRF token comes from the `csrftoken` cookie, falling back to the
//! hidden `csrfmiddlewaretoken` input Django adds to forms.

use regex::Regex;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::Url;
use std::sync::OnceLock;
use tokio::time::Duration;

use crate::config::{bytes_to_rounded_mb, UploadFormConfig};
use crate::errors::{AppError, AppResult};
use crate::uploader::FreesoundClient;

fn upload_form_tag() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?is)<[a-z][a-z0-9]*\b[^>]*\sid\s*=\s*["']upload-form["'][^>]*>"#).unwrap()
    })
}

fn csrf_cookie() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:^|[;,]\s*)csrftoken=([^;,\s]+)").unwrap())
}

fn csrf_hidden_input() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?is)<input\b[^>]*\sname\s*=\s*["']csrfmiddlewaretoken["'][^>]*>"#).unwrap()
    })
}

/// Data attributes of the upload form element.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFormAttributes {
    pub upload_url: String,
    pub max_file_size: u64,
    pub max_file_size_mb: u64,
}

fn attribute_value(tag: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"(?is)(?:^|\s){}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let captures = re.captures(tag)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| unescape_html(m.as_str()))
}

fn unescape_html(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn parse_size(tag: &str, name: &str) -> AppResult<Option<u64>> {
    match attribute_value(tag, name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AppError::page_parse(&format!("{} is not a byte count: {}", name, raw))),
        None => Ok(None),
    }
}

/// Extracts the upload form attributes; a relative upload URL is resolved
/// against `page_url`.
pub fn parse_upload_form(html: &str, page_url: &str) -> AppResult<UploadFormAttributes> {
    let tag = upload_form_tag()
        .find(html)
        .ok_or_else(|| AppError::page_parse("No element with id \"upload-form\" found"))?
        .as_str();

    let raw_url = attribute_value(tag, "data-upload-url")
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| AppError::page_parse("upload-form has no data-upload-url"))?;

    let upload_url = Url::parse(page_url)
        .and_then(|base| base.join(raw_url.trim()))
        .map_err(|e| AppError::page_parse(&format!("Invalid upload URL {}: {}", raw_url, e)))?
        .to_string();

    let max_file_size = parse_size(tag, "data-max-file-size")?
        .ok_or_else(|| AppError::page_parse("upload-form has no data-max-file-size"))?;

    let max_file_size_mb = parse_size(tag, "data-max-file-size-mb")?
        .unwrap_or_else(|| bytes_to_rounded_mb(max_file_size));

    Ok(UploadFormAttributes {
        upload_url,
        max_file_size,
        max_file_size_mb,
    })
}

/// Finds `csrftoken` in `Cookie` or `Set-Cookie` header values.
pub fn csrf_from_cookies<'a>(headers: impl IntoIterator<Item = &'a str>) -> Option<String> {
    headers.into_iter().find_map(|header| {
        csrf_cookie()
            .captures(header)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

pub fn csrf_from_html(html: &str) -> Option<String> {
    csrf_hidden_input()
        .find(html)
        .and_then(|input| attribute_value(input.as_str(), "value"))
        .filter(|token| !token.is_empty())
}

/// Downloads the upload page and builds the form configuration from it.
pub async fn fetch_upload_config(
    client: &FreesoundClient,
    page_url: &str,
    request_timeout: Option<Duration>,
) -> AppResult<UploadFormConfig> {
    crate::security::InputValidator::validate_upload_url(page_url)?;

    let mut request = client.http().get(page_url);
    if let Some(session) = client.session_cookie() {
        request = request.header(COOKIE, format!("sessionid={}", session));
    }

    log::info!("Fetching upload page {}", page_url);
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::page_parse(&format!(
            "Upload page returned status {}",
            status
        )));
    }

    let set_cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect();

    let html = response.text().await?;
    let attributes = parse_upload_form(&html, page_url)?;

    let csrf_token = csrf_from_cookies(set_cookies.iter().map(String::as_str))
        .or_else(|| csrf_from_html(&html))
        .ok_or_else(|| AppError::page_parse("No CSRF token found in cookies or page"))?;

    log::info!(
        "Upload form posts to {} with a limit of {} MB",
        attributes.upload_url,
        attributes.max_file_size_mb
    );

    Ok(UploadFormConfig {
        submit_url: attributes.upload_url,
        max_upload_size: attributes.max_file_size,
        max_upload_size_mb: attributes.max_file_size_mb,
        csrf_token,
        request_timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <form id="upload-form" method="post" enctype="multipart/form-data"
              data-upload-url="/home/upload/html/?next=a&amp;b"
              data-max-file-size="1073741824"
              data-max-file-size-mb="1024">
          <input type='hidden' name='csrfmiddlewaretoken' value='hiddenTok123' />
          <input type="file" id="id_files" multiple>
        </form>
        </body></html>
    "#;

    #[test]
    fn test_parse_upload_form() {
        let attrs = parse_upload_form(PAGE, "https://freesound.org/home/upload/").unwrap();
        assert_eq!(attrs.upload_url, "https://freesound.org/home/upload/html/?next=a&b");
        assert_eq!(attrs.max_file_size, 1073741824);
        assert_eq!(attrs.max_file_size_mb, 1024);
    }

    #[test]
    fn test_attribute_order_and_missing_mb() {
        let html = r#"<div data-max-file-size='2097152' data-upload-url='https://up.example.org/u' id='upload-form'></div>"#;
        let attrs = parse_upload_form(html, "https://freesound.org/").unwrap();
        assert_eq!(attrs.upload_url, "https://up.example.org/u");
        assert_eq!(attrs.max_file_size_mb, 2);
    }

    #[test]
    fn test_missing_form_or_attributes() {
        assert!(matches!(
            parse_upload_form("<form id='other'></form>", "https://freesound.org/"),
            Err(AppError::PageParse(_))
        ));

        let no_size = r#"<form id="upload-form" data-upload-url="/u/"></form>"#;
        assert!(parse_upload_form(no_size, "https://freesound.org/").is_err());

        let bad_size = r#"<form id="upload-form" data-upload-url="/u/" data-max-file-size="big"></form>"#;
        assert!(parse_upload_form(bad_size, "https://freesound.org/").is_err());
    }

    #[test]
    fn test_csrf_from_cookies() {
        let headers = [
            "sessionid=abc; HttpOnly; Path=/",
            "csrftoken=Tok42xyz; expires=Thu, 01 Jan 2027 00:00:00 GMT; Path=/",
        ];
        assert_eq!(csrf_from_cookies(headers), Some("Tok42xyz".to_string()));
        assert_eq!(
            csrf_from_cookies(["theme=dark; csrftoken=fromCookieHeader"]),
            Some("fromCookieHeader".to_string())
        );
        assert_eq!(csrf_from_cookies(["xcsrftoken=nope"]), None);
    }

    #[test]
    fn test_csrf_from_html() {
        assert_eq!(csrf_from_html(PAGE), Some("hiddenTok123".to_string()));
        assert_eq!(csrf_from_html("<form></form>"), None);
    }

    #[test]
    fn test_hyphenated_attribute_is_not_a_match() {
        let input = r#"<input data-value='decoy' name="csrfmiddlewaretoken" value="realTok">"#;
        assert_eq!(csrf_from_html(input), Some("realTok".to_string()));

        let decoy_only = r#"<input name="csrfmiddlewaretoken" data-value='decoy'>"#;
        assert_eq!(csrf_from_html(decoy_only), None);

        let form = r#"<form id="upload-form" x-data-upload-url="/wrong/" data-upload-url="/right/" data-max-file-size="10"></form>"#;
        let attrs = parse_upload_form(form, "https://freesound.org/").unwrap();
        assert_eq!(attrs.upload_url, "https://freesound.org/right/");
    }
}
