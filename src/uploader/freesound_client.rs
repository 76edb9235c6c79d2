use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{COOKIE, REFERER};
use reqwest::{multipart, Body, Client};
use std::path::Path;
use tokio::fs::File;
use tokio::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, AppResult};

use super::progress_tracker::ProgressReporter;
use super::upload_queue::QueuedFile;

/// Form field repeated once per queued file.
pub const FILES_FIELD: &str = "files";
/// Form field carrying the CSRF token.
pub const CSRF_FIELD: &str = "csrfmiddlewaretoken";
/// Read buffer size for file bodies; each chunk read is one progress tick.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Terminal result of one submit.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Status in `[200, 400)`. `body` is the follow-up page.
    Succeeded { status: u16, body: String },
    /// Any other status, or a transport error when `status` is `None`.
    Failed { status: Option<u16>, reason: String },
    Aborted,
}

struct PayloadFile {
    name: String,
    file: File,
    length: u64,
    mime_type: &'static str,
}

/// Multipart payload built from the queue. Files are opened up front and
/// read from disk only while the request body is being sent.
pub struct UploadPayload {
    files: Vec<PayloadFile>,
    csrf_token: String,
}

impl UploadPayload {
    pub fn new(csrf_token: &str) -> Self {
        Self {
            files: Vec::new(),
            csrf_token: csrf_token.to_string(),
        }
    }

    /// Opens every queued file. Returns `Ok(None)` if `cancel` fires before
    /// all of them are open.
    pub async fn from_queue(
        files: &[QueuedFile],
        csrf_token: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<Self>> {
        let mut payload = Self::new(csrf_token);
        for file in files {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            payload.add_file(file).await?;
        }
        Ok(Some(payload))
    }

    pub async fn add_file(&mut self, queued: &QueuedFile) -> AppResult<()> {
        let file = File::open(&queued.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::file_not_found(&queued.path.to_string_lossy())
            } else {
                AppError::Io(e)
            }
        })?;

        let length = file.metadata().await?.len();
        if length != queued.size {
            log::warn!(
                "{} changed size since it was queued ({} -> {} bytes)",
                queued.name,
                queued.size,
                length
            );
        }

        self.files.push(PayloadFile {
            name: queued.name.clone(),
            file,
            length,
            mime_type: mime_type_for(&queued.path),
        });
        Ok(())
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Bytes counted by the progress reporter: every file plus the CSRF field.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum::<u64>() + self.csrf_token.len() as u64
    }

    /// File parts come first, in queue order, followed by the CSRF field.
    pub fn into_form(self, reporter: &ProgressReporter) -> AppResult<multipart::Form> {
        let mut form = multipart::Form::new();

        for payload_file in self.files {
            let part = multipart::Part::stream_with_length(
                Body::wrap_stream(file_stream(payload_file.file, reporter.clone())),
                payload_file.length,
            )
            .file_name(payload_file.name)
            .mime_str(payload_file.mime_type)?;

            form = form.part(FILES_FIELD, part);
        }

        let token = Bytes::from(self.csrf_token);
        let token_length = token.len() as u64;
        let csrf_part = multipart::Part::stream_with_length(
            Body::wrap_stream(field_stream(token, reporter.clone())),
            token_length,
        );

        Ok(form.part(CSRF_FIELD, csrf_part))
    }
}

fn file_stream(
    file: File,
    reporter: ProgressReporter,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static {
    ReaderStream::with_capacity(file, CHUNK_SIZE).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            reporter.advance(bytes.len() as u64);
        }
        chunk
    })
}

fn field_stream(
    value: Bytes,
    reporter: ProgressReporter,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static {
    futures::stream::iter(std::iter::once(value)).map(move |value| {
        reporter.advance(value.len() as u64);
        Ok::<Bytes, std::io::Error>(value)
    })
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "wav" => "audio/wav",
        "aif" | "aiff" => "audio/aiff",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wv" => "audio/x-wavpack",
        _ => "application/octet-stream",
    }
}

/// HTTP client for the upload form endpoint.
pub struct FreesoundClient {
    client: Client,
    session_cookie: Option<String>,
}

impl FreesoundClient {
    /// No timeout is applied unless one is given; a stalled upload otherwise
    /// waits until the user aborts it.
    pub fn new(timeout: Option<Duration>) -> AppResult<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            session_cookie: None,
        })
    }

    pub fn with_session_cookie(mut self, session_cookie: Option<String>) -> Self {
        self.session_cookie = session_cookie;
        self
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn session_cookie(&self) -> Option<&str> {
        self.session_cookie.as_deref()
    }

    /// Sends the payload as a single POST. Cancelling the token drops the
    /// in-flight request and yields [`UploadOutcome::Aborted`].
    pub async fn submit(
        &self,
        url: &str,
        payload: UploadPayload,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> UploadOutcome {
        let csrf_token = payload.csrf_token().to_string();
        let file_count = payload.file_count();
        let total_bytes = payload.total_bytes();

        let form = match payload.into_form(reporter) {
            Ok(form) => form,
            Err(e) => {
                return UploadOutcome::Failed {
                    status: None,
                    reason: e.to_string(),
                }
            }
        };

        // A browser would attach these on its own; Django's CSRF check needs
        // the cookie, the header, and a same-origin referer over HTTPS.
        let request = self
            .client
            .post(url)
            .header(REFERER, url)
            .header("X-CSRFToken", csrf_token.as_str())
            .header(COOKIE, self.cookie_header(&csrf_token))
            .multipart(form);

        log::info!("Posting {} files ({} bytes) to {}", file_count, total_bytes, url);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return UploadOutcome::Aborted,
            response = request.send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Upload request failed: {}", e);
                return UploadOutcome::Failed {
                    status: None,
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        if !(200..400).contains(&status) {
            log::warn!("Upload endpoint responded with status {}", status);
            return UploadOutcome::Failed {
                status: Some(status),
                reason: format!("Server responded with status {}", status),
            };
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return UploadOutcome::Aborted,
            body = response.text() => body,
        };

        match body {
            Ok(body) => {
                log::debug!(
                    "Upload response (first 300 chars): {}",
                    body.chars().take(300).collect::<String>()
                );
                UploadOutcome::Succeeded { status, body }
            }
            Err(e) => UploadOutcome::Failed {
                status: Some(status),
                reason: format!("Failed to read response body: {}", e),
            },
        }
    }

    fn cookie_header(&self, csrf_token: &str) -> String {
        match &self.session_cookie {
            Some(session) => format!("csrftoken={}; sessionid={}", csrf_token, session),
            None => format!("csrftoken={}", csrf_token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::progress_tracker::progress_channel;
    use std::path::PathBuf;

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for(&PathBuf::from("a.WAV")), "audio/wav");
        assert_eq!(mime_type_for(&PathBuf::from("a.aif")), "audio/aiff");
        assert_eq!(mime_type_for(&PathBuf::from("a.mp3")), "audio/mpeg");
        assert_eq!(mime_type_for(&PathBuf::from("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_payload_from_queue_opens_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wind.wav");
        std::fs::write(&path, vec![1u8; 1000]).unwrap();

        let queued = vec![QueuedFile::new("wind.wav", 1000, &path)];
        let payload = UploadPayload::from_queue(&queued, "tok", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(payload.file_count(), 1);
        assert_eq!(payload.total_bytes(), 1003);
        assert_eq!(payload.csrf_token(), "tok");
    }

    #[tokio::test]
    async fn test_missing_file_fails_payload() {
        let queued = vec![QueuedFile::new("gone.wav", 10, "/nonexistent/gone.wav")];
        let result = UploadPayload::from_queue(&queued, "tok", &CancellationToken::new()).await;
        assert!(matches!(result, Err(AppError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_payload_opens_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        // A missing file would fail if it were opened.
        let queued = vec![QueuedFile::new("gone.wav", 10, "/nonexistent/gone.wav")];
        let result = UploadPayload::from_queue(&queued, "tok", &cancel).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_file_stream_reads_in_chunks_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        std::fs::write(&path, vec![3u8; 150_000]).unwrap();

        let (reporter, receiver) = progress_channel(Some(150_000));
        let file = File::open(&path).await.unwrap();
        let stream = file_stream(file, reporter.clone());

        // Nothing is read until the transport pulls the stream.
        assert_eq!(reporter.loaded(), 0);

        let chunks: Vec<Bytes> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|chunk| chunk.len() <= CHUNK_SIZE));
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 150_000);
        assert_eq!(reporter.loaded(), 150_000);
        assert_eq!(receiver.borrow().fraction(), 1.0);
    }

    #[tokio::test]
    async fn test_field_stream_counts_token_bytes() {
        let (reporter, _receiver) = progress_channel(Some(5));
        let chunks: Vec<Bytes> = field_stream(Bytes::from_static(b"tok42"), reporter.clone())
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec![Bytes::from_static(b"tok42")]);
        assert_eq!(reporter.loaded(), 5);
    }

    #[test]
    fn test_cookie_header() {
        let client = FreesoundClient::new(None).unwrap();
        assert_eq!(client.cookie_header("abc"), "csrftoken=abc");

        let client = client.with_session_cookie(Some("s3ss".to_string()));
        assert_eq!(client.cookie_header("abc"), "csrftoken=abc; sessionid=s3ss");
    }
}
