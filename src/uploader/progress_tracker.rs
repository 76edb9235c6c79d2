use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Uploading,
    Succeeded,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Failed | SessionState::Aborted
        )
    }
}

/// Bytes handed to the transport so far. `total` is `None` when the payload
/// length could not be computed. A known total of zero counts as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        match self.total {
            Some(0) => 1.0,
            Some(total) => (self.loaded as f64 / total as f64).min(1.0),
            None => 0.0,
        }
    }
}

/// What the view should draw after a progress tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub fraction: f64,
    pub done: bool,
}

/// One submit of the queue, from `idle` to exactly one terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    pub progress_fraction: f64,
    progress_done: bool,
}

impl UploadSession {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            state: SessionState::Idle,
            progress_fraction: 0.0,
            progress_done: false,
        }
    }

    pub fn start(&mut self) -> AppResult<()> {
        if self.state != SessionState::Idle {
            return Err(AppError::validation(
                "session",
                "Only an idle session can start uploading",
            ));
        }

        self.state = SessionState::Uploading;
        self.started_at = Utc::now();
        log::info!("Session {} started uploading", self.id);
        Ok(())
    }

    /// Applies a progress tick. Returns `None` once the session is no longer
    /// uploading. `done` is reported on the first tick that reaches 1.
    pub fn update_progress(&mut self, progress: UploadProgress) -> Option<ProgressUpdate> {
        if self.state != SessionState::Uploading {
            return None;
        }

        self.progress_fraction = progress.fraction();

        let done = self.progress_fraction >= 1.0 && !self.progress_done;
        if done {
            self.progress_done = true;
        }

        log::debug!(
            "Session {} progress: {}/{:?} bytes ({:.1}%)",
            self.id,
            progress.loaded,
            progress.total,
            self.progress_fraction * 100.0
        );

        Some(ProgressUpdate {
            fraction: self.progress_fraction,
            done,
        })
    }

    /// Moves the session to a terminal state. Returns `false`, leaving the
    /// session untouched, if it already finished.
    pub fn finish(&mut self, state: SessionState) -> bool {
        if !state.is_terminal() || self.state.is_terminal() {
            log::warn!(
                "Ignoring transition of session {} from {:?} to {:?}",
                self.id,
                self.state,
                state
            );
            return false;
        }

        self.state = state;
        let elapsed = Utc::now() - self.started_at;
        match state {
            SessionState::Succeeded => log::info!(
                "Session {} completed in {}s",
                self.id,
                elapsed.num_seconds()
            ),
            SessionState::Aborted => log::info!(
                "Session {} aborted after {}s at {:.0}%",
                self.id,
                elapsed.num_seconds(),
                self.progress_fraction * 100.0
            ),
            _ => log::error!(
                "Session {} marked as failed after {}s",
                self.id,
                elapsed.num_seconds()
            ),
        }
        true
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared counter the payload stream advances as chunks are sent.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    loaded: Arc<AtomicU64>,
    total: Option<u64>,
    sender: Arc<watch::Sender<UploadProgress>>,
}

impl ProgressReporter {
    pub fn advance(&self, bytes: u64) {
        let loaded = self.loaded.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.sender.send_replace(UploadProgress {
            loaded,
            total: self.total,
        });
    }

    pub fn loaded(&self) -> u64 {
        self.loaded.load(Ordering::SeqCst)
    }
}

pub fn progress_channel(total: Option<u64>) -> (ProgressReporter, watch::Receiver<UploadProgress>) {
    let (sender, receiver) = watch::channel(UploadProgress { loaded: 0, total });
    (
        ProgressReporter {
            loaded: Arc::new(AtomicU64::new(0)),
            total,
            sender: Arc::new(sender),
        },
        receiver,
    )
}
