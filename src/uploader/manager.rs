use tokio_util::sync::CancellationToken;

use crate::config::UploadFormConfig;
use crate::errors::AppResult;

use super::freesound_client::{FreesoundClient, UploadOutcome, UploadPayload};
use super::progress_tracker::{progress_channel, SessionState, UploadProgress, UploadSession};
use super::size_indicator::SizeIndicator;
use super::upload_queue::{IngestReport, QueuedFile, UploadQueue};
use super::view::{ControlState, UploadView};

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";
pub const ABORTED_MESSAGE: &str = "Upload aborted";

/// Owns the upload queue and drives at most one upload session at a time.
pub struct UploadQueueManager<V: UploadView> {
    config: UploadFormConfig,
    queue: UploadQueue,
    view: V,
    client: FreesoundClient,
    last_session: Option<UploadSession>,
}

impl<V: UploadView> UploadQueueManager<V> {
    pub fn new(config: UploadFormConfig, view: V) -> AppResult<Self> {
        let client = FreesoundClient::new(config.request_timeout)?;
        Self::with_client(config, view, client)
    }

    pub fn with_client(config: UploadFormConfig, view: V, client: FreesoundClient) -> AppResult<Self> {
        config.validate()?;

        let mut manager = Self {
            queue: UploadQueue::new(config.max_upload_size),
            config,
            view,
            client,
            last_session: None,
        };

        manager.view.clear_progress();
        manager.view.set_controls(ControlState::IDLE);
        manager.view.set_drop_area_visible(false);
        manager.render_file_list();
        manager.render_size_indicator();

        Ok(manager)
    }

    pub fn config(&self) -> &UploadFormConfig {
        &self.config
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn into_view(self) -> V {
        self.view
    }

    pub fn last_session(&self) -> Option<&UploadSession> {
        self.last_session.as_ref()
    }

    /// Something is being dragged over the host.
    pub fn drag_over(&mut self) {
        self.view.set_drop_area_visible(true);
    }

    pub fn drag_leave(&mut self) {
        self.view.set_drop_area_visible(false);
    }

    /// Adds picked or dropped files, deduplicating and trimming to the budget.
    pub fn ingest(&mut self, candidates: Vec<QueuedFile>) -> IngestReport {
        self.view.set_drop_area_visible(false);

        let report = self.queue.ingest(candidates);

        self.render_file_list();
        self.render_size_indicator();

        if report.discarded > 0 {
            let message = self.discard_message(report.discarded);
            log::warn!("{}", message);
            self.reset(Some(&message));
        } else {
            self.reset(None);
            self.view.clear_errors();
        }

        report
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.render_file_list();
        self.render_size_indicator();
    }

    pub fn discard_message(&self, discarded: usize) -> String {
        discard_message(self.config.max_upload_size_mb, discarded)
    }

    pub fn size_indicator(&self) -> SizeIndicator {
        SizeIndicator::compute(self.queue.total_size(), self.queue.max_upload_size())
    }

    pub fn render_size_indicator(&mut self) {
        let indicator = self.size_indicator();
        self.view.render_size_indicator(&indicator);
    }

    fn render_file_list(&mut self) {
        self.view.set_drag_tip_visible(self.queue.is_empty());
        self.view.render_file_list(self.queue.files());
    }

    /// Returns the form to its idle look. A non-blank message replaces the
    /// error list.
    pub fn reset(&mut self, message: Option<&str>) {
        self.view.clear_progress();
        self.view.set_controls(ControlState::IDLE);
        self.render_file_list();

        if let Some(message) = message.filter(|m| !m.trim().is_empty()) {
            self.view.show_error(message);
        }
    }

    /// Uploads the whole queue in one POST and returns the terminal state.
    ///
    /// Cancelling `cancel` aborts the request. The queue is kept after a
    /// failure or an abort so the user can try again, and emptied after a
    /// successful upload.
    pub async fn submit(&mut self, cancel: &CancellationToken) -> SessionState {
        let mut session = UploadSession::new();
        if let Err(e) = session.start() {
            log::error!("Could not start upload session: {}", e);
            return session.state;
        }

        self.view.set_controls(ControlState::UPLOADING);

        if self.queue.is_empty() {
            log::warn!("Submitting an empty queue; only the CSRF token will be sent");
        }

        let outcome = match UploadPayload::from_queue(self.queue.files(), &self.config.csrf_token, cancel).await {
            Ok(Some(payload)) => {
                let (reporter, mut progress) = progress_channel(Some(payload.total_bytes()));

                let send = self
                    .client
                    .submit(&self.config.submit_url, payload, &reporter, cancel);
                tokio::pin!(send);

                let outcome = loop {
                    tokio::select! {
                        outcome = &mut send => break outcome,
                        changed = progress.changed() => {
                            if changed.is_err() {
                                break (&mut send).await;
                            }
                            let tick = *progress.borrow_and_update();
                            apply_progress(&mut self.view, &mut session, tick);
                        }
                    }
                };

                if progress.has_changed().unwrap_or(false) {
                    let tick = *progress.borrow_and_update();
                    apply_progress(&mut self.view, &mut session, tick);
                }

                outcome
            }
            Ok(None) => UploadOutcome::Aborted,
            Err(e) => {
                log::error!("Failed to open queued files: {}", e);
                UploadOutcome::Failed {
                    status: None,
                    reason: e.to_string(),
                }
            }
        };

        self.finish(&mut session, outcome);
        let state = session.state;
        self.last_session = Some(session);
        state
    }

    fn finish(&mut self, session: &mut UploadSession, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Succeeded { status, body } => {
                if session.finish(SessionState::Succeeded) {
                    log::info!("Upload accepted with status {}", status);
                    self.queue.clear();
                    self.view.replace_document(&body);
                }
            }
            UploadOutcome::Failed { status, reason } => {
                if session.finish(SessionState::Failed) {
                    log::error!("Upload failed (status {:?}): {}", status, reason);
                    self.reset(Some(GENERIC_ERROR_MESSAGE));
                }
            }
            UploadOutcome::Aborted => {
                if session.finish(SessionState::Aborted) {
                    self.reset(Some(ABORTED_MESSAGE));
                }
            }
        }
    }
}

/// Message shown when the size budget forced files out of the queue.
pub fn discard_message(max_upload_size_mb: u64, discarded: usize) -> String {
    format!(
        "Upload limit of {} MB exceeded. {} file{} discarded.",
        max_upload_size_mb,
        discarded,
        if discarded > 1 { "s" } else { "" }
    )
}

fn apply_progress<V: UploadView>(view: &mut V, session: &mut UploadSession, tick: UploadProgress) {
    if let Some(update) = session.update_progress(tick) {
        view.show_progress(update);
    }
}
