use super::progress_tracker::ProgressUpdate;
use super::size_indicator::SizeIndicator;
use super::upload_queue::QueuedFile;

/// Enablement of the form controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub add_files_enabled: bool,
    pub submit_enabled: bool,
    pub abort_visible: bool,
}

impl ControlState {
    pub const IDLE: ControlState = ControlState {
        add_files_enabled: true,
        submit_enabled: true,
        abort_visible: false,
    };

    pub const UPLOADING: ControlState = ControlState {
        add_files_enabled: false,
        submit_enabled: false,
        abort_visible: true,
    };
}

/// Surfaces of the upload widget the manager draws on.
pub trait UploadView {
    fn render_file_list(&mut self, files: &[QueuedFile]);
    fn set_drag_tip_visible(&mut self, visible: bool);
    fn set_drop_area_visible(&mut self, visible: bool);
    fn render_size_indicator(&mut self, indicator: &SizeIndicator);
    fn set_controls(&mut self, controls: ControlState);
    fn show_progress(&mut self, update: ProgressUpdate);
    fn clear_progress(&mut self);
    /// Replaces the error list with a single message.
    fn show_error(&mut self, message: &str);
    fn clear_errors(&mut self);
    /// Called with the follow-up page returned by a successful upload.
    fn replace_document(&mut self, body: &str);
}

/// Everything a [`RecordingView`] was asked to draw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    FileList(Vec<String>),
    DragTip(bool),
    DropArea(bool),
    SizeIndicator(SizeIndicator),
    Controls(ControlState),
    Progress(ProgressUpdate),
    ProgressCleared,
    Error(String),
    ErrorsCleared,
    Document(String),
}

/// Headless view that keeps a log of draw calls.
#[derive(Debug, Default)]
pub struct RecordingView {
    pub events: Vec<ViewEvent>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_file_list(&self) -> Option<&[String]> {
        self.events.iter().rev().find_map(|event| match event {
            ViewEvent::FileList(names) => Some(names.as_slice()),
            _ => None,
        })
    }

    pub fn last_controls(&self) -> Option<ControlState> {
        self.events.iter().rev().find_map(|event| match event {
            ViewEvent::Controls(controls) => Some(*controls),
            _ => None,
        })
    }

    pub fn last_size_indicator(&self) -> Option<&SizeIndicator> {
        self.events.iter().rev().find_map(|event| match event {
            ViewEvent::SizeIndicator(indicator) => Some(indicator),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ViewEvent::Error(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&ViewEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }
}

impl UploadView for RecordingView {
    fn render_file_list(&mut self, files: &[QueuedFile]) {
        self.events.push(ViewEvent::FileList(
            files.iter().map(|f| f.name.clone()).collect(),
        ));
    }

    fn set_drag_tip_visible(&mut self, visible: bool) {
        self.events.push(ViewEvent::DragTip(visible));
    }

    fn set_drop_area_visible(&mut self, visible: bool) {
        self.events.push(ViewEvent::DropArea(visible));
    }

    fn render_size_indicator(&mut self, indicator: &SizeIndicator) {
        self.events.push(ViewEvent::SizeIndicator(indicator.clone()));
    }

    fn set_controls(&mut self, controls: ControlState) {
        self.events.push(ViewEvent::Controls(controls));
    }

    fn show_progress(&mut self, update: ProgressUpdate) {
        self.events.push(ViewEvent::Progress(update));
    }

    fn clear_progress(&mut self) {
        self.events.push(ViewEvent::ProgressCleared);
    }

    fn show_error(&mut self, message: &str) {
        self.events.push(ViewEvent::Error(message.to_string()));
    }

    fn clear_errors(&mut self) {
        self.events.push(ViewEvent::ErrorsCleared);
    }

    fn replace_document(&mut self, body: &str) {
        self.events.push(ViewEvent::Document(body.to_string()));
    }
}
