// Upload widget module - queue, size budget, and the single in-flight session
//
// This module is responsible for getting queued audio files onto the Freesound upload form

pub mod drop_watcher;
pub mod freesound_client;
pub mod manager;
pub mod progress_tracker;
pub mod size_indicator;
pub mod upload_queue;
pub mod view;

pub use drop_watcher::DropWatcher;
pub use freesound_client::{FreesoundClient, UploadOutcome, UploadPayload};
pub use manager::{discard_message, UploadQueueManager, ABORTED_MESSAGE, GENERIC_ERROR_MESSAGE};
pub use progress_tracker::{ProgressUpdate, SessionState, UploadProgress, UploadSession};
pub use size_indicator::{SizeBand, SizeIndicator};
pub use upload_queue::{IngestReport, QueuedFile, UploadQueue};
pub use view::{ControlState, RecordingView, UploadView, ViewEvent};
