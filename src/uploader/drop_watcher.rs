use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::errors::AppResult;

use super::upload_queue::QueuedFile;

/// How long the directory must be quiet before a batch is handed out.
pub const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_millis(500);

/// A directory acting as the drop area: files copied or moved into it are
/// collected into batches for [`super::UploadQueueManager::ingest`].
pub struct DropWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<PathBuf>,
    settle_window: Duration,
    pending: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl DropWatcher {
    pub fn watch(directory: &Path) -> AppResult<Self> {
        Self::watch_with_settle_window(directory, DEFAULT_SETTLE_WINDOW)
    }

    pub fn watch_with_settle_window(directory: &Path, settle_window: Duration) -> AppResult<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_drop_event(&event.kind) => {
                    for path in event.paths {
                        if sender.send(path).is_err() {
                            log::debug!("Drop watcher receiver closed");
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("Drop directory watch error (non-critical): {}", e),
            }
        })?;

        watcher.watch(directory, RecursiveMode::NonRecursive)?;
        log::info!("Watching {} for dropped files", directory.display());

        Ok(Self {
            _watcher: watcher,
            receiver,
            settle_window,
            pending: Vec::new(),
            seen: HashSet::new(),
        })
    }

    /// Waits for files to appear, then keeps collecting until the directory
    /// has been quiet for the settle window. Returns `None` once the watcher
    /// has shut down.
    ///
    /// Cancel safe: paths collected before the future is dropped stay pending
    /// and are returned by the next call or by [`DropWatcher::drain_pending`].
    pub async fn next_batch(&mut self) -> Option<Vec<QueuedFile>> {
        loop {
            if self.pending.is_empty() {
                let first = self.receiver.recv().await?;
                self.push_pending(first);
            }

            while let Ok(Some(path)) = timeout(self.settle_window, self.receiver.recv()).await {
                self.push_pending(path);
            }

            let batch = self.take_pending();
            if !batch.is_empty() {
                return Some(batch);
            }
        }
    }

    /// Returns everything dropped so far without waiting for the directory
    /// to settle.
    pub fn drain_pending(&mut self) -> Vec<QueuedFile> {
        while let Ok(path) = self.receiver.try_recv() {
            self.push_pending(path);
        }
        self.take_pending()
    }

    fn push_pending(&mut self, path: PathBuf) {
        if self.seen.insert(path.clone()) {
            self.pending.push(path);
        }
    }

    fn take_pending(&mut self) -> Vec<QueuedFile> {
        self.seen.clear();
        collect_files(&std::mem::take(&mut self.pending))
    }
}

fn is_drop_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

fn collect_files(paths: &[PathBuf]) -> Vec<QueuedFile> {
    paths
        .iter()
        .filter(|path| path.is_file())
        .filter_map(|path| match QueuedFile::from_path(path) {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!("Skipping dropped file {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}
