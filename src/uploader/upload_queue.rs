use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::AppResult;
use crate::security::{FileSystemGuard, InputValidator};

/// A file waiting to be uploaded.
///
/// Identity is the `(name, size)` pair, the same key the browser widget used.
/// Two different recordings that happen to share a name and a byte length are
/// treated as one file; `path` is deliberately left out of the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedFile {
    pub name: String,
    pub size: u64,
    pub path: PathBuf,
}

impl QueuedFile {
    pub fn new(name: &str, size: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            size,
            path: path.into(),
        }
    }

    /// Reads name and size from the filesystem.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let path_str = path.to_string_lossy();
        InputValidator::validate_file_path(&path_str)?;

        let size = FileSystemGuard::get_file_size(&path_str)?;
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(Self::new(&name, size, path))
    }

    pub fn is_same_file(&self, other: &QueuedFile) -> bool {
        self.size == other.size && self.name == other.name
    }
}

/// Counts returned by [`UploadQueue::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    /// Files from this batch that are now in the queue.
    pub accepted: usize,
    /// Files dropped by the size budget. Duplicates are not counted.
    pub discarded: usize,
}

/// Ordered list of files pending upload. Insertion order is display order.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    files: Vec<QueuedFile>,
    max_upload_size: u64,
}

impl UploadQueue {
    pub fn new(max_upload_size: u64) -> Self {
        Self {
            files: Vec::new(),
            max_upload_size,
        }
    }

    pub fn files(&self) -> &[QueuedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Appends a batch, then removes duplicates and trims to the size budget.
    ///
    /// Both passes run left to right over the whole queue, so files already
    /// queued always win over newcomers.
    pub fn ingest(&mut self, candidates: Vec<QueuedFile>) -> IngestReport {
        let previously_queued = self.files.len();
        let batch_len = candidates.len();

        let mut merged = std::mem::take(&mut self.files);
        merged.extend(candidates);

        let deduplicated = remove_duplicates(merged);
        let before_trim = deduplicated.len();

        self.files = trim_to_budget(deduplicated, self.max_upload_size);
        let discarded = before_trim - self.files.len();

        // Earlier files always fit on a re-run of the trim, so the queued
        // prefix is untouched and everything after it came from this batch.
        let accepted = self.files.len().saturating_sub(previously_queued);

        log::debug!(
            "Ingested batch of {}: {} accepted, {} discarded, queue now {} files / {} bytes",
            batch_len,
            accepted,
            discarded,
            self.files.len(),
            self.total_size()
        );

        IngestReport {
            accepted,
            discarded,
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

fn remove_duplicates(files: Vec<QueuedFile>) -> Vec<QueuedFile> {
    files.into_iter().fold(Vec::<QueuedFile>::new(), |mut kept, current| {
        if !kept.iter().any(|f| f.is_same_file(&current)) {
            kept.push(current);
        }
        kept
    })
}

fn trim_to_budget(files: Vec<QueuedFile>, max_upload_size: u64) -> Vec<QueuedFile> {
    let mut total: u64 = 0;
    files
        .into_iter()
        .filter(|file| {
            let fits = total.saturating_add(file.size) < max_upload_size;
            if fits {
                total += file.size;
            } else {
                log::debug!(
                    "Discarding {} ({} bytes): budget of {} bytes would be exceeded",
                    file.name,
                    file.size,
                    max_upload_size
                );
            }
            fits
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> QueuedFile {
        QueuedFile::new(name, size, format!("/tmp/{}", name))
    }

    fn names(queue: &UploadQueue) -> Vec<&str> {
        queue.files().iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_third_file_over_budget_is_discarded() {
        let mut queue = UploadQueue::new(100);
        let report = queue.ingest(vec![file("A", 40), file("B", 40), file("C", 40)]);

        assert_eq!(names(&queue), vec!["A", "B"]);
        assert_eq!(queue.total_size(), 80);
        assert_eq!(report, IngestReport { accepted: 2, discarded: 1 });
    }

    #[test]
    fn test_duplicate_in_batch_is_not_counted_as_discarded() {
        let mut queue = UploadQueue::new(100);
        let report = queue.ingest(vec![file("A", 40), file("A", 40)]);

        assert_eq!(names(&queue), vec!["A"]);
        assert_eq!(report, IngestReport { accepted: 1, discarded: 0 });
    }

    #[test]
    fn test_same_name_different_size_is_a_different_file() {
        let mut queue = UploadQueue::new(1000);
        queue.ingest(vec![file("A", 40), file("A", 41)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_exact_budget_is_rejected() {
        let mut queue = UploadQueue::new(100);
        let report = queue.ingest(vec![file("A", 60), file("B", 40)]);

        assert_eq!(names(&queue), vec!["A"]);
        assert_eq!(report.discarded, 1);
    }

    #[test]
    fn test_smaller_file_after_rejected_one_still_fits() {
        let mut queue = UploadQueue::new(100);
        let report = queue.ingest(vec![file("A", 50), file("B", 60), file("C", 10)]);

        assert_eq!(names(&queue), vec!["A", "C"]);
        assert_eq!(report, IngestReport { accepted: 2, discarded: 1 });
    }

    #[test]
    fn test_repeated_ingest_is_idempotent() {
        let batch = vec![file("A", 10), file("B", 20), file("C", 30)];
        let mut queue = UploadQueue::new(1000);

        queue.ingest(batch.clone());
        let first: Vec<String> = queue.files().iter().map(|f| f.name.clone()).collect();
        let report = queue.ingest(batch);

        assert_eq!(queue.len(), 3);
        assert_eq!(report, IngestReport { accepted: 0, discarded: 0 });
        assert_eq!(
            queue.files().iter().map(|f| f.name.clone()).collect::<Vec<_>>(),
            first
        );
    }

    #[test]
    fn test_order_is_first_seen_order() {
        let mut queue = UploadQueue::new(1000);
        queue.ingest(vec![file("C", 1), file("A", 2)]);
        queue.ingest(vec![file("B", 3), file("C", 1), file("D", 4)]);

        assert_eq!(names(&queue), vec!["C", "A", "B", "D"]);
    }

    #[test]
    fn test_budget_holds_across_many_batches() {
        let mut queue = UploadQueue::new(500);
        for round in 0..20u64 {
            let batch = (0..5)
                .map(|i| file(&format!("f{}-{}", round, i), (round * 7 + i * 13) % 90 + 1))
                .collect();
            queue.ingest(batch);
            assert!(queue.total_size() < 500, "round {} broke the budget", round);
        }
    }

    #[test]
    fn test_empty_batch_and_clear() {
        let mut queue = UploadQueue::new(100);
        assert_eq!(queue.ingest(Vec::new()), IngestReport::default());

        queue.ingest(vec![file("A", 10)]);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.total_size(), 0);
    }

    #[test]
    fn test_from_path_reads_name_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rain.wav");
        std::fs::write(&path, vec![0u8; 321]).unwrap();

        let queued = QueuedFile::from_path(&path).unwrap();
        assert_eq!(queued.name, "rain.wav");
        assert_eq!(queued.size, 321);
        assert_eq!(queued.path, path);

        assert!(QueuedFile::from_path(&dir.path().join("missing.wav")).is_err());
    }
}
