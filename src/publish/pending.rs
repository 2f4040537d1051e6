//! Bounded retry queue for failed uploads.

use std::collections::VecDeque;
use std::path::PathBuf;

use super::Publisher;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingUpload {
    pub local_path: PathBuf,
    pub key: String,
}

/// Failed uploads waiting for another attempt, oldest first.
///
/// When full, the oldest entry is dropped. Its local file is left on disk.
#[derive(Debug)]
pub struct PendingUploads {
    queue: VecDeque<PendingUpload>,
    capacity: usize,
    dropped: u64,
}

impl PendingUploads {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, upload: PendingUpload) {
        if self.capacity == 0 {
            log::warn!("retry queue disabled, giving up on {}", upload.key);
            self.dropped += 1;
            return;
        }
        while self.queue.len() >= self.capacity {
            if let Some(old) = self.queue.pop_front() {
                log::warn!(
                    "retry queue full ({}), dropping {} (local copy kept at {})",
                    self.capacity,
                    old.key,
                    old.local_path.display()
                );
                self.dropped += 1;
            }
        }
        self.queue.push_back(upload);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Entries evicted or refused since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingUpload> {
        self.queue.iter()
    }

    /// Try every queued upload once. Failures go back on the queue in their
    /// original order. Returns how many succeeded.
    pub fn retry(&mut self, publisher: &mut dyn Publisher) -> usize {
        if self.queue.is_empty() {
            return 0;
        }
        log::info!("retrying {} pending upload(s)", self.queue.len());
        let mut succeeded = 0;
        let mut still_failing = VecDeque::with_capacity(self.queue.len());
        while let Some(upload) = self.queue.pop_front() {
            match publisher.publish(&upload.local_path, &upload.key) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    log::warn!("retry of {} failed: {:#}", upload.key, e);
                    still_failing.push_back(upload);
                }
            }
        }
        self.queue = still_failing;
        succeeded
    }
}
