//! A dedup'd FIFO queue of pending transfers, with a priority escape hatch.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::model::FileId;

/// Transfer queue for a single direction (upload or download). Enqueuing an
/// id already present is a no-op; [`TransferQueue::prioritize`] moves an id
/// to the front regardless of whether it was already queued.
#[derive(Debug, Default)]
pub struct TransferQueue {
    items: Mutex<VecDeque<FileId>>,
    notify: Notify,
}

impl TransferQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Appends `file_id` to the back of the queue. Returns `false` if it was
    /// already queued.
    pub async fn enqueue(&self, file_id: FileId) -> bool {
        let added = {
            let mut guard = self.items.lock().await;
            if guard.contains(&file_id) {
                false
            } else {
                guard.push_back(file_id);
                true
            }
        };
        if added {
            self.notify.notify_waiters();
        }
        added
    }

    /// Moves `file_id` to the front of the queue, enqueuing it if it wasn't
    /// already present. Returns `true` if it was already queued elsewhere.
    pub async fn prioritize(&self, file_id: &FileId) -> bool {
        let already_queued = {
            let mut guard = self.items.lock().await;
            let existing = guard.iter().position(|queued| queued == file_id);
            if let Some(index) = existing {
                guard.remove(index);
            }
            guard.push_front(file_id.clone());
            existing.is_some()
        };
        self.notify.notify_waiters();
        already_queued
    }

    /// Removes `file_id` from the queue if present. Returns `true` if it was
    /// removed.
    pub async fn remove(&self, file_id: &FileId) -> bool {
        let mut guard = self.items.lock().await;
        if let Some(index) = guard.iter().position(|queued| queued == file_id) {
            guard.remove(index);
            true
        } else {
            false
        }
    }

    /// Waits for an item to be available and pops it from the front.
    pub async fn dequeue_or_wait(&self) -> FileId {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.items.lock().await.pop_front() {
                return item;
            }
            notified.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}
