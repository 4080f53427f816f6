//! Notifications about library elements changing outside of a scan.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// A change to committed library elements, published by whoever made it.
#[derive(Debug, Clone, PartialEq)]
pub enum RealFileEvent {
    /// Files committed to the library, with their new element ids.
    Added(Vec<(PathBuf, i64)>),
    /// Files dropped from the library; they remain on disk.
    Removed(Vec<PathBuf>),
    /// Files renamed on disk, as (old, new) pairs. The store already holds
    /// the new URLs.
    Renamed(Vec<(PathBuf, PathBuf)>),
    /// File contents changed, e.g. after writing tags.
    Modified(Vec<PathBuf>),
    /// Files deleted from disk.
    Deleted(Vec<PathBuf>),
}

impl RealFileEvent {
    /// Every path the event mentions.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            RealFileEvent::Added(files) => files.iter().map(|(p, _)| p.as_path()).collect(),
            RealFileEvent::Renamed(pairs) => pairs
                .iter()
                .flat_map(|(old, new)| [old.as_path(), new.as_path()])
                .collect(),
            RealFileEvent::Removed(paths)
            | RealFileEvent::Modified(paths)
            | RealFileEvent::Deleted(paths) => paths.iter().map(PathBuf::as_path).collect(),
        }
    }
}

/// Fan-out of [`RealFileEvent`]s to every subscribed source.
#[derive(Default)]
pub struct FileEventBus {
    subscribers: Mutex<Vec<(u64, Sender<RealFileEvent>)>>,
    next_id: AtomicU64,
}

impl FileEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (u64, Receiver<RealFileEvent>) {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub, _)| *sub != id);
    }

    pub fn publish(&self, event: RealFileEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        trace!("Publishing {:?} to {} subscribers", event, subscribers.len());
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
