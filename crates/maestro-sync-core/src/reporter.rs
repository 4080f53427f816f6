use crate::backend::TagSet;
use crate::tree::SyncState;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// Counters for one completed scan of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files_on_disk: usize,
    pub new_files: usize,
    pub removed_candidates: usize,
    pub hash_requests: usize,
    pub modified_checked: usize,
    pub renames_detected: usize,
    pub relocated: usize,
    pub deleted: usize,
    pub unresolved_missing: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChange {
    Added,
    Changed,
    Deleted,
}

/// Trait for reporting synchronization state changes.
///
/// The CLI implements it with tracing/indicatif; GUIs forward the calls to
/// their views. All methods have default no-op implementations.
pub trait SyncReporter: Send + Sync {
    fn on_file_state_changed(&self, _path: &Path) {}
    fn on_folder_state_changed(&self, _path: &Path, _state: SyncState) {}
    fn on_source_changed(&self, _change: SourceChange, _name: &str) {}
    fn on_scan_started(&self, _source: &str) {}
    fn on_scan_finished(&self, _source: &str, _stats: &ScanStats) {}
}

/// No-op reporter for silent operation.
pub struct SilentReporter;

impl SyncReporter for SilentReporter {}

/// A notification emitted by a source, as delivered by [`ChannelReporter`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    FileStateChanged(PathBuf),
    FolderStateChanged(PathBuf, SyncState),
    SourceChanged(SourceChange, String),
    ScanStarted(String),
    ScanFinished(String, ScanStats),
}

/// Forwards every notification over a channel so the host can consume them
/// on its own schedule.
pub struct ChannelReporter {
    tx: Mutex<Sender<SyncEvent>>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<SyncEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    fn send(&self, event: SyncEvent) {
        if let Ok(tx) = self.tx.lock() {
            // receiver gone means nobody listens anymore
            let _ = tx.send(event);
        }
    }
}

impl SyncReporter for ChannelReporter {
    fn on_file_state_changed(&self, path: &Path) {
        self.send(SyncEvent::FileStateChanged(path.to_path_buf()));
    }

    fn on_folder_state_changed(&self, path: &Path, state: SyncState) {
        self.send(SyncEvent::FolderStateChanged(path.to_path_buf(), state));
    }

    fn on_source_changed(&self, change: SourceChange, name: &str) {
        self.send(SyncEvent::SourceChanged(change, name.to_string()));
    }

    fn on_scan_started(&self, source: &str) {
        self.send(SyncEvent::ScanStarted(source.to_string()));
    }

    fn on_scan_finished(&self, source: &str, stats: &ScanStats) {
        self.send(SyncEvent::ScanFinished(source.to_string(), stats.clone()));
    }
}

/// Tags of a known file differ between the store and the file on disk.
#[derive(Debug, Clone)]
pub struct TagConflict {
    pub path: PathBuf,
    pub id: i64,
    pub db_tags: TagSet,
    pub disk_tags: TagSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagChoice {
    /// Write the stored tags back to the file.
    UseDatabase,
    /// Replace the stored tags with the ones read from disk.
    UseDisk,
    /// Leave the file unverified; it is offered again on the next scan.
    Defer,
}

/// A known file that was not found on disk and could not be matched to a
/// renamed file by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    pub path: PathBuf,
    pub id: i64,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingResolution {
    Relocate(PathBuf),
    Delete,
    Defer,
}

/// Decisions the synchronization engine cannot take on its own.
pub trait ConflictResolver: Send + Sync {
    fn resolve_modified_tags(&self, conflict: &TagConflict) -> TagChoice;

    /// Returns a resolution per missing path; paths left out are deferred.
    fn resolve_missing_files(&self, missing: &[MissingFile]) -> Vec<(PathBuf, MissingResolution)>;
}

/// Resolver that never decides anything.
pub struct DeferringResolver;

impl ConflictResolver for DeferringResolver {
    fn resolve_modified_tags(&self, _conflict: &TagConflict) -> TagChoice {
        TagChoice::Defer
    }

    fn resolve_missing_files(&self, _missing: &[MissingFile]) -> Vec<(PathBuf, MissingResolution)> {
        Vec::new()
    }
}
