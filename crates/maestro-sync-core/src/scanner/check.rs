use crate::backend::{BackendRegistry, TagSet};
use crate::identifier::Identify;
use crate::url::Url;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

/// A known file whose disk modification time is newer than its last
/// verification. `db_tags` is what the store currently records for it.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub path: PathBuf,
    pub url: Url,
    pub id: i64,
    pub db_tags: TagSet,
}

/// Disk tags no longer match the store.
#[derive(Debug, Clone)]
pub struct ModifiedTags {
    pub path: PathBuf,
    pub id: i64,
    pub db_tags: TagSet,
    pub disk_tags: TagSet,
    pub hash: Option<String>,
    pub length: Option<f64>,
}

/// Tags match; the content hash should simply be refreshed.
#[derive(Debug, Clone)]
pub struct ChangedHash {
    pub path: PathBuf,
    pub id: i64,
    pub hash: Option<String>,
    pub length: Option<f64>,
}

/// Receiving side of a running check.
pub struct CheckEvents {
    modified: Receiver<ModifiedTags>,
    changed: Receiver<ChangedHash>,
    done: Arc<AtomicBool>,
}

impl CheckEvents {
    /// Read before draining: once this returns true, every event has
    /// already been queued.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn modified_tags(&self) -> Vec<ModifiedTags> {
        self.modified.try_iter().collect()
    }

    pub fn changed_hashes(&self) -> Vec<ChangedHash> {
        self.changed.try_iter().collect()
    }
}

pub fn spawn_checker(
    requests: Vec<CheckRequest>,
    backends: Arc<BackendRegistry>,
    identifier: Arc<dyn Identify>,
) -> io::Result<CheckEvents> {
    let (modified_tx, modified) = mpsc::channel();
    let (changed_tx, changed) = mpsc::channel();
    let done = Arc::new(AtomicBool::new(false));
    let thread_done = Arc::clone(&done);

    thread::Builder::new()
        .name("modification-checker".into())
        .spawn(move || {
            debug!("Checking {} possibly modified files", requests.len());
            check_files(requests, &backends, identifier.as_ref(), &modified_tx, &changed_tx);
            thread_done.store(true, Ordering::SeqCst);
        })?;

    Ok(CheckEvents {
        modified,
        changed,
        done,
    })
}

fn check_files(
    requests: Vec<CheckRequest>,
    backends: &BackendRegistry,
    identifier: &dyn Identify,
    modified_tx: &Sender<ModifiedTags>,
    changed_tx: &Sender<ChangedHash>,
) {
    for request in requests {
        let mut file = match backends.open(&request.url) {
            Ok(file) => file,
            Err(e) => {
                warn!("Skipping {}: {}", request.path.display(), e);
                continue;
            }
        };
        let disk_tags = match file.read_tags() {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Could not read tags of {}: {}", request.path.display(), e);
                continue;
            }
        };
        let length = file.length();
        drop(file);

        let hash = identifier.identify(&request.path);

        let sent = if disk_tags != request.db_tags {
            trace!("Tags of {} differ from the library", request.path.display());
            modified_tx
                .send(ModifiedTags {
                    path: request.path,
                    id: request.id,
                    db_tags: request.db_tags,
                    disk_tags,
                    hash,
                    length,
                })
                .is_ok()
        } else {
            changed_tx
                .send(ChangedHash {
                    path: request.path,
                    id: request.id,
                    hash,
                    length,
                })
                .is_ok()
        };
        if !sent {
            debug!("Check abandoned by its source");
            return;
        }
    }
}
