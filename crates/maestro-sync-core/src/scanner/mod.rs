mod check;
mod walk;

pub use check::{spawn_checker, CheckEvents, CheckRequest, ChangedHash, ModifiedTags};
pub use walk::{read_filesystem, DiskFiles, WalkFilter};

use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use tracing::debug;

/// A directory walk running on its own thread.
pub struct WalkerHandle {
    rx: Receiver<io::Result<DiskFiles>>,
}

impl WalkerHandle {
    /// `None` while the walk is still running.
    pub fn try_finish(&self) -> Option<io::Result<DiskFiles>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(io::Error::new(
                io::ErrorKind::Other,
                "walker thread exited without a result",
            ))),
        }
    }
}

pub fn spawn_walker(root: PathBuf, filter: WalkFilter) -> io::Result<WalkerHandle> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("walker".into())
        .spawn(move || {
            debug!("Walking {}", root.display());
            let result = read_filesystem(&root, &filter);
            if let Ok(files) = &result {
                debug!("Found {} files under {}", files.len(), root.display());
            }
            // Receiver gone means the scan was abandoned
            let _ = tx.send(result);
        })?;
    Ok(WalkerHandle { rx })
}
