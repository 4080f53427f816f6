use super::queue::{HashPriority, RequestQueue};
use crate::identifier::Identify;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Outcome of one hash request. `hash` is `None` when the identifier could
/// not produce a value for the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashResult {
    pub path: PathBuf,
    pub hash: Option<String>,
    pub priority: HashPriority,
    generation: u64,
}

struct Shared {
    queue: Mutex<RequestQueue>,
    wake: Condvar,
    stopped: AtomicBool,
    drained: AtomicBool,
    generation: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background thread that computes audio hashes in priority order.
///
/// Results are collected by polling from the owning thread. The drained
/// flag is set once the queue is empty and the last result has been sent,
/// so a caller that reads `is_drained()` before `poll_results()` never misses
/// a result.
pub struct HashWorker {
    shared: Arc<Shared>,
    results: Receiver<HashResult>,
    handle: Option<JoinHandle<()>>,
}

impl HashWorker {
    pub fn spawn(identifier: Arc<dyn Identify>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(RequestQueue::default()),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
            drained: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        });
        let (tx, rx) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("hash-worker".into())
            .spawn(move || run(thread_shared, identifier, tx))
            .map_err(|e| warn!("Failed to spawn hash worker: {}", e))
            .ok();

        HashWorker {
            shared,
            results: rx,
            handle,
        }
    }

    pub fn submit(&self, priority: HashPriority, path: impl Into<PathBuf>) {
        let path = path.into();
        trace!("Hash request {:?} {}", priority, path.display());
        let mut queue = self.shared.lock();
        self.shared.drained.store(false, Ordering::SeqCst);
        queue.push(priority, path);
        self.shared.wake.notify_one();
    }

    pub fn submit_all<I, P>(&self, priority: HashPriority, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut queue = self.shared.lock();
        let mut any = false;
        for path in paths {
            queue.push(priority, path.as_ref().to_path_buf());
            any = true;
        }
        if any {
            self.shared.drained.store(false, Ordering::SeqCst);
            self.shared.wake.notify_one();
        }
    }

    /// Results produced since the last call. Results from requests that
    /// were in flight across a `stop()` are dropped.
    pub fn poll_results(&self) -> Vec<HashResult> {
        let current = self.shared.generation.load(Ordering::SeqCst);
        self.results
            .try_iter()
            .filter(|r| r.generation == current)
            .collect()
    }

    pub fn is_drained(&self) -> bool {
        self.shared.drained.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().len()
    }

    /// Discard every queued request. The thread keeps running; a request
    /// already being hashed completes but its result is never returned.
    pub fn clear(&self) {
        let mut queue = self.shared.lock();
        let dropped = queue.clear();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.drained.store(true, Ordering::SeqCst);
        if dropped > 0 {
            debug!("Discarded {} queued hash requests", dropped);
        }
    }

    /// Stop the worker thread. Does not wait for an in-flight request.
    pub fn stop(&self) {
        self.clear();
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
    }
}

impl Drop for HashWorker {
    fn drop(&mut self) {
        self.stop();
        // Detach: joining would block on a slow identifier
        self.handle.take();
    }
}

fn run(shared: Arc<Shared>, identifier: Arc<dyn Identify>, tx: Sender<HashResult>) {
    debug!("Hash worker started");
    loop {
        let (request, generation) = {
            let mut queue = shared.lock();
            loop {
                if shared.stopped.load(Ordering::SeqCst) {
                    debug!("Hash worker stopped");
                    return;
                }
                if let Some(request) = queue.pop() {
                    break (request, shared.generation.load(Ordering::SeqCst));
                }
                shared.drained.store(true, Ordering::SeqCst);
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let hash = identifier.identify(&request.path);
        if hash.is_none() {
            debug!("No hash for {}", request.path.display());
        }

        let result = HashResult {
            path: request.path,
            hash,
            priority: request.priority,
            generation,
        };
        if tx.send(result).is_err() {
            return;
        }

        // Mark drained only after the send so a poller sees the result first
        let queue = shared.lock();
        if queue.is_empty() {
            shared.drained.store(true, Ordering::SeqCst);
        }
    }
}
