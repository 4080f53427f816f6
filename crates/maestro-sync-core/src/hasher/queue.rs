use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;

/// Hash request priority. Lower variants are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashPriority {
    /// A file the user is working with right now (live file events).
    Urgent,
    /// A file not yet known to the library.
    NewFile,
    /// A known file whose hash is missing.
    KnownFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRequest {
    pub priority: HashPriority,
    pub path: PathBuf,
    seq: u64,
}

impl Ord for HashRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first
        Reverse((self.priority, self.seq)).cmp(&Reverse((other.priority, other.seq)))
    }
}

impl PartialOrd for HashRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of hash requests. Within one priority the order is
/// whatever the heap yields.
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: BinaryHeap<HashRequest>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn push(&mut self, priority: HashPriority, path: PathBuf) {
        self.heap.push(HashRequest {
            priority,
            path,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    pub fn pop(&mut self) -> Option<HashRequest> {
        self.heap.pop()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
