mod queue;
mod worker;

pub use queue::HashPriority;
pub use worker::{HashResult, HashWorker};
