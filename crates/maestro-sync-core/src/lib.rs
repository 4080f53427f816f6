pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod hasher;
pub mod identifier;
pub mod manager;
pub mod reporter;
pub mod scanner;
pub mod source;
pub mod storage;
pub mod tree;
pub mod url;

pub use backend::{BackendRegistry, FileBackend, LocalFileBackend, TagSet, TaggedFile};
pub use config::{AppConfig, SourceConfig};
pub use context::SyncContext;
pub use error::{Error, Result};
pub use events::{FileEventBus, RealFileEvent};
pub use identifier::{AudioFileIdentifier, Identify};
pub use manager::SourceManager;
pub use reporter::{
    ChannelReporter, ConflictResolver, DeferringResolver, ScanStats, SilentReporter, SyncEvent,
    SyncReporter,
};
pub use source::{ScanState, Source};
pub use storage::Database;
pub use tree::{FileTree, SyncState};
pub use url::Url;
