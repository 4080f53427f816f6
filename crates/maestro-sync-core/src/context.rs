use crate::backend::BackendRegistry;
use crate::config::AppConfig;
use crate::events::FileEventBus;
use crate::identifier::{AudioFileIdentifier, Identify};
use crate::reporter::{ConflictResolver, DeferringResolver, SilentReporter, SyncReporter};
use crate::storage::Database;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Everything the sources of one library share.
pub struct SyncContext {
    db: Mutex<Database>,
    pub backends: Arc<BackendRegistry>,
    pub identifier: Arc<dyn Identify>,
    pub reporter: Arc<dyn SyncReporter>,
    pub resolver: Arc<dyn ConflictResolver>,
    pub events: FileEventBus,
    pub scan_delay: Duration,
    pub ignore_patterns: Vec<String>,
}

impl SyncContext {
    /// A context with the production backends and identifier, no reporter
    /// and a resolver that defers every decision.
    pub fn new(db: Database, config: &AppConfig) -> Self {
        SyncContext {
            db: Mutex::new(db),
            backends: Arc::new(BackendRegistry::with_defaults()),
            identifier: Arc::new(AudioFileIdentifier::new(config.identifier.clone())),
            reporter: Arc::new(SilentReporter),
            resolver: Arc::new(DeferringResolver),
            events: FileEventBus::new(),
            scan_delay: Duration::from_secs(config.scan_delay_secs),
            ignore_patterns: config.ignore_patterns.clone(),
        }
    }

    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = Arc::new(backends);
        self
    }

    pub fn with_identifier(mut self, identifier: Arc<dyn Identify>) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn SyncReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
