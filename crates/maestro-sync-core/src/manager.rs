use crate::config::{non_overlapping_directories, AppConfig, SourceConfig};
use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::reporter::SourceChange;
use crate::source::{ScanState, Source};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns every source of a library and drives them from one thread.
pub struct SourceManager {
    ctx: Arc<SyncContext>,
    sources: Vec<Source>,
}

impl SourceManager {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        SourceManager {
            ctx,
            sources: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Create the configured sources and enable those marked enabled.
    pub fn load(&mut self, config: &AppConfig) -> Result<()> {
        for source in &config.sources {
            self.add_source(source.clone())?;
        }
        info!("Loaded {} sources", self.sources.len());
        Ok(())
    }

    pub fn add_source(&mut self, config: SourceConfig) -> Result<()> {
        if self.source(&config.name).is_some() {
            return Err(Error::DuplicateSource(config.name));
        }
        self.warn_on_overlap(&config);

        let mut source = Source::from_config(config, Arc::clone(&self.ctx));
        if source.config().enabled {
            source.enable()?;
        }
        self.ctx
            .reporter
            .on_source_changed(SourceChange::Added, source.name());
        self.sources.push(source);
        Ok(())
    }

    /// Replace the record of the source called `name`. The new record may
    /// carry a different name.
    pub fn change_source(&mut self, name: &str, config: SourceConfig) -> Result<()> {
        if config.name != name && self.source(&config.name).is_some() {
            return Err(Error::DuplicateSource(config.name));
        }
        let index = self.index_of(name)?;
        self.sources[index].reconfigure(config)?;
        let source = &self.sources[index];
        self.ctx
            .reporter
            .on_source_changed(SourceChange::Changed, source.name());
        Ok(())
    }

    pub fn remove_source(&mut self, name: &str) -> Result<()> {
        let index = self.index_of(name)?;
        let mut source = self.sources.remove(index);
        source.disable();
        self.ctx
            .reporter
            .on_source_changed(SourceChange::Deleted, source.name());
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name() == name)
    }

    pub fn source_mut(&mut self, name: &str) -> Option<&mut Source> {
        self.sources.iter_mut().find(|s| s.name() == name)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Advance every source by one polling step.
    pub fn tick_all(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.tick()?;
        }
        Ok(())
    }

    pub fn scan_all(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.scan()?;
        }
        Ok(())
    }

    /// True when no enabled source is scanning or hashing.
    pub fn is_idle(&self) -> bool {
        self.sources
            .iter()
            .all(|s| s.state() == ScanState::NotScanning)
    }

    pub fn to_configs(&self) -> Vec<SourceConfig> {
        self.sources.iter().map(Source::save).collect()
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.sources
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    fn warn_on_overlap(&self, config: &SourceConfig) {
        let dirs: Vec<String> = self
            .sources
            .iter()
            .map(|s| s.path().to_string_lossy().into_owned())
            .chain(std::iter::once(config.path.to_string_lossy().into_owned()))
            .collect();
        let count = dirs.len();
        if non_overlapping_directories(dirs).len() < count {
            warn!(
                "Source {} at {} overlaps another source",
                config.name,
                config.path.display()
            );
        }
    }
}
