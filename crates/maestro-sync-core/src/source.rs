//! A watched directory and the state machine that keeps it in sync with
//! the library store.

use crate::backend::TagSet;
use crate::config::SourceConfig;
use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::events::RealFileEvent;
use crate::hasher::{HashPriority, HashWorker};
use crate::reporter::{MissingFile, MissingResolution, ScanStats, TagChoice, TagConflict};
use crate::scanner::{
    spawn_checker, spawn_walker, CheckEvents, CheckRequest, DiskFiles, ModifiedTags,
    WalkFilter, WalkerHandle,
};
use crate::storage::models::{CandidateFile, CandidateHashUpdate, KnownHashUpdate};
use crate::tree::{FileEntry, FileTree};
use crate::url::Url;
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    NotScanning,
    InitialScan,
    ComputingHashes,
    CheckModified,
    /// Hashing files reported by live events, outside of a scan.
    RealHashOnly,
}

impl ScanState {
    /// True for the phases of a full scan.
    pub fn is_scanning(&self) -> bool {
        matches!(
            self,
            ScanState::InitialScan | ScanState::ComputingHashes | ScanState::CheckModified
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::NotScanning => "idle",
            ScanState::InitialScan => "reading filesystem",
            ScanState::ComputingHashes => "computing hashes",
            ScanState::CheckModified => "checking modified files",
            ScanState::RealHashOnly => "hashing changed files",
        };
        f.write_str(name)
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

pub struct Source {
    config: SourceConfig,
    ctx: Arc<SyncContext>,
    tree: FileTree,
    state: ScanState,
    enabled: bool,
    worker: Option<HashWorker>,
    subscription: Option<(u64, Receiver<RealFileEvent>)>,
    scan_due: Option<Instant>,
    interrupted: bool,
    walker: Option<WalkerHandle>,
    checker: Option<CheckEvents>,
    // Scan-local buffers
    disk: DiskFiles,
    missing: Vec<PathBuf>,
    stats: ScanStats,
}

impl Source {
    /// Build a source from its persisted record. The source stays inactive
    /// until [`Source::enable`] is called.
    pub fn from_config(config: SourceConfig, ctx: Arc<SyncContext>) -> Self {
        let tree = FileTree::new(&config.path);
        Source {
            config,
            ctx,
            tree,
            state: ScanState::NotScanning,
            enabled: false,
            worker: None,
            subscription: None,
            scan_due: None,
            interrupted: false,
            walker: None,
            checker: None,
            disk: DiskFiles::default(),
            missing: Vec::new(),
            stats: ScanStats::default(),
        }
    }

    /// The persisted record of this source.
    pub fn save(&self) -> SourceConfig {
        self.config.clone()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Stats of the running scan, or of the last finished one.
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    fn url_prefix(&self) -> String {
        Url::dir_prefix("file", &self.config.path)
    }

    /// Load the tracked files from the store, start the hash worker and
    /// schedule a scan after the configured delay.
    pub fn enable(&mut self) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        let prefix = self.url_prefix();
        let (known, candidates) = {
            let db = self.ctx.db();
            db.delete_shadowed_candidates(&prefix)?;
            (db.known_files_under(&prefix)?, db.candidates_under(&prefix)?)
        };

        let mut tree = FileTree::new(&self.config.path);
        let rows = known
            .into_iter()
            .map(|k| (k.url, Some(k.element_id), k.verified, k.hash))
            .chain(
                candidates
                    .into_iter()
                    .map(|c| (c.url, None, c.verified, c.hash)),
            );
        for (raw_url, id, verified, hash) in rows {
            let url = match Url::from_str(&raw_url) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping stored file: {}", e);
                    continue;
                }
            };
            if !self.config.accepts_extension(url.path()) {
                continue;
            }
            if let Err(e) = tree.add_file(FileEntry::new(url, id, verified, hash), None) {
                warn!("Skipping stored file: {}", e);
            }
        }
        tree.recompute_all();
        debug!(
            "Source {} loaded {} files in {} folders",
            self.config.name,
            tree.file_count(),
            tree.folders().count()
        );

        self.tree = tree;
        self.worker = Some(HashWorker::spawn(Arc::clone(&self.ctx.identifier)));
        self.subscription = Some(self.ctx.events.subscribe());
        self.scan_due = Some(Instant::now() + self.ctx.scan_delay);
        self.state = ScanState::NotScanning;
        self.enabled = true;
        info!("Enabled source {} at {}", self.config.name, self.config.path.display());
        Ok(())
    }

    /// Stop all background work. Queued hash requests are dropped; a request
    /// already being hashed is left to finish and its result ignored.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        if let Some((id, _)) = self.subscription.take() {
            self.ctx.events.unsubscribe(id);
        }
        self.walker = None;
        self.checker = None;
        self.scan_due = None;
        self.interrupted = false;
        self.disk.clear();
        self.missing.clear();
        self.state = ScanState::NotScanning;
        self.tree = FileTree::new(&self.config.path);
        self.enabled = false;
        info!("Disabled source {}", self.config.name);
    }

    /// Replace the persisted record and restart the source if it is enabled.
    pub fn reconfigure(&mut self, config: SourceConfig) -> Result<()> {
        self.disable();
        self.config = config;
        if self.config.enabled {
            self.enable()?;
        }
        Ok(())
    }

    /// Start a full scan. Ignored while a scan is already running.
    pub fn scan(&mut self) -> Result<()> {
        if !self.enabled {
            warn!("Source {} is disabled, not scanning", self.config.name);
            return Ok(());
        }
        if self.state.is_scanning() {
            debug!("Source {} is already scanning", self.config.name);
            return Ok(());
        }
        self.scan_due = None;
        self.interrupted = false;
        self.disk.clear();
        self.missing.clear();
        self.checker = None;
        self.stats = ScanStats::default();

        let filter = WalkFilter::new(&self.config.extensions, &self.ctx.ignore_patterns);
        self.walker = Some(spawn_walker(self.config.path.clone(), filter)?);
        self.state = ScanState::InitialScan;
        info!("Scanning source {}", self.config.name);
        self.ctx.reporter.on_scan_started(&self.config.name);
        Ok(())
    }

    /// Advance the source by one polling step. Never blocks on background
    /// threads.
    pub fn tick(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.process_file_events()?;

        if self.scan_due.is_some_and(|due| Instant::now() >= due) {
            self.scan()?;
        }

        // Read before draining so no result sent before the flag is missed
        let drained = self.worker.as_ref().map_or(true, HashWorker::is_drained);
        self.check_hashes()?;

        match self.state {
            ScanState::NotScanning => {}
            ScanState::InitialScan => self.poll_walker()?,
            ScanState::ComputingHashes => {
                if drained {
                    self.finish_hashing()?;
                }
            }
            ScanState::CheckModified => self.poll_checker()?,
            ScanState::RealHashOnly => {
                if drained {
                    debug!("Source {} finished hashing changed files", self.config.name);
                    self.state = ScanState::NotScanning;
                }
            }
        }
        Ok(())
    }

    fn poll_walker(&mut self) -> Result<()> {
        let Some(result) = self.walker.as_ref().and_then(WalkerHandle::try_finish) else {
            return Ok(());
        };
        self.walker = None;
        match result {
            Ok(files) => self.handle_initial_scan(files),
            Err(e) => {
                error!("Scan of source {} failed: {}", self.config.name, e);
                self.state = ScanState::NotScanning;
                Ok(())
            }
        }
    }

    fn handle_initial_scan(&mut self, disk: DiskFiles) -> Result<()> {
        self.stats.files_on_disk = disk.len();
        let reporter = Arc::clone(&self.ctx.reporter);

        // New files become candidates
        let mut new_paths: Vec<&PathBuf> = disk
            .keys()
            .filter(|path| !self.tree.contains(path))
            .collect();
        new_paths.sort();
        let mut new_rows = Vec::with_capacity(new_paths.len());
        for path in new_paths {
            let url = Url::file(path.clone());
            new_rows.push(CandidateFile {
                url: url.to_string(),
                hash: None,
                verified: 0,
            });
            self.tree
                .add_file(FileEntry::new(url, None, 0, None), Some(reporter.as_ref()))?;
        }
        self.stats.new_files = new_rows.len();

        // Candidates gone from disk are forgotten; known files gone from
        // disk are resolved after the modification check
        let mut gone = Vec::new();
        for entry in self.tree.files() {
            if disk.contains_key(entry.path()) {
                continue;
            }
            match entry.id {
                None => gone.push(entry.path().to_path_buf()),
                Some(_) => self.missing.push(entry.path().to_path_buf()),
            }
        }
        self.missing.sort();
        self.stats.removed_candidates = gone.len();

        {
            let db = self.ctx.db();
            db.insert_candidates(&new_rows)?;
        }
        self.remove_files(&gone)?;

        let mut requests: Vec<(HashPriority, PathBuf)> = self
            .tree
            .files()
            .filter_map(|entry| {
                let mtime = *disk.get(entry.path())?;
                let stale = entry.id.is_none() && mtime > entry.verified;
                if entry.hash.is_some() && !stale {
                    return None;
                }
                let priority = if entry.id.is_none() {
                    HashPriority::NewFile
                } else {
                    HashPriority::KnownFile
                };
                Some((priority, entry.path().to_path_buf()))
            })
            .collect();
        requests.sort();
        self.stats.hash_requests = requests.len();
        self.disk = disk;

        debug!(
            "Source {}: {} new, {} gone, {} missing, {} to hash",
            self.config.name,
            self.stats.new_files,
            self.stats.removed_candidates,
            self.missing.len(),
            requests.len()
        );

        if requests.is_empty() {
            return self.finish_hashing();
        }
        if let Some(worker) = &self.worker {
            for (priority, path) in requests {
                worker.submit(priority, path);
            }
        }
        self.state = ScanState::ComputingHashes;
        Ok(())
    }

    /// Apply finished hash results to the tree and the store.
    fn check_hashes(&mut self) -> Result<()> {
        let Some(worker) = &self.worker else {
            return Ok(());
        };
        let results = worker.poll_results();
        if results.is_empty() {
            return Ok(());
        }
        let now = now();
        let mut known = Vec::new();
        let mut candidates = Vec::new();
        for result in results {
            let Some(entry) = self.tree.file_mut(&result.path) else {
                trace!("Dropping hash of untracked {}", result.path.display());
                continue;
            };
            let hash = result.hash.or_else(|| entry.hash.clone());
            entry.hash = hash.clone();
            match entry.id {
                None => {
                    entry.verified = now;
                    candidates.push(CandidateHashUpdate {
                        url: entry.url.to_string(),
                        hash,
                        verified: now,
                    });
                }
                Some(id) => {
                    if result.priority == HashPriority::Urgent {
                        entry.verified = now;
                    }
                    known.push(KnownHashUpdate {
                        element_id: id,
                        hash,
                        verified: entry.verified,
                    });
                }
            }
            self.ctx.reporter.on_file_state_changed(&result.path);
        }
        let db = self.ctx.db();
        db.update_known_hashes(&known)?;
        db.update_candidate_hashes(&candidates)?;
        Ok(())
    }

    fn finish_hashing(&mut self) -> Result<()> {
        if self.interrupted {
            info!("Scan of source {} was interrupted, restarting", self.config.name);
            self.state = ScanState::NotScanning;
            return self.scan();
        }
        self.scan_check_modified()
    }

    fn scan_check_modified(&mut self) -> Result<()> {
        self.state = ScanState::CheckModified;
        let stale: Vec<(PathBuf, Url, i64)> = self
            .tree
            .files()
            .filter_map(|entry| {
                let id = entry.id?;
                let mtime = *self.disk.get(entry.path())?;
                (mtime > entry.verified).then(|| (entry.path().to_path_buf(), entry.url.clone(), id))
            })
            .collect();
        self.stats.modified_checked = stale.len();
        if stale.is_empty() {
            return self.handle_missing_files();
        }

        let requests = {
            let db = self.ctx.db();
            stale
                .into_iter()
                .map(|(path, url, id)| {
                    Ok(CheckRequest {
                        path,
                        url,
                        id,
                        db_tags: db.get_tags(id)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        debug!("Source {}: checking {} modified files", self.config.name, requests.len());
        self.checker = Some(spawn_checker(
            requests,
            Arc::clone(&self.ctx.backends),
            Arc::clone(&self.ctx.identifier),
        )?);
        Ok(())
    }

    fn poll_checker(&mut self) -> Result<()> {
        let Some(checker) = &self.checker else {
            return self.handle_missing_files();
        };
        let done = checker.is_done();
        let modified = checker.modified_tags();
        let changed = checker.changed_hashes();

        for event in changed {
            self.refresh_verified(&event.path, event.id, event.hash, event.length)?;
        }
        for event in modified {
            self.handle_modified_tags(event)?;
        }
        if done {
            self.checker = None;
            self.handle_missing_files()?;
        }
        Ok(())
    }

    fn refresh_verified(
        &mut self,
        path: &Path,
        id: i64,
        hash: Option<String>,
        length: Option<f64>,
    ) -> Result<()> {
        let now = now();
        let hash = match self.tree.file_mut(path) {
            Some(entry) => {
                let hash = hash.or_else(|| entry.hash.clone());
                entry.hash = hash.clone();
                entry.verified = now;
                hash
            }
            None => hash,
        };
        let db = self.ctx.db();
        db.update_known_hashes(&[KnownHashUpdate {
            element_id: id,
            hash,
            verified: now,
        }])?;
        if let Some(length) = length {
            db.update_file_length(id, length)?;
        }
        drop(db);
        self.ctx.reporter.on_file_state_changed(path);
        Ok(())
    }

    fn handle_modified_tags(&mut self, event: ModifiedTags) -> Result<()> {
        let ModifiedTags {
            path,
            id,
            db_tags,
            disk_tags,
            hash,
            length,
        } = event;
        let conflict = TagConflict {
            path,
            id,
            db_tags,
            disk_tags,
        };
        match self.ctx.resolver.resolve_modified_tags(&conflict) {
            TagChoice::UseDisk => {
                debug!("Taking tags of {} from disk", conflict.path.display());
                self.ctx.db().set_tags(id, &conflict.disk_tags)?;
                self.refresh_verified(&conflict.path, id, hash, length)
            }
            TagChoice::UseDatabase => {
                debug!("Writing library tags to {}", conflict.path.display());
                self.write_tags(&conflict.path, &conflict.db_tags)
            }
            TagChoice::Defer => {
                info!("Tag conflict on {} left unresolved", conflict.path.display());
                Ok(())
            }
        }
    }

    /// Write `tags` to a tracked file. On success the file is verified and
    /// rehashed; on failure it stays unverified and is offered again on
    /// the next scan.
    fn write_tags(&mut self, path: &Path, tags: &TagSet) -> Result<()> {
        let Some((url, id)) = self
            .tree
            .file(path)
            .and_then(|e| e.id.map(|id| (e.url.clone(), id)))
        else {
            return Ok(());
        };
        let saved = self
            .ctx
            .backends
            .open(&url)
            .and_then(|mut file| file.save_tags(tags));
        match saved {
            Ok(unsaved) => {
                if !unsaved.is_empty() {
                    warn!(
                        "{} cannot store tags: {}",
                        path.display(),
                        unsaved.tags().collect::<Vec<_>>().join(", ")
                    );
                }
                self.refresh_verified(path, id, None, None)?;
                if let Some(worker) = &self.worker {
                    worker.submit(HashPriority::Urgent, path);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Could not write tags to {}: {}", path.display(), e);
                Ok(())
            }
        }
    }

    /// Match missing files against candidates by hash, then ask the
    /// resolver about the rest. Ends the scan.
    fn handle_missing_files(&mut self) -> Result<()> {
        let missing = std::mem::take(&mut self.missing);
        let mut unmatched = Vec::new();
        let mut taken: Vec<PathBuf> = Vec::new();

        for path in missing {
            let Some(entry) = self.tree.file(&path) else {
                continue;
            };
            let Some(id) = entry.id else {
                continue;
            };
            let hash = entry.hash.clone();
            let target = hash.as_deref().and_then(|hash| {
                let mut matches: Vec<&Path> = self
                    .tree
                    .files()
                    .filter(|c| c.id.is_none() && c.hash.as_deref() == Some(hash))
                    .map(FileEntry::path)
                    .filter(|p| !taken.iter().any(|t| t.as_path() == *p))
                    .collect();
                matches.sort();
                matches.first().map(|p| p.to_path_buf())
            });

            match target {
                Some(new_path) => {
                    info!("Detected rename {} -> {}", path.display(), new_path.display());
                    self.ctx
                        .db()
                        .update_file_url(id, &Url::file(new_path.clone()).to_string())?;
                    self.move_file(&path, &new_path)?;
                    taken.push(new_path);
                    self.stats.renames_detected += 1;
                }
                None => unmatched.push(MissingFile { path, id, hash }),
            }
        }

        if !unmatched.is_empty() {
            let resolutions = self.ctx.resolver.resolve_missing_files(&unmatched);
            for (path, resolution) in resolutions {
                // Each missing file is resolved at most once
                let Some(pos) = unmatched.iter().position(|m| m.path == path) else {
                    warn!("Resolution for {} which is not missing", path.display());
                    continue;
                };
                let id = unmatched[pos].id;
                match resolution {
                    MissingResolution::Relocate(new_path) => {
                        if !self.tree.is_under_root(&new_path) {
                            warn!(
                                "Cannot relocate {} outside of source {}",
                                new_path.display(),
                                self.config.name
                            );
                            continue;
                        }
                        self.ctx
                            .db()
                            .update_file_url(id, &Url::file(new_path.clone()).to_string())?;
                        self.move_file(&path, &new_path)?;
                        self.stats.relocated += 1;
                    }
                    MissingResolution::Delete => {
                        self.ctx.db().delete_element(id)?;
                        self.tree.remove_file(&path, Some(self.ctx.reporter.as_ref()));
                        self.stats.deleted += 1;
                    }
                    MissingResolution::Defer => continue,
                }
                unmatched.remove(pos);
            }
            self.stats.unresolved_missing = unmatched.len();
            if self.stats.unresolved_missing > 0 {
                warn!(
                    "Source {}: {} files missing from disk",
                    self.config.name, self.stats.unresolved_missing
                );
            }
        }

        self.disk.clear();
        // Rehashes queued by tag write-back keep the source busy
        let drained = self.worker.as_ref().map_or(true, HashWorker::is_drained);
        self.check_hashes()?;
        self.state = if drained {
            ScanState::NotScanning
        } else {
            ScanState::RealHashOnly
        };
        info!(
            "Finished scan of source {}: {} files, {} new, {} renamed",
            self.config.name,
            self.stats.files_on_disk,
            self.stats.new_files,
            self.stats.renames_detected
        );
        self.ctx
            .reporter
            .on_scan_finished(&self.config.name, &self.stats);
        Ok(())
    }

    /// Move a tracked file within the tree. A candidate record follows the
    /// file; any candidate at the destination is superseded. The store URL
    /// of a known file is the caller's business.
    pub fn move_file(&mut self, old: &Path, new: &Path) -> Result<()> {
        let Some(entry) = self.tree.file(old) else {
            return Err(Error::Other(format!("{} is not tracked", old.display())));
        };
        let old_url = entry.url.to_string();
        let is_candidate = entry.id.is_none();
        let new_url = Url::file(new.to_path_buf());
        {
            let db = self.ctx.db();
            if is_candidate {
                db.move_candidate(&old_url, &new_url.to_string())?;
            } else {
                db.delete_candidates(&[new_url.to_string()])?;
            }
        }
        if let Some(superseded) =
            self.tree
                .move_file(old, new_url, Some(self.ctx.reporter.as_ref()))?
        {
            trace!("{} superseded", superseded.path().display());
        }
        Ok(())
    }

    /// Stop tracking `paths` and drop their candidate records.
    pub fn remove_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        let mut urls = Vec::new();
        for path in paths {
            if let Some(entry) = self.tree.remove_file(path, Some(self.ctx.reporter.as_ref())) {
                if entry.id.is_none() {
                    urls.push(entry.url.to_string());
                }
            }
        }
        self.ctx.db().delete_candidates(&urls)?;
        Ok(())
    }

    /// Rename a tracked file on disk and follow it in the store and tree.
    pub fn rename_file(&mut self, old: &Path, new: &Path) -> Result<()> {
        let Some(entry) = self.tree.file(old) else {
            return Err(Error::Other(format!("{} is not tracked", old.display())));
        };
        if !self.tree.is_under_root(new) {
            return Err(Error::Other(format!(
                "{} is outside of source {}",
                new.display(),
                self.config.name
            )));
        }
        let old_url = entry.url.clone();
        let id = entry.id;
        let new_url = Url::file(new.to_path_buf());
        self.ctx.backends.for_url(&old_url)?.rename(&old_url, &new_url)?;
        if let Some(id) = id {
            self.ctx.db().update_file_url(id, &new_url.to_string())?;
        }
        self.move_file(old, new)
    }

    /// Delete a tracked file from disk and from the store.
    pub fn delete_file(&mut self, path: &Path) -> Result<()> {
        let Some(entry) = self.tree.file(path) else {
            return Err(Error::Other(format!("{} is not tracked", path.display())));
        };
        let url = entry.url.clone();
        let id = entry.id;
        self.ctx.backends.for_url(&url)?.delete(&url)?;
        if let Some(id) = id {
            self.ctx.db().delete_element(id)?;
        }
        self.remove_files(&[path.to_path_buf()])
    }

    fn process_file_events(&mut self) -> Result<()> {
        let events: Vec<RealFileEvent> = match &self.subscription {
            Some((_, rx)) => rx.try_iter().collect(),
            None => return Ok(()),
        };
        for event in events {
            self.handle_real_file_event(event)?;
        }
        Ok(())
    }

    /// React to library elements changed by someone else.
    pub fn handle_real_file_event(&mut self, event: RealFileEvent) -> Result<()> {
        if !event.paths().iter().any(|p| self.tree.is_under_root(p)) {
            return Ok(());
        }
        if self.state.is_scanning() {
            debug!("Source {}: scan interrupted by {:?}", self.config.name, event);
            self.interrupted = true;
        }
        let reporter = Arc::clone(&self.ctx.reporter);
        let mut urgent = Vec::new();

        match event {
            RealFileEvent::Added(files) => {
                let mut urls = Vec::new();
                for (path, id) in files {
                    if self.tree.contains(&path) {
                        self.tree.set_id(&path, Some(id), Some(reporter.as_ref()));
                    } else if self.tree.is_under_root(&path) && self.config.accepts_extension(&path) {
                        let entry = FileEntry::new(Url::file(path.clone()), Some(id), 0, None);
                        self.tree.add_file(entry, Some(reporter.as_ref()))?;
                    } else {
                        continue;
                    }
                    urls.push(Url::file(path.clone()).to_string());
                    urgent.push(path);
                }
                self.ctx.db().delete_candidates(&urls)?;
            }
            RealFileEvent::Removed(paths) => {
                let mut rows = Vec::new();
                for path in paths {
                    let Some(entry) = self.tree.file(&path) else {
                        continue;
                    };
                    if entry.id.is_none() {
                        continue;
                    }
                    rows.push(CandidateFile {
                        url: entry.url.to_string(),
                        hash: entry.hash.clone(),
                        verified: entry.verified,
                    });
                    if entry.hash.is_none() {
                        urgent.push(path.clone());
                    }
                    self.tree.set_id(&path, None, Some(reporter.as_ref()));
                }
                self.ctx.db().insert_candidates(&rows)?;
            }
            RealFileEvent::Renamed(pairs) => {
                for (old, new) in pairs {
                    if !self.tree.contains(&old) {
                        continue;
                    }
                    if self.tree.is_under_root(&new) {
                        self.move_file(&old, &new)?;
                    } else {
                        self.remove_files(&[old])?;
                    }
                }
            }
            RealFileEvent::Modified(paths) => {
                urgent.extend(paths.into_iter().filter(|p| self.tree.contains(p)));
            }
            RealFileEvent::Deleted(paths) => {
                let tracked: Vec<PathBuf> =
                    paths.into_iter().filter(|p| self.tree.contains(p)).collect();
                self.remove_files(&tracked)?;
            }
        }

        if !urgent.is_empty() {
            if let Some(worker) = &self.worker {
                worker.submit_all(HashPriority::Urgent, &urgent);
            }
            if self.state == ScanState::NotScanning {
                self.state = ScanState::RealHashOnly;
            }
        }
        Ok(())
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if let Some((id, _)) = self.subscription.take() {
            self.ctx.events.unsubscribe(id);
        }
    }
}
