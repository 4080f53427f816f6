use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use maestro_sync_core::reporter::{
    MissingFile, MissingResolution, TagChoice, TagConflict,
};
use maestro_sync_core::{
    AppConfig, BackendRegistry, ChannelReporter, ConflictResolver, Database, FileBackend,
    Identify, RealFileEvent, ScanState, Source, SourceConfig, SyncContext, SyncEvent, SyncState,
    TagSet, TaggedFile, Url,
};
use tempfile::TempDir;

/// Far enough in the future that no file on disk looks modified.
const FUTURE: i64 = 4_000_000_000;

/// The "fingerprint" of a test file is its trimmed text content.
struct ContentIdentifier;

impl Identify for ContentIdentifier {
    fn identify(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }
}

type DiskTags = Arc<Mutex<HashMap<PathBuf, TagSet>>>;

struct FakeBackend {
    tags: DiskTags,
}

struct FakeFile {
    path: PathBuf,
    tags: DiskTags,
}

impl TaggedFile for FakeFile {
    fn read_tags(&mut self) -> maestro_sync_core::Result<TagSet> {
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(&self.path)
            .cloned()
            .unwrap_or_default())
    }

    fn length(&mut self) -> Option<f64> {
        Some(12.5)
    }

    fn save_tags(&mut self, tags: &TagSet) -> maestro_sync_core::Result<TagSet> {
        self.tags
            .lock()
            .unwrap()
            .insert(self.path.clone(), tags.clone());
        Ok(TagSet::new())
    }
}

impl FileBackend for FakeBackend {
    fn accepts(&self, url: &Url) -> bool {
        url.scheme() == "file"
    }

    fn open(&self, url: &Url) -> maestro_sync_core::Result<Box<dyn TaggedFile>> {
        Ok(Box::new(FakeFile {
            path: url.path().to_path_buf(),
            tags: Arc::clone(&self.tags),
        }))
    }

    fn rename(&self, from: &Url, to: &Url) -> maestro_sync_core::Result<()> {
        fs::rename(from.path(), to.path())?;
        Ok(())
    }

    fn delete(&self, url: &Url) -> maestro_sync_core::Result<()> {
        fs::remove_file(url.path())?;
        Ok(())
    }
}

struct ScriptedResolver {
    tag_choice: TagChoice,
    missing_answer: Mutex<Vec<(PathBuf, MissingResolution)>>,
    tag_calls: Mutex<Vec<TagConflict>>,
    missing_calls: Mutex<Vec<Vec<MissingFile>>>,
}

impl ScriptedResolver {
    fn new(tag_choice: TagChoice) -> Self {
        ScriptedResolver {
            tag_choice,
            missing_answer: Mutex::new(Vec::new()),
            tag_calls: Mutex::new(Vec::new()),
            missing_calls: Mutex::new(Vec::new()),
        }
    }
}

impl ConflictResolver for ScriptedResolver {
    fn resolve_modified_tags(&self, conflict: &TagConflict) -> TagChoice {
        self.tag_calls.lock().unwrap().push(conflict.clone());
        self.tag_choice
    }

    fn resolve_missing_files(&self, missing: &[MissingFile]) -> Vec<(PathBuf, MissingResolution)> {
        self.missing_calls.lock().unwrap().push(missing.to_vec());
        self.missing_answer.lock().unwrap().clone()
    }
}

struct Harness {
    dir: TempDir,
    ctx: Arc<SyncContext>,
    events: Receiver<SyncEvent>,
    disk_tags: DiskTags,
    resolver: Arc<ScriptedResolver>,
}

impl Harness {
    fn new(tag_choice: TagChoice) -> Self {
        let dir = TempDir::new().unwrap();
        let (tx, events) = mpsc::channel();
        let disk_tags: DiskTags = Arc::default();
        let resolver = Arc::new(ScriptedResolver::new(tag_choice));

        let mut backends = BackendRegistry::new();
        backends.register(Arc::new(FakeBackend {
            tags: Arc::clone(&disk_tags),
        }));
        let ctx = SyncContext::new(Database::open_in_memory().unwrap(), &AppConfig::default())
            .with_backends(backends)
            .with_identifier(Arc::new(ContentIdentifier))
            .with_reporter(Arc::new(ChannelReporter::new(tx)))
            .with_resolver(Arc::clone(&resolver) as Arc<dyn ConflictResolver>)
            .with_scan_delay(Duration::from_secs(3600));

        Harness {
            dir,
            ctx: Arc::new(ctx),
            events,
            disk_tags,
            resolver,
        }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn url(&self, rel: &str) -> String {
        Url::file(self.dir.path().join(rel)).to_string()
    }

    fn known(&self, rel: &str, hash: Option<&str>, verified: i64) -> i64 {
        self.ctx
            .db()
            .insert_known_file(&self.url(rel), hash, verified)
            .unwrap()
    }

    fn source(&self) -> Source {
        let config = SourceConfig::new("Music", self.root());
        let mut source = Source::from_config(config, Arc::clone(&self.ctx));
        source.enable().unwrap();
        source
    }

    fn drain_events(&self) -> Vec<SyncEvent> {
        self.events.try_iter().collect()
    }
}

fn run_until_idle(source: &mut Source) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        source.tick().unwrap();
        if source.state() == ScanState::NotScanning {
            return;
        }
        assert!(Instant::now() < deadline, "scan did not finish: {}", source.state());
        thread::sleep(Duration::from_millis(10));
    }
}

fn scan(source: &mut Source) {
    source.scan().unwrap();
    assert_eq!(source.state(), ScanState::InitialScan);
    run_until_idle(source);
}

fn count_scans_started(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::ScanStarted(_)))
        .count()
}

fn finished_stats(events: &[SyncEvent]) -> maestro_sync_core::ScanStats {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            SyncEvent::ScanFinished(_, stats) => Some(stats.clone()),
            _ => None,
        })
        .expect("no ScanFinished event")
}

#[test]
fn test_unchanged_known_file_needs_no_work() {
    let h = Harness::new(TagChoice::Defer);
    h.write("a.mp3", "h1");
    h.known("a.mp3", Some("h1"), FUTURE);

    let mut source = h.source();
    assert_eq!(source.tree().file_count(), 1);
    scan(&mut source);

    let events = h.drain_events();
    let stats = finished_stats(&events);
    assert_eq!(stats.files_on_disk, 1);
    assert_eq!(stats.hash_requests, 0);
    assert_eq!(stats.modified_checked, 0);
    assert!(h.resolver.tag_calls.lock().unwrap().is_empty());
    assert_eq!(
        source.tree().folder(&h.root()).unwrap().state,
        SyncState::Synced
    );
}

#[test]
fn test_modified_tags_taken_from_disk() {
    let h = Harness::new(TagChoice::UseDisk);
    let path = h.write("a.mp3", "h1-new");
    let id = h.known("a.mp3", Some("h1"), 1000);

    let mut db_tags = TagSet::new();
    db_tags.add("artist", "Old Artist");
    h.ctx.db().set_tags(id, &db_tags).unwrap();
    let mut disk_tags = TagSet::new();
    disk_tags.add("artist", "New Artist");
    h.disk_tags
        .lock()
        .unwrap()
        .insert(path.clone(), disk_tags.clone());

    let mut source = h.source();
    scan(&mut source);

    let calls = h.resolver.tag_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, path);
    assert_eq!(calls[0].db_tags, db_tags);
    assert_eq!(calls[0].disk_tags, disk_tags);

    let db = h.ctx.db();
    assert_eq!(db.get_tags(id).unwrap(), disk_tags);
    let row = db.known_file(id).unwrap().unwrap();
    assert!(row.verified > 1000);
    assert_eq!(row.hash.as_deref(), Some("h1-new"));
    assert_eq!(db.file_length(id).unwrap(), Some(12.5));
}

#[test]
fn test_modified_tags_written_back_from_database() {
    let h = Harness::new(TagChoice::UseDatabase);
    let path = h.write("a.flac", "content");
    let id = h.known("a.flac", Some("stale-hash"), 1000);

    let mut db_tags = TagSet::new();
    db_tags.add("title", "Library Title");
    h.ctx.db().set_tags(id, &db_tags).unwrap();
    let mut disk_tags = TagSet::new();
    disk_tags.add("title", "Disk Title");
    h.disk_tags.lock().unwrap().insert(path.clone(), disk_tags);

    let mut source = h.source();
    scan(&mut source);

    assert_eq!(h.disk_tags.lock().unwrap().get(&path), Some(&db_tags));
    assert!(source.tree().file(&path).unwrap().verified > 1000);
    assert!(h.ctx.db().known_file(id).unwrap().unwrap().verified > 1000);

    // Idle only once the rewritten file has been rehashed
    assert_eq!(source.state(), ScanState::NotScanning);
    assert_eq!(
        h.ctx.db().known_file(id).unwrap().unwrap().hash.as_deref(),
        Some("content")
    );
    assert_eq!(source.tree().file(&path).unwrap().hash.as_deref(), Some("content"));
}

#[test]
fn test_deferred_tag_conflict_stays_unverified() {
    let h = Harness::new(TagChoice::Defer);
    let path = h.write("a.flac", "content");
    let id = h.known("a.flac", Some("content"), 1000);
    let mut disk_tags = TagSet::new();
    disk_tags.add("title", "Something");
    h.disk_tags.lock().unwrap().insert(path, disk_tags);

    let mut source = h.source();
    scan(&mut source);

    assert_eq!(h.resolver.tag_calls.lock().unwrap().len(), 1);
    assert_eq!(h.ctx.db().known_file(id).unwrap().unwrap().verified, 1000);
}

#[test]
fn test_new_file_becomes_hashed_candidate() {
    let h = Harness::new(TagChoice::Defer);
    h.write("a.flac", "ha");
    h.known("a.flac", Some("ha"), FUTURE);
    let new_path = h.write("albums/b.flac", "hb");
    h.write("albums/cover.jpg", "not audio");

    let mut source = h.source();
    scan(&mut source);

    let entry = source.tree().file(&new_path).unwrap();
    assert_eq!(entry.id, None);
    assert_eq!(entry.hash.as_deref(), Some("hb"));
    assert_eq!(source.tree().file_count(), 2);

    let prefix = Url::dir_prefix("file", &h.root());
    let candidates = h.ctx.db().candidates_under(&prefix).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].url, h.url("albums/b.flac"));
    assert_eq!(candidates[0].hash.as_deref(), Some("hb"));
    assert!(candidates[0].verified > 0);

    let tree = source.tree();
    assert_eq!(
        tree.folder(&h.root().join("albums")).unwrap().state,
        SyncState::Unsynced
    );
    assert_eq!(tree.folder(&h.root()).unwrap().state, SyncState::Unsynced);

    let stats = finished_stats(&h.drain_events());
    assert_eq!(stats.new_files, 1);
    assert_eq!(stats.hash_requests, 1);
}

#[test]
fn test_vanished_candidate_is_forgotten() {
    let h = Harness::new(TagChoice::Defer);
    let path = h.write("gone.mp3", "x");

    let mut source = h.source();
    scan(&mut source);
    assert!(source.tree().contains(&path));

    fs::remove_file(&path).unwrap();
    scan(&mut source);

    assert!(!source.tree().contains(&path));
    assert_eq!(source.tree().folder(&h.root()).unwrap().state, SyncState::Empty);
    let prefix = Url::dir_prefix("file", &h.root());
    assert!(h.ctx.db().candidates_under(&prefix).unwrap().is_empty());
}

#[test]
fn test_external_rename_is_detected_by_hash() {
    let h = Harness::new(TagChoice::Defer);
    let old_path = h.root().join("sub/old.flac");
    let id = h.known("sub/old.flac", Some("h2"), FUTURE);
    let new_path = h.write("new.flac", "h2");

    let mut source = h.source();
    assert!(source.tree().folder(&h.root().join("sub")).is_some());
    scan(&mut source);

    let tree = source.tree();
    assert!(!tree.contains(&old_path));
    assert_eq!(tree.file(&new_path).unwrap().id, Some(id));
    assert!(tree.folder(&h.root().join("sub")).is_none());
    assert_eq!(tree.folder(&h.root()).unwrap().state, SyncState::Synced);

    let db = h.ctx.db();
    assert_eq!(db.known_file(id).unwrap().unwrap().url, h.url("new.flac"));
    let prefix = Url::dir_prefix("file", &h.root());
    assert!(db.candidates_under(&prefix).unwrap().is_empty());
    drop(db);

    assert!(h.resolver.missing_calls.lock().unwrap().is_empty());
    let stats = finished_stats(&h.drain_events());
    assert_eq!(stats.renames_detected, 1);
    assert_eq!(stats.unresolved_missing, 0);
}

#[test]
fn test_missing_files_go_to_resolver() {
    let h = Harness::new(TagChoice::Defer);
    let kept = h.root().join("kept.mp3");
    let dropped = h.root().join("dropped.mp3");
    let kept_id = h.known("kept.mp3", Some("k"), FUTURE);
    let dropped_id = h.known("dropped.mp3", Some("d"), FUTURE);
    h.write("other.mp3", "unrelated");
    h.resolver
        .missing_answer
        .lock()
        .unwrap()
        .push((dropped.clone(), MissingResolution::Delete));

    let mut source = h.source();
    scan(&mut source);

    let calls = h.resolver.missing_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let mut asked: Vec<&PathBuf> = calls[0].iter().map(|m| &m.path).collect();
    asked.sort();
    assert_eq!(asked, vec![&dropped, &kept]);

    assert!(!source.tree().contains(&dropped));
    assert!(source.tree().contains(&kept));
    let db = h.ctx.db();
    assert!(db.known_file(dropped_id).unwrap().is_none());
    assert!(db.known_file(kept_id).unwrap().is_some());
    drop(db);

    let stats = finished_stats(&h.drain_events());
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.unresolved_missing, 1);
}

#[test]
fn test_missing_file_relocated_by_resolver() {
    let h = Harness::new(TagChoice::Defer);
    let lost = h.root().join("lost.ogg");
    let id = h.known("lost.ogg", None, FUTURE);
    let found = h.write("found/lost.ogg", "different");
    h.resolver
        .missing_answer
        .lock()
        .unwrap()
        .push((lost.clone(), MissingResolution::Relocate(found.clone())));

    let mut source = h.source();
    scan(&mut source);

    assert_eq!(source.tree().file(&found).unwrap().id, Some(id));
    assert!(!source.tree().contains(&lost));
    let db = h.ctx.db();
    assert_eq!(db.known_file(id).unwrap().unwrap().url, h.url("found/lost.ogg"));
    let prefix = Url::dir_prefix("file", &h.root());
    assert!(db.candidates_under(&prefix).unwrap().is_empty());
}

#[test]
fn test_quiet_scan_runs_once() {
    let h = Harness::new(TagChoice::Defer);
    h.write("a.mp3", "a");
    h.write("b/c.mp3", "c");

    let mut source = h.source();
    scan(&mut source);
    for _ in 0..5 {
        source.tick().unwrap();
    }
    assert_eq!(source.state(), ScanState::NotScanning);
    assert_eq!(count_scans_started(&h.drain_events()), 1);

    // A second scan over unchanged files hashes nothing
    scan(&mut source);
    let events = h.drain_events();
    assert_eq!(count_scans_started(&events), 1);
    assert_eq!(finished_stats(&events).hash_requests, 0);
}

#[test]
fn test_scan_while_scanning_is_ignored() {
    let h = Harness::new(TagChoice::Defer);
    h.write("a.mp3", "a");
    let mut source = h.source();
    source.scan().unwrap();
    source.scan().unwrap();
    run_until_idle(&mut source);
    assert_eq!(count_scans_started(&h.drain_events()), 1);
}

#[test]
fn test_live_event_interrupts_scan() {
    let h = Harness::new(TagChoice::Defer);
    let path = h.write("a.mp3", "a");
    h.known("a.mp3", Some("a"), FUTURE);

    let mut source = h.source();
    source.scan().unwrap();
    h.ctx
        .events
        .publish(RealFileEvent::Modified(vec![path.clone()]));
    run_until_idle(&mut source);

    assert_eq!(count_scans_started(&h.drain_events()), 2);
    assert_eq!(source.tree().file(&path).unwrap().hash.as_deref(), Some("a"));
}

#[test]
fn test_events_for_other_directories_are_ignored() {
    let h = Harness::new(TagChoice::Defer);
    h.write("a.mp3", "a");
    let mut source = h.source();
    source.scan().unwrap();
    h.ctx
        .events
        .publish(RealFileEvent::Modified(vec![PathBuf::from("/elsewhere/x.mp3")]));
    run_until_idle(&mut source);
    assert_eq!(count_scans_started(&h.drain_events()), 1);
}

#[test]
fn test_committed_file_is_rehashed_while_idle() {
    let h = Harness::new(TagChoice::Defer);
    let path = h.write("a.flac", "fresh");
    let mut source = h.source();
    scan(&mut source);
    assert_eq!(source.tree().file(&path).unwrap().id, None);

    let id = h.known("a.flac", None, 0);
    source
        .handle_real_file_event(RealFileEvent::Added(vec![(path.clone(), id)]))
        .unwrap();
    assert_eq!(source.state(), ScanState::RealHashOnly);
    run_until_idle(&mut source);

    let entry = source.tree().file(&path).unwrap();
    assert_eq!(entry.id, Some(id));
    assert_eq!(source.tree().folder(&h.root()).unwrap().state, SyncState::Synced);
    let row = h.ctx.db().known_file(id).unwrap().unwrap();
    assert_eq!(row.hash.as_deref(), Some("fresh"));
    assert!(row.verified > 0);
}

#[test]
fn test_removed_and_deleted_events() {
    let h = Harness::new(TagChoice::Defer);
    let a = h.write("a.flac", "a");
    let b = h.write("b.flac", "b");
    h.known("a.flac", Some("a"), FUTURE);
    let mut source = h.source();
    scan(&mut source);

    h.ctx.events.publish(RealFileEvent::Removed(vec![a.clone()]));
    h.ctx.events.publish(RealFileEvent::Deleted(vec![b.clone()]));
    run_until_idle(&mut source);

    assert_eq!(source.tree().file(&a).unwrap().id, None);
    assert!(!source.tree().contains(&b));
    let prefix = Url::dir_prefix("file", &h.root());
    let candidates = h.ctx.db().candidates_under(&prefix).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].url, h.url("a.flac"));
}

#[test]
fn test_rename_and_delete_through_backend() {
    let h = Harness::new(TagChoice::Defer);
    let old = h.write("a.mp3", "a");
    let id = h.known("a.mp3", Some("a"), FUTURE);
    let doomed = h.write("b.mp3", "b");
    let mut source = h.source();
    scan(&mut source);

    let new = h.root().join("moved/a.mp3");
    fs::create_dir_all(new.parent().unwrap()).unwrap();
    source.rename_file(&old, &new).unwrap();
    assert!(new.exists());
    assert!(!old.exists());
    assert_eq!(source.tree().file(&new).unwrap().id, Some(id));
    assert_eq!(
        h.ctx.db().known_file(id).unwrap().unwrap().url,
        h.url("moved/a.mp3")
    );

    source.delete_file(&doomed).unwrap();
    assert!(!doomed.exists());
    assert!(!source.tree().contains(&doomed));
    let prefix = Url::dir_prefix("file", &h.root());
    assert!(h.ctx.db().candidates_under(&prefix).unwrap().is_empty());
}

#[test]
fn test_disable_clears_state() {
    let h = Harness::new(TagChoice::Defer);
    h.write("a.mp3", "a");
    let mut source = h.source();
    assert_eq!(h.ctx.events.subscriber_count(), 1);
    source.disable();
    assert!(!source.is_enabled());
    assert_eq!(source.tree().file_count(), 0);
    assert_eq!(h.ctx.events.subscriber_count(), 0);

    // Disabled sources ignore scan requests
    source.scan().unwrap();
    assert_eq!(source.state(), ScanState::NotScanning);
}

#[test]
fn test_repeated_missing_resolutions_apply_once() {
    let h = Harness::new(TagChoice::Defer);
    let gone = h.root().join("gone.mp3");
    let moved = h.root().join("moved.mp3");
    let gone_id = h.known("gone.mp3", Some("g"), FUTURE);
    let moved_id = h.known("moved.mp3", Some("m"), FUTURE);
    let target = h.write("elsewhere/moved.mp3", "different");
    h.resolver.missing_answer.lock().unwrap().extend([
        (gone.clone(), MissingResolution::Delete),
        (gone.clone(), MissingResolution::Delete),
        (moved.clone(), MissingResolution::Relocate(target.clone())),
        (moved.clone(), MissingResolution::Relocate(target.clone())),
    ]);

    let mut source = h.source();
    scan(&mut source);

    assert!(!source.tree().contains(&gone));
    assert_eq!(source.tree().file(&target).unwrap().id, Some(moved_id));
    let db = h.ctx.db();
    assert!(db.known_file(gone_id).unwrap().is_none());
    assert_eq!(
        db.known_file(moved_id).unwrap().unwrap().url,
        h.url("elsewhere/moved.mp3")
    );
    drop(db);

    let stats = finished_stats(&h.drain_events());
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.relocated, 1);
    assert_eq!(stats.unresolved_missing, 0);
}

#[cfg(unix)]
#[test]
fn test_non_utf8_file_names_do_not_churn() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let h = Harness::new(TagChoice::Defer);
    h.write("good.mp3", "good");
    fs::write(h.root().join(OsStr::from_bytes(b"bad\xff.mp3")), "bad").unwrap();

    let mut source = h.source();
    scan(&mut source);
    assert_eq!(source.tree().file_count(), 1);

    source.disable();
    source.enable().unwrap();
    h.drain_events();
    scan(&mut source);

    let stats = finished_stats(&h.drain_events());
    assert_eq!(stats.new_files, 0);
    assert_eq!(stats.removed_candidates, 0);
    let prefix = Url::dir_prefix("file", &h.root());
    let candidates = h.ctx.db().candidates_under(&prefix).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].url, h.url("good.mp3"));
}
