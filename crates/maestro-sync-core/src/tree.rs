//! In-memory tree of tracked folders and files for one source.
//!
//! Folders and files live in two flat maps keyed by path; the parent/child
//! links are paths into those maps, so a file can be moved between folders
//! without giving up its identity.

use crate::error::{Error, Result};
use crate::reporter::SyncReporter;
use crate::url::Url;
use ahash::AHashMap;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Synchronization state of a file or folder. Ordered so that combining two
/// states is taking the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncState {
    Empty,
    Synced,
    Unsynced,
    Unknown,
}

impl SyncState {
    pub fn combine(self, other: SyncState) -> SyncState {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Empty => "empty",
            SyncState::Synced => "synced",
            SyncState::Unsynced => "unsynced",
            SyncState::Unknown => "unknown",
        }
    }
}

/// One tracked file. `id` is the store element id; `None` marks a candidate.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub url: Url,
    pub id: Option<i64>,
    pub verified: i64,
    pub hash: Option<String>,
    folder: PathBuf,
}

impl FileEntry {
    pub fn new(url: Url, id: Option<i64>, verified: i64, hash: Option<String>) -> Self {
        let folder = url
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            url,
            id,
            verified,
            hash,
            folder,
        }
    }

    pub fn path(&self) -> &Path {
        self.url.path()
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn state(&self) -> SyncState {
        if self.id.is_some() {
            SyncState::Synced
        } else {
            SyncState::Unsynced
        }
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub path: PathBuf,
    pub parent: Option<PathBuf>,
    pub subdirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub state: SyncState,
}

impl Folder {
    fn new(path: PathBuf, parent: Option<PathBuf>) -> Self {
        Self {
            path,
            parent,
            subdirs: Vec::new(),
            files: Vec::new(),
            state: SyncState::Unknown,
        }
    }

    fn is_empty(&self) -> bool {
        self.files.is_empty() && self.subdirs.is_empty()
    }
}

#[derive(Debug)]
pub struct FileTree {
    root: PathBuf,
    files: AHashMap<PathBuf, FileEntry>,
    folders: AHashMap<PathBuf, Folder>,
}

impl FileTree {
    pub fn new(root: &Path) -> Self {
        let mut folders = AHashMap::new();
        let mut root_folder = Folder::new(root.to_path_buf(), None);
        root_folder.state = SyncState::Empty;
        folders.insert(root.to_path_buf(), root_folder);
        Self {
            root: root.to_path_buf(),
            files: AHashMap::new(),
            folders,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, path: &Path) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn file_mut(&mut self, path: &Path) -> Option<&mut FileEntry> {
        self.files.get_mut(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    pub fn folder(&self, path: &Path) -> Option<&Folder> {
        self.folders.get(path)
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_under_root(&self, path: &Path) -> bool {
        path != self.root && path.starts_with(&self.root)
    }

    /// Track `entry`, creating its folder and any missing ancestors.
    /// An entry already tracked at the same path is replaced.
    pub fn add_file(&mut self, entry: FileEntry, notify: Option<&dyn SyncReporter>) -> Result<()> {
        if !self.is_under_root(entry.path()) {
            return Err(Error::Other(format!(
                "{} is outside of {}",
                entry.path().display(),
                self.root.display()
            )));
        }
        let path = entry.path().to_path_buf();
        if self.files.contains_key(&path) {
            self.detach(&path);
        }
        let dir = entry.folder().to_path_buf();
        self.ensure_folder(&dir);
        if let Some(folder) = self.folders.get_mut(&dir) {
            folder.files.push(path.clone());
        }
        self.files.insert(path.clone(), entry);
        trace!("Tracking {}", path.display());
        self.update_state(&dir, true, notify);
        Ok(())
    }

    /// Stop tracking `path`; folders left empty are pruned.
    pub fn remove_file(&mut self, path: &Path, notify: Option<&dyn SyncReporter>) -> Option<FileEntry> {
        let entry = self.detach(path)?;
        self.prune(entry.folder(), notify);
        if let Some(reporter) = notify {
            reporter.on_file_state_changed(path);
        }
        Some(entry)
    }

    /// Move a tracked file to `new_url`, keeping the entry itself.
    ///
    /// Returns the entry that was tracked at the destination, if any; it is
    /// superseded and no longer part of the tree.
    pub fn move_file(
        &mut self,
        old: &Path,
        new_url: Url,
        notify: Option<&dyn SyncReporter>,
    ) -> Result<Option<FileEntry>> {
        if !self.files.contains_key(old) {
            return Err(Error::Other(format!("{} is not tracked", old.display())));
        }
        if !self.is_under_root(new_url.path()) {
            return Err(Error::Other(format!(
                "{} is outside of {}",
                new_url.path().display(),
                self.root.display()
            )));
        }
        if new_url.path() == old {
            return Ok(None);
        }

        let superseded = self.detach(new_url.path());
        if let Some(other) = &superseded {
            self.prune(other.folder(), notify);
        }

        let Some(mut entry) = self.detach(old) else {
            return Ok(superseded);
        };
        let old_dir = entry.folder().to_path_buf();
        entry = FileEntry::new(new_url, entry.id, entry.verified, entry.hash);
        let new_dir = entry.folder().to_path_buf();
        let new_path = entry.path().to_path_buf();

        self.ensure_folder(&new_dir);
        if let Some(folder) = self.folders.get_mut(&new_dir) {
            folder.files.push(new_path.clone());
        }
        self.files.insert(new_path.clone(), entry);

        self.update_state(&new_dir, true, notify);
        if old_dir != new_dir {
            self.prune(&old_dir, notify);
        }
        if let Some(reporter) = notify {
            reporter.on_file_state_changed(old);
            reporter.on_file_state_changed(&new_path);
        }
        Ok(superseded)
    }

    /// Change the store id of a tracked file and propagate the new state.
    pub fn set_id(&mut self, path: &Path, id: Option<i64>, notify: Option<&dyn SyncReporter>) -> bool {
        let Some(entry) = self.files.get_mut(path) else {
            return false;
        };
        if entry.id == id {
            return true;
        }
        entry.id = id;
        let dir = entry.folder().to_path_buf();
        self.update_state(&dir, true, notify);
        if let Some(reporter) = notify {
            reporter.on_file_state_changed(path);
        }
        true
    }

    /// Recompute the state of folder `path`. If it changed, report it and,
    /// with `recurse`, continue with the parent.
    pub fn update_state(&mut self, path: &Path, recurse: bool, notify: Option<&dyn SyncReporter>) {
        let mut current = Some(path.to_path_buf());
        while let Some(dir) = current.take() {
            let Some(state) = self.compute_state(&dir) else {
                return;
            };
            let Some(folder) = self.folders.get_mut(&dir) else {
                return;
            };
            if folder.state == state {
                return;
            }
            folder.state = state;
            if let Some(reporter) = notify {
                reporter.on_folder_state_changed(&dir, state);
            }
            if recurse {
                current = folder.parent.clone();
            }
        }
    }

    /// Recompute every folder bottom-up without notifications.
    pub fn recompute_all(&mut self) {
        let mut dirs: Vec<PathBuf> = self.folders.keys().cloned().collect();
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        for dir in dirs {
            if let Some(state) = self.compute_state(&dir) {
                if let Some(folder) = self.folders.get_mut(&dir) {
                    folder.state = state;
                }
            }
        }
    }

    fn compute_state(&self, dir: &Path) -> Option<SyncState> {
        let folder = self.folders.get(dir)?;
        let from_files = folder
            .files
            .iter()
            .filter_map(|path| self.files.get(path))
            .map(FileEntry::state);
        let from_dirs = folder
            .subdirs
            .iter()
            .filter_map(|path| self.folders.get(path))
            .map(|sub| sub.state);
        Some(
            from_files
                .chain(from_dirs)
                .fold(SyncState::Empty, SyncState::combine),
        )
    }

    fn ensure_folder(&mut self, dir: &Path) {
        if self.folders.contains_key(dir) {
            return;
        }
        let Some(parent) = dir.parent().map(Path::to_path_buf) else {
            return;
        };
        self.ensure_folder(&parent);
        if let Some(parent_folder) = self.folders.get_mut(&parent) {
            parent_folder.subdirs.push(dir.to_path_buf());
        }
        self.folders
            .insert(dir.to_path_buf(), Folder::new(dir.to_path_buf(), Some(parent)));
    }

    fn detach(&mut self, path: &Path) -> Option<FileEntry> {
        let entry = self.files.remove(path)?;
        if let Some(folder) = self.folders.get_mut(entry.folder()) {
            folder.files.retain(|p| p != path);
        }
        Some(entry)
    }

    /// Delete `dir` and its ancestors while they are empty, then update the
    /// first surviving ancestor.
    fn prune(&mut self, dir: &Path, notify: Option<&dyn SyncReporter>) {
        let mut current = dir.to_path_buf();
        loop {
            let removable = current != self.root
                && self.folders.get(&current).is_some_and(Folder::is_empty);
            if !removable {
                self.update_state(&current, true, notify);
                return;
            }
            let Some(folder) = self.folders.remove(&current) else {
                return;
            };
            trace!("Pruned empty folder {}", current.display());
            if let Some(reporter) = notify {
                reporter.on_folder_state_changed(&current, SyncState::Empty);
            }
            let Some(parent) = folder.parent else {
                return;
            };
            if let Some(parent_folder) = self.folders.get_mut(&parent) {
                parent_folder.subdirs.retain(|p| p != &current);
            }
            current = parent;
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (path, entry) in &self.files {
            assert_eq!(path, entry.path());
            assert_eq!(Some(entry.folder()), path.parent());
            let owners: Vec<_> = self
                .folders
                .values()
                .filter(|f| f.files.contains(path))
                .collect();
            assert_eq!(owners.len(), 1, "{} owned by {} folders", path.display(), owners.len());
            assert_eq!(owners[0].path, entry.folder());
        }
        for (path, folder) in &self.folders {
            if path != &self.root {
                assert!(!folder.is_empty(), "{} should have been pruned", path.display());
                let parent = folder.parent.as_ref().expect("non-root folder has a parent");
                assert!(self.folders[parent].subdirs.contains(path));
            }
            assert_eq!(Some(folder.state), self.compute_state(path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, id: Option<i64>) -> FileEntry {
        FileEntry::new(Url::file(path), id, 0, None)
    }

    #[test]
    fn test_combine_is_commutative_and_idempotent() {
        let states = [
            SyncState::Empty,
            SyncState::Synced,
            SyncState::Unsynced,
            SyncState::Unknown,
        ];
        for a in states {
            assert_eq!(a.combine(a), a);
            for b in states {
                assert_eq!(a.combine(b), b.combine(a));
            }
        }
        assert_eq!(SyncState::Synced.combine(SyncState::Unsynced), SyncState::Unsynced);
        assert_eq!(SyncState::Empty.combine(SyncState::Synced), SyncState::Synced);
    }

    #[test]
    fn test_folder_states_follow_files() {
        let mut tree = FileTree::new(Path::new("/music"));
        assert_eq!(tree.folder(Path::new("/music")).unwrap().state, SyncState::Empty);

        tree.add_file(entry("/music/a/x.mp3", Some(1)), None).unwrap();
        assert_eq!(tree.folder(Path::new("/music")).unwrap().state, SyncState::Synced);

        tree.add_file(entry("/music/b/c/y.mp3", None), None).unwrap();
        assert_eq!(tree.folder(Path::new("/music/b")).unwrap().state, SyncState::Unsynced);
        assert_eq!(tree.folder(Path::new("/music")).unwrap().state, SyncState::Unsynced);
        assert_eq!(tree.folder(Path::new("/music/a")).unwrap().state, SyncState::Synced);

        tree.set_id(Path::new("/music/b/c/y.mp3"), Some(2), None);
        assert_eq!(tree.folder(Path::new("/music")).unwrap().state, SyncState::Synced);
        tree.assert_consistent();
    }

    #[test]
    fn test_remove_prunes_empty_folders() {
        let mut tree = FileTree::new(Path::new("/music"));
        tree.add_file(entry("/music/a/b/c/x.mp3", Some(1)), None).unwrap();
        tree.add_file(entry("/music/a/y.mp3", None), None).unwrap();

        tree.remove_file(Path::new("/music/a/b/c/x.mp3"), None).unwrap();
        assert!(tree.folder(Path::new("/music/a/b/c")).is_none());
        assert!(tree.folder(Path::new("/music/a/b")).is_none());
        assert!(tree.folder(Path::new("/music/a")).is_some());

        tree.remove_file(Path::new("/music/a/y.mp3"), None).unwrap();
        assert!(tree.folder(Path::new("/music/a")).is_none());
        assert_eq!(tree.folder(Path::new("/music")).unwrap().state, SyncState::Empty);
        tree.assert_consistent();
    }

    #[test]
    fn test_move_keeps_entry_and_supersedes_destination() {
        let mut tree = FileTree::new(Path::new("/music"));
        tree.add_file(
            FileEntry::new(Url::file("/music/sub/old.mp3"), Some(7), 1234, Some("h".into())),
            None,
        )
        .unwrap();
        tree.add_file(entry("/music/new.mp3", None), None).unwrap();

        let superseded = tree
            .move_file(Path::new("/music/sub/old.mp3"), Url::file("/music/new.mp3"), None)
            .unwrap();
        assert_eq!(superseded.unwrap().id, None);

        let moved = tree.file(Path::new("/music/new.mp3")).unwrap();
        assert_eq!(moved.id, Some(7));
        assert_eq!(moved.verified, 1234);
        assert_eq!(moved.hash.as_deref(), Some("h"));
        assert!(!tree.contains(Path::new("/music/sub/old.mp3")));
        assert!(tree.folder(Path::new("/music/sub")).is_none());
        assert_eq!(tree.file_count(), 1);
        assert_eq!(tree.folder(Path::new("/music")).unwrap().state, SyncState::Synced);
        tree.assert_consistent();
    }

    #[test]
    fn test_tree_invariant_after_mixed_operations() {
        let mut tree = FileTree::new(Path::new("/m"));
        let paths = [
            "/m/a.flac", "/m/x/b.flac", "/m/x/y/c.flac", "/m/x/y/d.flac", "/m/z/e.flac",
        ];
        for (i, p) in paths.iter().enumerate() {
            let id = if i % 2 == 0 { Some(i as i64) } else { None };
            tree.add_file(entry(p, id), None).unwrap();
            tree.assert_consistent();
        }
        tree.move_file(Path::new("/m/x/y/c.flac"), Url::file("/m/z/w/c.flac"), None)
            .unwrap();
        tree.assert_consistent();
        tree.move_file(Path::new("/m/x/y/d.flac"), Url::file("/m/x/d.flac"), None)
            .unwrap();
        tree.assert_consistent();
        assert!(tree.folder(Path::new("/m/x/y")).is_none());
        tree.remove_file(Path::new("/m/z/e.flac"), None);
        tree.remove_file(Path::new("/m/z/w/c.flac"), None);
        tree.assert_consistent();
        assert!(tree.folder(Path::new("/m/z")).is_none());
        tree.set_id(Path::new("/m/x/b.flac"), Some(9), None);
        tree.assert_consistent();
    }

    #[test]
    fn test_rejects_paths_outside_root() {
        let mut tree = FileTree::new(Path::new("/music"));
        assert!(tree.add_file(entry("/other/a.mp3", None), None).is_err());
        tree.add_file(entry("/music/a.mp3", None), None).unwrap();
        assert!(tree
            .move_file(Path::new("/music/a.mp3"), Url::file("/elsewhere/a.mp3"), None)
            .is_err());
        assert!(tree
            .move_file(Path::new("/music/none.mp3"), Url::file("/music/b.mp3"), None)
            .is_err());
    }

    #[test]
    fn test_recompute_all_bottom_up() {
        let mut tree = FileTree::new(Path::new("/m"));
        tree.add_file(entry("/m/a/b/c.mp3", None), None).unwrap();
        for folder in tree.folders.values_mut() {
            folder.state = SyncState::Unknown;
        }
        tree.recompute_all();
        assert_eq!(tree.folder(Path::new("/m")).unwrap().state, SyncState::Unsynced);
        tree.assert_consistent();
    }
}
