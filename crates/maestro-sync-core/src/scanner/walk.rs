use ahash::AHashMap;
use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{error, warn};

/// Files found on disk, keyed by path, with their modification time in
/// seconds since the epoch.
pub type DiskFiles = AHashMap<PathBuf, i64>;

/// Rules deciding which directory entries count as library files.
#[derive(Debug, Clone, Default)]
pub struct WalkFilter {
    extensions: Vec<String>,
    ignore: Vec<Pattern>,
}

impl WalkFilter {
    pub fn new(extensions: &[String], ignore_globs: &[String]) -> Self {
        let ignore = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        WalkFilter {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            ignore,
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.iter().any(|pattern| pattern.matches_path(path))
    }

    /// An empty extension list accepts every file.
    pub fn accepts(&self, path: &Path) -> bool {
        if self.is_ignored(path) {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// Recursively list the files under `root`. Symlinks and entries whose
/// names are not valid UTF-8 are skipped; unreadable directories are
/// logged and left out. Any other I/O error
/// aborts the walk.
pub fn read_filesystem(root: &Path, filter: &WalkFilter) -> io::Result<DiskFiles> {
    let map: DashMap<PathBuf, i64> = DashMap::new();
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Source directory {} does not exist", root.display()),
        ));
    }
    visit_dirs(root, &map, filter)?;
    Ok(map.into_iter().collect())
}

fn visit_dirs(dir: &Path, map: &DashMap<PathBuf, i64>, filter: &WalkFilter) -> io::Result<()> {
    if filter.is_ignored(dir) {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() == io::ErrorKind::PermissionDenied {
                warn!("Access denied reading directory {}: {}", dir.display(), err);
                return Ok(());
            } else {
                return Err(io::Error::new(
                    err.kind(),
                    format!("Error reading directory {}: {}", dir.display(), err),
                ));
            }
        }
    };

    entries.par_bridge().try_for_each(|entry_result| {
        let entry = entry_result.map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error reading entry in directory {}: {}", dir.display(), err),
            )
        })?;

        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            // Vanished between listing and stat
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(io::Error::new(
                    err.kind(),
                    format!("Error getting metadata for {}: {}", path.display(), err),
                ));
            }
        };

        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            return Ok(());
        }
        // Stored URLs are UTF-8 and must map back to the same path
        if path.to_str().is_none() {
            warn!("Skipping {}: name is not valid UTF-8", path.display());
            return Ok(());
        }
        if file_type.is_dir() {
            visit_dirs(&path, map, filter)?;
        } else if file_type.is_file() && filter.accepts(&path) {
            map.insert(path, modified_secs(&metadata));
        }
        Ok(())
    })
}

fn modified_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
