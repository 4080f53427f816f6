use crate::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Location of a tracked file: scheme, optional location (host/device) and path.
///
/// Two URLs are equal iff their canonical string forms are equal, which is
/// what the store uses as key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Url {
    scheme: String,
    location: String,
    path: PathBuf,
}

impl Url {
    pub fn new(scheme: &str, location: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
            path: path.into(),
        }
    }

    /// A `file://` URL for a local path.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new("file", "", path)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Canonical form of a directory prefix, used for "everything under" queries.
    pub fn dir_prefix(scheme: &str, dir: &Path) -> String {
        let mut prefix = Url::new(scheme, "", dir).to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme,
            self.location,
            self.path.to_string_lossy()
        )
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::InvalidUrl(s.to_string()))?;
        if scheme.is_empty() {
            return Err(Error::InvalidUrl(s.to_string()));
        }
        let (location, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => return Err(Error::InvalidUrl(s.to_string())),
        };
        Ok(Url::new(scheme, location, path))
    }
}
