//! Tag/content backends, selected per URL.

use crate::error::{Error, Result};
use crate::url::Url;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagExt, TagItem, TagType};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

/// Tag name (lowercase) → values, in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeMap<String, Vec<String>>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tag: &str, value: impl Into<String>) {
        self.0
            .entry(tag.to_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn get(&self, tag: &str) -> Option<&[String]> {
        self.0.get(&tag.to_lowercase()).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for (k, v) in iter {
            set.add(&k.into(), v);
        }
        set
    }
}

/// An opened file of some backend.
pub trait TaggedFile: Send {
    fn read_tags(&mut self) -> Result<TagSet>;

    /// Audio length in seconds, if the backend can tell.
    fn length(&mut self) -> Option<f64>;

    /// Store `tags` on the file. Returns the tags the format could not hold.
    fn save_tags(&mut self, tags: &TagSet) -> Result<TagSet>;
}

pub trait FileBackend: Send + Sync {
    fn accepts(&self, url: &Url) -> bool;
    fn open(&self, url: &Url) -> Result<Box<dyn TaggedFile>>;
    fn rename(&self, from: &Url, to: &Url) -> Result<()>;
    fn delete(&self, url: &Url) -> Result<()>;
}

/// Backends in the order they are tried.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn FileBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the local file backend only.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalFileBackend));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn FileBackend>) {
        self.backends.push(backend);
    }

    pub fn for_url(&self, url: &Url) -> Result<&dyn FileBackend> {
        self.backends
            .iter()
            .find(|backend| backend.accepts(url))
            .map(|backend| backend.as_ref())
            .ok_or_else(|| Error::NoBackend(url.to_string()))
    }

    pub fn open(&self, url: &Url) -> Result<Box<dyn TaggedFile>> {
        self.for_url(url)?.open(url)
    }
}

const TAG_KEYS: &[(&str, ItemKey)] = &[
    ("title", ItemKey::TrackTitle),
    ("artist", ItemKey::TrackArtist),
    ("album", ItemKey::AlbumTitle),
    ("albumartist", ItemKey::AlbumArtist),
    ("composer", ItemKey::Composer),
    ("genre", ItemKey::Genre),
    ("date", ItemKey::RecordingDate),
    ("tracknumber", ItemKey::TrackNumber),
    ("discnumber", ItemKey::DiscNumber),
    ("comment", ItemKey::Comment),
];

fn tag_name(key: &ItemKey, tag_type: TagType) -> Option<String> {
    if let Some((name, _)) = TAG_KEYS.iter().find(|(_, k)| k == key) {
        return Some((*name).to_string());
    }
    key.map_key(tag_type, true).map(str::to_lowercase)
}

fn item_key(name: &str, tag_type: TagType) -> ItemKey {
    match TAG_KEYS.iter().find(|(n, _)| *n == name) {
        Some((_, key)) => key.clone(),
        None => ItemKey::from_key(tag_type, name),
    }
}

/// Local files, tags through `lofty`.
pub struct LocalFileBackend;

impl FileBackend for LocalFileBackend {
    fn accepts(&self, url: &Url) -> bool {
        url.scheme() == "file"
    }

    fn open(&self, url: &Url) -> Result<Box<dyn TaggedFile>> {
        Ok(Box::new(LocalFile {
            path: url.path().to_path_buf(),
        }))
    }

    fn rename(&self, from: &Url, to: &Url) -> Result<()> {
        if let Some(parent) = to.path().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from.path(), to.path())?;
        debug!("Renamed {} to {}", from, to);
        Ok(())
    }

    fn delete(&self, url: &Url) -> Result<()> {
        fs::remove_file(url.path())?;
        debug!("Deleted {}", url);
        Ok(())
    }
}

struct LocalFile {
    path: PathBuf,
}

impl TaggedFile for LocalFile {
    fn read_tags(&mut self) -> Result<TagSet> {
        let tagged = Probe::open(&self.path)?.read()?;
        let mut tags = TagSet::new();
        let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
            return Ok(tags);
        };
        for item in tag.items() {
            let ItemValue::Text(value) = item.value() else {
                continue;
            };
            if let Some(name) = tag_name(item.key(), tag.tag_type()) {
                tags.add(&name, value.clone());
            }
        }
        trace!("Read {} tags from {}", tags.len(), self.path.display());
        Ok(tags)
    }

    fn length(&mut self) -> Option<f64> {
        let tagged = Probe::open(&self.path).ok()?.read().ok()?;
        Some(tagged.properties().duration().as_secs_f64())
    }

    fn save_tags(&mut self, tags: &TagSet) -> Result<TagSet> {
        let tagged = Probe::open(&self.path)?.read()?;
        let tag_type = tagged.primary_tag_type();
        let mut tag = tagged
            .primary_tag()
            .cloned()
            .unwrap_or_else(|| Tag::new(tag_type));
        tag.retain(|item| !matches!(item.value(), ItemValue::Text(_)));

        let mut failed = TagSet::new();
        for (name, values) in tags.iter() {
            let key = item_key(name, tag_type);
            for value in values {
                if !tag.push(TagItem::new(key.clone(), ItemValue::Text(value.clone()))) {
                    failed.add(name, value.clone());
                }
            }
        }
        tag.save_to_path(&self.path, WriteOptions::default())?;
        debug!(
            "Saved {} tags to {} ({} rejected)",
            tags.len(),
            self.path.display(),
            failed.len()
        );
        Ok(failed)
    }
}
