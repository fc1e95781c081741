use crate::lock::writer_lock;
use crate::models::{decode_document, Entries, INDEX_FILE};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// JSON-backed index: `<dir>/index.json` holding every record under one
/// collection key, optionally mirrored as `<dir>/<key>.json` files.
pub struct JsonIndex<T> {
    pub(crate) dir: PathBuf,
    pub(crate) collection: &'static str,
    pub(crate) entry_files: bool,
    pub(crate) lock: Arc<Mutex<()>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonIndex<T> {
    fn clone(&self) -> Self {
        JsonIndex { dir: self.dir.clone(), collection: self.collection, entry_files: self.entry_files, lock: self.lock.clone(), _marker: PhantomData }
    }
}

impl<T: DeserializeOwned> JsonIndex<T> {
    pub fn open_or_create(dir: impl AsRef<Path>, collection: &'static str) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let dir = dir.canonicalize()?;
        let lock = writer_lock(&dir.join(INDEX_FILE));
        Ok(JsonIndex { dir, collection, entry_files: false, lock, _marker: PhantomData })
    }

    /// Also keep one `<key>.json` document per record next to the index.
    pub fn with_entry_files(mut self) -> Self {
        self.entry_files = true;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Reader path: anything unreadable or malformed is an empty index.
    pub(crate) fn load(&self) -> Entries<T> {
        match self.load_for_write() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.index_path().display(), error = %e, "index unreadable, treating as empty");
                Entries::new()
            }
        }
    }

    /// Writer path: a missing or malformed index is empty, but an I/O error
    /// is returned so a mutation never overwrites a document it could not read.
    pub(crate) fn load_for_write(&self) -> Result<Entries<T>> {
        let path = self.index_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        match decode_document(&text, self.collection) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed index, treating as empty");
                Ok(Entries::new())
            }
        }
    }
}
