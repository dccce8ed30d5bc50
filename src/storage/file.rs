//! Durable File Storage
//!
//! Host string store persisted as a single JSON document. Every mutation
//! rewrites the document through a temp file and an atomic rename.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::HostStorage;
use crate::error::Result;

const FILE_VERSION: u8 = 1;

/// On-disk document
#[derive(Debug, Serialize, Deserialize)]
struct FileImage {
    version: u8,
    entries: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    inner: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open the document at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            Self::load(&path)?
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened durable storage");
        Ok(Self {
            path,
            inner: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<String, String>> {
        let reader = BufReader::new(File::open(path)?);
        let image: FileImage = serde_json::from_reader(reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if image.version != FILE_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported storage version {}", image.version),
            )
            .into());
        }
        Ok(image.entries.into_iter().collect())
    }

    /// Write the whole map to disk
    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let image = FileImage {
            version: FILE_VERSION,
            entries: entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, &image).map_err(io::Error::from)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&tmp, &self.path)?;
        trace!(path = %self.path.display(), keys = entries.len(), "Persisted durable storage");
        Ok(())
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        // Changes land in memory only once they are on disk
        let mut entries = self.inner.write();
        let mut next = entries.clone();
        f(&mut next);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

impl HostStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        if !self.inner.read().contains_key(key) {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.mutate(|entries| entries.clear())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().keys().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.read().len())
    }
}

static LOCAL: Lazy<Mutex<HashMap<PathBuf, Arc<FileStorage>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The process-wide durable store for `path`; opened once per path
pub fn local_storage(path: impl Into<PathBuf>) -> Result<Arc<FileStorage>> {
    let path = path.into();
    let mut registry = LOCAL.lock();
    if let Some(storage) = registry.get(&path) {
        return Ok(Arc::clone(storage));
    }
    let storage = Arc::new(FileStorage::open(path.clone())?);
    registry.insert(path, Arc::clone(&storage));
    Ok(storage)
}
