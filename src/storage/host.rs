//! Host Storage
//!
//! String-keyed, string-valued stores provided by the environment.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::Result;

/// Synchronous string store shared process-wide
pub trait HostStorage: Send + Sync + fmt::Debug {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: String) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    /// Wipe every key in the host store
    fn clear(&self) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }
}

/// Session-lifetime storage; lives as long as the process
#[derive(Debug, Default)]
pub struct SessionStorage {
    inner: RwLock<HashMap<String, String>>,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostStorage for SessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.inner.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.inner.write().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().keys().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.read().len())
    }
}

static SESSION: Lazy<Arc<SessionStorage>> = Lazy::new(|| Arc::new(SessionStorage::new()));

/// The process-wide session store
pub fn session_storage() -> Arc<SessionStorage> {
    Arc::clone(&SESSION)
}
