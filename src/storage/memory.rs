//! In-Memory Backend
//!
//! Map owned by a single store; holds JSON values directly.

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::Backend;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Backend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: Value) -> Result<()> {
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
}
