//! Persistent Backend
//!
//! Adapts a host string store to the backend contract by encoding each
//! value as JSON text.

use std::sync::Arc;

use serde_json::Value;

use super::{Backend, HostStorage};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct PersistentBackend {
    host: Arc<dyn HostStorage>,
}

impl PersistentBackend {
    pub fn new(host: Arc<dyn HostStorage>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn HostStorage> {
        &self.host
    }
}

impl Backend for PersistentBackend {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        match self.host.get_item(key)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::MalformedPayload {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    fn set_item(&self, key: &str, value: Value) -> Result<()> {
        let raw = serde_json::to_string(&value).map_err(StoreError::Serialize)?;
        self.host.set_item(key, raw)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.host.remove_item(key)
    }

    fn clear(&self) -> Result<()> {
        self.host.clear()
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.host.keys()
    }
}
