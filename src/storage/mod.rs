//! Storage Backends
//!
//! Three interchangeable key-value backends behind one capability set:
//! an in-process map, plus session and durable host string stores
//! adapted through a JSON codec.

mod file;
mod host;
mod memory;
mod persistent;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::Result;

pub use file::{local_storage, FileStorage};
pub use host::{session_storage, HostStorage, SessionStorage};
pub use memory::MemoryBackend;
pub use persistent::PersistentBackend;

/// Uniform backend contract used by the store.
///
/// Missing keys are never an error: `get_item` yields `None` and
/// `remove_item` is a no-op.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Previously stored value for `key`
    fn get_item(&self, key: &str) -> Result<Option<Value>>;

    /// Overwrite the value for `key`
    fn set_item(&self, key: &str, value: Value) -> Result<()>;

    /// Delete `key`
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Delete every key this backend owns. For host stores this wipes the
    /// whole host store, including keys written by other code.
    fn clear(&self) -> Result<()>;

    /// Every key currently held
    fn keys(&self) -> Result<Vec<String>>;
}

/// The host-provided string stores a store may route through
#[derive(Debug, Clone)]
pub struct HostStorages {
    /// Durable store
    pub local: Arc<dyn HostStorage>,
    /// Session-lifetime store
    pub session: Arc<dyn HostStorage>,
}

impl HostStorages {
    pub fn new(local: Arc<dyn HostStorage>, session: Arc<dyn HostStorage>) -> Self {
        Self { local, session }
    }

    /// Process-wide singletons for the configured durable path
    pub fn global(config: &StoreConfig) -> Result<Self> {
        let local: Arc<dyn HostStorage> = local_storage(config.local_path())?;
        let session: Arc<dyn HostStorage> = session_storage();
        Ok(Self::new(local, session))
    }
}
