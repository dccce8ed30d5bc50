//! STASHBOX - Expiring Key-Value Store
//!
//! One get/set/remove/clear interface over three interchangeable backends
//! (in-process map, session host storage, durable host storage), with
//! optional per-entry expiry and item collections stored under a key.
//!
//! ```no_run
//! use serde_json::json;
//! use stashbox::{BackendKind, ExpireAfter, Store, StoreConfig};
//!
//! # fn main() -> stashbox::Result<()> {
//! let store = Store::open(StoreConfig::default().with_backend(BackendKind::Session))?;
//! store.write("token", json!("abc"), Some("2.hours".parse()?))?;
//! store.add_item("cart", json!({"id": 1}))?;
//! assert_eq!(store.get("token")?, Some(json!("abc")));
//! # let _ = ExpireAfter::Minutes(5);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod expiry;
pub mod storage;
pub mod store;

pub use config::{BackendKind, StoreConfig};
pub use entry::StoredEntry;
pub use error::{Result, StoreError};
pub use expiry::{compute_expiry, ExpireAfter, TimeUnit};
pub use storage::{Backend, HostStorage, HostStorages};
pub use store::Store;
