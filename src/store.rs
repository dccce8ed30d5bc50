//! Expiring Key-Value Store
//!
//! Façade over one backend: wraps payloads into JSON envelopes, attaches
//! and checks expiry timestamps, and keeps small item collections under a
//! key.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{BackendKind, StoreConfig};
use crate::entry::{Expiry, StoredEntry, ITEMS_FIELD};
use crate::error::{Result, StoreError};
use crate::expiry::{compute_expiry, ExpireAfter};
use crate::storage::{
    local_storage, session_storage, Backend, HostStorage, HostStorages, MemoryBackend,
    PersistentBackend,
};

/// Store bound to a single backend for its whole lifetime
#[derive(Debug)]
pub struct Store {
    kind: BackendKind,
    backend: Box<dyn Backend>,
}

impl Store {
    /// Open a store on the process-wide host storages
    pub fn open(config: StoreConfig) -> Result<Self> {
        let backend: Box<dyn Backend> = match config.backend {
            BackendKind::Memory => Box::new(MemoryBackend::new()),
            BackendKind::Session => Box::new(PersistentBackend::new(session_storage())),
            BackendKind::Local => Box::new(PersistentBackend::new(local_storage(
                config.local_path(),
            )?)),
        };
        debug!(backend = %config.backend, "Store opened");
        Ok(Self::with_backend(config.backend, backend))
    }

    /// Store with its own in-process map
    pub fn memory() -> Self {
        Self::with_backend(BackendKind::Memory, Box::new(MemoryBackend::new()))
    }

    /// Resolve `kind` against explicitly provided host storages
    pub fn with_hosts(kind: BackendKind, hosts: &HostStorages) -> Self {
        let host = |h: &Arc<dyn HostStorage>| -> Box<dyn Backend> {
            Box::new(PersistentBackend::new(Arc::clone(h)))
        };
        let backend: Box<dyn Backend> = match kind {
            BackendKind::Memory => Box::new(MemoryBackend::new()),
            BackendKind::Session => host(&hosts.session),
            BackendKind::Local => host(&hosts.local),
        };
        Self::with_backend(kind, backend)
    }

    pub fn with_backend(kind: BackendKind, backend: Box<dyn Backend>) -> Self {
        Self { kind, backend }
    }

    /// Which backend this store routes through
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Live entry under `key`, or an empty entry if absent.
    ///
    /// An expired entry is deleted from the backend as a side effect.
    pub fn read(&self, key: &str) -> Result<StoredEntry> {
        let raw = match self.backend.get_item(key)? {
            Some(raw) => raw,
            None => return Ok(StoredEntry::default()),
        };

        let (entry, expiry) = StoredEntry::decode(raw);
        match expiry {
            Expiry::Never => return Ok(entry),
            Expiry::At(at) if Utc::now() <= at => return Ok(entry),
            Expiry::At(_) => debug!(key, "Entry expired, purging"),
            Expiry::Invalid => warn!(key, "Unreadable expiry timestamp, purging entry"),
        }
        self.clear(key)?;
        Ok(StoredEntry::default())
    }

    /// Store `value` under `key`, optionally expiring after `expire_after`.
    ///
    /// Non-object values are wrapped as `{data: value}`. An entry that
    /// already carries an expiry keeps it unless a new one is given.
    pub fn write(
        &self,
        key: &str,
        value: impl Into<StoredEntry>,
        expire_after: Option<ExpireAfter>,
    ) -> Result<StoredEntry> {
        let mut entry = value.into();
        if let Some(after) = expire_after {
            Self::set_expire(&mut entry, after)?;
        }
        self.backend.set_item(key, entry.to_value())?;
        Ok(entry)
    }

    /// Same as [`Store::write`]
    pub fn insert(
        &self,
        key: &str,
        value: impl Into<StoredEntry>,
        expire_after: Option<ExpireAfter>,
    ) -> Result<StoredEntry> {
        self.write(key, value, expire_after)
    }

    /// Write an options object under its own `key` field.
    ///
    /// `expire_after` is taken out of the options; everything else,
    /// including `key`, becomes the stored payload. Numeric keys are
    /// stringified.
    pub fn set(&self, options: Value) -> Result<StoredEntry> {
        let mut options = match options {
            Value::Object(options) => options,
            _ => return Err(StoreError::MissingKey),
        };
        let expire_after = match options.remove("expire_after") {
            Some(raw) => ExpireAfter::from_json(&raw)?,
            None => None,
        };
        let key = match options.get("key") {
            Some(Value::String(key)) => key.clone(),
            Some(Value::Number(key)) => key.to_string(),
            _ => return Err(StoreError::MissingKey),
        };
        self.write(&key, Value::Object(options), expire_after)
    }

    /// Attach an absolute expiry computed from now
    pub fn set_expire(entry: &mut StoredEntry, expire_after: ExpireAfter) -> Result<()> {
        entry.expires_at = Some(compute_expiry(Utc::now(), expire_after)?);
        Ok(())
    }

    /// `read(key)`, falling back to `default` when that is empty
    pub fn find(&self, key: &str, default: Option<StoredEntry>) -> Result<StoredEntry> {
        let entry = self.read(key)?;
        match default {
            Some(default) if entry.is_empty() => Ok(default),
            _ => Ok(entry),
        }
    }

    /// The `data` field of a wrapped entry
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.find(key, None)?.into_data())
    }

    /// Remove one key
    pub fn clear(&self, key: &str) -> Result<()> {
        self.backend.remove_item(key)
    }

    /// Wipe the backend. For session and local stores this clears the
    /// entire host store, not only keys written through this store.
    pub fn reset(&self) -> Result<()> {
        debug!(backend = %self.kind, "Resetting store");
        self.backend.clear()
    }

    /// Append `item` to the collection under `key`
    pub fn add_item(&self, key: &str, item: Value) -> Result<StoredEntry> {
        let mut entry = self.read(key)?;
        let mut items = take_items(&mut entry, key)?;
        items.push(item);
        entry.payload.insert(ITEMS_FIELD.to_string(), Value::Array(items));
        self.write(key, entry, None)
    }

    /// Drop every item matching `predicate`
    pub fn remove_item<P>(&self, key: &str, mut predicate: P) -> Result<StoredEntry>
    where
        P: FnMut(&Value) -> bool,
    {
        let mut entry = self.read(key)?;
        let mut items = take_items(&mut entry, key)?;
        items.retain(|item| !predicate(item));
        entry.payload.insert(ITEMS_FIELD.to_string(), Value::Array(items));
        self.write(key, entry, None)
    }

    /// Shallow-merge `data` into the first item matching `predicate`.
    ///
    /// The entry is written back either way. Returns the merged item, or an
    /// empty object when nothing matched.
    pub fn update_item<P>(&self, key: &str, data: Value, mut predicate: P) -> Result<Value>
    where
        P: FnMut(&Value) -> bool,
    {
        let mut entry = self.read(key)?;
        let mut items = take_items(&mut entry, key)?;

        let updated = match items.iter_mut().find(|item| predicate(item)) {
            Some(item) => {
                merge_shallow(item, data);
                item.clone()
            }
            None => Value::Object(Map::new()),
        };

        entry.payload.insert(ITEMS_FIELD.to_string(), Value::Array(items));
        self.write(key, entry, None)?;
        Ok(updated)
    }

    /// First item matching `predicate`
    pub fn find_item<P>(&self, key: &str, mut predicate: P) -> Result<Option<Value>>
    where
        P: FnMut(&Value) -> bool,
    {
        let entry = self.read(key)?;
        Ok(entry
            .items()
            .and_then(|items| items.iter().find(|item| predicate(item)).cloned()))
    }

    /// Every stored entry as-is, without expiry checks or purges
    pub fn list(&self) -> Result<BTreeMap<String, StoredEntry>> {
        let mut entries = BTreeMap::new();
        for key in self.backend.keys()? {
            if let Some(raw) = self.backend.get_item(&key)? {
                entries.insert(key, StoredEntry::from_value(raw));
            }
        }
        Ok(entries)
    }

    /// Delete every expired entry, returns count of removed keys
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for key in self.backend.keys()? {
            let Some(raw) = self.backend.get_item(&key)? else {
                continue;
            };
            let expired = match StoredEntry::decode(raw).1 {
                Expiry::Never => false,
                Expiry::At(at) => now > at,
                Expiry::Invalid => true,
            };
            if expired {
                self.backend.remove_item(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed = removed, "Purged expired entries");
        }
        Ok(removed)
    }
}

/// Take the `items` array out of an entry; absent or null starts empty
fn take_items(entry: &mut StoredEntry, key: &str) -> Result<Vec<Value>> {
    match entry.payload.remove(ITEMS_FIELD) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => {
            entry.payload.insert(ITEMS_FIELD.to_string(), other);
            Err(StoreError::ItemsNotArray {
                key: key.to_string(),
            })
        }
    }
}

/// Copy top-level fields of `data` onto `item`; non-objects are replaced
fn merge_shallow(item: &mut Value, data: Value) {
    match (item, data) {
        (Value::Object(target), Value::Object(fields)) => target.extend(fields),
        (item, data) => *item = data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EXPIRES_AT_FIELD;
    use crate::expiry::TimeUnit;
    use crate::storage::{FileStorage, SessionStorage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    /// Session storage that counts every call made into it
    #[derive(Debug, Default)]
    struct CountingStorage {
        inner: SessionStorage,
        calls: AtomicUsize,
    }

    impl CountingStorage {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl HostStorage for CountingStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>> {
            self.hit();
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: String) -> Result<()> {
            self.hit();
            self.inner.set_item(key, value)
        }

        fn remove_item(&self, key: &str) -> Result<()> {
            self.hit();
            self.inner.remove_item(key)
        }

        fn clear(&self) -> Result<()> {
            self.hit();
            self.inner.clear()
        }

        fn keys(&self) -> Result<Vec<String>> {
            self.hit();
            self.inner.keys()
        }
    }

    fn counting_hosts() -> (Arc<CountingStorage>, Arc<CountingStorage>, HostStorages) {
        let local = Arc::new(CountingStorage::default());
        let session = Arc::new(CountingStorage::default());
        let hosts = HostStorages::new(local.clone(), session.clone());
        (local, session, hosts)
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn session_store() -> (Arc<SessionStorage>, Store) {
        let session = Arc::new(SessionStorage::new());
        let hosts = HostStorages::new(Arc::new(SessionStorage::new()), session.clone());
        (session, Store::with_hosts(BackendKind::Session, &hosts))
    }

    fn exercise(store: &Store) {
        store.write("k", json!({"a": 1}), None).unwrap();
        store.read("k").unwrap();
        store.add_item("k", json!({"id": 1})).unwrap();
        store.clear("k").unwrap();
        store.reset().unwrap();
    }

    #[test]
    fn test_roundtrip_all_backends() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(FileStorage::open(dir.path().join("local.json")).unwrap());
        let hosts = HostStorages::new(local, Arc::new(SessionStorage::new()));

        let value = json!({"name": "alice", "tags": ["a", "b"], "nested": {"n": 1.5}});
        for kind in [BackendKind::Memory, BackendKind::Session, BackendKind::Local] {
            let store = Store::with_hosts(kind, &hosts);
            assert_eq!(store.kind(), kind);

            store.write("user", value.clone(), None).unwrap();
            assert_eq!(store.read("user").unwrap().to_value(), value, "{kind}");
        }
    }

    #[test]
    fn test_missing_key_reads_empty() {
        let store = Store::memory();
        assert!(store.read("nothing").unwrap().is_empty());
        assert_eq!(store.get("nothing").unwrap(), None);
        store.clear("nothing").unwrap();
    }

    #[test]
    fn test_non_object_wrapped() {
        let (session, store) = session_store();
        let entry = store.insert("count", json!(7), None).unwrap();
        assert_eq!(entry.to_value(), json!({"data": 7}));
        assert_eq!(session.get_item("count").unwrap().as_deref(), Some(r#"{"data":7}"#));
        assert_eq!(store.get("count").unwrap(), Some(json!(7)));
    }

    #[test]
    fn test_future_expiry_is_kept() {
        let (session, store) = session_store();
        let written = store.write("k", json!({"v": 1}), Some(ExpireAfter::Minutes(5))).unwrap();
        assert!(written.expires_at.is_some());

        let entry = store.read("k").unwrap();
        assert_eq!(entry.payload, json!({"v": 1}).as_object().unwrap().clone());
        assert!(entry.expires_at.is_some());
        assert!(session.get_item("k").unwrap().is_some());
    }

    #[test]
    fn test_past_expiry_purges() {
        init_tracing();
        let (session, store) = session_store();
        session
            .set_item("k", r#"{"v":1,"_expires_at":"2000-01-01T00:00:00.000Z"}"#.to_string())
            .unwrap();

        assert!(store.read("k").unwrap().is_empty());
        assert_eq!(session.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_past_expiry_purges_memory() {
        let store = Store::memory();
        store
            .backend()
            .set_item("k", json!({"v": 1, "_expires_at": "2000-01-01T00:00:00Z"}))
            .unwrap();

        assert!(store.read("k").unwrap().is_empty());
        assert_eq!(store.backend().get_item("k").unwrap(), None);
    }

    #[test]
    fn test_unreadable_expiry_treated_as_expired() {
        let store = Store::memory();
        store
            .backend()
            .set_item("k", json!({"v": 1, "_expires_at": "someday"}))
            .unwrap();

        assert!(store.read("k").unwrap().is_empty());
        assert_eq!(store.backend().get_item("k").unwrap(), None);
    }

    #[test]
    fn test_find_default() {
        let store = Store::memory();
        let default = StoredEntry::wrap(json!({"fallback": true}));

        assert_eq!(store.find("k", Some(default.clone())).unwrap(), default);
        assert!(store.find("k", None).unwrap().is_empty());

        store.write("k", json!({"real": 1}), None).unwrap();
        assert_eq!(
            store.find("k", Some(default)).unwrap().to_value(),
            json!({"real": 1})
        );
    }

    #[test]
    fn test_get_requires_data_wrapping() {
        let store = Store::memory();
        store.write("obj", json!({"name": "x"}), None).unwrap();
        assert_eq!(store.get("obj").unwrap(), None);

        store.write("wrapped", json!({"data": [1, 2]}), None).unwrap();
        assert_eq!(store.get("wrapped").unwrap(), Some(json!([1, 2])));
    }

    #[test]
    fn test_set_keeps_key_in_payload() {
        let (session, store) = session_store();
        let entry = store
            .set(json!({"key": "profile", "name": "bob", "expire_after": "1.days"}))
            .unwrap();

        assert!(entry.expires_at.is_some());
        assert_eq!(entry.get("key"), Some(&json!("profile")));
        assert!(entry.get("expire_after").is_none());

        let raw: Value = serde_json::from_str(&session.get_item("profile").unwrap().unwrap()).unwrap();
        assert_eq!(raw["key"], json!("profile"));
        assert_eq!(raw["name"], json!("bob"));
        assert!(raw.get(EXPIRES_AT_FIELD).is_some());
    }

    #[test]
    fn test_set_without_key() {
        let store = Store::memory();
        assert!(matches!(store.set(json!({"name": "x"})), Err(StoreError::MissingKey)));
        assert!(matches!(store.set(json!({"key": true})), Err(StoreError::MissingKey)));
        assert!(matches!(store.set(json!("key")), Err(StoreError::MissingKey)));
    }

    #[test]
    fn test_set_numeric_key() {
        let (session, store) = session_store();
        store.set(json!({"key": 42, "name": "n"})).unwrap();

        let raw: Value = serde_json::from_str(&session.get_item("42").unwrap().unwrap()).unwrap();
        assert_eq!(raw, json!({"key": 42, "name": "n"}));
    }

    #[test]
    fn test_falsy_expiry_field_is_kept() {
        let store = Store::memory();
        let stored = json!({"v": 1, "_expires_at": null});
        store.backend().set_item("k", stored.clone()).unwrap();

        assert_eq!(store.read("k").unwrap().to_value(), stored);
        assert_eq!(store.backend().get_item("k").unwrap(), Some(stored));
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_date_only_expiry_is_live() {
        let (session, store) = session_store();
        session
            .set_item("k", r#"{"v":1,"_expires_at":"2999-01-01"}"#.to_string())
            .unwrap();

        let entry = store.read("k").unwrap();
        assert_eq!(entry.get("v"), Some(&json!(1)));
        assert!(entry.expires_at.is_some());
        assert!(session.get_item("k").unwrap().is_some());
    }

    #[test]
    fn test_invalid_expiry_writes_nothing() {
        let store = Store::memory();
        let err = store
            .set(json!({"key": "k", "expire_after": "soon"}))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidExpiry(_)));
        assert_eq!(store.backend().get_item("k").unwrap(), None);
    }

    #[test]
    fn test_items_lifecycle() {
        let (session, store) = session_store();
        let by_id = |id: i64| move |item: &Value| item["id"] == json!(id);

        store.add_item("cart", json!({"id": 1})).unwrap();
        let entry = store.add_item("cart", json!({"id": 2})).unwrap();
        assert_eq!(entry.items().unwrap().len(), 2);

        assert_eq!(store.find_item("cart", by_id(2)).unwrap(), Some(json!({"id": 2})));
        assert_eq!(store.find_item("cart", by_id(9)).unwrap(), None);

        let entry = store.remove_item("cart", by_id(1)).unwrap();
        assert_eq!(entry.items().unwrap(), &vec![json!({"id": 2})]);

        let updated = store.update_item("cart", json!({"name": "a"}), by_id(2)).unwrap();
        assert_eq!(updated, json!({"id": 2, "name": "a"}));

        let raw: Value = serde_json::from_str(&session.get_item("cart").unwrap().unwrap()).unwrap();
        assert_eq!(raw, json!({"items": [{"id": 2, "name": "a"}]}));
    }

    #[test]
    fn test_update_item_without_match() {
        let store = Store::memory();
        let updated = store
            .update_item("cart", json!({"name": "a"}), |_| true)
            .unwrap();
        assert_eq!(updated, json!({}));
        assert_eq!(
            store.backend().get_item("cart").unwrap(),
            Some(json!({"items": []}))
        );
    }

    #[test]
    fn test_item_ops_initialize_items() {
        let store = Store::memory();
        let entry = store.remove_item("cart", |_| true).unwrap();
        assert_eq!(entry.items(), Some(&Vec::new()));
    }

    #[test]
    fn test_items_not_array() {
        let store = Store::memory();
        store.write("k", json!({"items": "nope"}), None).unwrap();
        let err = store.add_item("k", json!(1)).unwrap_err();
        assert!(matches!(err, StoreError::ItemsNotArray { ref key } if key == "k"));
    }

    #[test]
    fn test_item_ops_keep_expiry() {
        let store = Store::memory();
        store
            .write("k", json!({"items": []}), Some(ExpireAfter::span(1, TimeUnit::Hours)))
            .unwrap();
        let entry = store.add_item("k", json!({"id": 1})).unwrap();
        assert!(entry.expires_at.is_some());

        let raw = store.backend().get_item("k").unwrap().unwrap();
        assert!(raw.get(EXPIRES_AT_FIELD).is_some());
    }

    #[test]
    fn test_malformed_payload_propagates() {
        let (session, store) = session_store();
        session.set_item("k", "{broken".to_string()).unwrap();
        assert!(matches!(
            store.read("k"),
            Err(StoreError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_backend_isolation() {
        let (local, session, hosts) = counting_hosts();
        exercise(&Store::with_hosts(BackendKind::Memory, &hosts));
        assert_eq!(local.calls(), 0);
        assert_eq!(session.calls(), 0);

        exercise(&Store::with_hosts(BackendKind::Session, &hosts));
        assert_eq!(local.calls(), 0);
        assert!(session.calls() > 0);

        let before = session.calls();
        exercise(&Store::with_hosts(BackendKind::Local, &hosts));
        assert!(local.calls() > 0);
        assert_eq!(session.calls(), before);
    }

    #[test]
    fn test_reset_wipes_whole_host_store() {
        let (session, store) = session_store();
        session.set_item("foreign", "{}".to_string()).unwrap();
        store.write("mine", json!({"a": 1}), None).unwrap();

        store.reset().unwrap();
        assert_eq!(session.len().unwrap(), 0);
    }

    #[test]
    fn test_list_and_purge_expired() {
        init_tracing();
        let store = Store::memory();
        store.write("live", json!({"a": 1}), Some(ExpireAfter::Minutes(10))).unwrap();
        store.write("plain", json!({"b": 2}), None).unwrap();
        store
            .backend()
            .set_item("stale", json!({"c": 3, "_expires_at": "2001-01-01T00:00:00.000Z"}))
            .unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed["stale"].expires_at.is_some());

        assert_eq!(store.purge_expired().unwrap(), 1);
        let keys: Vec<_> = store.list().unwrap().into_keys().collect();
        assert_eq!(keys, vec!["live".to_string(), "plain".to_string()]);
    }

    #[test]
    fn test_open_memory() {
        let store = Store::open(StoreConfig::default().with_backend(BackendKind::Memory)).unwrap();
        assert_eq!(store.kind(), BackendKind::Memory);
        assert!(store.read("k").unwrap().is_empty());
    }

    #[test]
    fn test_open_local_persists() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default().with_local_path(dir.path().join("store.json"));

        let store = Store::open(config.clone()).unwrap();
        store.write("k", json!({"kept": true}), None).unwrap();

        let reopened = FileStorage::open(config.local_path()).unwrap();
        assert_eq!(
            reopened.get_item("k").unwrap().as_deref(),
            Some(r#"{"kept":true}"#)
        );
    }
}
