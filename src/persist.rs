use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use futures::future::{ready, LocalBoxFuture};
use serde_json::{Map, Value};

use crate::{error::PersistenceError, options::PersistConfig};


/// An asynchronous string key-value store that persisted fields are written to.
pub trait Storage {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> LocalBoxFuture<'a, Result<Option<String>, PersistenceError>>;
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
    ) -> LocalBoxFuture<'a, Result<(), PersistenceError>>;
    fn remove<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<(), PersistenceError>>;
    fn keys(&self) -> LocalBoxFuture<'_, Result<Vec<String>, PersistenceError>>;
}

/// In-memory [`Storage`]. Clones share the same entries.
#[derive(Clone, Default, Debug)]
pub struct MemoryStorage(Rc<RefCell<BTreeMap<String, String>>>);

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }
    pub fn entry(&self, key: &str) -> Option<String> {
        self.0.borrow().get(key).cloned()
    }
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.0.borrow().clone()
    }
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> LocalBoxFuture<'a, Result<Option<String>, PersistenceError>> {
        Box::pin(ready(Ok(self.entry(key))))
    }
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
    ) -> LocalBoxFuture<'a, Result<(), PersistenceError>> {
        self.insert(key, value);
        Box::pin(ready(Ok(())))
    }
    fn remove<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<(), PersistenceError>> {
        self.0.borrow_mut().remove(key);
        Box::pin(ready(Ok(())))
    }
    fn keys(&self) -> LocalBoxFuture<'_, Result<Vec<String>, PersistenceError>> {
        Box::pin(ready(Ok(self.0.borrow().keys().cloned().collect())))
    }
}

/// Writes selected top-level fields of the state to a [`Storage`], one key per field.
///
/// Every failure is logged and skipped; persistence never fails a store operation.
pub(crate) struct Persistence {
    storage: Rc<dyn Storage>,
    prefix: String,
    config: PersistConfig,
    saved: RefCell<BTreeSet<String>>,
}

impl Persistence {
    pub fn new(storage: Rc<dyn Storage>, prefix: String, config: PersistConfig) -> Self {
        Self {
            storage,
            prefix,
            config,
            saved: RefCell::new(BTreeSet::new()),
        }
    }

    fn key(&self, field: &str) -> String {
        format!("{}-{}", self.prefix, field)
    }

    fn field_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?.strip_prefix('-')
    }

    /// Writes every persisted field of `state` and removes keys for fields that disappeared.
    ///
    /// Returns the number of fields written.
    pub async fn save(&self, state: &Value) -> usize {
        let Value::Object(fields) = state else {
            return 0;
        };
        let mut written = 0;
        for (field, value) in fields {
            if !self.config.includes(field) {
                continue;
            }
            let key = self.key(field);
            let result = match serde_json::to_string(value) {
                Ok(json) => self.storage.set(&key, json).await,
                Err(e) => Err(PersistenceError::Encode {
                    key: key.clone(),
                    message: e.to_string(),
                }),
            };
            match result {
                Ok(()) => {
                    self.saved.borrow_mut().insert(field.clone());
                    written += 1;
                }
                Err(e) => tracing::warn!(error = %e, "failed to persist field"),
            }
        }
        let stale: Vec<String> = self
            .saved
            .borrow()
            .iter()
            .filter(|field| !fields.contains_key(*field))
            .cloned()
            .collect();
        for field in stale {
            let key = self.key(&field);
            match self.storage.remove(&key).await {
                Ok(()) => {
                    self.saved.borrow_mut().remove(&field);
                }
                Err(e) => tracing::warn!(error = %e, "failed to remove persisted field"),
            }
        }
        tracing::trace!(prefix = %self.prefix, written, "persisted state");
        written
    }

    /// Reads back every persisted field found under the prefix.
    pub async fn load(&self) -> Map<String, Value> {
        let mut loaded = Map::new();
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list persisted keys");
                return loaded;
            }
        };
        for key in keys {
            let Some(field) = self.field_of(&key) else {
                continue;
            };
            if !self.config.includes(field) {
                continue;
            }
            match self.load_field(&key).await {
                Ok(Some(value)) => {
                    self.saved.borrow_mut().insert(field.to_string());
                    loaded.insert(field.to_string(), value);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "failed to load persisted field"),
            }
        }
        loaded
    }

    async fn load_field(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        let Some(json) = self.storage.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| PersistenceError::Decode {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}
