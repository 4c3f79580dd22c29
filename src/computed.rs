//! Derived values with dependency-aware memoization.
//!
//! A [`Computed`] definition is a function of the whole state plus an ordered list of
//! dependency paths. The cache keeps the last result together with the values found at
//! each dependency path when it was computed; a later read reuses the result only while
//! every dependency still holds an equal value.
//!
//! # Invariants
//!
//! 1. A definition without dependencies is never served from the cache.
//! 2. A definition with `cache(false)` is recomputed on every read.
//! 3. A failing computation never escapes: the last good value (or `None`) is returned.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};

use serde_json::{Map, Value};

use crate::{
    error::{ComputationError, InvalidPathError},
    path::{self, AsPath, Path},
};


pub type ComputeFn = dyn Fn(&Value) -> Result<Value, ComputationError>;

/// Definition of a derived value.
#[derive(Clone)]
pub struct Computed {
    compute: Rc<ComputeFn>,
    deps: Vec<Path>,
    cache: bool,
}

impl Computed {
    pub fn new(compute: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::try_new(move |state| Ok(compute(state)))
    }

    pub fn try_new(compute: impl Fn(&Value) -> Result<Value, ComputationError> + 'static) -> Self {
        Self {
            compute: Rc::new(compute),
            deps: Vec::new(),
            cache: true,
        }
    }

    /// Declares the paths this value is derived from.
    pub fn depends_on<P: AsPath>(
        mut self,
        deps: impl IntoIterator<Item = P>,
    ) -> Result<Self, InvalidPathError> {
        for dep in deps {
            self.deps.push(dep.to_path()?);
        }
        Ok(self)
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    pub fn deps(&self) -> &[Path] {
        &self.deps
    }

    fn is_cacheable(&self) -> bool {
        self.cache && !self.deps.is_empty()
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("deps", &self.deps)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

struct Cached {
    value: Value,
    dep_values: Vec<Option<Value>>,
}

struct Entry {
    key: String,
    def: Computed,
    cached: RefCell<Option<Cached>>,
    computations: Cell<u64>,
}

impl Entry {
    fn deps_unchanged(&self, cached: &Cached, state: &Value) -> bool {
        self.def
            .deps
            .iter()
            .zip(&cached.dep_values)
            .all(|(dep, old)| read(state, dep) == old.as_ref())
    }
}

fn read<'a>(state: &'a Value, dep: &Path) -> Option<&'a Value> {
    path::get(state, dep).ok().flatten()
}

/// Registry of computed definitions and their memoized results.
#[derive(Default)]
pub(crate) struct ComputedCache {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ComputedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition, replacing any existing one with the same key.
    pub fn register(&mut self, key: impl Into<String>, def: Computed) {
        let key = key.into();
        let entry = Entry {
            key: key.clone(),
            def,
            cached: RefCell::new(None),
            computations: Cell::new(0),
        };
        match self.index.get(&key) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Returns the value of `key` for `state`, recomputing only when a dependency changed.
    pub fn get(&self, key: &str, state: &Value) -> Option<Value> {
        let entry = &self.entries[*self.index.get(key)?];
        if entry.def.is_cacheable() {
            if let Some(cached) = &*entry.cached.borrow() {
                if entry.deps_unchanged(cached, state) {
                    tracing::trace!(key, "computed cache hit");
                    return Some(cached.value.clone());
                }
            }
        }
        tracing::trace!(key, "computing");
        let compute = entry.def.compute.clone();
        entry.computations.set(entry.computations.get() + 1);
        match compute(state) {
            Ok(value) => {
                let dep_values = entry
                    .def
                    .deps
                    .iter()
                    .map(|dep| read(state, dep).cloned())
                    .collect();
                *entry.cached.borrow_mut() = Some(Cached {
                    value: value.clone(),
                    dep_values,
                });
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "computed value failed; returning previous value");
                entry.cached.borrow().as_ref().map(|c| c.value.clone())
            }
        }
    }

    /// Every computed value that could be produced, keyed by name.
    pub fn values(&self, state: &Value) -> Map<String, Value> {
        self.entries
            .iter()
            .filter_map(|e| Some((e.key.clone(), self.get(&e.key, state)?)))
            .collect()
    }

    pub fn invalidate(&self, key: &str) -> bool {
        match self.index.get(key) {
            Some(&i) => self.entries[i].cached.borrow_mut().take().is_some(),
            None => false,
        }
    }

    pub fn invalidate_all(&self) {
        for entry in &self.entries {
            entry.cached.borrow_mut().take();
        }
    }

    /// Keys whose dependencies include `changed` or one of its ancestors.
    pub fn affected_by(&self, changed: &Path) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.def.deps.iter().any(|dep| dep.is_prefix_of(changed)))
            .map(|e| e.key.as_str())
            .collect()
    }

    /// Drops the cached results of every key affected by `changed`.
    pub fn invalidate_affected(&self, changed: &Path) -> usize {
        let keys: Vec<String> = self
            .affected_by(changed)
            .into_iter()
            .map(str::to_string)
            .collect();
        keys.iter().filter(|key| self.invalidate(key)).count()
    }

    /// How many times the definition for `key` has been evaluated.
    #[cfg(test)]
    pub fn computations(&self, key: &str) -> u64 {
        self.index
            .get(key)
            .map_or(0, |&i| self.entries[i].computations.get())
    }
}
