use std::{collections::BTreeMap, rc::Rc, time::Duration};

use derive_ex::{derive_ex, Ex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    computed::Computed,
    devtools::Devtools,
    error::ComputationError,
    mutation::{Middleware, MiddlewareChain, MutationContext, Next},
    persist::Storage,
    plugin::Plugin,
    timer::{Clock, SystemClock},
};

#[cfg(test)]
mod tests;

/// Undo/redo settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Maximum number of undo steps kept.
    pub max_size: usize,
    /// Mutations closer together than this become one undo step.
    #[serde(rename = "capture_interval_ms", with = "duration_ms")]
    pub capture_interval: Duration,
}

impl HistoryConfig {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            max_size: 50,
            capture_interval: Duration::from_millis(100),
        }
    }
    pub const fn enabled() -> Self {
        let mut this = Self::new();
        this.enabled = true;
        this
    }
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
    pub fn with_capture_interval(mut self, capture_interval: Duration) -> Self {
        self.capture_interval = capture_interval;
        self
    }
}

/// Which top-level fields are persisted: everything, nothing, or a per-field selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Ex)]
#[derive_ex(Default)]
#[default(PersistConfig::Enabled(false))]
#[serde(untagged)]
pub enum PersistConfig {
    Enabled(bool),
    Fields(BTreeMap<String, bool>),
}

impl PersistConfig {
    pub fn fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        PersistConfig::Fields(fields.into_iter().map(|f| (f.into(), true)).collect())
    }
    pub fn is_enabled(&self) -> bool {
        match self {
            PersistConfig::Enabled(enabled) => *enabled,
            PersistConfig::Fields(fields) => fields.values().any(|&on| on),
        }
    }
    pub fn includes(&self, field: &str) -> bool {
        match self {
            PersistConfig::Enabled(enabled) => *enabled,
            PersistConfig::Fields(fields) => fields.get(field).copied().unwrap_or(false),
        }
    }
}

/// The serializable part of a store's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
#[serde(default)]
pub struct StoreSettings {
    pub persist: PersistConfig,
    pub logging: bool,
    /// Storage keys are named `{prefix}-{field}`.
    pub prefix: String,
    pub history: HistoryConfig,
    #[serde(rename = "persist_debounce_ms", with = "duration_ms")]
    pub persist_debounce: Duration,
}

impl StoreSettings {
    pub fn new() -> Self {
        Self {
            persist: PersistConfig::default(),
            logging: false,
            prefix: "deepstate".to_string(),
            history: HistoryConfig::new(),
            persist_debounce: Duration::from_millis(100),
        }
    }
}

/// Everything a [`Store`](crate::Store) is built from.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct StoreOptions {
    pub settings: StoreSettings,
    pub(crate) middleware: MiddlewareChain,
    pub(crate) computed: Vec<(String, Computed)>,
    pub(crate) plugins: Vec<Rc<dyn Plugin>>,
    pub(crate) storage: Option<Rc<dyn Storage>>,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) devtools: Option<Rc<dyn Devtools>>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::from_settings(StoreSettings::new())
    }
    pub fn from_settings(settings: StoreSettings) -> Self {
        Self {
            settings,
            middleware: MiddlewareChain::new(),
            computed: Vec::new(),
            plugins: Vec::new(),
            storage: None,
            clock: Rc::new(SystemClock::new()),
            devtools: None,
        }
    }

    pub fn with_persist(mut self, persist: PersistConfig) -> Self {
        self.settings.persist = persist;
        self
    }
    pub fn with_logging(mut self, logging: bool) -> Self {
        self.settings.logging = logging;
        self
    }
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.prefix = prefix.into();
        self
    }
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.settings.history = history;
        self
    }
    pub fn with_persist_debounce(mut self, debounce: Duration) -> Self {
        self.settings.persist_debounce = debounce;
        self
    }
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Rc::new(middleware));
        self
    }
    pub fn with_middleware_fn(
        mut self,
        f: impl Fn(Value, &MutationContext, Next) -> Result<Value, ComputationError> + 'static,
    ) -> Self {
        self.middleware.push_fn(f);
        self
    }
    pub fn with_computed(mut self, key: impl Into<String>, computed: Computed) -> Self {
        self.computed.push((key.into(), computed));
        self
    }
    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Rc::new(plugin));
        self
    }
    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Rc::new(storage));
        self
    }
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Rc::new(clock);
        self
    }
    pub fn with_devtools(mut self, devtools: impl Devtools + 'static) -> Self {
        self.devtools = Some(Rc::new(devtools));
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
