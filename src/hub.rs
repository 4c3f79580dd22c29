use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use serde_json::Value;

use crate::{
    error::{value_kind, InvalidStateError},
    path::{self, Path},
};


/// Callback for whole-state changes: `(next, prev)`.
pub type Listener = dyn Fn(&Rc<Value>, &Rc<Value>);

/// Callback for a watched path: `(new_value, old_value, full_state)`.
pub type PathListener = dyn Fn(Option<&Value>, Option<&Value>, &Rc<Value>);

/// Input to [`Store::set_state`](crate::Store::set_state).
pub enum StatePatch {
    Value(Value),
    With(Box<dyn FnOnce(&Value) -> Value>),
}

impl StatePatch {
    pub fn with(f: impl FnOnce(&Value) -> Value + 'static) -> Self {
        StatePatch::With(Box::new(f))
    }
}

impl From<Value> for StatePatch {
    fn from(value: Value) -> Self {
        StatePatch::Value(value)
    }
}

impl fmt::Debug for StatePatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatePatch::Value(value) => f.debug_tuple("Value").field(value).finish(),
            StatePatch::With(_) => f.write_str("With(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SubscriberId(u64);

enum Subscriber {
    Global(Box<Listener>),
    Path {
        path: Path,
        listener: Box<PathListener>,
    },
}

impl Subscriber {
    fn notify(&self, next: &Rc<Value>, prev: &Rc<Value>) {
        match self {
            Subscriber::Global(listener) => listener(next, prev),
            Subscriber::Path { path, listener } => {
                let new_value = read(next, path);
                let old_value = read(prev, path);
                if new_value != old_value {
                    listener(new_value, old_value, next);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

fn read<'a>(state: &'a Value, path: &Path) -> Option<&'a Value> {
    match path::get(state, path) {
        Ok(value) => value,
        Err(e) => {
            tracing::trace!(error = %e, "watched path does not resolve");
            None
        }
    }
}

/// Store-owned notification batching.
///
/// Nested scopes coalesce; only the outermost exit delivers. The pending entry keeps the
/// state that was current before the first deferred change.
#[derive(Default)]
pub(crate) struct BatchContext {
    depth: Cell<usize>,
    pending_prev: RefCell<Option<Rc<Value>>>,
}

impl BatchContext {
    pub fn is_active(&self) -> bool {
        self.depth.get() > 0
    }
    fn defer(&self, prev: Rc<Value>) {
        let mut pending = self.pending_prev.borrow_mut();
        if pending.is_none() {
            *pending = Some(prev);
        }
    }
}

/// Owner of the canonical state and its subscribers.
pub(crate) struct Hub {
    current: RefCell<Rc<Value>>,
    subscribers: RefCell<BTreeMap<SubscriberId, Rc<Subscriber>>>,
    next_id: Cell<u64>,
    batch: BatchContext,
}

impl Hub {
    pub fn new(initial: Value) -> Self {
        Self {
            current: RefCell::new(Rc::new(initial)),
            subscribers: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(0),
            batch: BatchContext::default(),
        }
    }

    pub fn get_state(&self) -> Rc<Value> {
        self.current.borrow().clone()
    }

    /// Computes the next full state from `patch` without committing it.
    ///
    /// Object patches are shallow-merged into the current state unless `replace` is set.
    pub fn resolve(&self, patch: StatePatch, replace: bool) -> Result<Value, InvalidStateError> {
        let current = self.get_state();
        let patch = match patch {
            StatePatch::Value(value) => value,
            StatePatch::With(f) => f(&current),
        };
        let fields = match patch {
            Value::Object(fields) => fields,
            other => {
                return Err(InvalidStateError {
                    found: value_kind(&other),
                })
            }
        };
        if replace {
            return Ok(Value::Object(fields));
        }
        let Value::Object(mut map) = (*current).clone() else {
            return Err(InvalidStateError {
                found: value_kind(&current),
            });
        };
        map.extend(fields);
        Ok(Value::Object(map))
    }

    /// Swaps in `next` and notifies subscribers. Returns the previous state if anything changed.
    pub fn replace(&self, next: Rc<Value>) -> Option<Rc<Value>> {
        let prev = self.get_state();
        if Rc::ptr_eq(&prev, &next) || *prev == *next {
            return None;
        }
        *self.current.borrow_mut() = next;
        if self.batch.is_active() {
            self.batch.defer(prev.clone());
        } else {
            self.fan_out(&prev);
        }
        Some(prev)
    }

    /// Delivers `(current, prev)` to every subscriber in registration order.
    fn fan_out(&self, prev: &Rc<Value>) {
        let next = self.get_state();
        let subscribers: Vec<_> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        for (id, subscriber) in subscribers {
            if !self.subscribers.borrow().contains_key(&id) {
                continue;
            }
            let notified =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber.notify(&next, prev)));
            if let Err(payload) = notified {
                tracing::warn!(
                    subscriber = id.0,
                    panic = panic_message(&*payload),
                    "listener panicked; continuing with the remaining subscribers"
                );
            }
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&Rc<Value>, &Rc<Value>) + 'static) -> SubscriberId {
        self.insert(Subscriber::Global(Box::new(listener)))
    }

    pub fn subscribe_path(
        &self,
        path: Path,
        listener: impl Fn(Option<&Value>, Option<&Value>, &Rc<Value>) + 'static,
    ) -> SubscriberId {
        self.insert(Subscriber::Path {
            path,
            listener: Box::new(listener),
        })
    }

    fn insert(&self, subscriber: Subscriber) -> SubscriberId {
        let id = SubscriberId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().insert(id, Rc::new(subscriber));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow_mut().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn clear_subscribers(&self) {
        let subscribers = std::mem::take(&mut *self.subscribers.borrow_mut());
        drop(subscribers);
    }

    pub fn enter_batch(&self) {
        self.batch.depth.set(self.batch.depth.get() + 1);
    }

    /// Leaves a batch scope; the outermost exit delivers the coalesced notification.
    pub fn exit_batch(&self) {
        let depth = self.batch.depth.get().saturating_sub(1);
        self.batch.depth.set(depth);
        if depth > 0 {
            return;
        }
        let pending = self.batch.pending_prev.borrow_mut().take();
        if let Some(prev) = pending {
            let current = self.get_state();
            if !Rc::ptr_eq(&prev, &current) && *prev != *current {
                self.fan_out(&prev);
            }
        }
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_active()
    }
}
