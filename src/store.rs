//! The public face of a state container.
//!
//! A [`Store`] owns one canonical state (always a JSON object) and routes every write
//! through the same pipeline: middleware, reference swap and notification, computed
//! invalidation, history capture, and persistence scheduling.
//!
//! Debounced work is not run on a background thread. It is queued against the store's
//! [`Clock`] and performed when the host calls [`Store::run_timers`] or [`Store::flush`].

use std::{
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    rc::Rc,
    time::Duration,
};

use serde_json::{Map, Value};

use crate::{
    computed::ComputedCache,
    devtools::Devtools,
    error::{value_kind, InvalidPathError, InvalidStateError},
    history::{CaptureOutcome, HistoryManager, HistorySize, TimelineEntry},
    hub::{Hub, StatePatch},
    mutation::{self, MiddlewareChain, Update},
    options::StoreOptions,
    path::{self, AsPath, Path},
    persist::Persistence,
    plugin::LoggingMiddleware,
    selector::Selection,
    subscription::Subscription,
    timer::{Clock, TimerKind, Timers},
};

#[cfg(test)]
mod tests;

struct StoreInner {
    hub: Hub,
    middleware: MiddlewareChain,
    computed: ComputedCache,
    history: RefCell<HistoryManager>,
    persistence: Option<Rc<Persistence>>,
    persist_debounce: Duration,
    timers: RefCell<Timers>,
    clock: Rc<dyn Clock>,
    devtools: Option<Rc<dyn Devtools>>,
    logging: bool,
    destroyed: Cell<bool>,
}

/// Handle to a reactive state container. Clones refer to the same store.
#[derive(Clone)]
pub struct Store(Rc<StoreInner>);

impl Store {
    /// Creates a store whose state starts as `initial`.
    ///
    /// Fails if `initial` is not an object. Persisted fields are not read here; call
    /// [`hydrate`](Self::hydrate) to load them.
    pub fn new(initial: Value, options: StoreOptions) -> Result<Self, InvalidStateError> {
        if !initial.is_object() {
            return Err(InvalidStateError {
                found: value_kind(&initial),
            });
        }
        let StoreOptions {
            settings,
            middleware: user_middleware,
            computed: computed_defs,
            plugins,
            storage,
            clock,
            devtools,
        } = options;

        let mut middleware = MiddlewareChain::new();
        if settings.logging {
            middleware.push(Rc::new(LoggingMiddleware));
        }
        middleware.extend(user_middleware);
        for plugin in &plugins {
            if let Some(m) = plugin.middleware() {
                middleware.push(m);
            }
        }

        let mut computed = ComputedCache::new();
        for (key, def) in computed_defs {
            computed.register(key, def);
        }

        let persistence = match storage {
            Some(storage) if settings.persist.is_enabled() => Some(Rc::new(Persistence::new(
                storage,
                settings.prefix.clone(),
                settings.persist.clone(),
            ))),
            _ => None,
        };

        let hub = Hub::new(initial);
        let history = HistoryManager::new(settings.history.clone(), hub.get_state(), clock.now());
        let store = Store(Rc::new(StoreInner {
            hub,
            middleware,
            computed,
            history: RefCell::new(history),
            persistence,
            persist_debounce: settings.persist_debounce,
            timers: RefCell::new(Timers::new()),
            clock,
            devtools,
            logging: settings.logging,
            destroyed: Cell::new(false),
        }));
        if let Some(devtools) = &store.0.devtools {
            devtools.init(&store.get_state());
        }
        for plugin in &plugins {
            plugin.on_init(&store);
        }
        Ok(store)
    }

    /// The current state. Two calls without an intervening change return the same `Rc`.
    pub fn get_state(&self) -> Rc<Value> {
        self.0.hub.get_state()
    }

    /// Replaces the state, shallow-merging object patches unless `replace` is set.
    pub fn set_state(
        &self,
        patch: impl Into<StatePatch>,
        replace: bool,
    ) -> Result<(), InvalidStateError> {
        let next = self.0.hub.resolve(patch.into(), replace)?;
        if self.0.logging {
            tracing::debug!(replace, "set state");
        }
        self.commit(Rc::new(next), None, || "setState".to_string());
        Ok(())
    }

    /// Writes the value produced by `update` at `path`, creating intermediate containers.
    pub fn set_deep(
        &self,
        path: impl AsPath,
        update: impl Into<Update>,
    ) -> Result<(), InvalidPathError> {
        let path = path.to_path()?;
        let current = self.get_state();
        let next = mutation::apply(&current, &path, update.into(), &self.0.middleware)?;
        self.commit(Rc::new(next), Some(&path), || format!("setDeep {path}"));
        Ok(())
    }

    /// Like [`set_deep`](Self::set_deep) with a function of the current value at `path`.
    pub fn update_deep(
        &self,
        path: impl AsPath,
        f: impl FnOnce(Option<&Value>) -> Value + 'static,
    ) -> Result<(), InvalidPathError> {
        self.set_deep(path, Update::with(f))
    }

    /// Removes the value at `path`. Returns `false` if nothing was there.
    pub fn delete_deep(&self, path: impl AsPath) -> Result<bool, InvalidPathError> {
        let path = path.to_path()?;
        let current = self.get_state();
        let Some(next) = mutation::apply_remove(&current, &path, &self.0.middleware)? else {
            return Ok(false);
        };
        self.commit(Rc::new(next), Some(&path), || format!("deleteDeep {path}"));
        Ok(true)
    }

    pub fn has_path(&self, path: impl AsPath) -> Result<bool, InvalidPathError> {
        Ok(path::get(&self.get_state(), &path.to_path()?)?.is_some())
    }

    pub fn get(&self, path: impl AsPath) -> Result<Option<Value>, InvalidPathError> {
        Ok(path::get(&self.get_state(), &path.to_path()?)?.cloned())
    }

    pub fn select(&self, selection: &Selection) -> Map<String, Value> {
        selection.read(&self.get_state())
    }

    /// Calls `listener(next, prev)` after every change.
    pub fn subscribe(&self, listener: impl Fn(&Rc<Value>, &Rc<Value>) + 'static) -> Subscription {
        let id = self.0.hub.subscribe(listener);
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |inner| {
            inner.hub.unsubscribe(id);
        })
    }

    /// Calls `listener(new, old, state)` after changes that alter the value at `path`.
    pub fn subscribe_path(
        &self,
        path: impl AsPath,
        listener: impl Fn(Option<&Value>, Option<&Value>, &Rc<Value>) + 'static,
    ) -> Result<Subscription, InvalidPathError> {
        let id = self.0.hub.subscribe_path(path.to_path()?, listener);
        Ok(Subscription::from_weak_fn(Rc::downgrade(&self.0), move |inner| {
            inner.hub.unsubscribe(id);
        }))
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.hub.subscriber_count()
    }

    /// Runs `f` with notifications deferred; subscribers see one change at the end.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.begin_batch();
        f()
    }

    /// Defers notifications until the returned guard is dropped.
    pub fn begin_batch(&self) -> BatchGuard {
        self.0.hub.enter_batch();
        BatchGuard(self.clone())
    }

    pub fn is_batching(&self) -> bool {
        self.0.hub.is_batching()
    }

    /// Runs an action against this store and returns whatever it produces.
    pub async fn dispatch<F, Fut>(&self, action: F) -> Fut::Output
    where
        F: FnOnce(Store) -> Fut,
        Fut: Future,
    {
        action(self.clone()).await
    }

    /// The value of the computed entry `key`, or `None` if it is unknown or never succeeded.
    pub fn computed(&self, key: &str) -> Option<Value> {
        self.0.computed.get(key, &self.get_state())
    }

    pub fn computed_values(&self) -> Map<String, Value> {
        self.0.computed.values(&self.get_state())
    }

    /// Undo/redo controls, or `None` if history is disabled.
    pub fn history(&self) -> Option<History<'_>> {
        self.0
            .history
            .borrow()
            .is_enabled()
            .then_some(History { store: self })
    }

    /// Merges persisted fields into the state without recording an undo step.
    ///
    /// Returns the number of fields loaded.
    pub async fn hydrate(&self) -> usize {
        let Some(persistence) = self.0.persistence.clone() else {
            return 0;
        };
        let loaded = persistence.load().await;
        let count = loaded.len();
        if count == 0 || self.is_destroyed() {
            return count;
        }
        let mut next = (*self.get_state()).clone();
        if let Value::Object(fields) = &mut next {
            fields.extend(loaded);
        }
        if self.0.hub.replace(Rc::new(next)).is_some() {
            self.0.computed.invalidate_all();
            let state = self.get_state();
            let now = self.now();
            self.0.timers.borrow_mut().cancel(TimerKind::HistoryCapture);
            let mut history = self.0.history.borrow_mut();
            history.commit_pending(now);
            history.reset_current(state.clone(), now);
            drop(history);
            if let Some(devtools) = &self.0.devtools {
                devtools.send("hydrate", &state);
            }
        }
        tracing::debug!(fields = count, "hydrated from storage");
        count
    }

    /// Performs every debounced task whose deadline has passed. Returns how many ran.
    pub async fn run_timers(&self) -> usize {
        let mut count = 0;
        loop {
            let now = self.now();
            let Some(kind) = self.0.timers.borrow_mut().pop_due(now) else {
                break;
            };
            self.fire(kind).await;
            count += 1;
        }
        count
    }

    /// Performs every pending debounced task immediately.
    pub async fn flush(&self) -> usize {
        let mut count = 0;
        loop {
            let Some(kind) = self.0.timers.borrow_mut().pop_first() else {
                break;
            };
            self.fire(kind).await;
            count += 1;
        }
        count
    }

    /// When the earliest pending debounced task becomes due, on the store's clock.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.0.timers.borrow().next_deadline()
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.0.timers.borrow().is_pending(kind)
    }

    /// Cancels pending timers and drops every subscriber.
    ///
    /// The state stays readable and writable afterwards, but nothing is notified,
    /// captured, or persisted.
    pub fn destroy(&self) {
        if self.0.destroyed.replace(true) {
            return;
        }
        self.0.timers.borrow_mut().cancel_all();
        self.0.hub.clear_subscribers();
        self.0.computed.invalidate_all();
        tracing::debug!("store destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    fn now(&self) -> Duration {
        self.0.clock.now()
    }

    fn commit(&self, next: Rc<Value>, changed: Option<&Path>, label: impl FnOnce() -> String) {
        let inner = &*self.0;
        if inner.hub.replace(next).is_none() {
            return;
        }
        match changed {
            Some(path) => {
                inner.computed.invalidate_affected(path);
            }
            None => inner.computed.invalidate_all(),
        }
        let state = self.get_state();
        self.capture_history(state.clone());
        if inner.persistence.is_some() {
            self.schedule(TimerKind::PersistSave, self.now() + inner.persist_debounce);
        }
        if let Some(devtools) = inner.devtools.as_ref().filter(|_| !self.is_destroyed()) {
            devtools.send(&label(), &state);
        }
    }

    fn capture_history(&self, state: Rc<Value>) {
        if self.is_destroyed() {
            return;
        }
        let outcome = self.0.history.borrow_mut().capture(state, self.now());
        if let CaptureOutcome::Scheduled(deadline) = outcome {
            self.schedule(TimerKind::HistoryCapture, deadline);
        }
    }

    fn schedule(&self, kind: TimerKind, deadline: Duration) {
        if self.is_destroyed() {
            return;
        }
        tracing::trace!(%kind, ?deadline, "timer scheduled");
        self.0.timers.borrow_mut().schedule(kind, deadline);
    }

    async fn fire(&self, kind: TimerKind) {
        tracing::trace!(%kind, "timer fired");
        match kind {
            TimerKind::HistoryCapture => {
                let now = self.now();
                self.0.history.borrow_mut().commit_pending(now);
            }
            TimerKind::PersistSave => {
                if let Some(persistence) = self.0.persistence.clone() {
                    let state = self.get_state();
                    persistence.save(&state).await;
                }
            }
        }
    }

    fn restore(
        &self,
        label: &str,
        step: impl FnOnce(&mut HistoryManager, Duration) -> Option<Rc<Value>>,
    ) -> bool {
        let now = self.now();
        let Some(target) = step(&mut *self.0.history.borrow_mut(), now) else {
            return false;
        };
        self.0.timers.borrow_mut().cancel(TimerKind::HistoryCapture);
        let _restoring = Restoring::new(&self.0.history);
        self.commit(target, None, || label.to_string());
        true
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.get_state())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

/// Ends a batch started by [`Store::begin_batch`] when dropped.
#[must_use]
pub struct BatchGuard(Store);

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.0 .0.hub.exit_batch();
    }
}

struct Restoring<'a>(&'a RefCell<HistoryManager>);

impl<'a> Restoring<'a> {
    fn new(history: &'a RefCell<HistoryManager>) -> Self {
        history.borrow_mut().set_restoring(true);
        Self(history)
    }
}
impl Drop for Restoring<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().set_restoring(false);
    }
}

/// Undo/redo controls of a store with history enabled.
pub struct History<'a> {
    store: &'a Store,
}

impl History<'_> {
    /// Restores the previous snapshot. Returns `false` if there is none.
    pub fn undo(&self) -> bool {
        self.store.restore("undo", HistoryManager::undo)
    }

    /// Re-applies the most recently undone snapshot. Returns `false` if there is none.
    pub fn redo(&self) -> bool {
        self.store.restore("redo", HistoryManager::redo)
    }

    /// Undoes (`steps < 0`) or redoes (`steps > 0`) up to `|steps|` times.
    ///
    /// Returns how many steps were taken.
    pub fn jump(&self, steps: isize) -> usize {
        let step = || if steps < 0 { self.undo() } else { self.redo() };
        (0..steps.unsigned_abs()).take_while(|_| step()).count()
    }

    pub fn clear(&self) {
        self.store.0.timers.borrow_mut().cancel(TimerKind::HistoryCapture);
        self.store.0.history.borrow_mut().clear();
    }

    /// Commits a pending debounced capture now.
    pub fn flush(&self) -> bool {
        self.store.0.timers.borrow_mut().cancel(TimerKind::HistoryCapture);
        let now = self.store.now();
        self.store.0.history.borrow_mut().commit_pending(now)
    }

    pub fn size(&self) -> HistorySize {
        self.store.0.history.borrow().size()
    }
    pub fn can_undo(&self) -> bool {
        self.store.0.history.borrow().can_undo()
    }
    pub fn can_redo(&self) -> bool {
        self.store.0.history.borrow().can_redo()
    }
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.store.0.history.borrow().timeline()
    }
}
