use std::{
    cell::Cell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
    time::{Duration, Instant},
};

use derive_ex::derive_ex;
use parse_display::Display;
use slabmap::SlabMap;


/// Source of the current time for debounce timers, as an offset from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall-clock time measured from the clock's creation.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct SystemClock {
    origin: Instant,
}
impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Default, Debug)]
pub struct ManualClock(Rc<Cell<Duration>>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
    pub fn set(&self, now: Duration) {
        self.0.set(now);
    }
}
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}

/// Debounced work a store may have pending.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    #[display("history-capture")]
    HistoryCapture,
    #[display("persist-save")]
    PersistSave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    deadline: Duration,
    seq: u64,
}

struct Entry {
    kind: TimerKind,
    key: Key,
}

/// Deadline-ordered debounce queue holding at most one entry per [`TimerKind`].
///
/// Scheduling a kind that is already pending replaces the old entry (trailing edge).
#[derive_ex(Default)]
#[default(Self::new())]
pub(crate) struct Timers {
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<Entry>,
    by_kind: HashMap<TimerKind, usize>,
    next_seq: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
            by_kind: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, kind: TimerKind, deadline: Duration) {
        self.cancel(kind);
        let key = Key {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let id = self.entries.insert(Entry { kind, key });
        self.tasks.insert(key, id);
        self.by_kind.insert(kind, id);
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let Some(id) = self.by_kind.remove(&kind) else {
            return false;
        };
        if let Some(entry) = self.entries.remove(id) {
            self.tasks.remove(&entry.key);
        }
        true
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
        self.entries.clear();
        self.by_kind.clear();
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.by_kind.contains_key(&kind)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.tasks.keys().next().map(|k| k.deadline)
    }

    /// Removes and returns the earliest timer whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<TimerKind> {
        if self.next_deadline()? > now {
            return None;
        }
        self.pop_first()
    }

    /// Removes and returns the earliest timer regardless of its deadline.
    pub fn pop_first(&mut self) -> Option<TimerKind> {
        let (_, id) = self.tasks.pop_first()?;
        let entry = self.entries.remove(id)?;
        self.by_kind.remove(&entry.kind);
        Some(entry.kind)
    }
}
