//! Undo/redo over whole-state snapshots.
//!
//! The manager keeps the snapshot that is currently committed plus two stacks:
//! `past` (oldest first) and `future` (next redo target last). A capture records the
//! state a mutation produced; the previously committed snapshot moves onto `past`
//! and `future` is discarded. Captures are debounced by the store, so a burst of
//! mutations inside one capture interval becomes a single undo step.

use std::{collections::VecDeque, rc::Rc, time::Duration};

use serde::Serialize;
use serde_json::Value;

use crate::options::HistoryConfig;


/// A committed state and the clock time it was committed at.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: Rc<Value>,
    pub timestamp: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimelinePosition {
    Past,
    Current,
    Future,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub index: usize,
    pub position: TimelinePosition,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HistorySize {
    pub past: usize,
    pub future: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureOutcome {
    Ignored,
    Committed,
    Scheduled(Duration),
}

pub(crate) struct HistoryManager {
    config: HistoryConfig,
    past: VecDeque<Snapshot>,
    future: Vec<Snapshot>,
    current: Snapshot,
    pending: Option<Rc<Value>>,
    restoring: bool,
}

impl HistoryManager {
    pub fn new(config: HistoryConfig, initial: Rc<Value>, now: Duration) -> Self {
        Self {
            config,
            past: VecDeque::new(),
            future: Vec::new(),
            current: Snapshot {
                state: initial,
                timestamp: now,
            },
            pending: None,
            restoring: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
    pub fn set_restoring(&mut self, restoring: bool) {
        self.restoring = restoring;
    }
    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Records `new_state` as the result of a mutation.
    ///
    /// With a zero capture interval the capture commits immediately; otherwise it stays
    /// pending and the caller must commit it at the returned deadline. A capture arriving
    /// while one is pending replaces it and pushes the deadline back.
    pub fn capture(&mut self, new_state: Rc<Value>, now: Duration) -> CaptureOutcome {
        if !self.config.enabled || self.restoring {
            return CaptureOutcome::Ignored;
        }
        self.pending = Some(new_state);
        if self.config.capture_interval.is_zero() {
            self.commit_pending(now);
            CaptureOutcome::Committed
        } else {
            CaptureOutcome::Scheduled(now + self.config.capture_interval)
        }
    }

    /// Commits the pending capture, if any.
    pub fn commit_pending(&mut self, now: Duration) -> bool {
        let Some(state) = self.pending.take() else {
            return false;
        };
        if Rc::ptr_eq(&state, &self.current.state) || *state == *self.current.state {
            return false;
        }
        let prev = std::mem::replace(
            &mut self.current,
            Snapshot {
                state,
                timestamp: now,
            },
        );
        self.past.push_back(prev);
        while self.past.len() > self.config.max_size {
            self.past.pop_front();
        }
        self.future.clear();
        true
    }

    /// Steps back one snapshot and returns the state to restore.
    pub fn undo(&mut self, now: Duration) -> Option<Rc<Value>> {
        self.commit_pending(now);
        let target = self.past.pop_back()?;
        let current = std::mem::replace(&mut self.current, target);
        self.future.push(current);
        Some(self.current.state.clone())
    }

    /// Steps forward one snapshot and returns the state to restore.
    pub fn redo(&mut self, now: Duration) -> Option<Rc<Value>> {
        self.commit_pending(now);
        let target = self.future.pop()?;
        let current = std::mem::replace(&mut self.current, target);
        self.past.push_back(current);
        Some(self.current.state.clone())
    }

    /// Empties both stacks. The committed snapshot is kept.
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
        self.pending = None;
    }

    /// Re-bases the committed snapshot without recording an undo step.
    pub fn reset_current(&mut self, state: Rc<Value>, now: Duration) {
        self.pending = None;
        self.current = Snapshot {
            state,
            timestamp: now,
        };
    }

    pub fn size(&self) -> HistorySize {
        HistorySize {
            past: self.past.len(),
            future: self.future.len(),
        }
    }
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty() || self.pending.is_some()
    }
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty() && self.pending.is_none()
    }

    /// Past snapshots (oldest first), the current one, then redo targets (nearest first).
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        let past = self
            .past
            .iter()
            .map(|s| (TimelinePosition::Past, s.clone()));
        let current = std::iter::once((TimelinePosition::Current, self.current.clone()));
        let future = self
            .future
            .iter()
            .rev()
            .map(|s| (TimelinePosition::Future, s.clone()));
        past.chain(current)
            .chain(future)
            .enumerate()
            .map(|(index, (position, snapshot))| TimelineEntry {
                index,
                position,
                snapshot,
            })
            .collect()
    }
}
