use std::{cell::RefCell, rc::Rc};

use serde_json::Value;

/// Receives every committed state together with a label naming the operation.
pub trait Devtools {
    fn init(&self, state: &Value);
    fn send(&self, label: &str, state: &Value);
}

/// A [`Devtools`] that keeps what it receives. Clones share the same log.
#[derive(Clone, Default, Debug)]
pub struct DevtoolsLog(Rc<RefCell<Vec<(String, Value)>>>);

impl DevtoolsLog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn labels(&self) -> Vec<String> {
        self.0.borrow().iter().map(|(label, _)| label.clone()).collect()
    }
    pub fn last(&self) -> Option<(String, Value)> {
        self.0.borrow().last().cloned()
    }
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Devtools for DevtoolsLog {
    fn init(&self, state: &Value) {
        self.0.borrow_mut().push(("init".to_string(), state.clone()));
    }
    fn send(&self, label: &str, state: &Value) {
        self.0.borrow_mut().push((label.to_string(), state.clone()));
    }
}
