use std::rc::Rc;

use serde_json::Value;

use crate::{
    error::ComputationError,
    mutation::{Middleware, MutationContext, Next},
    path,
    store::Store,
};

/// Extends a store at construction time.
pub trait Plugin {
    /// Called once the store is fully built.
    fn on_init(&self, store: &Store) {
        let _ = store;
    }
    /// Middleware appended after the store's own middleware.
    fn middleware(&self) -> Option<Rc<dyn Middleware>> {
        None
    }
}

/// Logs every path mutation at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn handle(
        &self,
        state: Value,
        cx: &MutationContext,
        next: Next,
    ) -> Result<Value, ComputationError> {
        let state = next.run(state)?;
        let before = path::get(cx.prev, cx.path).ok().flatten();
        let after = path::get(&state, cx.path).ok().flatten();
        tracing::debug!(kind = ?cx.kind, path = %cx.path, ?before, ?after, "mutation");
        Ok(state)
    }
}
