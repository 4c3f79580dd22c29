use std::{fmt, rc::Rc};

use serde_json::Value;

use crate::{
    error::{value_kind, ComputationError, InvalidPathError},
    path::{self, Path},
};


/// The new value for a path: either a replacement or a function of the current value.
pub enum Update {
    Value(Value),
    With(Box<dyn FnOnce(Option<&Value>) -> Value>),
}

impl Update {
    pub fn with(f: impl FnOnce(Option<&Value>) -> Value + 'static) -> Self {
        Update::With(Box::new(f))
    }

    fn resolve(self, current: Option<&Value>) -> Value {
        match self {
            Update::Value(value) => value,
            Update::With(f) => f(current),
        }
    }
}

impl From<Value> for Update {
    fn from(value: Value) -> Self {
        Update::Value(value)
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Update::With(_) => f.write_str("With(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Set,
    Delete,
}

/// What a middleware sees besides the candidate state.
pub struct MutationContext<'a> {
    pub kind: MutationKind,
    pub path: &'a Path,
    pub prev: &'a Value,
}

/// Intercepts the candidate state produced by a path mutation.
///
/// A middleware may transform the state before and after calling [`Next::run`].
/// The first middleware in a chain wraps all later ones.
pub trait Middleware {
    fn handle(
        &self,
        state: Value,
        cx: &MutationContext,
        next: Next,
    ) -> Result<Value, ComputationError>;
}

impl<F> Middleware for F
where
    F: Fn(Value, &MutationContext, Next) -> Result<Value, ComputationError>,
{
    fn handle(
        &self,
        state: Value,
        cx: &MutationContext,
        next: Next,
    ) -> Result<Value, ComputationError> {
        self(state, cx, next)
    }
}

/// The remainder of a middleware chain.
pub struct Next<'a> {
    rest: &'a [Rc<dyn Middleware>],
    cx: &'a MutationContext<'a>,
}

impl Next<'_> {
    pub fn run(self, state: Value) -> Result<Value, ComputationError> {
        match self.rest.split_first() {
            Some((first, rest)) => first.handle(state, self.cx, Next { rest, cx: self.cx }),
            None => Ok(state),
        }
    }
}

#[derive(Default, Clone)]
pub struct MiddlewareChain(Vec<Rc<dyn Middleware>>);

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, middleware: Rc<dyn Middleware>) {
        self.0.push(middleware);
    }
    pub fn push_fn(
        &mut self,
        f: impl Fn(Value, &MutationContext, Next) -> Result<Value, ComputationError> + 'static,
    ) {
        self.push(Rc::new(f));
    }
    pub fn extend(&mut self, other: MiddlewareChain) {
        self.0.extend(other.0);
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Runs `state` through the chain.
    ///
    /// If any middleware fails or the chain yields something other than an object, the
    /// failure is logged and the un-middlewared state is returned.
    pub fn run(&self, state: Value, cx: &MutationContext) -> Value {
        if self.0.is_empty() {
            return state;
        }
        let fallback = state.clone();
        let next = Next { rest: &self.0, cx };
        let e = match next.run(state) {
            Ok(state) if state.is_object() => return state,
            Ok(state) => ComputationError::new(
                "middleware",
                format!("returned {} instead of an object", value_kind(&state)),
            ),
            Err(e) => e,
        };
        tracing::warn!(
            path = %cx.path,
            error = %e,
            "middleware failed; applying mutation without middleware"
        );
        fallback
    }
}

/// Computes the state that results from writing `update` at `path`.
///
/// `current` is never modified. Path errors abort the mutation before any middleware runs.
pub fn apply(
    current: &Value,
    path: &Path,
    update: Update,
    chain: &MiddlewareChain,
) -> Result<Value, InvalidPathError> {
    let mut next = current.clone();
    let value = update.resolve(path::get(current, path)?);
    path::set(&mut next, path, value)?;
    let cx = MutationContext {
        kind: MutationKind::Set,
        path,
        prev: current,
    };
    Ok(chain.run(next, &cx))
}

/// Computes the state that results from deleting `path`, or `None` if nothing was removed.
pub fn apply_remove(
    current: &Value,
    path: &Path,
    chain: &MiddlewareChain,
) -> Result<Option<Value>, InvalidPathError> {
    let mut next = current.clone();
    if !path::remove(&mut next, path)? {
        return Ok(None);
    }
    let cx = MutationContext {
        kind: MutationKind::Delete,
        path,
        prev: current,
    };
    Ok(Some(chain.run(next, &cx)))
}
