extern crate self as deepstate;

mod computed;
mod devtools;
mod error;
mod history;
mod hub;
mod mutation;
mod options;
pub mod path;
mod persist;
mod plugin;
mod selector;
mod store;
mod subscription;
mod timer;

pub use computed::{ComputeFn, Computed};
pub use devtools::*;
pub use error::*;
pub use history::{HistorySize, Snapshot, TimelineEntry, TimelinePosition};
pub use hub::{Listener, PathListener, StatePatch};
pub use mutation::{Middleware, MiddlewareChain, MutationContext, MutationKind, Next, Update};
pub use options::*;
pub use path::{AsPath, Path, PathPattern};
pub use persist::{MemoryStorage, Storage};
pub use plugin::*;
pub use selector::*;
pub use store::*;
pub use subscription::*;
pub use timer::{Clock, ManualClock, SystemClock, TimerKind};

pub use deepstate_macros::path;
pub use serde_json::{json, Value};

#[doc(hidden)]
pub use path::__path_from_macro;
