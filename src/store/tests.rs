use std::{cell::Cell, time::Duration};

use assert_call::{call, CallRecorder};
use pretty_assertions::assert_eq;
use rt_local::runtime::core::test;
use serde_json::json;

use super::*;
use crate::{
    computed::Computed,
    devtools::DevtoolsLog,
    error::{ComputationError, PathErrorReason},
    mutation::{Middleware, MutationContext, MutationKind, Next},
    options::{HistoryConfig, PersistConfig},
    persist::MemoryStorage,
    plugin::Plugin,
    timer::ManualClock,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn store(initial: Value) -> Store {
    Store::new(initial, StoreOptions::new()).unwrap()
}

fn store_with_history(initial: Value, clock: &ManualClock, interval_ms: u64) -> Store {
    let options = StoreOptions::new()
        .with_clock(clock.clone())
        .with_history(HistoryConfig::enabled().with_capture_interval(ms(interval_ms)));
    Store::new(initial, options).unwrap()
}

#[test]
fn rejects_non_object_initial_state() {
    for initial in [json!(null), json!([1]), json!(3), json!("s")] {
        assert!(Store::new(initial, StoreOptions::new()).is_err());
    }
    let e = Store::new(json!([]), StoreOptions::new()).unwrap_err();
    assert_eq!(e.found, "array");
}

#[test]
fn set_deep_creates_intermediates() {
    let s = store(json!({}));
    s.set_deep("user.profile.name", json!("ann")).unwrap();
    s.set_deep("todos.1", json!("b")).unwrap();
    assert_eq!(
        *s.get_state(),
        json!({"user": {"profile": {"name": "ann"}}, "todos": [null, "b"]})
    );
}

#[test]
fn untouched_subtrees_keep_their_values() {
    let s = store(json!({"a": {"x": 1}, "b": {"y": 2}}));
    let before = s.get_state();
    s.set_deep("a.x", json!(5)).unwrap();
    let after = s.get_state();
    assert!(!Rc::ptr_eq(&before, &after));
    assert_eq!(before["a"]["x"], json!(1));
    assert_eq!(after["b"], before["b"]);
}

#[test]
fn forbidden_path_leaves_state_unchanged() {
    let mut cr = CallRecorder::new();
    let s = store(json!({"a": 1}));
    let _sub = s.subscribe(|_, _| call!("changed"));
    let before = s.get_state();
    assert!(s.set_deep("__proto__.polluted", json!(true)).is_err());
    assert!(s.set_deep("a.constructor.prototype", json!(true)).is_err());
    assert!(s.set_deep("", json!(1)).is_err());
    assert!(Rc::ptr_eq(&before, &s.get_state()));
    cr.verify(());
}

#[test]
fn update_deep_sees_current_value() {
    let s = store(json!({"count": 1}));
    s.update_deep("count", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1))
        .unwrap();
    s.update_deep("missing", |v| json!(v.is_none())).unwrap();
    assert_eq!(*s.get_state(), json!({"count": 2, "missing": true}));
}

#[test]
fn delete_deep_reports_removal() {
    let s = store(json!({"a": {"b": 1}, "list": [1, 2, 3]}));
    assert!(s.delete_deep("a.b").unwrap());
    assert!(!s.delete_deep("a.b").unwrap());
    assert!(s.delete_deep("list.0").unwrap());
    assert_eq!(*s.get_state(), json!({"a": {}, "list": [2, 3]}));
}

#[test]
fn reads_through_paths() {
    let s = store(json!({"user": {"name": "ann"}}));
    assert!(s.has_path("user.name").unwrap());
    assert!(!s.has_path("user.age").unwrap());
    assert_eq!(s.get("user.name").unwrap(), Some(json!("ann")));
    assert_eq!(s.get("user.age").unwrap(), None);
    assert!(s.has_path("prototype").is_err());
}

#[test]
fn set_state_merges_or_replaces() {
    let s = store(json!({"a": 1, "b": 2}));
    s.set_state(json!({"b": 3}), false).unwrap();
    assert_eq!(*s.get_state(), json!({"a": 1, "b": 3}));
    s.set_state(json!({"c": 4}), true).unwrap();
    assert_eq!(*s.get_state(), json!({"c": 4}));
    s.set_state(
        StatePatch::with(|s| json!({"c": s["c"].as_i64().unwrap_or(0) * 2})),
        false,
    )
    .unwrap();
    assert_eq!(*s.get_state(), json!({"c": 8}));
    assert!(s.set_state(json!(5), true).is_err());
    assert_eq!(*s.get_state(), json!({"c": 8}));
}

#[test]
fn unsubscribe_on_drop() {
    let mut cr = CallRecorder::new();
    let s = store(json!({"a": 0}));
    let sub = s.subscribe(|next, _| call!("{}", next["a"]));
    s.set_deep("a", json!(1)).unwrap();
    cr.verify("1");
    drop(sub);
    assert_eq!(s.subscriber_count(), 0);
    s.set_deep("a", json!(2)).unwrap();
    cr.verify(());
}

#[test]
fn detached_subscription_stays() {
    let mut cr = CallRecorder::new();
    let s = store(json!({"a": 0}));
    s.subscribe(|_, _| call!("changed")).detach();
    s.set_deep("a", json!(1)).unwrap();
    cr.verify("changed");
}

#[test]
fn path_subscription_ignores_siblings() {
    let mut cr = CallRecorder::new();
    let s = store(json!({"user": {"name": "ann", "age": 1}}));
    let _sub = s
        .subscribe_path("user.name", |new, old, _| {
            call!("{} -> {}", old.unwrap(), new.unwrap())
        })
        .unwrap();
    s.set_deep("user.age", json!(2)).unwrap();
    cr.verify(());
    s.set_deep("user.name", json!("bob")).unwrap();
    cr.verify(r#""ann" -> "bob""#);
}

#[test]
fn listener_may_write_during_notification() {
    let mut cr = CallRecorder::new();
    let s = store(json!({"a": 0, "b": 0}));
    let s2 = s.clone();
    let _sub = s.subscribe(move |next, _| {
        call!("a={} b={}", next["a"], next["b"]);
        if next["b"] != next["a"] {
            s2.set_deep("b", next["a"].clone()).unwrap();
        }
    });
    s.set_deep("a", json!(1)).unwrap();
    cr.verify(["a=1 b=0", "a=1 b=1"]);
    assert_eq!(*s.get_state(), json!({"a": 1, "b": 1}));
}

#[test]
fn batch_delivers_once_with_state_before_batch() {
    let mut cr = CallRecorder::new();
    let s = store(json!({"a": 0}));
    let _sub = s.subscribe(|next, prev| call!("{} -> {}", prev["a"], next["a"]));
    let result = s.batch(|| {
        s.set_deep("a", json!(1)).unwrap();
        s.batch(|| s.set_deep("a", json!(2)).unwrap());
        assert_eq!(s.get_state()["a"], json!(2));
        "done"
    });
    assert_eq!(result, "done");
    cr.verify("0 -> 2");
    assert!(!s.is_batching());
}

#[test]
fn batch_guard_ends_on_drop() {
    let mut cr = CallRecorder::new();
    let s = store(json!({"a": 0}));
    let _sub = s.subscribe(|_, _| call!("changed"));
    let guard = s.begin_batch();
    s.set_deep("a", json!(1)).unwrap();
    s.set_deep("a", json!(2)).unwrap();
    cr.verify(());
    drop(guard);
    cr.verify("changed");
}

#[test]
fn computed_is_invalidated_by_dependency_writes() {
    let runs = Rc::new(Cell::new(0));
    let runs2 = runs.clone();
    let total = Computed::new(move |s| {
        runs2.set(runs2.get() + 1);
        let items = s["cart"].as_array().cloned().unwrap_or_default();
        json!(items.iter().filter_map(|i| i["price"].as_i64()).sum::<i64>())
    })
    .depends_on(["cart"])
    .unwrap();
    let options = StoreOptions::new().with_computed("total", total);
    let s = Store::new(json!({"cart": [{"price": 10}, {"price": 10}], "ui": 0}), options).unwrap();

    assert_eq!(s.computed("total"), Some(json!(20)));
    s.set_deep("ui", json!(1)).unwrap();
    assert_eq!(s.computed("total"), Some(json!(20)));
    assert_eq!(runs.get(), 1);

    s.set_deep("cart.1.price", json!(20)).unwrap();
    assert_eq!(s.computed("total"), Some(json!(30)));
    assert_eq!(runs.get(), 2);
    assert_eq!(s.computed("unknown"), None);
    assert_eq!(Value::Object(s.computed_values()), json!({"total": 30}));
}

#[test]
fn middleware_can_rewrite_and_failures_fall_back() {
    let options = StoreOptions::new()
        .with_middleware_fn(|state, cx, next| {
            let mut state = next.run(state)?;
            if cx.kind == MutationKind::Set {
                state["writes"] = json!(state["writes"].as_i64().unwrap_or(0) + 1);
            }
            Ok(state)
        })
        .with_middleware_fn(|state, cx, next| {
            if cx.path.as_str() == "boom" {
                return Err(ComputationError::new("guard", "refused"));
            }
            next.run(state)
        });
    let s = Store::new(json!({}), options).unwrap();
    s.set_deep("a", json!(1)).unwrap();
    assert_eq!(*s.get_state(), json!({"a": 1, "writes": 1}));
    s.set_deep("boom", json!(1)).unwrap();
    assert_eq!(*s.get_state(), json!({"a": 1, "writes": 1, "boom": 1}));
}

#[test]
fn middleware_cannot_replace_the_root_with_a_non_object() {
    let options = StoreOptions::new().with_middleware_fn(|_, _, _| Ok(json!(null)));
    let s = Store::new(json!({}), options).unwrap();
    s.set_deep("a", json!(1)).unwrap();
    assert_eq!(*s.get_state(), json!({"a": 1}));
    s.set_state(json!({"x": 1}), false).unwrap();
    assert_eq!(*s.get_state(), json!({"a": 1, "x": 1}));
}

#[test]
fn huge_array_index_is_rejected() {
    let s = store(json!({"items": []}));
    let before = s.get_state();
    let e = s.set_deep("items.18446744073709551615", json!(1)).unwrap_err();
    assert!(matches!(e.reason, PathErrorReason::IndexTooLarge(_)));
    assert!(s.set_deep("items.4000000000", json!(1)).is_err());
    assert!(Rc::ptr_eq(&before, &s.get_state()));
}

#[test]
fn panicking_listener_keeps_the_write_pipeline_intact() {
    let clock = ManualClock::new();
    let s = store_with_history(json!({"a": 0}), &clock, 0);
    let hits = Rc::new(Cell::new(0));
    let hits2 = hits.clone();
    let _first = s.subscribe(|_, _| panic!("listener failure"));
    let _second = s.subscribe(move |_, _| hits2.set(hits2.get() + 1));
    s.set_deep("a", json!(1)).unwrap();
    assert_eq!(hits.get(), 1);
    assert_eq!(*s.get_state(), json!({"a": 1}));
    let history = s.history().unwrap();
    assert_eq!(history.size(), HistorySize { past: 1, future: 0 });
    assert!(history.undo());
    assert_eq!(hits.get(), 2);
    assert_eq!(*s.get_state(), json!({"a": 0}));
}

#[test]
fn plugins_initialize_and_contribute_middleware() {
    struct Stamp;
    impl Plugin for Stamp {
        fn on_init(&self, store: &Store) {
            call!("init {}", store.get_state());
        }
        fn middleware(&self) -> Option<Rc<dyn Middleware>> {
            Some(Rc::new(stamp))
        }
    }
    fn stamp(
        mut state: Value,
        _cx: &MutationContext,
        next: Next,
    ) -> Result<Value, ComputationError> {
        state["stamped"] = json!(true);
        next.run(state)
    }
    let mut cr = CallRecorder::new();
    let s = Store::new(json!({"a": 0}), StoreOptions::new().with_plugin(Stamp)).unwrap();
    cr.verify(r#"init {"a":0}"#);
    s.set_deep("a", json!(1)).unwrap();
    assert_eq!(*s.get_state(), json!({"a": 1, "stamped": true}));
}

#[test]
fn devtools_receive_labels() {
    let log = DevtoolsLog::new();
    let clock = ManualClock::new();
    let options = StoreOptions::new()
        .with_devtools(log.clone())
        .with_clock(clock)
        .with_history(HistoryConfig::enabled().with_capture_interval(Duration::ZERO));
    let s = Store::new(json!({}), options).unwrap();
    s.set_deep("a.b", json!(1)).unwrap();
    s.delete_deep("a.b").unwrap();
    s.set_state(json!({"x": 1}), true).unwrap();
    let history = s.history().unwrap();
    history.undo();
    history.redo();
    assert_eq!(
        log.labels(),
        ["init", "setDeep a.b", "deleteDeep a.b", "setState", "undo", "redo"]
    );
    assert_eq!(log.last().unwrap().1, json!({"x": 1}));
}

#[test]
fn history_is_none_when_disabled() {
    assert!(store(json!({})).history().is_none());
}

#[test]
fn undo_redo_restore_states() {
    let clock = ManualClock::new();
    let s = store_with_history(json!({"counter": 0}), &clock, 0);
    for n in 1..=3 {
        s.set_deep("counter", json!(n)).unwrap();
    }
    let history = s.history().unwrap();
    assert_eq!(history.size(), HistorySize { past: 3, future: 0 });
    assert!(history.undo());
    assert!(history.undo());
    assert_eq!(s.get_state()["counter"], json!(1));
    assert!(history.redo());
    assert_eq!(s.get_state()["counter"], json!(2));
    assert_eq!(history.size(), HistorySize { past: 2, future: 1 });

    s.set_deep("counter", json!(10)).unwrap();
    assert!(!history.can_redo());
    assert!(!history.redo());
}

#[test]
fn undo_notifies_subscribers() {
    let mut cr = CallRecorder::new();
    let clock = ManualClock::new();
    let s = store_with_history(json!({"n": 0}), &clock, 0);
    s.set_deep("n", json!(1)).unwrap();
    let _sub = s.subscribe(|next, prev| call!("{} -> {}", prev["n"], next["n"]));
    s.history().unwrap().undo();
    cr.verify("1 -> 0");
}

#[test]
fn jump_moves_several_steps() {
    let clock = ManualClock::new();
    let s = store_with_history(json!({"n": 0}), &clock, 0);
    for n in 1..=4 {
        s.set_deep("n", json!(n)).unwrap();
    }
    let history = s.history().unwrap();
    assert_eq!(history.jump(-3), 3);
    assert_eq!(s.get_state()["n"], json!(1));
    assert_eq!(history.jump(-5), 1);
    assert_eq!(s.get_state()["n"], json!(0));
    assert_eq!(history.jump(2), 2);
    assert_eq!(s.get_state()["n"], json!(2));
    assert_eq!(history.jump(0), 0);
}

#[test]
async fn debounced_captures_become_one_step() {
    let clock = ManualClock::new();
    let s = store_with_history(json!({"n": 0}), &clock, 100);
    s.set_deep("n", json!(1)).unwrap();
    clock.advance(ms(50));
    s.set_deep("n", json!(2)).unwrap();
    assert!(s.is_pending(TimerKind::HistoryCapture));
    assert_eq!(s.next_deadline(), Some(ms(150)));

    clock.advance(ms(60));
    assert_eq!(s.run_timers().await, 0);
    clock.advance(ms(40));
    assert_eq!(s.run_timers().await, 1);

    let history = s.history().unwrap();
    assert_eq!(history.size().past, 1);
    assert!(history.undo());
    assert_eq!(s.get_state()["n"], json!(0));
}

#[test]
fn undo_before_capture_fires_commits_it() {
    let clock = ManualClock::new();
    let s = store_with_history(json!({"n": 0}), &clock, 100);
    s.set_deep("n", json!(1)).unwrap();
    let history = s.history().unwrap();
    assert!(history.can_undo());
    assert!(history.undo());
    assert_eq!(s.get_state()["n"], json!(0));
    assert!(!s.is_pending(TimerKind::HistoryCapture));
    assert!(history.redo());
    assert_eq!(s.get_state()["n"], json!(1));
}

#[test]
fn history_flush_and_clear() {
    let clock = ManualClock::new();
    let s = store_with_history(json!({"n": 0}), &clock, 100);
    s.set_deep("n", json!(1)).unwrap();
    let history = s.history().unwrap();
    assert!(history.flush());
    assert!(!history.flush());
    assert_eq!(history.size().past, 1);
    assert_eq!(history.timeline().len(), 2);
    history.clear();
    assert!(!history.can_undo());
    assert_eq!(s.get_state()["n"], json!(1));
}

#[test]
async fn persistence_saves_after_debounce() {
    let clock = ManualClock::new();
    let storage = MemoryStorage::new();
    let options = StoreOptions::new()
        .with_clock(clock.clone())
        .with_storage(storage.clone())
        .with_persist(PersistConfig::fields(["todos"]))
        .with_prefix("app");
    let s = Store::new(json!({"todos": [], "draft": ""}), options).unwrap();
    s.set_deep("todos.0", json!("milk")).unwrap();
    s.set_deep("draft", json!("x")).unwrap();
    assert!(storage.is_empty());

    clock.advance(ms(100));
    assert_eq!(s.run_timers().await, 1);
    assert_eq!(storage.entries().len(), 1);
    assert_eq!(storage.entry("app-todos").as_deref(), Some(r#"["milk"]"#));
}

#[test]
async fn hydrate_merges_without_history() {
    let clock = ManualClock::new();
    let storage = MemoryStorage::new();
    storage.insert("deepstate-todos", r#"["saved"]"#);
    let options = StoreOptions::new()
        .with_clock(clock)
        .with_storage(storage)
        .with_persist(PersistConfig::Enabled(true))
        .with_history(HistoryConfig::enabled().with_capture_interval(Duration::ZERO));
    let s = Store::new(json!({"todos": [], "filter": "all"}), options).unwrap();
    assert_eq!(s.hydrate().await, 1);
    assert_eq!(*s.get_state(), json!({"todos": ["saved"], "filter": "all"}));
    assert!(!s.history().unwrap().can_undo());
}

#[test]
async fn hydrate_keeps_a_pending_undo_step() {
    let clock = ManualClock::new();
    let storage = MemoryStorage::new();
    storage.insert("deepstate-todos", r#"["saved"]"#);
    let options = StoreOptions::new()
        .with_clock(clock.clone())
        .with_storage(storage)
        .with_persist(PersistConfig::fields(["todos"]))
        .with_history(HistoryConfig::enabled().with_capture_interval(ms(100)));
    let s = Store::new(json!({"todos": [], "filter": "all"}), options).unwrap();
    s.set_deep("filter", json!("done")).unwrap();
    clock.advance(ms(10));
    assert_eq!(s.hydrate().await, 1);
    assert!(!s.is_pending(TimerKind::HistoryCapture));

    let history = s.history().unwrap();
    assert_eq!(history.size(), HistorySize { past: 1, future: 0 });
    assert!(history.undo());
    assert_eq!(s.get_state()["filter"], json!("all"));
}

#[test]
async fn flush_runs_everything_pending() {
    let clock = ManualClock::new();
    let storage = MemoryStorage::new();
    let options = StoreOptions::new()
        .with_clock(clock)
        .with_storage(storage.clone())
        .with_persist(PersistConfig::Enabled(true))
        .with_history(HistoryConfig::enabled());
    let s = Store::new(json!({"a": 0}), options).unwrap();
    s.set_deep("a", json!(1)).unwrap();
    assert_eq!(s.flush().await, 2);
    assert_eq!(storage.entry("deepstate-a").as_deref(), Some("1"));
    assert_eq!(s.history().unwrap().size().past, 1);
    assert_eq!(s.next_deadline(), None);
}

#[test]
async fn dispatch_returns_action_output() {
    let s = store(json!({"n": 1}));
    let doubled = s
        .dispatch(|store| async move {
            let n = store.get("n")?.and_then(|v| v.as_i64()).unwrap_or(0);
            store.set_deep("n", json!(n * 2))?;
            Ok::<_, InvalidPathError>(n * 2)
        })
        .await;
    assert_eq!(doubled, Ok(2));
    let failed = s
        .dispatch(|store| async move { store.set_deep("__proto__", json!(1)) })
        .await;
    assert!(failed.is_err());
    assert_eq!(s.get_state()["n"], json!(2));
}

#[test]
async fn destroy_cancels_timers_and_subscribers() {
    let mut cr = CallRecorder::new();
    let clock = ManualClock::new();
    let storage = MemoryStorage::new();
    let options = StoreOptions::new()
        .with_clock(clock.clone())
        .with_storage(storage.clone())
        .with_persist(PersistConfig::Enabled(true));
    let s = Store::new(json!({"a": 0}), options).unwrap();
    let sub = s.subscribe(|_, _| call!("changed"));
    s.set_deep("a", json!(1)).unwrap();
    cr.verify("changed");
    s.destroy();
    assert!(s.is_destroyed());
    assert_eq!(s.subscriber_count(), 0);
    assert_eq!(s.next_deadline(), None);

    s.set_deep("a", json!(2)).unwrap();
    clock.advance(ms(1000));
    assert_eq!(s.run_timers().await, 0);
    assert!(storage.is_empty());
    cr.verify(());
    drop(sub);
}

#[test]
fn destroyed_store_reports_nothing_to_devtools() {
    let log = DevtoolsLog::new();
    let s = Store::new(json!({"a": 0}), StoreOptions::new().with_devtools(log.clone())).unwrap();
    s.set_deep("a", json!(1)).unwrap();
    s.destroy();
    s.set_deep("a", json!(2)).unwrap();
    s.set_state(json!({"b": 1}), false).unwrap();
    assert_eq!(log.labels(), ["init", "setDeep a"]);
    assert_eq!(*s.get_state(), json!({"a": 2, "b": 1}));
}
