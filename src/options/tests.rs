use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

use super::*;

#[test]
fn defaults() {
    let settings = StoreSettings::default();
    assert_eq!(settings.prefix, "deepstate");
    assert!(!settings.logging);
    assert!(!settings.persist.is_enabled());
    assert_eq!(settings.history, HistoryConfig::new());
    assert!(!settings.history.enabled);
    assert_eq!(settings.history.max_size, 50);
    assert_eq!(settings.history.capture_interval, Duration::from_millis(100));
}

#[test]
fn settings_from_json() {
    let settings: StoreSettings = serde_json::from_value(json!({
        "persist": { "todos": true, "draft": false },
        "prefix": "app",
        "history": { "enabled": true, "capture_interval_ms": 0 }
    }))
    .unwrap();
    assert_eq!(settings.prefix, "app");
    assert!(settings.persist.includes("todos"));
    assert!(!settings.persist.includes("draft"));
    assert!(!settings.persist.includes("other"));
    assert!(settings.history.enabled);
    assert_eq!(settings.history.max_size, 50);
    assert_eq!(settings.history.capture_interval, Duration::ZERO);
    assert_eq!(settings.persist_debounce, Duration::from_millis(100));
}

#[rstest]
#[case(json!(true), "anything", true)]
#[case(json!(false), "anything", false)]
#[case(json!({"a": true}), "a", true)]
#[case(json!({"a": false}), "a", false)]
#[case(json!({"a": true}), "b", false)]
fn persist_includes(#[case] config: Value, #[case] field: &str, #[case] expected: bool) {
    let config: PersistConfig = serde_json::from_value(config).unwrap();
    assert_eq!(config.includes(field), expected);
}

#[test]
fn persist_fields_enabled() {
    assert!(PersistConfig::fields(["a"]).is_enabled());
    assert!(!PersistConfig::Fields(Default::default()).is_enabled());
}

#[test]
fn builders_update_settings() {
    let options = StoreOptions::new()
        .with_prefix("x")
        .with_logging(true)
        .with_history(HistoryConfig::enabled().with_max_size(3))
        .with_persist(PersistConfig::Enabled(true));
    assert_eq!(options.settings.prefix, "x");
    assert!(options.settings.logging);
    assert!(options.settings.history.enabled);
    assert_eq!(options.settings.history.max_size, 3);
    assert!(options.settings.persist.is_enabled());
}
