//! Config files on disk
//!
//! Loading, validation errors carrying the file name, and hot reload
//! through `ConfigWatcher` into a running router.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_router::config::loader::load_from_file;
use agent_router::config::validation::ConfigError;
use agent_router::config::watcher::ConfigWatcher;
use agent_router::{Objective, RouterBuilder, SimulatedProvider};

const BASE: &str = r#"
default_objective = "cost"
default_scope = "daily"

[budget_limits.daily]
limit = 1.0

[[catalog_entries]]
provider = "sim"
model = "small"
per_request_cost = 0.001
quality = 0.6
latency = "fast"
"#;

const GROWN: &str = r#"
default_objective = "quality"
default_scope = "daily"

[budget_limits.daily]
limit = 5.0

[[catalog_entries]]
provider = "sim"
model = "small"
per_request_cost = 0.001
quality = 0.6
latency = "fast"

[[catalog_entries]]
provider = "sim"
model = "large"
per_request_cost = 0.01
quality = 0.95
latency = "slow"
"#;

fn write(path: &Path, content: &str) {
    std::fs::write(path, content)
        .unwrap_or_else(|e| std::panic::panic_any(format!("test: write config: {e}")));
}

// ═══════════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_load_valid_file() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let path = dir.path().join("router.toml");
    write(&path, BASE);

    let config = load_from_file(&path).expect("test: load valid config");
    assert_eq!(config.default_objective, Objective::Cost);
    assert_eq!(config.catalog_entries.len(), 1);
    assert!(config.budget_limits.contains_key("daily"));
}

#[test]
fn test_load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let err = load_from_file(&dir.path().join("absent.toml"));
    assert!(matches!(err, Err(ConfigError::Io { .. })));
}

#[test]
fn test_load_malformed_toml_names_the_file() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let path = dir.path().join("broken.toml");
    write(&path, "catalog_entries = [ not toml");

    match load_from_file(&path) {
        Err(e @ ConfigError::Parse { .. }) => assert!(e.to_string().contains("broken.toml")),
        other => std::panic::panic_any(format!("test: expected parse error, got {other:?}")),
    }
}

#[test]
fn test_load_semantically_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let path = dir.path().join("router.toml");
    write(&path, &BASE.replace("quality = 0.6", "quality = 1.6"));

    assert!(load_from_file(&path).is_err());
}

// ═══════════════════════════════════════════════════════════════════════════
// Hot reload
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_broadcasts_valid_change() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let path = dir.path().join("router.toml");
    write(&path, BASE);

    let (_watcher, mut rx) = ConfigWatcher::new(path.clone()).expect("test: start watcher");
    tokio::time::sleep(Duration::from_millis(200)).await;
    write(&path, GROWN);

    let config = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("test: no reload within 5s")
        .expect("test: channel closed");
    assert_eq!(config.catalog_entries.len(), 2);
    assert_eq!(config.default_objective, Objective::Quality);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_ignores_invalid_change() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let path = dir.path().join("router.toml");
    write(&path, BASE);

    let (_watcher, mut rx) = ConfigWatcher::new(path.clone()).expect("test: start watcher");
    tokio::time::sleep(Duration::from_millis(200)).await;
    write(&path, "catalog_entries = []");

    let received = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
    assert!(received.is_err(), "an invalid config must not be broadcast");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_router_picks_up_reloaded_catalog_and_limits() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let path = dir.path().join("router.toml");
    write(&path, BASE);

    let config = load_from_file(&path).expect("test: load config");
    let router = Arc::new(
        RouterBuilder::new(config)
            .provider(Arc::new(SimulatedProvider::new("sim").with_delay(Duration::ZERO)))
            .build()
            .expect("test: build router"),
    );

    let (watcher, rx) = ConfigWatcher::new(path.clone()).expect("test: start watcher");
    let mut probe = watcher.subscribe();
    router.spawn_config_listener(rx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    write(&path, GROWN);
    tokio::time::timeout(Duration::from_secs(5), probe.recv())
        .await
        .expect("test: no reload within 5s")
        .expect("test: channel closed");

    // The listener applies the same message; give it a moment.
    let mut applied = false;
    for _ in 0..50 {
        if router.catalog().len() == 2 {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(applied, "router never applied the reloaded catalog");

    let state = router.ledger().status("daily").expect("test: status");
    assert!((state.limit - 5.0).abs() < 1e-9);
}
