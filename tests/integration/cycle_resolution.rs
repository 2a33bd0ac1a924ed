//! Import Cycle Tests
//!
//! Rings of mutually importing plug-ins must resolve, start, stop and
//! uninstall as a unit without leaving partial state behind.

mod support;

use pluginrt::{ErrorKind, PluginState};
use support::Harness;

/// a -> b -> c -> a, with c also importing the leaf d
fn ring() -> Harness {
    let harness = Harness::new();
    harness.install("d", &[]);
    harness.install("a", &["b"]);
    harness.install("b", &["c"]);
    harness.install("c", &["a", "d"]);
    harness
}

fn states(harness: &Harness) -> Vec<PluginState> {
    ["a", "b", "c", "d"]
        .iter()
        .map(|id| harness.context.get_state(id))
        .collect()
}

#[test]
fn test_ring_starts_leaf_first() {
    let harness = ring();
    harness.context.start("a").unwrap();

    assert_eq!(harness.calls("start:"), vec!["start:d", "start:c", "start:b", "start:a"]);
    assert!(states(&harness).iter().all(|state| *state == PluginState::Active));
    harness.framework.destroy();
}

#[test]
fn test_stopping_leaf_stops_whole_ring() {
    let harness = ring();
    harness.context.start("a").unwrap();
    harness.clear();

    harness.context.stop("d").unwrap();
    assert_eq!(harness.calls("stop:"), vec!["stop:a", "stop:b", "stop:c", "stop:d"]);
    assert!(states(&harness).iter().all(|state| *state == PluginState::Resolved));

    // the ring restarts cleanly
    harness.context.start("b").unwrap();
    assert!(states(&harness).iter().all(|state| *state == PluginState::Active));
    harness.framework.destroy();
}

#[test]
fn test_uninstalling_ring_member_unresolves_ring() {
    let harness = ring();
    harness.context.start("a").unwrap();

    harness.context.uninstall("b").unwrap();
    assert_eq!(
        states(&harness),
        vec![
            PluginState::Installed,
            PluginState::Uninstalled,
            PluginState::Installed,
            PluginState::Active,
        ]
    );

    let err = harness.context.start("a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);

    harness.install("b", &["c"]);
    harness.context.start("c").unwrap();
    assert!(states(&harness).iter().all(|state| *state == PluginState::Active));
    harness.framework.destroy();
}

#[test]
fn test_start_failure_inside_ring() {
    let harness = Harness::new();
    harness.install("d", &[]);
    harness.install("a", &["b"]);
    harness.install_with("b", &["c"], harness.runtime("b").failing_start());
    harness.install("c", &["a", "d"]);

    let err = harness.context.start("a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.to_string().contains("b refused to start"));

    // imports started before the failure stay active
    assert_eq!(
        states(&harness),
        vec![
            PluginState::Resolved,
            PluginState::Resolved,
            PluginState::Active,
            PluginState::Active,
        ]
    );
    assert!(harness.calls("start:a").is_empty());
    harness.framework.destroy();
}

#[test]
fn test_missing_import_inside_ring_resolves_nothing() {
    let harness = Harness::new();
    harness.install("a", &["b"]);
    harness.install("b", &["c"]);
    harness.install("c", &["a", "absent"]);

    let err = harness.context.start("a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);
    assert_eq!(err.plugin(), Some("c"));
    for id in ["a", "b", "c"] {
        assert_eq!(harness.context.get_state(id), PluginState::Installed);
    }
    assert!(harness.transitions().iter().all(|t| t.ends_with("UNINSTALLED->INSTALLED")));
    harness.framework.destroy();
}
