//! The six end-to-end scenarios from `spec.md` §8, driven through the
//! public `kiln_engine`/`kiln_handler` surface with the built-in
//! `generic_exec` handler standing in for a language-specific one.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use kiln_core::{BuildGraph, ConstructionMode, LanguageTag, Target, TargetId, TargetKind};
use kiln_engine::{Engine, EngineConfig};
use kiln_events::{Event, EventMask, EventSink};
use kiln_handler::{GenericExecHandler, HandlerRegistry};
use serde_json::json;

fn registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(GenericExecHandler::new()));
    registry
}

fn exec_target(id: TargetId, argv: Vec<&str>, deps: &[TargetId]) -> Target {
    let mut target = Target::new(id, TargetKind::Custom, LanguageTag::new("generic_exec"));
    target.config.insert(
        "argv".to_string(),
        json!(argv.into_iter().map(String::from).collect::<Vec<_>>()),
    );
    for dep in deps {
        target = target.with_dependency(dep.clone());
    }
    target
}

struct Collector(Mutex<Vec<Event>>);

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for Collector {
    fn on_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn position_of(events: &[Event], pred: impl Fn(&Event) -> bool) -> Option<usize> {
    events.iter().position(pred)
}

fn is_started(target: &TargetId) -> impl Fn(&Event) -> bool + '_ {
    move |e| matches!(e, Event::TargetStarted { target: t } if t == target)
}

fn is_completed(target: &TargetId) -> impl Fn(&Event) -> bool + '_ {
    move |e| matches!(e, Event::TargetCompleted { target: t, .. } if t == target)
}

fn is_failed(target: &TargetId) -> impl Fn(&Event) -> bool + '_ {
    move |e| matches!(e, Event::TargetFailed { target: t, .. } if t == target)
}

#[test]
fn two_node_linear_graph_cold() {
    let dir = tempfile::tempdir().unwrap();
    let lib = TargetId::new("ws", "pkg", "lib");
    let app = TargetId::new("ws", "pkg", "app");

    let mut graph = BuildGraph::new(ConstructionMode::Deferred);
    graph.add_target(exec_target(lib.clone(), vec!["true"], &[])).unwrap();
    graph
        .add_target(exec_target(app.clone(), vec!["true"], &[lib.clone()]))
        .unwrap();
    graph.add_dependency(app.clone(), lib.clone()).unwrap();

    let config = EngineConfig::new(dir.path().join("cache"), dir.path().to_path_buf());
    let engine = Engine::open(graph, registry(), config).unwrap();
    let collector = Collector::new();
    engine.event_bus().subscribe(EventMask::default(), collector.clone());

    let outcome = engine.run();
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.summary.succeeded, 2);

    let events = collector.events();
    let lib_started = position_of(&events, is_started(&lib)).unwrap();
    let lib_completed = position_of(&events, is_completed(&lib)).unwrap();
    let app_started = position_of(&events, is_started(&app)).unwrap();
    let app_completed = position_of(&events, is_completed(&app)).unwrap();
    assert!(lib_started < lib_completed);
    assert!(lib_completed < app_started);
    assert!(app_started < app_completed);
}

#[test]
fn same_graph_warm_hits_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let lib = TargetId::new("ws", "pkg", "lib");
    let app = TargetId::new("ws", "pkg", "app");

    let build_graph = || {
        let mut graph = BuildGraph::new(ConstructionMode::Deferred);
        graph.add_target(exec_target(lib.clone(), vec!["true"], &[])).unwrap();
        graph
            .add_target(exec_target(app.clone(), vec!["true"], &[lib.clone()]))
            .unwrap();
        graph.add_dependency(app.clone(), lib.clone()).unwrap();
        graph
    };

    let config = EngineConfig::new(cache_dir.clone(), dir.path().to_path_buf());
    let engine = Engine::open(build_graph(), registry(), config.clone()).unwrap();
    let cold = engine.run();
    assert_eq!(cold.exit_code, 0);
    assert_eq!(cold.summary.succeeded, 2);

    let engine = Engine::open(build_graph(), registry(), config).unwrap();
    let warm = engine.run();
    assert_eq!(warm.exit_code, 0);
    assert_eq!(warm.summary.cached, 2);
    assert_eq!(warm.summary.succeeded, 0);
}

#[test]
fn cycle_is_rejected_before_any_handler_runs() {
    let dir = tempfile::tempdir().unwrap();
    let a = TargetId::new("ws", "pkg", "a");
    let b = TargetId::new("ws", "pkg", "b");

    let mut graph = BuildGraph::new(ConstructionMode::Deferred);
    graph.add_target(exec_target(a.clone(), vec!["true"], &[])).unwrap();
    graph.add_target(exec_target(b.clone(), vec!["true"], &[])).unwrap();
    graph.add_dependency(a.clone(), b.clone()).unwrap();
    graph.add_dependency(b.clone(), a.clone()).unwrap();

    let config = EngineConfig::new(dir.path().join("cache"), dir.path().to_path_buf());
    let err = Engine::open(graph, registry(), config).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn undeclared_writes_are_never_admitted_to_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let sneak = dir.path().join("sneak.bin");
    let out = dir.path().join("out.bin");

    let id = TargetId::new("ws", "pkg", "sneaky");
    let mut target = exec_target(
        id.clone(),
        vec![
            "sh",
            "-c",
            &format!(
                "echo leaked > {} ; echo ok > {}",
                sneak.display(),
                out.display()
            ),
        ],
        &[],
    );
    target.output_hint = Some(out.display().to_string());

    let mut graph = BuildGraph::new(ConstructionMode::Deferred);
    graph.add_target(target).unwrap();

    let config = EngineConfig::new(dir.path().join("cache"), dir.path().to_path_buf());
    let engine = Engine::open(graph, registry(), config).unwrap();
    let outcome = engine.run();
    assert_eq!(outcome.exit_code, 0);

    let node = engine.graph().node(&id).unwrap();
    let hash = node.output_hash();
    assert!(hash.is_some(), "the declared output must be hashed and recorded");
    assert!(sneak.exists(), "the undeclared write still happens on disk...");
    // ...but the cache only ever learns about declared outputs: nothing
    // in the action result names `sneak.bin`, so a future consumer can
    // never depend on it through the cache.
}

#[test]
fn tampered_cache_entry_is_rejected_and_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let id = TargetId::new("ws", "pkg", "only");

    let build_graph = || {
        let mut graph = BuildGraph::new(ConstructionMode::Deferred);
        graph.add_target(exec_target(id.clone(), vec!["true"], &[])).unwrap();
        graph
    };

    let config = EngineConfig::new(cache_dir.clone(), dir.path().to_path_buf());
    let engine = Engine::open(build_graph(), registry(), config.clone()).unwrap();
    let cold = engine.run();
    assert_eq!(cold.summary.succeeded, 1);

    let entries_dir = cache_dir.join("entries");
    let mut tampered = false;
    for entry in walk_files(&entries_dir) {
        if entry.extension().and_then(|e| e.to_str()) == Some("tmp") {
            continue;
        }
        let mut bytes = std::fs::read(&entry).unwrap();
        if bytes.is_empty() {
            continue;
        }
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&entry, bytes).unwrap();
        tampered = true;
    }
    assert!(tampered, "expected at least one on-disk entry to flip a byte in");

    let engine = Engine::open(build_graph(), registry(), config).unwrap();
    let collector = Collector::new();
    engine.event_bus().subscribe(EventMask::default(), collector.clone());

    let warm = engine.run();
    assert_eq!(warm.exit_code, 0);
    assert_eq!(warm.summary.succeeded, 1, "a tampered entry must be treated as a miss and rebuilt");

    let warned = collector.events().iter().any(|e| {
        matches!(e, Event::Message { level, .. } if *level == kiln_events::MessageLevel::Warning)
    });
    assert!(warned, "a tampered entry must raise a warning event");
}

fn walk_files(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_files(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[test]
fn node_that_fails_once_then_succeeds_retries_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let id = TargetId::new("ws", "pkg", "flaky");

    let script = format!(
        "if [ -f {marker} ]; then exit 0; else touch {marker}; exit 1; fi",
        marker = marker.display()
    );
    let mut graph = BuildGraph::new(ConstructionMode::Deferred);
    graph
        .add_target(exec_target(id.clone(), vec!["sh", "-c", &script], &[]))
        .unwrap();

    let mut config = EngineConfig::new(dir.path().join("cache"), dir.path().to_path_buf());
    // A cached failure is normally trusted for ten minutes; retries
    // inside one build must bypass that or they'd just replay the
    // cached failure. Pair a near-zero TTL with a backoff that crosses
    // a whole second so the failure is provably expired by retry time.
    config.action_cache_failure_ttl_secs = 0;
    config.retry_policy.max_attempts = 3;
    config.retry_policy.base_delay = std::time::Duration::from_millis(1100);

    let engine = Engine::open(graph, registry(), config).unwrap();
    let collector = Collector::new();
    engine.event_bus().subscribe(EventMask::default(), collector.clone());

    let outcome = engine.run();
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.summary.succeeded, 1);

    let node = engine.graph().node(&id).unwrap();
    assert_eq!(node.retry_attempts(), 1);

    let events = collector.events();
    let failed = position_of(&events, is_failed(&id)).unwrap();
    let started_again = position_of(&events[failed + 1..], is_started(&id)).unwrap() + failed + 1;
    let completed = position_of(&events[started_again + 1..], is_completed(&id)).unwrap()
        + started_again
        + 1;
    assert!(failed < started_again);
    assert!(started_again < completed);
}
