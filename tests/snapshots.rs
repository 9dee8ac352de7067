use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use tabflow::prelude::*;
use tabflow::processors::COMPLETE_MARKER;

fn typed_rows() -> Vec<Row> {
    (0..3)
        .map(|i| {
            let mut r = Row::new();
            r.insert("n".to_string(), Value::Integer(i));
            r.insert("x".to_string(), Value::Number(i as f64 + 0.5));
            r.insert(
                "d".to_string(),
                Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1 + i as u32).unwrap()),
            );
            r
        })
        .collect()
}

#[test]
fn dump_then_load_round_trips_typed_values() {
    let dir = tempfile::tempdir().unwrap();

    let (written, _, stats) = Flow::new()
        .step(from_rows("r", typed_rows()))
        .step(dump_to_path(dir.path()))
        .results()
        .unwrap();
    assert_eq!(stats["count_of_rows"], serde_json::json!(3));
    assert!(dir.path().join(COMPLETE_MARKER).is_file());

    let (loaded, package, _) = Flow::new()
        .step(load(dir.path().to_string_lossy()))
        .results()
        .unwrap();
    assert_eq!(package.resource_names(), vec!["r"]);
    assert_eq!(loaded[0], written[0]);

    let r = package.get_resource("r").unwrap();
    assert_eq!(r.extra["count_of_rows"], serde_json::json!(3));
    assert!(r.extra["hash"].as_str().unwrap().len() == 64);
}

#[test]
fn load_filters_resources_by_name() {
    let dir = tempfile::tempdir().unwrap();
    Flow::new()
        .step(from_rows("a", typed_rows()))
        .step(from_rows("b", typed_rows()))
        .step(dump_to_path(dir.path()))
        .process()
        .unwrap();

    let (_, package, _) = Flow::new()
        .step(load(dir.path().to_string_lossy()).resources("b"))
        .results()
        .unwrap();
    assert_eq!(package.resource_names(), vec!["b"]);
}

#[test]
fn checkpoint_runs_the_prefix_exactly_once() {
    let root = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let run = |counter: Arc<AtomicUsize>| {
        Flow::new()
            .step(from_rows("r", typed_rows()))
            .step(Step::row(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .step(checkpoint("expensive").path(root.path()))
            .results()
            .unwrap()
    };

    let (first, _, _) = run(Arc::clone(&runs));
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(root.path().join("expensive").join(COMPLETE_MARKER).is_file());

    let (second, _, _) = run(Arc::clone(&runs));
    // Prefix untouched on the second run; output identical.
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(first, second);
}

#[test]
fn removing_the_marker_forces_a_recompute() {
    let root = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let run = |counter: Arc<AtomicUsize>| {
        Flow::new()
            .step(from_rows("r", typed_rows()))
            .step(Step::row(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .step(checkpoint("snap").path(root.path()))
            .process()
            .unwrap()
    };

    run(Arc::clone(&runs));
    std::fs::remove_file(root.path().join("snap").join(COMPLETE_MARKER)).unwrap();
    run(Arc::clone(&runs));
    assert_eq!(runs.load(Ordering::SeqCst), 6);
}

#[test]
fn cache_wraps_an_explicit_sub_flow() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cached");
    let runs = Arc::new(AtomicUsize::new(0));

    let run = |counter: Arc<AtomicUsize>| {
        let expensive = Flow::new()
            .step(from_rows("r", typed_rows()))
            .step(Step::row(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        Flow::new()
            .step(cache(expensive, &path))
            .step(sort_rows("{n}").reverse())
            .results()
            .unwrap()
    };

    let (first, _, _) = run(Arc::clone(&runs));
    let (second, _, _) = run(Arc::clone(&runs));
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(first, second);
    assert_eq!(first[0][0]["n"], Value::Integer(2));
}

#[test]
fn env_indirection_resolves_through_the_injected_lookup() {
    let dir = tempfile::tempdir().unwrap();
    Flow::new()
        .step(from_rows("r", typed_rows()))
        .step(dump_to_path(dir.path()))
        .process()
        .unwrap();

    let target = dir.path().to_string_lossy().into_owned();
    let (results, _, _) = Flow::new()
        .step(load("env://SNAPSHOT").lookup(move |name| {
            (name == "SNAPSHOT").then(|| target.clone())
        }))
        .results()
        .unwrap();
    assert_eq!(results[0].len(), 3);
}
