//! Listener ordering, propagation, and fault routing across the public API.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::json;

use onebot_driver::event::{FaultHandler, names};
use onebot_driver::{
    Error, Event, EventDispatcher, EventRegistry, ProcessDescriptor, ProcessManager, ProcessRole,
    Propagation,
};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn recorder(
    log: &Log,
    tag: &'static str,
    stop: bool,
) -> impl Fn(&mut Event) -> onebot_driver::Result<Propagation> + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |_: &mut Event| {
        log.lock().push(tag);
        Ok(if stop { Propagation::Stop } else { Propagation::Continue })
    }
}

#[test]
fn test_listeners_run_by_priority_then_insertion() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(EventRegistry::new());
    registry.add_event_listener("msg", recorder(&log, "low", false), 5);
    registry.add_event_listener("msg", recorder(&log, "high", false), 50);
    registry.add_event_listener("msg", recorder(&log, "mid-a", false), 20);
    registry.add_event_listener("msg", recorder(&log, "mid-b", false), 20);

    let dispatcher = EventDispatcher::new(
        Arc::clone(&registry),
        ProcessManager::with_role(ProcessRole::Worker, 1),
    );
    dispatcher.dispatch(&mut Event::custom("msg", json!(null)))?;

    assert_eq!(*log.lock(), ["high", "mid-a", "mid-b", "low"]);
    Ok(())
}

#[test]
fn test_distinct_priorities_through_dispatcher() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(EventRegistry::new());
    registry.add_event_listener("msg", recorder(&log, "cb1", false), 1);
    registry.add_event_listener("msg", recorder(&log, "cb2", false), 5);
    registry.add_event_listener("msg", recorder(&log, "cb3", false), 3);
    registry.add_event_listener("msg", recorder(&log, "cb4", false), 2);

    let dispatcher = EventDispatcher::new(registry, ProcessManager::new());
    dispatcher.dispatch(&mut Event::custom("msg", json!(null)))?;

    assert_eq!(*log.lock(), ["cb2", "cb3", "cb4", "cb1"]);
    Ok(())
}

#[test]
fn test_stop_prevents_lower_priorities() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(EventRegistry::new());
    registry.add_event_listener("msg", recorder(&log, "first", true), 30);
    registry.add_event_listener("msg", recorder(&log, "second", false), 10);

    let dispatcher = EventDispatcher::new(registry, ProcessManager::new());
    dispatcher.dispatch(&mut Event::custom("msg", json!(null)))?;

    assert_eq!(*log.lock(), ["first"]);
    Ok(())
}

#[test]
fn test_listeners_mutate_shared_payload() -> Result<()> {
    let registry = Arc::new(EventRegistry::new());
    registry.add_event_listener(
        "count",
        |event| {
            if let Some(value) = event.as_custom_mut() {
                value["seen"] = json!(value["seen"].as_u64().unwrap_or(0) + 1);
            }
            Ok(Propagation::Continue)
        },
        20,
    );
    registry.add_event_listener(
        "count",
        |event| {
            if let Some(value) = event.as_custom_mut() {
                value["seen"] = json!(value["seen"].as_u64().unwrap_or(0) * 10);
            }
            Ok(Propagation::Continue)
        },
        10,
    );

    let dispatcher = EventDispatcher::new(registry, ProcessManager::new());
    let mut event = Event::custom("count", json!({ "seen": 0 }));
    dispatcher.dispatch(&mut event)?;

    assert_eq!(event.as_custom(), Some(&json!({ "seen": 10 })));
    Ok(())
}

#[test]
fn test_faults_reach_the_handler_with_process() {
    let registry = Arc::new(EventRegistry::new());
    registry.add_event_listener(
        names::WORKER_START,
        |event| Err(Error::listener(event.name(), "boom")),
        20,
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: FaultHandler = Arc::new(move |error: &Error, process: &ProcessDescriptor| {
        sink.lock().push((error.to_string(), process.role, process.id));
    });

    let process = ProcessManager::with_role(ProcessRole::Worker, 2);
    let descriptor = process.descriptor();
    let dispatcher = EventDispatcher::new(registry, process).with_fault_handler(handler);

    let mut event = Event::process(names::WORKER_START, descriptor);
    let clean = dispatcher.dispatch_with_handler(&mut event);

    assert!(!clean);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].0.contains("boom"));
    assert_eq!((seen[0].1, seen[0].2), (ProcessRole::Worker, 2));
}

#[test]
fn test_removed_listeners_no_longer_run() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(EventRegistry::new());
    registry.add_event_listener("msg", recorder(&log, "gone", false), 20);
    registry.remove_event_listeners("msg");
    assert!(!registry.has_listeners("msg"));

    let dispatcher = EventDispatcher::new(registry, ProcessManager::new());
    dispatcher.dispatch(&mut Event::custom("msg", json!(null)))?;
    assert!(log.lock().is_empty());
    Ok(())
}
