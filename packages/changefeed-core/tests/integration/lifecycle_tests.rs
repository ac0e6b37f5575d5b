//! Failure delivery and callback lifecycle.

use std::sync::Arc;

use changefeed_core::memory::{Cell, MemoryEngine};
use changefeed_core::{NotificationWorker, NotifyError, ResultsNotifier, TableKey};
use ntest::timeout;
use serde_json::json;

use super::helpers::{init_tracing, people, record, Collection, Pass};

#[test]
#[timeout(5000)]
fn test_failure_reaches_every_callback_once() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    people(&engine, 1)?;
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(TableKey(42)),
        Collection::new(),
    ));
    let first = record(&worker);
    let second = record(&worker);
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));

    pass.run()?;
    assert!(worker.deliver(engine.snapshot().as_ref(), None));
    assert_eq!(worker.call_callbacks(), 2);
    for received in [&first, &second] {
        let errors: Vec<_> = received.lock().iter().filter_map(|n| n.error().cloned()).collect();
        assert_eq!(errors, vec![NotifyError::TableNotFound { table: TableKey(42) }]);
    }
    assert!(!worker.has_callbacks());

    // Nothing is listening any more.
    pass.run()?;
    assert!(!worker.deliver(engine.snapshot().as_ref(), None));
    assert_eq!(worker.call_callbacks(), 0);
    Ok(())
}

#[test]
#[timeout(5000)]
fn test_late_callback_starts_with_empty_changes() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (table, _) = people(&engine, 2)?;
    let collection = Collection::new();
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(table),
        collection.clone(),
    ));
    let early = record(&worker);
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));
    pass.run()?;
    assert!(worker.deliver(engine.snapshot().as_ref(), None));
    worker.call_callbacks();
    early.lock().clear();

    engine.write(|tx| tx.create_row(table, vec![Cell::Value(json!("c"))]))?;
    let late = record(&worker);
    assert_eq!(collection.wakes(), 1);
    pass.run()?;
    assert!(worker.deliver(engine.snapshot().as_ref(), None));
    assert_eq!(worker.call_callbacks(), 2);

    let early_changes = early.lock()[0].changes().cloned().unwrap_or_default();
    assert_eq!(early_changes.insertions.iter().collect::<Vec<_>>(), vec![2]);
    assert!(late.lock()[0].changes().is_some_and(|c| c.is_empty()));
    Ok(())
}

#[test]
#[timeout(5000)]
fn test_idle_worker_skips_until_observed() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (table, _) = people(&engine, 2)?;
    let collection = Collection::new();
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(table),
        collection.clone(),
    ));
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));

    pass.run()?;
    assert!(!worker.deliver(engine.snapshot().as_ref(), None));
    assert_eq!(collection.wakes(), 0);

    let received = record(&worker);
    assert_eq!(collection.wakes(), 1);
    engine.write(|tx| tx.create_row(table, vec![Cell::Value(json!("c"))]))?;
    pass.run()?;
    assert!(worker.deliver(engine.snapshot().as_ref(), None));
    assert_eq!(worker.call_callbacks(), 1);
    assert_eq!(worker.delivered_payload().map(|rows| rows.len()), Some(3));
    assert!(received.lock()[0].changes().is_some_and(|c| c.is_empty()));
    Ok(())
}

#[test]
#[timeout(5000)]
fn test_unregistered_worker_is_released_by_last_holder() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (table, _) = people(&engine, 1)?;
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(table),
        Collection::new(),
    ));
    record(&worker);
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));

    worker.unregister();
    // Work in flight still completes, it just goes nowhere.
    pass.run()?;
    assert!(!worker.deliver(engine.snapshot().as_ref(), None));

    let handle = Arc::clone(&worker);
    assert!(!NotificationWorker::release(handle));
    drop(pass);
    assert!(NotificationWorker::release(worker));
    Ok(())
}
