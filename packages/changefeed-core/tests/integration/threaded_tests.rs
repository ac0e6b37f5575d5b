//! A background worker thread handing changes over to the owning thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use changefeed_core::memory::{Cell, MemoryEngine};
use changefeed_core::{NotificationWorker, Notifier, ResultsNotifier, Snapshot};
use ntest::timeout;
use serde_json::json;

use super::helpers::{head_rows, init_tracing, people, record, Collection, Pass, View};

/// Owner side: waits until the worker has handed over the engine's head
/// version, then runs the callbacks.
fn wait_for_head<N: Notifier>(worker: &NotificationWorker<N>, engine: &MemoryEngine) -> usize {
    while !worker.deliver(engine.snapshot().as_ref(), None) {
        thread::sleep(Duration::from_millis(1));
    }
    worker.call_callbacks()
}

#[test]
#[timeout(10000)]
fn test_background_worker_hands_over_every_version() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (table, _) = people(&engine, 3)?;
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(table),
        Collection::new(),
    ));
    let received = record(&worker);
    let stop = Arc::new(AtomicBool::new(false));

    let background = {
        let engine = Arc::clone(&engine);
        let worker = Arc::clone(&worker);
        let stop = Arc::clone(&stop);
        thread::spawn(move || -> anyhow::Result<usize> {
            let mut pass = Pass::new(Arc::clone(&engine), worker);
            pass.run()?;
            let mut passes = 1;
            while !stop.load(Ordering::SeqCst) {
                if engine.version() == pass.seen() {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                pass.run()?;
                passes += 1;
            }
            Ok(passes)
        })
    };

    assert_eq!(wait_for_head(&worker, &engine), 1);
    received.lock().clear();
    let mut view = View {
        rows: worker.delivered_payload().unwrap_or_default(),
    };

    for i in 0..20 {
        engine.write(|tx| {
            if i % 3 == 2 {
                let first = tx.snapshot().rows(table)?[0];
                tx.erase_row(table, first)
            } else {
                tx.create_row(table, vec![Cell::Value(json!(i))]).map(|_| ())
            }
        })?;
        assert_eq!(wait_for_head(&worker, &engine), 1);
        let current = worker.delivered_payload().unwrap_or_default();
        view.catch_up(&received, &current);
        assert_eq!(view.rows, head_rows(&engine, table)?);
        assert_eq!(worker.delivered_version(), Some(engine.version()));
    }

    stop.store(true, Ordering::SeqCst);
    let passes = background
        .join()
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
    assert!(passes >= 21, "only {} passes", passes);
    Ok(())
}

#[test]
#[timeout(10000)]
fn test_burst_of_writes_is_coalesced() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (table, _) = people(&engine, 2)?;
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(table),
        Collection::new(),
    ));
    let received = record(&worker);
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));
    pass.run()?;
    assert_eq!(wait_for_head(&worker, &engine), 1);
    received.lock().clear();
    let mut view = View {
        rows: worker.delivered_payload().unwrap_or_default(),
    };

    // The owner does not pick anything up while the worker runs ahead.
    let owner_version = engine.version();
    for i in 0..5 {
        engine.write(|tx| tx.create_row(table, vec![Cell::Value(json!(i))]))?;
        pass.run()?;
    }
    let head = engine.snapshot();
    assert!(head.version() > owner_version);
    assert!(worker.deliver(head.as_ref(), None));
    assert_eq!(worker.call_callbacks(), 1);

    let current = worker.delivered_payload().unwrap_or_default();
    view.catch_up(&received, &current);
    assert_eq!(view.rows.len(), 7);
    assert_eq!(view.rows, head_rows(&engine, table)?);
    Ok(())
}
