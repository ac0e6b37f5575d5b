//! Single-threaded notification passes replayed onto an owner-side view.

use std::sync::Arc;

use changefeed_core::memory::{Cell, ColumnKind, MemoryEngine};
use changefeed_core::{
    ColumnKey, ListNotifier, NotificationWorker, Notifier, ResultsNotifier, ResultsOrder, RowKey,
    Snapshot,
};
use ntest::timeout;
use serde_json::json;

use super::helpers::{head_rows, init_tracing, people, record, Collection, Pass, Received, View};

/// First pass and delivery. Callbacks only see an empty changeset, the
/// view starts out as the handed-over rows.
fn initial<N>(
    pass: &mut Pass<N>,
    engine: &MemoryEngine,
    worker: &NotificationWorker<N>,
    received: &Received,
) -> anyhow::Result<View>
where
    N: Notifier<Handover = Vec<RowKey>>,
{
    pass.run()?;
    anyhow::ensure!(
        worker.deliver(engine.snapshot().as_ref(), None),
        "initial handover not delivered"
    );
    assert_eq!(worker.call_callbacks(), 1);
    let first = received.lock().drain(..).collect::<Vec<_>>();
    assert!(first.iter().all(|n| n.changes().is_some_and(|c| c.is_empty())));
    Ok(View {
        rows: worker.delivered_payload().unwrap_or_default(),
    })
}

/// Runs one pass, delivers it on the owning side and brings `view` up to
/// date. Returns the number of callbacks invoked.
fn sync<N>(
    pass: &mut Pass<N>,
    engine: &MemoryEngine,
    worker: &NotificationWorker<N>,
    received: &Received,
    view: &mut View,
) -> anyhow::Result<usize>
where
    N: Notifier<Handover = Vec<RowKey>>,
{
    pass.run()?;
    anyhow::ensure!(
        worker.deliver(engine.snapshot().as_ref(), None),
        "handover for {} not delivered",
        engine.version()
    );
    let invoked = worker.call_callbacks();
    let current = worker.delivered_payload().unwrap_or_default();
    view.catch_up(received, &current);
    assert_eq!(view.rows, current);
    Ok(invoked)
}

#[test]
#[timeout(5000)]
fn test_results_view_follows_engine() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (table, keys) = people(&engine, 5)?;
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(table),
        Collection::new(),
    ));
    let received = record(&worker);
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));

    let mut view = initial(&mut pass, &engine, &worker, &received)?;
    assert_eq!(view.rows, keys);

    engine.write(|tx| {
        tx.create_row(table, vec![Cell::Value(json!("f"))])?;
        tx.create_row(table, vec![Cell::Value(json!("g"))])
    })?;
    assert_eq!(sync(&mut pass, &engine, &worker, &received, &mut view)?, 1);
    assert_eq!(view.rows, head_rows(&engine, table)?);

    engine.write(|tx| {
        tx.erase_row(table, keys[0])?;
        tx.erase_row(table, keys[3])
    })?;
    sync(&mut pass, &engine, &worker, &received, &mut view)?;
    assert_eq!(view.rows, head_rows(&engine, table)?);

    engine.write(|tx| tx.set_value(table, keys[2], ColumnKey(0), json!("renamed")))?;
    assert_eq!(sync(&mut pass, &engine, &worker, &received, &mut view)?, 1);
    assert_eq!(view.rows, head_rows(&engine, table)?);

    engine.write(|tx| tx.clear_table(table))?;
    sync(&mut pass, &engine, &worker, &received, &mut view)?;
    assert!(view.rows.is_empty());
    Ok(())
}

#[test]
#[timeout(5000)]
fn test_modification_reaches_callback() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (table, keys) = people(&engine, 3)?;
    let worker = Arc::new(NotificationWorker::new(
        ResultsNotifier::new(table).with_order(ResultsOrder::ByKey),
        Collection::new(),
    ));
    let received = record(&worker);
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));
    initial(&mut pass, &engine, &worker, &received)?;

    engine.write(|tx| tx.set_value(table, keys[1], ColumnKey(0), json!("b2")))?;
    pass.run()?;
    assert!(worker.deliver(engine.snapshot().as_ref(), None));
    assert_eq!(worker.call_callbacks(), 1);
    let notification = received.lock().pop();
    let changes = notification
        .as_ref()
        .and_then(|n| n.changes())
        .cloned()
        .unwrap_or_default();
    assert_eq!(changes.modifications.iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(changes.modifications_new.iter().collect::<Vec<_>>(), vec![1]);
    assert!(changes.insertions.is_empty());
    assert!(changes.deletions.is_empty());
    Ok(())
}

#[test]
#[timeout(5000)]
fn test_list_view_follows_engine() -> anyhow::Result<()> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    let (people_table, keys) = people(&engine, 6)?;
    let items = ColumnKey(1);
    let groups =
        engine.create_table("groups", vec![ColumnKind::Value, ColumnKind::List(people_table)])?;
    let (group, _) = engine.write(|tx| {
        tx.create_row(
            groups,
            vec![Cell::Value(json!("g")), Cell::List(keys[..3].to_vec())],
        )
    })?;

    let worker = Arc::new(NotificationWorker::new(
        ListNotifier::new(groups, group, items, people_table),
        Collection::new(),
    ));
    let received = record(&worker);
    let mut pass = Pass::new(Arc::clone(&engine), Arc::clone(&worker));
    let mut view = initial(&mut pass, &engine, &worker, &received)?;
    assert_eq!(view.rows, keys[..3].to_vec());

    let contents = |engine: &MemoryEngine| -> anyhow::Result<Vec<RowKey>> {
        let snapshot = engine.snapshot();
        let row = snapshot
            .find_row(groups, group)
            .ok_or_else(|| anyhow::anyhow!("group row missing"))?;
        Ok(snapshot.list(groups, row, items)?)
    };

    engine.write(|tx| {
        tx.list_insert(groups, group, items, 1, keys[4])?;
        tx.list_move(groups, group, items, 0, 3)?;
        tx.list_insert(groups, group, items, 0, keys[5])
    })?;
    sync(&mut pass, &engine, &worker, &received, &mut view)?;
    assert_eq!(view.rows, contents(&engine)?);

    engine.write(|tx| {
        tx.list_set(groups, group, items, 2, keys[3])?;
        tx.list_erase(groups, group, items, 0)
    })?;
    sync(&mut pass, &engine, &worker, &received, &mut view)?;
    assert_eq!(view.rows, contents(&engine)?);

    // Removing a listed person removes it from the list too.
    engine.write(|tx| tx.erase_row(people_table, keys[0]))?;
    sync(&mut pass, &engine, &worker, &received, &mut view)?;
    assert_eq!(view.rows, contents(&engine)?);

    engine.write(|tx| tx.list_clear(groups, group, items))?;
    sync(&mut pass, &engine, &worker, &received, &mut view)?;
    assert!(view.rows.is_empty());
    Ok(())
}
