//! Post-commit event dispatch
//!
//! The commit pipeline hands its events to the dispatcher after the
//! publish stage returns. A bounded queue decouples committers from
//! consumers; a dedicated worker thread drains it, fans each event out
//! to its typed subscribers, and runs any trigger handlers registered
//! for the table.
//!
//! Delivery failures are logged and never affect commit outcome. Events
//! of one commit arrive in registry order per table; there is no
//! cross-table ordering promise.

use crate::catalog::{TriggerDef, TriggerOn};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use lattice_txn::{CommitEvent, SchemaChangeEvent, TableChangeEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// A registered trigger body.
type TriggerBody = Box<dyn Fn(&TableChangeEvent) + Send + Sync>;

struct TriggerEntry {
    def: TriggerDef,
    body: TriggerBody,
}

#[derive(Default)]
struct Subscribers {
    table: Vec<Sender<TableChangeEvent>>,
    schema: Vec<Sender<SchemaChangeEvent>>,
    triggers: Vec<TriggerEntry>,
}

/// Typed post-commit channels plus the trigger worker.
pub struct EventDispatcher {
    queue: Sender<CommitEvent>,
    subscribers: Arc<RwLock<Subscribers>>,
    worker: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Start the dispatcher with a bounded queue of `depth` events.
    pub fn new(depth: usize) -> EventDispatcher {
        let (queue, incoming) = bounded::<CommitEvent>(depth.max(1));
        let subscribers: Arc<RwLock<Subscribers>> = Arc::new(RwLock::new(Subscribers::default()));
        let worker_subs = subscribers.clone();
        let worker = std::thread::Builder::new()
            .name("lattice-events".into())
            .spawn(move || drain(incoming, worker_subs))
            .expect("spawn event worker");
        EventDispatcher {
            queue,
            subscribers,
            worker: Some(worker),
        }
    }

    /// Subscribe to row-change events.
    pub fn subscribe_table_changes(&self) -> Receiver<TableChangeEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.write().table.push(tx);
        rx
    }

    /// Subscribe to schema-change events.
    pub fn subscribe_schema_changes(&self) -> Receiver<SchemaChangeEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.write().schema.push(tx);
        rx
    }

    /// Attach a body to a trigger definition. The body runs on the
    /// dispatch worker for every matching table change.
    pub fn register_trigger(
        &self,
        def: TriggerDef,
        body: impl Fn(&TableChangeEvent) + Send + Sync + 'static,
    ) {
        self.subscribers.write().triggers.push(TriggerEntry {
            def,
            body: Box::new(body),
        });
    }

    /// Detach every body registered under a trigger name (DROP TRIGGER).
    pub fn unregister_trigger(&self, name: &lattice_core::ObjectName) {
        self.subscribers
            .write()
            .triggers
            .retain(|t| &t.def.name != name);
    }

    /// Enqueue a commit's events. Blocks when the queue is full
    /// (backpressure on committers rather than unbounded growth).
    pub fn publish(&self, events: Vec<CommitEvent>) {
        for event in events {
            if self.queue.send(event).is_err() {
                warn!("event worker gone; dropping post-commit events");
                return;
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit.
        let (closed, _) = bounded(1);
        let _ = std::mem::replace(&mut self.queue, closed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn matches_trigger(def: &TriggerDef, event: &TableChangeEvent) -> bool {
    if def.table != event.table {
        return false;
    }
    match def.on {
        TriggerOn::Any => true,
        // An update journals rows on both sides.
        TriggerOn::Insert => !event.added.is_empty(),
        TriggerOn::Delete => !event.removed.is_empty(),
        TriggerOn::Update => !event.added.is_empty() && !event.removed.is_empty(),
    }
}

fn drain(incoming: Receiver<CommitEvent>, subscribers: Arc<RwLock<Subscribers>>) {
    while let Ok(event) = incoming.recv() {
        let mut subs = subscribers.write();
        match &event {
            CommitEvent::TableChange(change) => {
                subs.table.retain(|s| s.send(change.clone()).is_ok());
                for trigger in &subs.triggers {
                    if matches_trigger(&trigger.def, change) {
                        (trigger.body)(change);
                    }
                }
            }
            CommitEvent::SchemaChange(change) => {
                subs.schema.retain(|s| s.send(change.clone()).is_ok());
            }
        }
        debug!(commit_id = event.commit_id(), "event delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{ObjectName, TableId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn change(table: &str, added: Vec<u64>, removed: Vec<u64>) -> CommitEvent {
        CommitEvent::TableChange(TableChangeEvent {
            table: ObjectName::new("app", table),
            table_id: TableId(1),
            commit_id: 1,
            added,
            removed,
        })
    }

    #[test]
    fn table_subscription_receives_changes() {
        let dispatcher = EventDispatcher::new(8);
        let rx = dispatcher.subscribe_table_changes();
        dispatcher.publish(vec![change("t", vec![0], vec![])]);
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.added, vec![0]);
    }

    #[test]
    fn triggers_filter_by_table_and_kind() {
        let dispatcher = EventDispatcher::new(8);
        let inserts = Arc::new(AtomicUsize::new(0));
        let deletes = Arc::new(AtomicUsize::new(0));
        {
            let inserts = inserts.clone();
            dispatcher.register_trigger(
                TriggerDef {
                    name: ObjectName::new("app", "trg_ins"),
                    table: ObjectName::new("app", "t"),
                    on: TriggerOn::Insert,
                },
                move |_| {
                    inserts.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
        {
            let deletes = deletes.clone();
            dispatcher.register_trigger(
                TriggerDef {
                    name: ObjectName::new("app", "trg_del"),
                    table: ObjectName::new("app", "t"),
                    on: TriggerOn::Delete,
                },
                move |_| {
                    deletes.fetch_add(1, Ordering::SeqCst);
                },
            );
        }

        dispatcher.publish(vec![
            change("t", vec![0], vec![]),
            change("t", vec![], vec![1]),
            change("other", vec![2], vec![]),
        ]);
        drop(dispatcher); // join the worker, all events drained

        assert_eq!(inserts.load(Ordering::SeqCst), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_trigger_stops_delivery() {
        let dispatcher = EventDispatcher::new(8);
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            dispatcher.register_trigger(
                TriggerDef {
                    name: ObjectName::new("app", "trg"),
                    table: ObjectName::new("app", "t"),
                    on: TriggerOn::Any,
                },
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
        dispatcher.unregister_trigger(&ObjectName::new("app", "trg"));
        dispatcher.publish(vec![change("t", vec![0], vec![])]);
        drop(dispatcher);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let dispatcher = EventDispatcher::new(8);
        let rx = dispatcher.subscribe_table_changes();
        drop(rx);
        // Delivery to the dead receiver must not wedge the worker.
        dispatcher.publish(vec![change("t", vec![0], vec![])]);
        let rx2 = dispatcher.subscribe_table_changes();
        dispatcher.publish(vec![change("t", vec![1], vec![])]);
        let got = rx2.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.added, vec![1]);
    }
}
