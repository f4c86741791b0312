//! Change notifications.
//!
//! Every published snapshot is handed to one dispatcher thread, which
//! re-runs each subscribed query against it and calls the listener with the
//! difference to the previous results. Commits never wait for listeners.


use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use ahash::AHashSet;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::database::Snapshot;
use crate::query::{CompiledQuery, Query};
use crate::record::RowKey;

/// What changed in a query's results between two deliveries.
///
/// Keys in `insertions` and `modifications` are present in `results`; keys in
/// `deletions` are not. A row counts as modified when its own values changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    pub version: u64,
    pub insertions: Vec<RowKey>,
    pub deletions: Vec<RowKey>,
    pub modifications: Vec<RowKey>,
    /// Complete results at `version`
    pub results: Vec<RowKey>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }
}

pub(crate) type Listener = Box<dyn FnMut(&ChangeSet) + Send>;

struct Watch {
    query: Query,
    compiled: Option<CompiledQuery>,
    last: Arc<Snapshot>,
    results: Vec<RowKey>,
    listener: Listener,
}

struct Subscriber {
    id: u64,
    cancelled: AtomicBool,
    watch: Mutex<Watch>,
}

enum Message {
    Commit(Arc<Snapshot>),
    Terminate,
}

#[derive(Default)]
struct Progress {
    published: u64,
    dispatched: u64,
}

struct Registry {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    progress: Mutex<Progress>,
    idle: Condvar,
    next_id: AtomicU64,
}

pub(crate) struct Notifier {
    registry: Arc<Registry>,
    sender: Mutex<Option<Sender<Message>>>,
    worker: Option<JoinHandle<()>>,
}

impl Notifier {
    pub(crate) fn new() -> std::io::Result<Self> {
        let registry = Arc::new(Registry {
            subscribers: Mutex::new(Vec::new()),
            progress: Mutex::new(Progress::default()),
            idle: Condvar::new(),
            next_id: AtomicU64::new(1),
        });
        let (sender, receiver) = channel();
        let worker = {
            let registry = Arc::clone(&registry);
            thread::Builder::new()
                .name("tightstore-notify".to_string())
                .spawn(move || dispatch_loop(&registry, receiver))?
        };
        Ok(Self {
            registry,
            sender: Mutex::new(Some(sender)),
            worker: Some(worker),
        })
    }

    /// Queue a committed snapshot for delivery
    pub(crate) fn publish(&self, snapshot: Arc<Snapshot>) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        self.registry.progress.lock().published += 1;
        if sender.send(Message::Commit(snapshot)).is_err() {
            warn!("notification dispatcher is gone");
            let mut progress = self.registry.progress.lock();
            progress.dispatched = progress.published;
            self.registry.idle.notify_all();
        }
    }

    /// Watch `query`; deliveries start with the first commit after `baseline`
    pub(crate) fn subscribe(&self, query: Query, baseline: Arc<Snapshot>, listener: Listener) -> Subscription {
        let compiled = query.compile(baseline.schema()).ok();
        let results = compiled
            .as_ref()
            .and_then(|c| c.execute(&baseline).ok())
            .map(|r| r.into_keys())
            .unwrap_or_default();
        let subscriber = Arc::new(Subscriber {
            id: self.registry.next_id.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
            watch: Mutex::new(Watch {
                query,
                compiled,
                last: baseline,
                results,
                listener,
            }),
        });
        self.registry.subscribers.lock().push(Arc::clone(&subscriber));
        debug!(subscriber = subscriber.id, "subscribed");
        Subscription {
            subscriber,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Block until everything published so far has been dispatched
    pub(crate) fn wait_idle(&self) {
        let mut progress = self.registry.progress.lock();
        let target = progress.published;
        while progress.dispatched < target {
            self.registry.idle.wait(&mut progress);
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Message::Terminate);
        }
        if let Some(worker) = self.worker.take() {
            // A listener holding the last handle drops it on the dispatcher itself
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

fn dispatch_loop(registry: &Registry, receiver: Receiver<Message>) {
    while let Ok(Message::Commit(snapshot)) = receiver.recv() {
        let subscribers: Vec<Arc<Subscriber>> = registry.subscribers.lock().clone();
        for subscriber in subscribers {
            deliver(&subscriber, &snapshot);
        }
        let mut progress = registry.progress.lock();
        progress.dispatched += 1;
        registry.idle.notify_all();
    }
    debug!("notification dispatcher stopped");
}

fn deliver(subscriber: &Subscriber, snapshot: &Arc<Snapshot>) {
    let mut watch = subscriber.watch.lock();
    if subscriber.cancelled.load(Ordering::Acquire) || snapshot.version() <= watch.last.version() {
        return;
    }

    let valid = watch
        .compiled
        .as_ref()
        .is_some_and(|c| c.is_valid_for(snapshot.schema()));
    if !valid {
        watch.compiled = match watch.query.compile(snapshot.schema()) {
            Ok(compiled) => Some(compiled),
            Err(err) => {
                warn!(subscriber = subscriber.id, error = %err, "query no longer compiles");
                watch.last = Arc::clone(snapshot);
                return;
            }
        };
    }
    let Some(compiled) = watch.compiled.as_ref() else {
        return;
    };
    let results = match compiled.execute(snapshot) {
        Ok(results) => results.into_keys(),
        Err(err) => {
            warn!(subscriber = subscriber.id, error = %err, "query failed");
            watch.last = Arc::clone(snapshot);
            return;
        }
    };

    let changes = diff(
        compiled.table_name(),
        &watch.last,
        snapshot,
        &watch.results,
        results,
    );
    watch.last = Arc::clone(snapshot);
    watch.results = changes.results.clone();

    // Coalesce versions that left these results untouched
    if changes.is_empty() && !changes.reordered {
        return;
    }
    let changes = changes.into_change_set(snapshot.version());
    let outcome = catch_unwind(AssertUnwindSafe(|| (watch.listener)(&changes)));
    if outcome.is_err() {
        warn!(subscriber = subscriber.id, version = changes.version, "listener panicked");
    }
}

struct Diff {
    insertions: Vec<RowKey>,
    deletions: Vec<RowKey>,
    modifications: Vec<RowKey>,
    results: Vec<RowKey>,
    /// Same rows in a different order
    reordered: bool,
}

impl Diff {
    fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }

    fn into_change_set(self, version: u64) -> ChangeSet {
        ChangeSet {
            version,
            insertions: self.insertions,
            deletions: self.deletions,
            modifications: self.modifications,
            results: self.results,
        }
    }
}

fn diff(table: &str, old: &Snapshot, new: &Snapshot, before: &[RowKey], after: Vec<RowKey>) -> Diff {
    let old_set: AHashSet<RowKey> = before.iter().copied().collect();
    let new_set: AHashSet<RowKey> = after.iter().copied().collect();

    let insertions = after.iter().copied().filter(|k| !old_set.contains(k)).collect();
    let deletions = before.iter().copied().filter(|k| !new_set.contains(k)).collect();

    let untouched = match (old.schema().find_table(table), new.schema().find_table(table)) {
        (Some(a), Some(b)) => match (old.tables.get(a), new.tables.get(b)) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        },
        _ => false,
    };
    let modifications = if untouched {
        Vec::new()
    } else {
        after
            .iter()
            .copied()
            .filter(|k| old_set.contains(k))
            .filter(|k| match (old.row(table, *k), new.row(table, *k)) {
                (Ok(a), Ok(b)) => a != b,
                _ => true,
            })
            .collect()
    };

    let reordered = before != after.as_slice();
    Diff {
        insertions,
        deletions,
        modifications,
        results: after,
        reordered,
    }
}

/// Handle to a listener registered with [`Database::subscribe`].
///
/// Dropping the handle cancels the subscription.
///
/// [`Database::subscribe`]: crate::database::Database::subscribe
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Stop deliveries. A delivery already running completes.
    pub fn cancel(&self) {
        if self.subscriber.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry
                .subscribers
                .lock()
                .retain(|s| !Arc::ptr_eq(s, &self.subscriber));
        }
        debug!(subscriber = self.subscriber.id, "unsubscribed");
    }

    pub fn is_active(&self) -> bool {
        !self.subscriber.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.subscriber.id)
            .field("active", &self.is_active())
            .finish()
    }
}
