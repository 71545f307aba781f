//! Per-view realtime list synchronizer

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{decode_rows, ListSource, Record};
use crate::backend::{
    BackendError, ChangeEvent, ChangeFeed, DataStore, Subscription, Table,
};

/// Lifecycle of one mounted list.
///
/// `Unsubscribed → Subscribing → Synced ⇄ Refetching`; `Closed` from anywhere.
/// `Unsubscribed` after mount means the change feed is gone and the list is
/// no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsubscribed,
    Subscribing,
    Synced,
    Refetching,
    Closed,
}

enum Command {
    Refresh,
}

/// Local edit applied after a write acknowledged.
struct Overlay<R> {
    id: String,
    /// Last generation issued when the patch was made
    seen: u64,
    apply: Arc<dyn Fn(&mut R) + Send + Sync>,
}

impl<R: Record> Overlay<R> {
    fn apply_to(&self, rows: &mut [R]) -> bool {
        let mut touched = false;
        for row in rows.iter_mut().filter(|row| row.record_id() == self.id) {
            (self.apply)(row);
            touched = true;
        }
        touched
    }
}

struct Shared<R> {
    table: Table,
    rows: watch::Sender<Vec<R>>,
    state: watch::Sender<SyncState>,
    issued: AtomicU64,
    /// Highest generation whose fetch has finished, applied or not
    completed: AtomicU64,
    closed: AtomicBool,
    /// Also serializes publication against `close`.
    overlays: Mutex<Vec<Overlay<R>>>,
}

impl<R: Record> Shared<R> {
    fn set_state(&self, next: SyncState) {
        self.state.send_if_modified(|state| {
            if *state == SyncState::Closed || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// Records a fetch that finished without rows to publish.
    fn retire(&self, generation: u64) {
        let _overlays = self.overlays.lock().unwrap_or_else(PoisonError::into_inner);
        self.completed.fetch_max(generation, Ordering::SeqCst);
    }

    fn fetch_in_flight(&self) -> bool {
        self.issued.load(Ordering::SeqCst) > self.completed.load(Ordering::SeqCst)
    }

    /// Publishes a fetch result if it is still the newest one issued.
    fn apply(&self, generation: u64, mut rows: Vec<R>) -> bool {
        let mut overlays = self.overlays.lock().unwrap_or_else(PoisonError::into_inner);
        self.completed.fetch_max(generation, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let latest = self.issued.load(Ordering::SeqCst);
        if generation != latest {
            debug!(table = %self.table, generation, latest, "Discarding superseded fetch");
            return false;
        }

        // Fetches issued after a patch already reflect its write.
        overlays.retain(|overlay| overlay.seen >= generation);
        for overlay in overlays.iter() {
            overlay.apply_to(&mut rows);
        }

        self.rows.send_if_modified(|current| {
            if *current == rows {
                false
            } else {
                *current = rows;
                true
            }
        })
    }
}

/// Handle to one mounted list. Dropping it unmounts.
pub struct ListSynchronizer<R: Record> {
    shared: Arc<Shared<R>>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl<R: Record> ListSynchronizer<R> {
    /// Mounts `source`: subscribes to its table, then issues the first fetch.
    pub fn mount<S>(
        source: S,
        store: Arc<dyn DataStore>,
        feed: Arc<dyn ChangeFeed>,
        fetch_timeout: Duration,
    ) -> Self
    where
        S: ListSource<Row = R>,
    {
        let table = source.query().table;
        let shared = Arc::new(Shared {
            table,
            rows: watch::channel(Vec::new()).0,
            state: watch::channel(SyncState::Unsubscribed).0,
            issued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            overlays: Mutex::new(Vec::new()),
        });
        let (commands, inbox) = mpsc::unbounded_channel();

        let worker = Worker {
            source,
            shared: shared.clone(),
            store,
            fetch_timeout,
            fetches: JoinSet::new(),
        };
        let task = tokio::spawn(worker.run(feed, inbox));

        Self {
            shared,
            commands,
            task,
        }
    }

    pub fn watch(&self) -> watch::Receiver<Vec<R>> {
        self.shared.rows.subscribe()
    }

    #[cfg(test)]
    pub fn rows(&self) -> Vec<R> {
        self.shared.rows.borrow().clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> SyncState {
        *self.shared.state.borrow()
    }

    #[cfg(test)]
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.shared.state.subscribe()
    }

    #[cfg(test)]
    pub fn overlay_count(&self) -> usize {
        self.shared
            .overlays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Re-issues the bounded fetch outside of any notification.
    pub fn refresh(&self) {
        if self.commands.send(Command::Refresh).is_err() {
            debug!(table = %self.shared.table, "Refresh after unmount ignored");
        }
    }

    /// Optimistically edits row `id` after its write acknowledged.
    ///
    /// The edit is re-applied to any fetch issued before this call and dropped
    /// by the first fetch issued after it. A row that is not in view with no
    /// fetch outstanding needs no overlay. Returns whether the row is in view.
    pub fn patch<F>(&self, id: &str, edit: F) -> bool
    where
        F: Fn(&mut R) + Send + Sync + 'static,
    {
        let mut overlays = self
            .shared
            .overlays
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.closed.load(Ordering::SeqCst) {
            return false;
        }

        let overlay = Overlay {
            id: id.to_string(),
            seen: self.shared.issued.load(Ordering::SeqCst),
            apply: Arc::new(edit),
        };
        let mut in_view = false;
        self.shared.rows.send_if_modified(|rows| {
            let before = rows.clone();
            in_view = overlay.apply_to(rows);
            *rows != before
        });
        if in_view || self.shared.fetch_in_flight() {
            overlays.push(overlay);
        }
        in_view
    }

    /// Unmounts: no state changes after this returns.
    pub fn close(&self) {
        let _publication = self
            .shared
            .overlays
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.state.send_replace(SyncState::Closed);
        // Dropping the task drops the subscription and every in-flight fetch.
        self.task.abort();
        debug!(table = %self.shared.table, "List unmounted");
    }
}

impl<R: Record> Drop for ListSynchronizer<R> {
    fn drop(&mut self) {
        self.close();
    }
}

type FetchResult = (u64, Result<Vec<Value>, BackendError>);

struct Worker<S: ListSource> {
    source: S,
    shared: Arc<Shared<S::Row>>,
    store: Arc<dyn DataStore>,
    fetch_timeout: Duration,
    fetches: JoinSet<FetchResult>,
}

/// Next notification, or never when there is no subscription.
async fn next_change(subscription: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

const RESUBSCRIBE_MIN: Duration = Duration::from_millis(250);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Doubling delay between attempts to restore a lost subscription.
#[derive(Debug, Default)]
struct Resubscribe {
    attempts: u32,
    at: Option<Instant>,
}

impl Resubscribe {
    fn delay(attempts: u32) -> Duration {
        RESUBSCRIBE_MIN
            .saturating_mul(1u32 << attempts.min(16))
            .min(RESUBSCRIBE_MAX)
    }

    fn schedule(&mut self) -> Duration {
        let delay = Self::delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.at = Some(Instant::now() + delay);
        delay
    }

    fn clear(&mut self) {
        self.attempts = 0;
        self.at = None;
    }

    /// Fires at the scheduled time; never when nothing is scheduled.
    async fn due(at: Option<Instant>) {
        match at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

impl<S: ListSource> Worker<S> {
    async fn run(mut self, feed: Arc<dyn ChangeFeed>, mut inbox: mpsc::UnboundedReceiver<Command>) {
        let table = self.shared.table;
        self.shared.set_state(SyncState::Subscribing);

        let mut retry = Resubscribe::default();
        let mut subscription = match feed.subscribe(table).await {
            Ok(subscription) => {
                debug!(table = %subscription.table(), "Change subscription open");
                Some(subscription)
            }
            Err(e) => {
                let delay = retry.schedule();
                warn!(table = %table, error = %e, retry_in = ?delay, "Change subscription failed; list is not live yet");
                None
            }
        };
        self.issue();

        loop {
            tokio::select! {
                change = next_change(&mut subscription) => match change {
                    Some(event) => {
                        debug!(table = %table, kind = ?event.kind, "Change notification");
                        self.issue();
                    }
                    None => {
                        let delay = retry.schedule();
                        warn!(table = %table, retry_in = ?delay, "Change feed ended; list is not live until it resubscribes");
                        subscription = None;
                        self.settle(false);
                    }
                },
                () = Resubscribe::due(retry.at) => {
                    match tokio::time::timeout(self.fetch_timeout, feed.subscribe(table)).await {
                        Ok(Ok(restored)) => {
                            info!(table = %table, attempts = retry.attempts, "Change subscription restored");
                            subscription = Some(restored);
                            retry.clear();
                            // Changes made while unsubscribed were never announced.
                            self.issue();
                        }
                        Ok(Err(e)) => {
                            let delay = retry.schedule();
                            debug!(table = %table, error = %e, retry_in = ?delay, "Resubscribe failed");
                        }
                        Err(_) => {
                            let delay = retry.schedule();
                            debug!(table = %table, retry_in = ?delay, "Resubscribe timed out");
                        }
                    }
                }
                command = inbox.recv() => match command {
                    Some(Command::Refresh) => self.issue(),
                    None => break,
                },
                Some(joined) = self.fetches.join_next() => {
                    match joined {
                        Ok((generation, result)) => self.complete(generation, result),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => warn!(table = %table, error = %e, "Fetch task failed"),
                    }
                    self.settle(subscription.is_some());
                }
            }
        }
    }

    /// Starts a fetch tagged with a fresh generation.
    fn issue(&mut self) {
        let generation = self.shared.issued.fetch_add(1, Ordering::SeqCst) + 1;
        if generation > 1 {
            self.shared.set_state(SyncState::Refetching);
        }

        let query = self.source.query();
        let store = self.store.clone();
        let timeout = self.fetch_timeout;
        self.fetches.spawn(async move {
            let result = match tokio::time::timeout(timeout, store.select(&query)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Network(format!(
                    "{} fetch timed out after {:?}",
                    query.table, timeout
                ))),
            };
            (generation, result)
        });
    }

    fn complete(&self, generation: u64, result: Result<Vec<Value>, BackendError>) {
        let table = self.shared.table;
        match result.and_then(decode_rows::<S::Row>) {
            Ok(rows) => {
                let count = rows.len();
                if self.shared.apply(generation, rows) {
                    debug!(table = %table, generation, rows = count, "List updated");
                }
            }
            // The list stays as it was.
            Err(e) => {
                self.shared.retire(generation);
                if e.is_transient() {
                    warn!(table = %table, generation, error = %e, "Background fetch failed");
                } else {
                    error!(table = %table, generation, error = %e, "Background fetch rejected");
                }
            }
        }
    }

    fn settle(&self, live: bool) {
        if !self.fetches.is_empty() {
            return;
        }
        self.shared.set_state(if live {
            SyncState::Synced
        } else {
            SyncState::Unsubscribed
        });
    }
}
