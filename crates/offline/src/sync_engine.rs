//! Sequential, single-flight replay of the action queue.
//!
//! A drain pass:
//! 1. Takes a snapshot of the queue (FIFO). Actions enqueued later wait for the next pass.
//! 2. Replays the head, waits for the outcome, and only then moves on.
//! 3. On success removes the action; on a permanent error removes it and
//!    logs; on a retryable error (or timeout) stops and leaves the rest queued.
//!
//! Phase: `Idle` → `Syncing` → `Idle` (all processed) or `Error` (halted).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clubsync_core::{ActionPayload, CachedEntity, Collection, QueuedAction, RemoteError, SyncPhase};

use crate::remote::RemoteAuthority;
use crate::store::FailOpenStore;

/// Result of one drain request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Not attempted: effectively offline.
    Offline,
    /// Not attempted: another drain is in progress.
    AlreadyRunning,
    /// Stopped by shutdown before the next item.
    Cancelled { replayed: usize, discarded: usize, remaining: usize },
    /// Every snapshot item was replayed or discarded.
    Completed { replayed: usize, discarded: usize },
    /// A retryable failure stopped the pass.
    Halted { replayed: usize, discarded: usize, remaining: usize },
}

/// Progress reported to the engine's observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineUpdate {
    /// The phase changed; `last_sync` is the current value.
    Phase {
        phase: SyncPhase,
        last_sync: Option<DateTime<Utc>>,
    },
    /// Queue length after an action left the queue mid-drain.
    Pending(usize),
}

/// Observer of engine progress (used by the facade to publish status).
pub type EngineObserver = Arc<dyn Fn(EngineUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct EngineState {
    phase: SyncPhase,
    last_sync: Option<DateTime<Utc>>,
}

pub struct SyncEngine {
    store: Arc<FailOpenStore>,
    remote: Arc<dyn RemoteAuthority>,
    replay_timeout: Duration,
    /// Held for the whole pass; `try_lock` gives single-flight.
    in_flight: tokio::sync::Mutex<()>,
    state: Mutex<EngineState>,
    shutdown: AtomicBool,
    observer: Option<EngineObserver>,
}

impl core::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("phase", &self.phase())
            .field("replay_timeout", &self.replay_timeout)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<FailOpenStore>,
        remote: Arc<dyn RemoteAuthority>,
        replay_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            replay_timeout,
            in_flight: tokio::sync::Mutex::new(()),
            state: Mutex::new(EngineState::default()),
            shutdown: AtomicBool::new(false),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: EngineObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        self.snapshot().phase
    }

    /// Time of the last drain that finished without a retryable error.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.snapshot().last_sync
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Stop before the next queue item; later drains return `Cancelled`.
    ///
    /// A replay already in flight runs to completion.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Replay one payload directly, bounded by the replay timeout.
    pub async fn replay(&self, payload: &ActionPayload) -> Result<(), RemoteError> {
        match tokio::time::timeout(self.replay_timeout, self.remote.apply(payload)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::transient(format!(
                "no response within {:?}",
                self.replay_timeout
            ))),
        }
    }

    /// Run one drain pass over a snapshot of the queue.
    pub async fn drain(&self) -> DrainOutcome {
        let Ok(_flight) = self.in_flight.try_lock() else {
            tracing::debug!("drain requested while one is running; ignoring");
            return DrainOutcome::AlreadyRunning;
        };

        if self.shutdown.load(Ordering::SeqCst) {
            return DrainOutcome::Cancelled {
                replayed: 0,
                discarded: 0,
                remaining: self.store.queue_len().await,
            };
        }

        self.set_phase(SyncPhase::Syncing, None);
        let snapshot = self.store.dequeue_all().await;
        tracing::info!("draining {} queued action(s)", snapshot.len());

        let mut replayed = 0;
        let mut discarded = 0;

        for (index, action) in snapshot.iter().enumerate() {
            if self.shutdown.load(Ordering::SeqCst) {
                let remaining = snapshot.len() - index;
                tracing::info!(remaining, "drain cancelled by shutdown");
                self.set_phase(SyncPhase::Idle, None);
                return DrainOutcome::Cancelled {
                    replayed,
                    discarded,
                    remaining,
                };
            }

            match self.replay(&action.payload).await {
                Ok(()) => {
                    self.store.remove(action.id).await;
                    self.report_pending().await;
                    replayed += 1;
                    tracing::debug!(id = %action.id, kind = action.kind().as_str(), "replayed queued action");
                }
                Err(err) if err.is_retryable() => {
                    let remaining = snapshot.len() - index;
                    tracing::warn!(
                        id = %action.id,
                        kind = action.kind().as_str(),
                        remaining,
                        "drain halted: {err}"
                    );
                    self.set_phase(SyncPhase::Error, None);
                    return DrainOutcome::Halted {
                        replayed,
                        discarded,
                        remaining,
                    };
                }
                Err(err) => {
                    // Can never succeed; do not let it block the queue.
                    self.store.remove(action.id).await;
                    self.report_pending().await;
                    discarded += 1;
                    log_discarded(action, &err);
                }
            }
        }

        self.set_phase(SyncPhase::Idle, Some(Utc::now()));
        tracing::info!(replayed, discarded, "drain complete");
        DrainOutcome::Completed {
            replayed,
            discarded,
        }
    }

    /// Pull one collection from the remote and replace the local copy.
    pub async fn refresh(&self, collection: Collection) -> Result<usize, RemoteError> {
        let records = match tokio::time::timeout(self.replay_timeout, self.remote.list(collection)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RemoteError::transient(format!(
                    "listing {collection} timed out after {:?}",
                    self.replay_timeout
                )));
            }
        };

        if records.collection() != collection {
            return Err(RemoteError::rejected(format!(
                "asked for {collection}, got {}",
                records.collection()
            )));
        }

        let count = records.len();
        self.store.replace_records(records).await;
        Ok(count)
    }

    /// Refresh every cached family; failures are logged and skipped.
    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for collection in Collection::ALL {
            match self.refresh(collection).await {
                Ok(count) => {
                    tracing::debug!(%collection, count, "refreshed cache");
                    refreshed += 1;
                }
                Err(err) => tracing::warn!(%collection, "cache refresh failed: {err}"),
            }
        }
        refreshed
    }

    /// Refresh the collection holding `T`.
    pub async fn refresh_entity<T: CachedEntity>(&self) -> Result<usize, RemoteError> {
        self.refresh(T::COLLECTION).await
    }

    fn snapshot(&self) -> EngineState {
        match self.state.lock() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_phase(&self, phase: SyncPhase, synced_at: Option<DateTime<Utc>>) {
        let state = {
            let mut guard = match self.state.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.phase = phase;
            if synced_at.is_some() {
                guard.last_sync = synced_at;
            }
            *guard
        };

        self.notify(EngineUpdate::Phase {
            phase: state.phase,
            last_sync: state.last_sync,
        });
    }

    async fn report_pending(&self) {
        if self.observer.is_some() {
            let pending = self.store.queue_len().await;
            self.notify(EngineUpdate::Pending(pending));
        }
    }

    fn notify(&self, update: EngineUpdate) {
        if let Some(observer) = &self.observer {
            observer(update);
        }
    }
}

fn log_discarded(action: &QueuedAction, err: &RemoteError) {
    tracing::warn!(
        id = %action.id,
        kind = action.kind().as_str(),
        target = action.payload.target(),
        "discarding queued action rejected by remote: {err}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use crate::store::MemoryStore;
    use clubsync_core::{Event, OutgoingMessage, Records};

    fn message(text: &str) -> ActionPayload {
        ActionPayload::SendMessage(OutgoingMessage {
            message: text.into(),
            sender_name: "Ana".into(),
            sender_id: "u-1".into(),
        })
    }

    fn texts(payloads: &[ActionPayload]) -> Vec<String> {
        payloads
            .iter()
            .map(|p| match p {
                ActionPayload::SendMessage(m) => m.message.clone(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    async fn setup(messages: &[&str]) -> (Arc<FailOpenStore>, Arc<InMemoryRemote>, SyncEngine) {
        let store = Arc::new(FailOpenStore::new(Arc::new(MemoryStore::new())));
        for m in messages {
            store.enqueue(&QueuedAction::new(message(m))).await;
        }
        let remote = Arc::new(InMemoryRemote::new());
        let engine = SyncEngine::new(store.clone(), remote.clone(), Duration::from_secs(5));
        (store, remote, engine)
    }

    #[tokio::test]
    async fn drains_in_fifo_order_and_records_last_sync() {
        let (store, remote, engine) = setup(&["one", "two", "three"]).await;
        assert_eq!(engine.last_sync(), None);

        let outcome = engine.drain().await;

        assert_eq!(outcome, DrainOutcome::Completed { replayed: 3, discarded: 0 });
        assert_eq!(texts(&remote.applied()), vec!["one", "two", "three"]);
        assert_eq!(store.queue_len().await, 0);
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert!(engine.last_sync().is_some());
    }

    #[tokio::test]
    async fn retryable_failure_halts_and_keeps_the_rest() {
        let (store, remote, engine) = setup(&["one", "two", "three"]).await;
        remote.fail_next(RemoteError::transient("connection reset"));

        let outcome = engine.drain().await;

        assert_eq!(outcome, DrainOutcome::Halted { replayed: 0, discarded: 0, remaining: 3 });
        assert_eq!(remote.apply_calls(), 1);
        assert_eq!(store.queue_len().await, 3);
        assert_eq!(engine.phase(), SyncPhase::Error);
        assert_eq!(engine.last_sync(), None);

        // Next pass starts again from the head.
        let outcome = engine.drain().await;
        assert_eq!(outcome, DrainOutcome::Completed { replayed: 3, discarded: 0 });
        assert_eq!(texts(&remote.applied()), vec!["one", "two", "three"]);
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn permanent_failure_is_discarded_and_drain_continues() {
        let (store, remote, engine) = setup(&["bad", "good"]).await;
        remote.fail_next(RemoteError::rejected("validation failed"));

        let outcome = engine.drain().await;

        assert_eq!(outcome, DrainOutcome::Completed { replayed: 1, discarded: 1 });
        assert_eq!(texts(&remote.applied()), vec!["good"]);
        assert_eq!(store.queue_len().await, 0);
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn missing_table_counts_as_permanent() {
        let (store, remote, engine) = setup(&["orphan"]).await;
        remote.fail_next(RemoteError::not_found("relation chat_messages does not exist"));

        assert_eq!(engine.drain().await, DrainOutcome::Completed { replayed: 0, discarded: 1 });
        assert_eq!(store.queue_len().await, 0);
    }

    #[tokio::test]
    async fn hung_replay_times_out_as_retryable() {
        let store = Arc::new(FailOpenStore::new(Arc::new(MemoryStore::new())));
        store.enqueue(&QueuedAction::new(message("slow"))).await;
        let remote = Arc::new(InMemoryRemote::new());
        remote.delay_next(Duration::from_secs(60));
        let engine = SyncEngine::new(store.clone(), remote.clone(), Duration::from_millis(20));

        let outcome = engine.drain().await;

        assert_eq!(outcome, DrainOutcome::Halted { replayed: 0, discarded: 0, remaining: 1 });
        assert_eq!(store.queue_len().await, 1);
        assert_eq!(engine.phase(), SyncPhase::Error);
    }

    #[tokio::test]
    async fn concurrent_drains_run_once() {
        let (_store, remote, engine) = setup(&["one", "two"]).await;
        remote.delay_next(Duration::from_millis(50));

        let (a, b) = tokio::join!(engine.drain(), engine.drain());

        let outcomes = [a, b];
        assert!(outcomes.contains(&DrainOutcome::AlreadyRunning));
        assert!(outcomes.contains(&DrainOutcome::Completed { replayed: 2, discarded: 0 }));
        assert_eq!(remote.apply_calls(), 2);
    }

    #[tokio::test]
    async fn actions_enqueued_mid_drain_wait_for_next_pass() {
        let (store, remote, engine) = setup(&["first"]).await;
        remote.delay_next(Duration::from_millis(50));

        let late_store = store.clone();
        let (outcome, ()) = tokio::join!(engine.drain(), async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            late_store.enqueue(&QueuedAction::new(message("late"))).await;
        });

        assert_eq!(outcome, DrainOutcome::Completed { replayed: 1, discarded: 0 });
        assert_eq!(texts(&remote.applied()), vec!["first"]);
        assert_eq!(store.queue_len().await, 1);

        engine.drain().await;
        assert_eq!(texts(&remote.applied()), vec!["first", "late"]);
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_item() {
        let (store, remote, engine) = setup(&["one", "two"]).await;
        engine.shutdown();

        let outcome = engine.drain().await;

        assert_eq!(outcome, DrainOutcome::Cancelled { replayed: 0, discarded: 0, remaining: 2 });
        assert_eq!(remote.apply_calls(), 0);
        assert_eq!(store.queue_len().await, 2);
    }

    #[tokio::test]
    async fn observer_sees_syncing_then_idle() {
        let store = Arc::new(FailOpenStore::new(Arc::new(MemoryStore::new())));
        let remote = Arc::new(InMemoryRemote::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = SyncEngine::new(store, remote, Duration::from_secs(1)).with_observer(Arc::new(
            move |update| {
                if let EngineUpdate::Phase { phase, .. } = update {
                    sink.lock().unwrap().push(phase);
                }
            },
        ));

        engine.drain().await;

        assert_eq!(*seen.lock().unwrap(), vec![SyncPhase::Syncing, SyncPhase::Idle]);
    }

    #[tokio::test]
    async fn observer_sees_queue_shrink_per_item() {
        let store = Arc::new(FailOpenStore::new(Arc::new(MemoryStore::new())));
        for m in ["one", "two", "three"] {
            store.enqueue(&QueuedAction::new(message(m))).await;
        }
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_next(RemoteError::rejected("bad"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = SyncEngine::new(store, remote, Duration::from_secs(1)).with_observer(Arc::new(
            move |update| {
                if let EngineUpdate::Pending(n) = update {
                    sink.lock().unwrap().push(n);
                }
            },
        ));

        engine.drain().await;

        // Discards count as well as replays.
        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn refresh_replaces_cached_collection() {
        let (store, remote, engine) = setup(&[]).await;
        let at = Utc::now();
        let event = Event {
            id: "e-1".into(),
            title: "Quiz night".into(),
            description: None,
            date: at,
            location: None,
            capacity: Some(40),
            attendees: vec![],
            created_at: at,
            updated_at: at,
        };
        remote.set_collection(Records::Events(vec![event.clone()]));

        assert_eq!(engine.refresh_entity::<Event>().await, Ok(1));
        assert_eq!(store.read_all::<Event>().await, vec![event]);

        remote.set_list_error(Some(RemoteError::transient("down")));
        assert_eq!(engine.refresh_all().await, 0);
        assert_eq!(store.read_all::<Event>().await.len(), 1);
    }
}
