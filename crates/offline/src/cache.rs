//! The cache facade: the one entry point the rest of the app talks to.
//!
//! Reads come from the local store, writes either go straight to the remote
//! (when effectively online with an empty queue) or into the action queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clubsync_core::{
    ActionPayload, AdminAction, Announcement, CachedEntity, ChatMessage, Event, EventSignup,
    OutgoingMessage, QueuedAction, RemoteError, SyncStatus,
};
use tokio::sync::watch;

use crate::config::OfflineConfig;
use crate::network::{ConnectivityProbe, NetworkMonitor, Subscription};
use crate::remote::RemoteAuthority;
use crate::store::{self, FailOpenStore, LocalStore};
use crate::sync_engine::{DrainOutcome, EngineUpdate, SyncEngine};

/// What happened to a payload handed to [`CacheService::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the remote directly.
    Sent,
    /// Stored in the queue for a later drain.
    Queued,
    /// The remote refused it permanently; nothing was queued.
    Rejected(RemoteError),
}

pub struct CacheService {
    config: OfflineConfig,
    store: Arc<FailOpenStore>,
    engine: Arc<SyncEngine>,
    monitor: NetworkMonitor,
    force_offline: Arc<AtomicBool>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    _connectivity: Subscription,
}

impl core::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheService")
            .field("status", &*self.status_tx.borrow())
            .field("force_offline", &self.force_offline.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl CacheService {
    /// Wire a service over explicit collaborators.
    pub async fn new(
        config: OfflineConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteAuthority>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let store = Arc::new(FailOpenStore::new(local));
        let monitor = NetworkMonitor::new(probe, config.probe_timeout);
        let force_offline = Arc::new(AtomicBool::new(false));
        let (tx, _rx) = watch::channel(SyncStatus::default());
        let status_tx = Arc::new(tx);

        let observer_tx = status_tx.clone();
        let engine = SyncEngine::new(store.clone(), remote, config.replay_timeout).with_observer(
            Arc::new(move |update| match update {
                EngineUpdate::Phase { phase, last_sync } => observer_tx.send_modify(|s| {
                    s.sync_status = phase;
                    s.last_sync = last_sync;
                }),
                EngineUpdate::Pending(pending) => {
                    observer_tx.send_if_modified(|s| {
                        let changed = s.pending_actions != pending;
                        s.pending_actions = pending;
                        changed
                    });
                }
            }),
        );

        let connectivity_tx = status_tx.clone();
        let forced = force_offline.clone();
        let connectivity = monitor.subscribe(move |online| {
            let effective = online && !forced.load(Ordering::SeqCst);
            connectivity_tx.send_if_modified(|s| {
                let changed = s.is_online != effective;
                s.is_online = effective;
                changed
            });
        });

        let service = Self {
            config,
            store,
            engine: Arc::new(engine),
            monitor,
            force_offline,
            status_tx,
            _connectivity: connectivity,
        };
        // Queue may already hold actions from a previous run.
        service.publish_status().await;
        service
    }

    /// Pick the local backend from config and wire the service.
    pub async fn open(
        config: OfflineConfig,
        remote: Arc<dyn RemoteAuthority>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let local = store::select_backend(&config);
        Self::new(config, local, remote, probe).await
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Last-known connectivity with the force-offline override applied.
    pub fn is_effectively_online(&self) -> bool {
        self.monitor.is_online() && !self.force_offline.load(Ordering::SeqCst)
    }

    pub fn is_force_offline(&self) -> bool {
        self.force_offline.load(Ordering::SeqCst)
    }

    // ---- cached reads/writes ----

    pub async fn cache<T: CachedEntity>(&self, records: Vec<T>) -> bool {
        self.store.replace_all(records).await
    }

    pub async fn get_cached<T: CachedEntity>(&self) -> Vec<T> {
        self.store.read_all::<T>().await
    }

    pub async fn cache_events(&self, events: Vec<Event>) -> bool {
        self.cache(events).await
    }

    pub async fn cache_announcements(&self, announcements: Vec<Announcement>) -> bool {
        self.cache(announcements).await
    }

    pub async fn cache_messages(&self, messages: Vec<ChatMessage>) -> bool {
        self.cache(messages).await
    }

    pub async fn get_cached_events(&self) -> Vec<Event> {
        self.get_cached().await
    }

    pub async fn get_cached_announcements(&self) -> Vec<Announcement> {
        self.get_cached().await
    }

    pub async fn get_cached_messages(&self) -> Vec<ChatMessage> {
        self.get_cached().await
    }

    // ---- queued writes ----

    /// Append `payload` to the queue regardless of connectivity.
    ///
    /// Returns `false` only when the store is failing. Payloads the remote
    /// will refuse are still queued and get discarded at drain time.
    pub async fn enqueue(&self, payload: ActionPayload) -> bool {
        let action = QueuedAction::new(payload);
        let stored = self.store.enqueue(&action).await;
        if stored {
            tracing::debug!(id = %action.id, kind = action.kind().as_str(), "queued action");
        }
        self.publish_status().await;
        stored
    }

    pub async fn enqueue_message(&self, message: OutgoingMessage) -> bool {
        self.enqueue(ActionPayload::SendMessage(message)).await
    }

    pub async fn enqueue_event_signup(&self, signup: EventSignup) -> bool {
        self.enqueue(ActionPayload::EventSignup(signup)).await
    }

    pub async fn enqueue_admin_action(&self, action: AdminAction) -> bool {
        self.enqueue(ActionPayload::AdminAction(action)).await
    }

    /// Send directly when possible, otherwise queue.
    ///
    /// Direct sends only happen with an empty queue so replay order matches
    /// submission order.
    pub async fn submit(&self, payload: ActionPayload) -> SubmitOutcome {
        if let Err(err) = payload.validate() {
            return SubmitOutcome::Rejected(RemoteError::rejected(err.to_string()));
        }

        if !self.is_effectively_online() || self.store.queue_len().await > 0 {
            self.enqueue(payload).await;
            return SubmitOutcome::Queued;
        }

        match self.engine.replay(&payload).await {
            Ok(()) => SubmitOutcome::Sent,
            Err(err) if err.is_retryable() => {
                tracing::info!(kind = payload.kind().as_str(), "direct send failed, queueing: {err}");
                self.enqueue(payload).await;
                SubmitOutcome::Queued
            }
            Err(err) => SubmitOutcome::Rejected(err),
        }
    }

    // ---- sync control ----

    /// Drain the queue if effectively online.
    pub async fn trigger_sync(&self) -> DrainOutcome {
        if !self.is_effectively_online() {
            tracing::debug!("sync requested while offline; skipping");
            return DrainOutcome::Offline;
        }

        let outcome = self.engine.drain().await;
        self.publish_status().await;
        outcome
    }

    /// Toggle the manual offline override.
    ///
    /// Turning it off attempts a sync right away.
    pub async fn set_force_offline(&self, forced: bool) -> Option<DrainOutcome> {
        let previous = self.force_offline.swap(forced, Ordering::SeqCst);
        tracing::info!(forced, "force-offline override set");
        self.publish_status().await;

        if previous && !forced {
            Some(self.trigger_sync().await)
        } else {
            None
        }
    }

    /// Side effect of the network coming back.
    pub async fn on_reconnect(&self) -> DrainOutcome {
        if self.is_force_offline() {
            tracing::debug!("reconnected while forced offline; not syncing");
            return DrainOutcome::Offline;
        }

        let outcome = self.trigger_sync().await;
        if self.config.refresh_on_reconnect && outcome != DrainOutcome::Offline {
            self.refresh().await;
        }
        outcome
    }

    /// Pull every cached family from the remote; returns how many refreshed.
    pub async fn refresh(&self) -> usize {
        if !self.is_effectively_online() {
            return 0;
        }
        self.engine.refresh_all().await
    }

    // ---- housekeeping ----

    pub async fn clear_cache(&self) -> bool {
        let cleared = self.store.clear().await;
        self.publish_status().await;
        cleared
    }

    pub async fn set_user_data(&self, key: &str, value: &str) -> bool {
        self.store.set_user_data(key, value).await
    }

    pub async fn get_user_data(&self, key: &str) -> Option<String> {
        self.store.get_user_data(key).await
    }

    // ---- status ----

    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    async fn publish_status(&self) {
        let pending = self.store.queue_len().await;
        let online = self.is_effectively_online();
        let phase = self.engine.phase();
        let last_sync = self.engine.last_sync();

        self.status_tx.send_if_modified(|s| {
            let next = SyncStatus {
                is_online: online,
                sync_status: phase,
                last_sync,
                pending_actions: pending,
            };
            if *s == next {
                return false;
            }
            *s = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticProbe;
    use crate::remote::InMemoryRemote;
    use crate::store::{MemoryStore, SqliteStore};
    use clubsync_core::{Records, SyncPhase};

    struct Harness {
        service: CacheService,
        remote: Arc<InMemoryRemote>,
        probe: Arc<StaticProbe>,
    }

    async fn harness(online: bool) -> Harness {
        let remote = Arc::new(InMemoryRemote::new());
        let probe = Arc::new(StaticProbe::new(online));
        let service = CacheService::new(
            OfflineConfig::default(),
            Arc::new(MemoryStore::new()),
            remote.clone(),
            probe.clone(),
        )
        .await;
        service.monitor().check_now().await;
        Harness {
            service,
            remote,
            probe,
        }
    }

    fn message(text: &str) -> OutgoingMessage {
        OutgoingMessage {
            message: text.into(),
            sender_name: "Ana".into(),
            sender_id: "u-1".into(),
        }
    }

    #[tokio::test]
    async fn enqueue_updates_pending_count() {
        let h = harness(false).await;

        assert!(h.service.enqueue_message(message("hello")).await);
        assert!(h.service.enqueue_event_signup(EventSignup {
            event_id: "e-1".into(),
            user_id: "u-1".into(),
        })
        .await);

        let status = h.service.status();
        assert!(!status.is_online);
        assert_eq!(status.pending_actions, 2);
        assert_eq!(status.badge(), "Offline");
    }

    #[tokio::test]
    async fn enqueue_appends_even_payloads_the_remote_will_refuse() {
        let h = harness(false).await;

        assert!(h.service.enqueue_message(message("")).await);
        assert_eq!(h.service.status().pending_actions, 1);

        h.probe.set_online(true);
        h.service.monitor().check_now().await;
        h.remote.fail_next(RemoteError::rejected("message must not be empty"));

        let outcome = h.service.trigger_sync().await;
        assert_eq!(outcome, DrainOutcome::Completed { replayed: 0, discarded: 1 });
        assert_eq!(h.service.status().pending_actions, 0);
    }

    #[tokio::test]
    async fn submit_rejects_invalid_payload_locally() {
        let h = harness(true).await;

        let outcome = h.service.submit(ActionPayload::SendMessage(message(" "))).await;

        assert!(matches!(outcome, SubmitOutcome::Rejected(RemoteError::Rejected(_))));
        assert_eq!(h.remote.apply_calls(), 0);
        assert_eq!(h.service.status().pending_actions, 0);
    }

    #[tokio::test]
    async fn trigger_sync_offline_does_nothing() {
        let h = harness(false).await;
        h.service.enqueue_message(message("later")).await;

        assert_eq!(h.service.trigger_sync().await, DrainOutcome::Offline);
        assert_eq!(h.remote.apply_calls(), 0);
        assert_eq!(h.service.status().pending_actions, 1);
    }

    #[tokio::test]
    async fn force_offline_blocks_sync_until_released() {
        let h = harness(true).await;
        assert_eq!(h.service.set_force_offline(true).await, None);
        h.service.enqueue_message(message("held")).await;

        assert!(!h.service.status().is_online);
        assert_eq!(h.service.trigger_sync().await, DrainOutcome::Offline);
        assert_eq!(h.service.on_reconnect().await, DrainOutcome::Offline);

        let released = h.service.set_force_offline(false).await;
        assert_eq!(released, Some(DrainOutcome::Completed { replayed: 1, discarded: 0 }));
        let status = h.service.status();
        assert!(status.is_online);
        assert_eq!(status.pending_actions, 0);
        assert_eq!(status.sync_status, SyncPhase::Idle);
        assert!(status.last_sync.is_some());
    }

    #[tokio::test]
    async fn submit_goes_direct_when_online_and_queue_empty() {
        let h = harness(true).await;

        let outcome = h.service.submit(ActionPayload::SendMessage(message("now"))).await;

        assert_eq!(outcome, SubmitOutcome::Sent);
        assert_eq!(h.remote.applied().len(), 1);
        assert_eq!(h.service.status().pending_actions, 0);
    }

    #[tokio::test]
    async fn submit_queues_behind_existing_actions() {
        let h = harness(false).await;
        h.service.enqueue_message(message("first")).await;
        h.probe.set_online(true);
        h.service.monitor().check_now().await;

        let outcome = h.service.submit(ActionPayload::SendMessage(message("second"))).await;

        assert_eq!(outcome, SubmitOutcome::Queued);
        assert_eq!(h.remote.apply_calls(), 0);
        assert_eq!(h.service.status().pending_actions, 2);
    }

    #[tokio::test]
    async fn submit_falls_back_to_queue_on_transient_failure() {
        let h = harness(true).await;
        h.remote.fail_next(RemoteError::transient("503"));

        let outcome = h.service.submit(ActionPayload::SendMessage(message("retry me"))).await;

        assert_eq!(outcome, SubmitOutcome::Queued);
        assert_eq!(h.service.status().pending_actions, 1);
    }

    #[tokio::test]
    async fn submit_surfaces_permanent_rejection() {
        let h = harness(true).await;
        h.remote.fail_next(RemoteError::rejected("banned word"));

        let outcome = h.service.submit(ActionPayload::SendMessage(message("nope"))).await;

        assert!(matches!(outcome, SubmitOutcome::Rejected(RemoteError::Rejected(_))));
        assert_eq!(h.service.status().pending_actions, 0);
    }

    #[tokio::test]
    async fn reconnect_drains_then_refreshes() {
        let h = harness(false).await;
        h.service.enqueue_message(message("queued")).await;
        h.remote.set_collection(Records::ChatMessages(vec![ChatMessage {
            id: "m-1".into(),
            message: "queued".into(),
            sender_name: "Ana".into(),
            sender_id: "u-1".into(),
            timestamp: chrono::Utc::now(),
            synced: true,
        }]));

        h.probe.set_online(true);
        h.service.monitor().check_now().await;
        let outcome = h.service.on_reconnect().await;

        assert_eq!(outcome, DrainOutcome::Completed { replayed: 1, discarded: 0 });
        assert_eq!(h.service.get_cached_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn watch_sees_connectivity_changes() {
        let h = harness(false).await;
        let mut rx = h.service.watch_status();
        rx.borrow_and_update();

        h.service.monitor().report(true);

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_online);
    }

    #[tokio::test]
    async fn corrupt_queue_row_does_not_pin_the_pending_count() {
        let sqlite = Arc::new(SqliteStore::in_memory());
        let pool = sqlite.get_pool().await.unwrap();
        sqlx::query(
            "INSERT INTO sync_queue (id, action, table_name, data, timestamp) VALUES ('x', 'quiz_answer', 'quiz', '{}', '2024-01-01T00:00:00.000000000Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let remote = Arc::new(InMemoryRemote::new());
        let service = CacheService::new(
            OfflineConfig::default(),
            sqlite,
            remote.clone(),
            Arc::new(StaticProbe::new(true)),
        )
        .await;
        service.monitor().check_now().await;
        service.enqueue_message(message("valid")).await;
        assert_eq!(service.status().pending_actions, 2);

        let outcome = service.trigger_sync().await;

        assert_eq!(outcome, DrainOutcome::Completed { replayed: 1, discarded: 0 });
        let status = service.status();
        assert_eq!(status.pending_actions, 0);
        assert_eq!(status.badge(), "Online");
        assert_eq!(remote.apply_calls(), 1);
    }

    #[tokio::test]
    async fn user_data_and_clear() {
        let h = harness(false).await;
        assert!(h.service.set_user_data("display_name", "Ana").await);
        h.service.enqueue_message(message("x")).await;

        assert_eq!(h.service.get_user_data("display_name").await.as_deref(), Some("Ana"));
        assert!(h.service.clear_cache().await);
        assert_eq!(h.service.get_user_data("display_name").await, None);
        assert_eq!(h.service.status().pending_actions, 0);
    }
}
