//! Background worker: polls connectivity and syncs on reconnect.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};

use crate::cache::CacheService;

/// Background task driving the [`CacheService`].
pub struct SyncWorker {
    service: Arc<CacheService>,
    shutdown: Arc<Notify>,
}

impl SyncWorker {
    pub fn new(service: Arc<CacheService>) -> Self {
        Self {
            service,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that can stop the worker after [`start`](Self::start) consumed it.
    pub fn handle(&self) -> SyncWorkerHandle {
        SyncWorkerHandle {
            service: self.service.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Spawn the worker loop.
    ///
    /// - probes connectivity on every poll tick
    /// - runs the reconnect side effect on each offline → online transition
    /// - exits on shutdown
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let service = self.service;
        let shutdown = self.shutdown;

        tokio::spawn(async move {
            tracing::info!("background sync worker started");

            let (tx, mut transitions) = mpsc::unbounded_channel();
            let _subscription = service.monitor().subscribe(move |online| {
                let _ = tx.send(online);
            });

            let mut poll = tokio::time::interval(service.config().poll_interval);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("background sync worker received shutdown signal");
                        break;
                    }
                    _ = poll.tick() => {
                        let online = service.monitor().check_now().await;
                        tracing::trace!(online, "connectivity poll");
                    }
                    Some(online) = transitions.recv() => {
                        if !online {
                            continue;
                        }
                        let outcome = service.on_reconnect().await;
                        tracing::info!(?outcome, "reconnect sync finished");
                    }
                }
            }

            tracing::info!("background sync worker stopped");
        })
    }
}

/// Stops a running [`SyncWorker`].
#[derive(Clone)]
pub struct SyncWorkerHandle {
    service: Arc<CacheService>,
    shutdown: Arc<Notify>,
}

impl SyncWorkerHandle {
    /// Request graceful shutdown; the engine will not start another queue item.
    pub fn shutdown(&self) {
        self.service.engine().shutdown();
        // notify_one stores a permit if the loop is not currently waiting.
        self.shutdown.notify_one();
    }
}
