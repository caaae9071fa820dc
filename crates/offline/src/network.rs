//! Connectivity detection and transition notifications.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;

/// Active "is the remote authority reachable" check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// `Ok(())` when reachable. Any error counts as offline.
    async fn probe(&self) -> anyhow::Result<()>;
}

/// Probe with a settable answer, for tests/dev and for hosts that only have
/// push-based signals.
#[derive(Debug, Default)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn probe(&self) -> anyhow::Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("static probe reports offline")
        }
    }
}

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct MonitorInner {
    probe: Arc<dyn ConnectivityProbe>,
    probe_timeout: Duration,
    last_known: AtomicBool,
    /// Held across swap and fan-out so callbacks see transitions in order.
    report_gate: Mutex<()>,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

/// Tracks last-known connectivity and notifies subscribers of transitions.
///
/// Starts out offline until the first probe or report. Cheap to clone.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl core::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, probe_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                probe,
                probe_timeout,
                last_known: AtomicBool::new(false),
                report_gate: Mutex::new(()),
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Last-known connectivity (no probe).
    pub fn is_online(&self) -> bool {
        self.inner.last_known.load(Ordering::SeqCst)
    }

    /// Probe now, record the result and return it.
    ///
    /// A probe that errors or exceeds the probe timeout reads as offline.
    pub async fn check_now(&self) -> bool {
        let online = match tokio::time::timeout(self.inner.probe_timeout, self.inner.probe.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::debug!("connectivity probe failed: {err:#}");
                false
            }
            Err(_) => {
                tracing::debug!("connectivity probe timed out after {:?}", self.inner.probe_timeout);
                false
            }
        };

        self.report(online);
        online
    }

    /// Record an observed connectivity value (e.g. from an OS signal).
    ///
    /// Subscribers fire only if the value differs from the last-known one.
    /// Concurrent reports are serialized, so the last callback delivered
    /// always matches [`is_online`](Self::is_online). Callbacks must not call
    /// `report` themselves.
    pub fn report(&self, online: bool) {
        let _gate = match self.inner.report_gate.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = self.inner.last_known.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        if online {
            tracing::info!("network: online");
        } else {
            tracing::warn!("network: offline");
        }

        // Outside the subscriber lock so callbacks may (un)subscribe.
        let callbacks: Vec<Callback> = match self.inner.subscribers.lock() {
            Ok(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(_) => return,
        };
        for cb in callbacks {
            cb(online);
        }
    }

    /// Register `callback` for every transition; dropping the returned
    /// [`Subscription`] unregisters it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subs) = self.inner.subscribers.lock() {
            subs.push((id, Arc::new(callback)));
        }
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Disposer returned by [`NetworkMonitor::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    monitor: Weak<MonitorInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            if let Ok(mut subs) = inner.subscribers.lock() {
                subs.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
