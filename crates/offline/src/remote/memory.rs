//! In-memory remote authority for tests/dev.
//!
//! Records every applied payload in order and can be scripted to fail,
//! stall, or serve fixed collection contents.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use clubsync_core::{ActionPayload, Collection, Records, RemoteError};

use super::RemoteAuthority;

#[derive(Debug, Clone)]
enum Scripted {
    Fail(RemoteError),
    Delay(Duration),
}

#[derive(Debug, Default)]
struct State {
    applied: Vec<ActionPayload>,
    script: VecDeque<Scripted>,
    collections: HashMap<Collection, Records>,
    list_error: Option<RemoteError>,
    calls: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` call fail with `error` (calls queue up FIFO).
    pub fn fail_next(&self, error: RemoteError) {
        self.with(|s| s.script.push_back(Scripted::Fail(error)));
    }

    /// Make the next `apply` call wait `delay` before succeeding.
    pub fn delay_next(&self, delay: Duration) {
        self.with(|s| s.script.push_back(Scripted::Delay(delay)));
    }

    /// Serve `records` from `list`.
    pub fn set_collection(&self, records: Records) {
        self.with(|s| {
            s.collections.insert(records.collection(), records);
        });
    }

    /// Make every `list` call fail with `error` (`None` restores it).
    pub fn set_list_error(&self, error: Option<RemoteError>) {
        self.with(|s| s.list_error = error);
    }

    /// Payloads accepted so far, in arrival order.
    pub fn applied(&self) -> Vec<ActionPayload> {
        self.with(|s| s.applied.clone())
    }

    /// Number of `apply` attempts, successful or not.
    pub fn apply_calls(&self) -> usize {
        self.with(|s| s.calls)
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl RemoteAuthority for InMemoryRemote {
    async fn list(&self, collection: Collection) -> Result<Records, RemoteError> {
        self.with(|s| match &s.list_error {
            Some(err) => Err(err.clone()),
            None => Ok(s
                .collections
                .get(&collection)
                .cloned()
                .unwrap_or_else(|| Records::empty(collection))),
        })
    }

    async fn apply(&self, payload: &ActionPayload) -> Result<(), RemoteError> {
        let step = self.with(|s| {
            s.calls += 1;
            s.script.pop_front()
        });

        match step {
            Some(Scripted::Fail(err)) => return Err(err),
            Some(Scripted::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        self.with(|s| s.applied.push(payload.clone()));
        Ok(())
    }
}
