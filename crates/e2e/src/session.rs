//! Browser sessions and the per-worker session store

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::TimingConfig;
use crate::driver::BrowserDriver;
use crate::error::{DriverResult, HarnessError, HarnessResult};
use crate::interaction::{strategy_for, InteractionStrategy};
use crate::mode::ExecutionMode;

static NEXT_WORKER: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical execution thread (one running test class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        WorkerId(NEXT_WORKER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// One live browser plus the mode it was launched in.
pub struct Session {
    driver: Arc<dyn BrowserDriver>,
    mode: ExecutionMode,
    strategy: Box<dyn InteractionStrategy>,
    created_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(driver: Arc<dyn BrowserDriver>, mode: ExecutionMode, timing: TimingConfig) -> Self {
        Self {
            driver,
            mode,
            strategy: strategy_for(mode, timing),
            created_at: Utc::now(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn driver(&self) -> &dyn BrowserDriver {
        self.driver.as_ref()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn strategy(&self) -> &dyn InteractionStrategy {
        self.strategy.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Terminate the browser. Only the first call reaches the driver.
    pub async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.driver.quit().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Worker → session map. At most one session per worker.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<WorkerId, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` for `worker`; a second live session is refused.
    pub fn register(&self, worker: WorkerId, session: Arc<Session>) -> HarnessResult<()> {
        match self.sessions.entry(worker) {
            Entry::Occupied(_) => Err(HarnessError::SessionAlreadyActive(worker)),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Active session for `worker`; absence is a lifecycle bug.
    pub fn get(&self, worker: WorkerId) -> HarnessResult<Arc<Session>> {
        self.sessions
            .get(&worker)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(HarnessError::NoActiveSession(worker))
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.sessions.contains_key(&worker)
    }

    pub fn remove(&self, worker: WorkerId) -> Option<Arc<Session>> {
        self.sessions.remove(&worker).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;

    fn session(mode: ExecutionMode) -> Arc<Session> {
        Arc::new(Session::new(
            Arc::new(RecordingDriver::new()),
            mode,
            TimingConfig::immediate(),
        ))
    }

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(WorkerId::next(), WorkerId::next());
    }

    #[test]
    fn test_lookup_without_session_fails_fast() {
        let store = SessionStore::new();
        let worker = WorkerId::next();
        assert!(matches!(
            store.get(worker),
            Err(HarnessError::NoActiveSession(w)) if w == worker
        ));
    }

    #[test]
    fn test_second_registration_refused() {
        let store = SessionStore::new();
        let worker = WorkerId::next();
        store.register(worker, session(ExecutionMode::Interactive)).unwrap();
        assert!(matches!(
            store.register(worker, session(ExecutionMode::Interactive)),
            Err(HarnessError::SessionAlreadyActive(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_close_reaches_driver_once() {
        let driver = Arc::new(RecordingDriver::new());
        let session = Session::new(
            driver.clone(),
            ExecutionMode::Headless,
            TimingConfig::immediate(),
        );
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(driver.quit_count(), 1);
    }
}
