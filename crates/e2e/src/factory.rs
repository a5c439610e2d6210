//! Session creation and teardown

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::driver::{DriverLauncher, LaunchOptions};
use crate::error::HarnessResult;
use crate::mode::ExecutionMode;
use crate::session::{Session, SessionStore, WorkerId};

/// Builds sessions for a worker and registers them in the store.
#[derive(Clone)]
pub struct SessionFactory {
    launcher: Arc<dyn DriverLauncher>,
    store: Arc<SessionStore>,
    config: Arc<HarnessConfig>,
}

impl SessionFactory {
    pub fn new(
        launcher: Arc<dyn DriverLauncher>,
        store: Arc<SessionStore>,
        config: Arc<HarnessConfig>,
    ) -> Self {
        Self {
            launcher,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Launch a browser for `worker`, register it, maximize the window and
    /// open the base URL.
    ///
    /// The session is registered before the window and navigation calls, so a
    /// failure there still leaves something for [`destroy_session`] to clean up.
    ///
    /// [`destroy_session`]: SessionFactory::destroy_session
    pub async fn create_session(
        &self,
        worker: WorkerId,
        mode: ExecutionMode,
    ) -> HarnessResult<Arc<Session>> {
        let options = LaunchOptions::for_mode(mode, &self.config.browser);
        let driver = self.launcher.launch(&options).await?;
        let session = Arc::new(Session::new(driver, mode, self.config.timing.clone()));

        if let Err(e) = self.store.register(worker, Arc::clone(&session)) {
            // Don't leak the browser we just started.
            if let Err(quit_err) = session.close().await {
                warn!(%worker, "Failed to close refused session: {}", quit_err);
            }
            return Err(e);
        }

        session.driver().maximize_window().await?;
        session.driver().navigate(&self.config.base_url).await?;

        info!(%worker, %mode, base_url = %self.config.base_url, "Browser session ready");
        Ok(session)
    }

    /// Quit the worker's browser and drop its store entry.
    ///
    /// Idempotent: returns `Ok(false)` when the worker has no session.
    pub async fn destroy_session(&self, worker: WorkerId) -> HarnessResult<bool> {
        let Some(session) = self.store.remove(worker) else {
            return Ok(false);
        };
        session.close().await?;
        info!(%worker, "Browser session closed");
        Ok(true)
    }
}
