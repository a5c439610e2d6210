//! Mode-aware interaction primitives
//!
//! Interactive behaviour is the plain baseline. The headless strategy adds
//! compensations for known headless rendering problems on top of it:
//!
//! - native clicks intercepted by an overlay fall back to a script click
//! - `document.readyState` is polled and followed by a settle pause
//! - `scroll_into_view` forces a script scroll to the viewport center
//! - typing is followed by a short pause for async input validators
//!
//! The strategy is picked once when a [`Session`](crate::session::Session) is
//! created. Call sites go through [`Interactor`] and never branch on mode.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::TimingConfig;
use crate::driver::{BrowserDriver, Locator};
use crate::error::{DriverError, DriverResult, HarnessError, HarnessResult};
use crate::mode::ExecutionMode;
use crate::session::{Session, SessionStore, WorkerId};

#[async_trait]
pub trait InteractionStrategy: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Bound for element waits
    fn timeout(&self) -> Duration;

    fn poll_interval(&self) -> Duration;

    async fn click(&self, driver: &dyn BrowserDriver, target: &Locator) -> HarnessResult<()>;

    async fn wait_for_page_settled(&self, driver: &dyn BrowserDriver) -> HarnessResult<()>;

    async fn scroll_into_view(&self, driver: &dyn BrowserDriver, target: &Locator)
        -> HarnessResult<()>;

    async fn enter_text(
        &self,
        driver: &dyn BrowserDriver,
        target: &Locator,
        value: &str,
    ) -> HarnessResult<()>;
}

pub fn strategy_for(mode: ExecutionMode, timing: TimingConfig) -> Box<dyn InteractionStrategy> {
    match mode {
        ExecutionMode::Interactive => Box::new(InteractiveStrategy { timing }),
        ExecutionMode::Headless => Box::new(HeadlessStrategy { timing }),
    }
}

async fn clear_and_type(
    driver: &dyn BrowserDriver,
    target: &Locator,
    value: &str,
) -> DriverResult<()> {
    driver.clear(target).await?;
    driver.send_keys(target, value).await
}

/// Unmodified baseline behaviour.
pub struct InteractiveStrategy {
    timing: TimingConfig,
}

#[async_trait]
impl InteractionStrategy for InteractiveStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Interactive
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timing.interactive_timeout_ms)
    }

    fn poll_interval(&self) -> Duration {
        self.timing.poll_interval()
    }

    async fn click(&self, driver: &dyn BrowserDriver, target: &Locator) -> HarnessResult<()> {
        // A failed native click here is a real failure.
        driver.click(target).await?;
        Ok(())
    }

    async fn wait_for_page_settled(&self, _driver: &dyn BrowserDriver) -> HarnessResult<()> {
        Ok(())
    }

    async fn scroll_into_view(
        &self,
        _driver: &dyn BrowserDriver,
        _target: &Locator,
    ) -> HarnessResult<()> {
        Ok(())
    }

    async fn enter_text(
        &self,
        driver: &dyn BrowserDriver,
        target: &Locator,
        value: &str,
    ) -> HarnessResult<()> {
        clear_and_type(driver, target, value).await?;
        Ok(())
    }
}

/// Baseline plus headless compensations.
pub struct HeadlessStrategy {
    timing: TimingConfig,
}

#[async_trait]
impl InteractionStrategy for HeadlessStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Headless
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timing.headless_timeout_ms)
    }

    fn poll_interval(&self) -> Duration {
        self.timing.poll_interval()
    }

    async fn click(&self, driver: &dyn BrowserDriver, target: &Locator) -> HarnessResult<()> {
        match driver.click(target).await {
            Ok(()) => Ok(()),
            Err(DriverError::ClickIntercepted(reason)) => {
                debug!(%target, %reason, "Native click intercepted, using script click");
                driver.script_click(target).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_page_settled(&self, driver: &dyn BrowserDriver) -> HarnessResult<()> {
        let deadline = Instant::now() + self.timing.ready_state_bound();
        loop {
            if driver.ready_state().await? == "complete" {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    bound_ms = self.timing.ready_state_bound_ms,
                    "Page not ready within bound, continuing"
                );
                break;
            }
            sleep(self.timing.poll_interval()).await;
        }
        sleep(self.timing.settle_pause()).await;
        Ok(())
    }

    async fn scroll_into_view(
        &self,
        driver: &dyn BrowserDriver,
        target: &Locator,
    ) -> HarnessResult<()> {
        driver.scroll_into_view(target).await?;
        sleep(self.timing.scroll_pause()).await;
        Ok(())
    }

    async fn enter_text(
        &self,
        driver: &dyn BrowserDriver,
        target: &Locator,
        value: &str,
    ) -> HarnessResult<()> {
        clear_and_type(driver, target, value).await?;
        sleep(self.timing.input_settle_pause()).await;
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Missing and stale elements count as "not yet"; any other driver error ends
/// the wait. The condition is always checked at least once.
pub async fn wait_until<F, Fut>(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut condition: F,
) -> HarnessResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        match condition().await {
            Ok(true) => return Ok(()),
            Ok(false) | Err(DriverError::NoSuchElement(_)) | Err(DriverError::StaleElement(_)) => {}
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::Timeout {
                what: what.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        sleep(poll).await;
    }
}

/// Interaction handle bound to one worker's session.
#[derive(Clone)]
pub struct Interactor {
    store: Arc<SessionStore>,
    worker: WorkerId,
}

impl Interactor {
    pub fn new(store: Arc<SessionStore>, worker: WorkerId) -> Self {
        Self { store, worker }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    fn session(&self) -> HarnessResult<Arc<Session>> {
        self.store.get(self.worker)
    }

    /// Mode of the active session
    pub fn mode(&self) -> HarnessResult<ExecutionMode> {
        Ok(self.session()?.mode())
    }

    pub fn timeout(&self) -> HarnessResult<Duration> {
        Ok(self.session()?.strategy().timeout())
    }

    pub async fn click(&self, target: &Locator) -> HarnessResult<()> {
        let session = self.session()?;
        session.strategy().click(session.driver(), target).await
    }

    pub async fn wait_for_page_settled(&self) -> HarnessResult<()> {
        let session = self.session()?;
        session.strategy().wait_for_page_settled(session.driver()).await
    }

    pub async fn scroll_into_view(&self, target: &Locator) -> HarnessResult<()> {
        let session = self.session()?;
        session.strategy().scroll_into_view(session.driver(), target).await
    }

    pub async fn enter_text(&self, target: &Locator, value: &str) -> HarnessResult<()> {
        let session = self.session()?;
        session
            .strategy()
            .enter_text(session.driver(), target, value)
            .await
    }

    pub async fn navigate(&self, url: &str) -> HarnessResult<()> {
        self.session()?.driver().navigate(url).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> HarnessResult<String> {
        Ok(self.session()?.driver().current_url().await?)
    }

    pub async fn is_displayed(&self, target: &Locator) -> HarnessResult<bool> {
        match self.session()?.driver().is_displayed(target).await {
            Ok(shown) => Ok(shown),
            Err(DriverError::NoSuchElement(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait, within the mode's timeout, for `target` to be displayed.
    pub async fn wait_until_visible(&self, target: &Locator) -> HarnessResult<()> {
        let session = self.session()?;
        let strategy = session.strategy();
        let driver = session.driver();
        wait_until(
            &format!("{} to be visible", target),
            strategy.timeout(),
            strategy.poll_interval(),
            move || driver.is_displayed(target),
        )
        .await
    }

    /// Wait, within the mode's timeout, for `target` to be displayed and enabled.
    pub async fn wait_until_clickable(&self, target: &Locator) -> HarnessResult<()> {
        let session = self.session()?;
        let strategy = session.strategy();
        let driver = session.driver();
        wait_until(
            &format!("{} to be clickable", target),
            strategy.timeout(),
            strategy.poll_interval(),
            move || async move {
                Ok(driver.is_displayed(target).await? && driver.is_enabled(target).await?)
            },
        )
        .await
    }
}
