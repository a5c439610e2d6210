//! In-memory driver for unit tests
//!
//! [`RecordingDriver`] records every call and lets a test script failures
//! (intercepted clicks, slow ready states, dead sessions) without a browser.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::driver::{BrowserDriver, DriverLauncher, LaunchOptions, Locator};
use crate::error::{DriverError, DriverResult};

/// Minimal PNG header, enough to look like an image in reports.
pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Navigate(String),
    CurrentUrl,
    Maximize,
    Click(Locator),
    ScriptClick(Locator),
    ScrollIntoView(Locator),
    Clear(Locator),
    SendKeys(Locator, String),
    IsDisplayed(Locator),
    IsEnabled(Locator),
    ReadyState,
    Screenshot,
    Quit,
}

#[derive(Debug, Default)]
struct DriverState {
    calls: Vec<DriverCall>,
    url: String,
    click_failures: VecDeque<DriverError>,
    ready_states: VecDeque<String>,
    hidden: HashSet<Locator>,
    current_url_error: Option<DriverError>,
    navigate_error: Option<DriverError>,
    screenshot_error: Option<DriverError>,
    closed: bool,
}

/// Scriptable [`BrowserDriver`] that records its calls.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    state: Mutex<DriverState>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let driver = Self::new();
        driver.state.lock().url = url.into();
        driver
    }

    /// The next native click fails with `error`. Queues up.
    pub fn fail_next_click(&self, error: DriverError) {
        self.state.lock().click_failures.push_back(error);
    }

    /// Values returned by successive `ready_state` calls before "complete".
    pub fn queue_ready_states<I, S>(&self, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .ready_states
            .extend(states.into_iter().map(Into::into));
    }

    pub fn hide(&self, target: Locator) {
        self.state.lock().hidden.insert(target);
    }

    pub fn show(&self, target: &Locator) {
        self.state.lock().hidden.remove(target);
    }

    pub fn fail_navigation(&self, error: DriverError) {
        self.state.lock().navigate_error = Some(error);
    }

    pub fn fail_current_url(&self, error: DriverError) {
        self.state.lock().current_url_error = Some(error);
    }

    pub fn fail_screenshots(&self, error: DriverError) {
        self.state.lock().screenshot_error = Some(error);
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.state.lock().url = url.into();
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::Navigate(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn script_clicks(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::ScriptClick(_)))
    }

    pub fn quit_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Quit))
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn record_call(&self, call: DriverCall) -> DriverResult<()> {
        self.record(call).map(drop)
    }

    /// Record `call`, refusing it once the browser has quit.
    fn record(&self, call: DriverCall) -> DriverResult<parking_lot::MutexGuard<'_, DriverState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.closed {
            return Err(DriverError::SessionClosed);
        }
        Ok(state)
    }
}

#[async_trait]
impl BrowserDriver for RecordingDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut state = self.record(DriverCall::Navigate(url.to_string()))?;
        if let Some(e) = &state.navigate_error {
            return Err(e.clone());
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let state = self.record(DriverCall::CurrentUrl)?;
        match &state.current_url_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.url.clone()),
        }
    }

    async fn maximize_window(&self) -> DriverResult<()> {
        self.record_call(DriverCall::Maximize)?;
        Ok(())
    }

    async fn click(&self, target: &Locator) -> DriverResult<()> {
        let mut state = self.record(DriverCall::Click(target.clone()))?;
        match state.click_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn script_click(&self, target: &Locator) -> DriverResult<()> {
        self.record_call(DriverCall::ScriptClick(target.clone()))?;
        Ok(())
    }

    async fn scroll_into_view(&self, target: &Locator) -> DriverResult<()> {
        self.record_call(DriverCall::ScrollIntoView(target.clone()))?;
        Ok(())
    }

    async fn clear(&self, target: &Locator) -> DriverResult<()> {
        self.record_call(DriverCall::Clear(target.clone()))?;
        Ok(())
    }

    async fn send_keys(&self, target: &Locator, text: &str) -> DriverResult<()> {
        self.record_call(DriverCall::SendKeys(target.clone(), text.to_string()))?;
        Ok(())
    }

    async fn is_displayed(&self, target: &Locator) -> DriverResult<bool> {
        let state = self.record(DriverCall::IsDisplayed(target.clone()))?;
        Ok(!state.hidden.contains(target))
    }

    async fn is_enabled(&self, target: &Locator) -> DriverResult<bool> {
        let state = self.record(DriverCall::IsEnabled(target.clone()))?;
        Ok(!state.hidden.contains(target))
    }

    async fn ready_state(&self) -> DriverResult<String> {
        let mut state = self.record(DriverCall::ReadyState)?;
        Ok(state
            .ready_states
            .pop_front()
            .unwrap_or_else(|| "complete".to_string()))
    }

    async fn screenshot_png(&self) -> DriverResult<Vec<u8>> {
        let state = self.record(DriverCall::Screenshot)?;
        match &state.screenshot_error {
            Some(e) => Err(e.clone()),
            None => Ok(FAKE_PNG.to_vec()),
        }
    }

    async fn quit(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.calls.push(DriverCall::Quit);
        state.closed = true;
        Ok(())
    }
}

type DriverSetup = Arc<dyn Fn(&RecordingDriver) + Send + Sync>;

/// Launcher handing out [`RecordingDriver`]s and remembering them.
#[derive(Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<LaunchOptions>>,
    drivers: Mutex<Vec<Arc<RecordingDriver>>>,
    launch_error: Mutex<Option<DriverError>>,
    setup: Option<DriverSetup>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `setup` on every driver before it is handed out.
    pub fn with_setup(setup: impl Fn(&RecordingDriver) + Send + Sync + 'static) -> Self {
        Self {
            setup: Some(Arc::new(setup)),
            ..Self::default()
        }
    }

    pub fn fail_launches(&self, error: DriverError) {
        *self.launch_error.lock() = Some(error);
    }

    pub fn launches(&self) -> Vec<LaunchOptions> {
        self.launches.lock().clone()
    }

    pub fn drivers(&self) -> Vec<Arc<RecordingDriver>> {
        self.drivers.lock().clone()
    }

    pub fn last_driver(&self) -> Option<Arc<RecordingDriver>> {
        self.drivers.lock().last().cloned()
    }
}

#[async_trait]
impl DriverLauncher for RecordingLauncher {
    async fn launch(&self, options: &LaunchOptions) -> DriverResult<Arc<dyn BrowserDriver>> {
        self.launches.lock().push(options.clone());
        if let Some(e) = self.launch_error.lock().clone() {
            return Err(e);
        }

        let driver = Arc::new(RecordingDriver::new());
        if let Some(setup) = &self.setup {
            setup(&driver);
        }
        self.drivers.lock().push(Arc::clone(&driver));
        Ok(driver)
    }
}
