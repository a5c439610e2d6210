//! Suite, class and test phases
//!
//! ```text
//! before_suite
//!   before_class ── create session ──┐
//!     before_test (navigation guard) │  per class, on its own worker
//!     <test body>                    │
//!     after_test (capture + report)  │
//!   after_class ── destroy session ──┘
//! after_suite ── flush report
//! ```
//!
//! Setup errors propagate. Teardown errors are logged and swallowed so one
//! class can never block another class's cleanup or the final flush.

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::capture::ArtifactCapture;
use crate::config::HarnessConfig;
use crate::driver::DriverLauncher;
use crate::error::HarnessResult;
use crate::factory::SessionFactory;
use crate::interaction::Interactor;
use crate::mode::{ExecutionMode, ModeResolver};
use crate::report::{ReportingSink, SuiteMetadata, SuiteReport};
use crate::session::{Session, SessionStore, WorkerId};

/// Result of one test method invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed(String),
    Skipped(Option<String>),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TestOutcome::Skipped(_))
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => f.write_str("passed"),
            TestOutcome::Failed(cause) => write!(f, "failed: {}", cause),
            TestOutcome::Skipped(Some(reason)) => write!(f, "skipped: {}", reason),
            TestOutcome::Skipped(None) => f.write_str("skipped"),
        }
    }
}

/// Decides whether a URL already belongs to an authenticated area.
pub type AuthenticatedPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Predicate matching URLs that contain `marker`.
pub fn contains_marker(marker: impl Into<String>) -> AuthenticatedPredicate {
    let marker = marker.into();
    Arc::new(move |url: &str| !marker.is_empty() && url.contains(&marker))
}

fn same_location(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Sends the browser back to the base URL before independent tests.
#[derive(Clone)]
pub struct NavigationGuard {
    base_url: String,
    looks_authenticated: AuthenticatedPredicate,
}

impl NavigationGuard {
    pub fn new(base_url: impl Into<String>, looks_authenticated: AuthenticatedPredicate) -> Self {
        Self {
            base_url: base_url.into(),
            looks_authenticated,
        }
    }

    /// Never fails: errors and panics are logged and the test proceeds.
    pub async fn before_test(&self, session: &Session, test: &str, retain_session: bool) {
        if retain_session {
            debug!(test, "Test continues the previous flow, navigation guard skipped");
            return;
        }
        match AssertUnwindSafe(self.reset(session, test)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(test, "Navigation guard failed: {}", e),
            Err(_) => warn!(test, "Navigation guard panicked, navigation skipped"),
        }
    }

    async fn reset(&self, session: &Session, test: &str) -> HarnessResult<()> {
        let current = session.driver().current_url().await?;
        if same_location(&current, &self.base_url) || (self.looks_authenticated)(&current) {
            return Ok(());
        }
        info!(test, from = %current, to = %self.base_url, "Returning to base URL");
        session.driver().navigate(&self.base_url).await?;
        Ok(())
    }
}

/// Phase hooks invoked by the runner.
pub struct LifecycleController {
    config: Arc<HarnessConfig>,
    resolver: Arc<ModeResolver>,
    factory: SessionFactory,
    reports: Arc<ReportingSink>,
    capture: ArtifactCapture,
    guard: NavigationGuard,
}

impl LifecycleController {
    pub fn new(
        config: Arc<HarnessConfig>,
        resolver: Arc<ModeResolver>,
        launcher: Arc<dyn DriverLauncher>,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let guard = NavigationGuard::new(
            config.base_url.clone(),
            contains_marker(config.authenticated_marker.clone()),
        );
        Self {
            factory: SessionFactory::new(launcher, store, Arc::clone(&config)),
            reports: Arc::new(ReportingSink::new(config.report_dir.clone())),
            capture: ArtifactCapture::new(config.artifacts_dir.clone()),
            config,
            resolver,
            guard,
        }
    }

    /// Replace the authenticated-area heuristic.
    pub fn with_authenticated_predicate(mut self, predicate: AuthenticatedPredicate) -> Self {
        self.guard = NavigationGuard::new(self.config.base_url.clone(), predicate);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn mode(&self) -> ExecutionMode {
        self.resolver.resolve()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.factory.store()
    }

    pub fn reports(&self) -> &Arc<ReportingSink> {
        &self.reports
    }

    pub fn capture(&self) -> &ArtifactCapture {
        &self.capture
    }

    pub fn interactor(&self, worker: WorkerId) -> Interactor {
        Interactor::new(Arc::clone(self.store()), worker)
    }

    pub fn before_suite(&self) {
        let mode = self.mode();
        self.reports.begin_suite(SuiteMetadata {
            environment: self.config.environment.clone(),
            mode,
            operator: self.config.operator.clone(),
            started_at: Utc::now(),
        });
        info!(environment = %self.config.environment, %mode, "Suite starting");
    }

    /// Create the class session. On error the caller must still run
    /// [`after_class`](Self::after_class).
    pub async fn before_class(&self, worker: WorkerId, class: &str) -> HarnessResult<Arc<Session>> {
        let mode = self.mode();
        info!(%worker, class, %mode, "Class setup");
        self.factory.create_session(worker, mode).await
    }

    /// Navigation guard, then open the report record for this attempt.
    pub async fn before_test(
        &self,
        worker: WorkerId,
        title: &str,
        retain_session: bool,
    ) -> HarnessResult<()> {
        let session = self.store().get(worker)?;
        self.guard.before_test(&session, title, retain_session).await;
        self.reports.begin_test(worker, title)
    }

    /// Capture on failure and close the report record.
    pub async fn after_test(&self, worker: WorkerId, outcome: &TestOutcome) {
        let screenshot = match (outcome, self.store().get(worker)) {
            (TestOutcome::Failed(_), Ok(session)) => self.capture.capture(&session).await,
            _ => None,
        };
        match outcome {
            TestOutcome::Failed(cause) => error!(%worker, "Test failed: {}", cause),
            other => debug!(%worker, "Test {}", other),
        }
        self.reports.end_test(worker, outcome, screenshot);
    }

    /// Tear down the class session. Safe after a failed or partial setup.
    pub async fn after_class(&self, worker: WorkerId, class: &str) {
        match self.factory.destroy_session(worker).await {
            Ok(true) => info!(%worker, class, "Class teardown complete"),
            Ok(false) => debug!(%worker, class, "Class teardown: no session"),
            Err(e) => warn!(%worker, class, "Class teardown failed: {}", e),
        }
    }

    /// Flush the report. Errors are logged, never raised.
    pub fn after_suite(&self) -> Option<SuiteReport> {
        match self.reports.end_suite() {
            Ok(report) => report,
            Err(e) => {
                error!("Failed to write report: {}", e);
                None
            }
        }
    }
}
