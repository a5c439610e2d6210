//! Suite runner: drives test classes through the lifecycle hooks
//!
//! Every class runs as its own tokio task with its own [`WorkerId`], so class
//! sessions and report records never mix. Failed tests are re-entered at
//! `before_test` while the retry bound allows.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::HarnessResult;
use crate::interaction::Interactor;
use crate::lifecycle::{LifecycleController, TestOutcome};
use crate::mode::ExecutionMode;
use crate::report::ReportingSink;
use crate::retry::{should_retry, RetryState};
use crate::session::WorkerId;

/// Error marker that turns a test body's `Err` into a skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip(pub Option<String>);

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(reason) => write!(f, "skipped: {}", reason),
            None => f.write_str("skipped"),
        }
    }
}

impl std::error::Error for Skip {}

/// `return Err(skip("feature flag off"))` from a test body.
pub fn skip(reason: impl Into<String>) -> anyhow::Error {
    Skip(Some(reason.into())).into()
}

/// What a test body sees.
#[derive(Clone)]
pub struct TestContext {
    worker: WorkerId,
    test: String,
    attempt: u32,
    lifecycle: Arc<LifecycleController>,
}

impl TestContext {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn test_name(&self) -> &str {
        &self.test
    }

    /// 1 for the first run, 2 for the first retry, ...
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn base_url(&self) -> &str {
        &self.lifecycle.config().base_url
    }

    pub fn mode(&self) -> ExecutionMode {
        self.lifecycle.mode()
    }

    pub fn ui(&self) -> Interactor {
        self.lifecycle.interactor(self.worker)
    }

    fn reports(&self) -> &ReportingSink {
        self.lifecycle.reports()
    }

    pub fn step(&self, message: &str) {
        self.reports().step(self.worker, message);
    }

    pub fn info(&self, message: &str) {
        self.reports().info(self.worker, message);
    }

    pub fn warn(&self, message: &str) {
        self.reports().warn(self.worker, message);
    }

    pub fn pass_note(&self, message: &str) {
        self.reports().pass_note(self.worker, message);
    }

    /// Save a screenshot of the current page under the artifacts directory.
    pub async fn screenshot(&self, name: &str) -> Option<PathBuf> {
        let session = self.lifecycle.store().get(self.worker).ok()?;
        self.lifecycle.capture().capture_to_file(&session, name).await
    }
}

pub type TestFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type TestBody = Arc<dyn Fn(TestContext) -> TestFuture + Send + Sync>;

/// One test method.
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    /// Continue from wherever the previous test left the browser
    pub retain_session: bool,
    body: TestBody,
}

impl TestCase {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            retain_session: false,
            body: Arc::new(move |ctx| body(ctx).boxed()),
        }
    }

    pub fn retain_session(mut self) -> Self {
        self.retain_session = true;
        self
    }
}

/// Test methods sharing one browser session.
#[derive(Clone)]
pub struct TestClass {
    pub name: String,
    pub tests: Vec<TestCase>,
}

impl TestClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    pub fn test(mut self, case: TestCase) -> Self {
        self.tests.push(case);
        self
    }
}

/// Final result of a single test method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub class: String,
    pub name: String,
    pub outcome: TestOutcome,
    /// Attempts made, including retries
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Result of running all classes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Tests that needed at least one retry
    pub retried: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let mut suite = Self {
            total: results.len(),
            duration_ms,
            ..Default::default()
        };
        for result in &results {
            match result.outcome {
                TestOutcome::Passed => suite.passed += 1,
                TestOutcome::Failed(_) => suite.failed += 1,
                TestOutcome::Skipped(_) => suite.skipped += 1,
            }
            if result.attempts > 1 {
                suite.retried += 1;
            }
        }
        suite.results = results;
        suite
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Tears the class session down even if the class task unwinds.
struct ClassTeardown {
    lifecycle: Arc<LifecycleController>,
    worker: WorkerId,
    class: String,
    armed: bool,
}

impl ClassTeardown {
    async fn finish(mut self) {
        self.armed = false;
        self.lifecycle.after_class(self.worker, &self.class).await;
    }
}

impl Drop for ClassTeardown {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(worker = %self.worker, class = %self.class, "Class aborted, tearing session down");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let lifecycle = Arc::clone(&self.lifecycle);
            let worker = self.worker;
            let class = std::mem::take(&mut self.class);
            handle.spawn(async move {
                lifecycle.after_class(worker, &class).await;
            });
        }
    }
}

/// Runs test classes concurrently through a [`LifecycleController`].
pub struct SuiteRunner {
    lifecycle: Arc<LifecycleController>,
}

impl SuiteRunner {
    pub fn new(lifecycle: Arc<LifecycleController>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    /// Run every class, then flush the report.
    pub async fn run(&self, classes: Vec<TestClass>) -> TestSuiteResult {
        let start = Instant::now();
        self.lifecycle.before_suite();

        let limit = Arc::new(Semaphore::new(self.lifecycle.config().max_parallel_classes.max(1)));
        info!("Running {} test class(es)...", classes.len());

        let mut handles = Vec::with_capacity(classes.len());
        let mut rosters = Vec::with_capacity(classes.len());
        for class in classes {
            let finished = Arc::new(Mutex::new(Vec::with_capacity(class.tests.len())));
            rosters.push((
                class.name.clone(),
                class.tests.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                Arc::clone(&finished),
            ));
            let lifecycle = Arc::clone(&self.lifecycle);
            let limit = Arc::clone(&limit);
            handles.push(tokio::spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                run_class(lifecycle, class, finished).await
            }));
        }

        let mut results = Vec::new();
        for (joined, (class, tests, finished)) in
            join_all(handles).await.into_iter().zip(rosters)
        {
            let mut class_results = std::mem::take(&mut *finished.lock());
            if let Err(e) = joined {
                error!(class = %class, "Class task aborted: {}", e);
                // Tests that finished before the abort keep their outcome.
                let done = class_results.len();
                class_results.extend(tests.into_iter().skip(done).map(|name| TestResult {
                    class: class.clone(),
                    name,
                    outcome: TestOutcome::Failed(format!("class task aborted: {}", e)),
                    attempts: 1,
                    duration_ms: 0,
                }));
            }
            results.extend(class_results);
        }

        self.lifecycle.after_suite();

        let suite = TestSuiteResult::from_results(results, start.elapsed().as_millis() as u64);
        info!(
            "Test Results: {} passed, {} failed, {} skipped, {} retried ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.retried, suite.duration_ms
        );
        suite
    }

    /// Write the run summary next to the report
    pub fn write_results(&self, results: &TestSuiteResult) -> HarnessResult<PathBuf> {
        let dir = &self.lifecycle.config().report_dir;
        std::fs::create_dir_all(dir)?;

        let path = dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Results are pushed to `finished` as each test completes, so they survive
/// an abort of the class task.
async fn run_class(
    lifecycle: Arc<LifecycleController>,
    class: TestClass,
    finished: Arc<Mutex<Vec<TestResult>>>,
) {
    let worker = WorkerId::next();
    let teardown = ClassTeardown {
        lifecycle: Arc::clone(&lifecycle),
        worker,
        class: class.name.clone(),
        armed: true,
    };

    match lifecycle.before_class(worker, &class.name).await {
        Ok(_) => {
            for test in &class.tests {
                let result = run_test(&lifecycle, worker, &class.name, test).await;
                finished.lock().push(result);
            }
        }
        Err(e) => {
            error!(%worker, class = %class.name, "Class setup failed: {}", e);
            let outcome = TestOutcome::Failed(format!("class setup failed: {}", e));
            for test in &class.tests {
                let title = format!("{}::{}", class.name, test.name);
                if lifecycle.reports().begin_test(worker, &title).is_ok() {
                    lifecycle.reports().end_test(worker, &outcome, None);
                }
                finished.lock().push(TestResult {
                    class: class.name.clone(),
                    name: test.name.clone(),
                    outcome: outcome.clone(),
                    attempts: 1,
                    duration_ms: 0,
                });
            }
        }
    }

    teardown.finish().await;
}

async fn run_test(
    lifecycle: &Arc<LifecycleController>,
    worker: WorkerId,
    class: &str,
    test: &TestCase,
) -> TestResult {
    let start = Instant::now();
    let mut retry = RetryState::new(lifecycle.config().max_retries);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let title = if attempt == 1 {
            format!("{}::{}", class, test.name)
        } else {
            format!("{}::{} (retry {})", class, test.name, attempt - 1)
        };

        let outcome = match lifecycle.before_test(worker, &title, test.retain_session).await {
            Ok(()) => {
                let ctx = TestContext {
                    worker,
                    test: test.name.clone(),
                    attempt,
                    lifecycle: Arc::clone(lifecycle),
                };
                run_body(&test.body, ctx).await
            }
            Err(e) => {
                // Harness bug, not a flaky test: report it once and stop.
                error!(%worker, test = %title, "Test setup failed: {}", e);
                let outcome = TestOutcome::Failed(format!("test setup failed: {}", e));
                if !lifecycle.reports().has_open_record(worker) {
                    if let Err(e) = lifecycle.reports().begin_test(worker, &title) {
                        warn!(%worker, "Could not record setup failure: {}", e);
                    }
                }
                lifecycle.after_test(worker, &outcome).await;
                return TestResult {
                    class: class.to_string(),
                    name: test.name.clone(),
                    outcome,
                    attempts: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        lifecycle.after_test(worker, &outcome).await;

        if should_retry(&outcome, &mut retry) {
            warn!(
                %worker,
                test = %title,
                "Retrying failed test ({}/{})",
                retry.attempts(),
                retry.max_retries()
            );
            continue;
        }

        match &outcome {
            TestOutcome::Passed => info!("✓ {} ({} ms)", title, start.elapsed().as_millis()),
            TestOutcome::Failed(cause) => error!("✗ {} - {}", title, cause),
            TestOutcome::Skipped(_) => info!("- {} ({})", title, outcome),
        }

        return TestResult {
            class: class.to_string(),
            name: test.name.clone(),
            outcome,
            attempts: attempt,
            duration_ms: start.elapsed().as_millis() as u64,
        };
    }
}

async fn run_body(body: &TestBody, ctx: TestContext) -> TestOutcome {
    match AssertUnwindSafe(body(ctx)).catch_unwind().await {
        Ok(Ok(())) => TestOutcome::Passed,
        Ok(Err(e)) => match e.downcast_ref::<Skip>() {
            Some(Skip(reason)) => TestOutcome::Skipped(reason.clone()),
            None => TestOutcome::Failed(format!("{:#}", e)),
        },
        Err(panic) => TestOutcome::Failed(panic_message(panic)),
    }
}
