//! Suite lifecycle tests
//!
//! Runs whole suites against the recording launcher: sessions, retries,
//! navigation guard, adaptive clicks and the flushed report.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use browserbench_e2e::config::TimingConfig;
use browserbench_e2e::lifecycle::AuthenticatedPredicate;
use browserbench_e2e::report::RecordStatus;
use browserbench_e2e::testing::{DriverCall, RecordingDriver, RecordingLauncher};
use browserbench_e2e::{
    skip, DriverError, ExecutionMode, HarnessConfig, LifecycleController, Locator, ModeResolver,
    Scenario, SuiteRunner, TestCase, TestClass, TestOutcome, TestSuiteResult,
};

const BASE: &str = "https://app.test/";

fn config(dir: &Path) -> HarnessConfig {
    HarnessConfig {
        base_url: BASE.to_string(),
        environment: "ci".to_string(),
        operator: "qa".to_string(),
        artifacts_dir: dir.join("shots"),
        report_dir: dir.join("reports"),
        max_retries: 1,
        timing: TimingConfig::immediate(),
        ..HarnessConfig::default()
    }
}

fn suite(dir: &Path, mode: ExecutionMode, launcher: Arc<RecordingLauncher>) -> SuiteRunner {
    let lifecycle = LifecycleController::new(
        Arc::new(config(dir)),
        Arc::new(ModeResolver::fixed(mode)),
        launcher,
    );
    SuiteRunner::new(Arc::new(lifecycle))
}

fn outcome_of<'a>(results: &'a TestSuiteResult, name: &str) -> &'a TestOutcome {
    &results
        .results
        .iter()
        .find(|r| r.name == name)
        .unwrap()
        .outcome
}

fn report_json(dir: &Path) -> serde_json::Value {
    let content = std::fs::read_to_string(config(dir).json_report_path()).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[tokio::test]
async fn test_failure_is_retried_once_and_reported_with_screenshot() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let class = TestClass::new("Checkout").test(TestCase::new("pays", |_ctx| async {
        Err(anyhow::anyhow!("total mismatch"))
    }));
    let results = runner.run(vec![class]).await;

    assert_eq!(results.failed, 1);
    assert_eq!(results.results[0].attempts, 2);
    assert!(!results.success());

    let records = runner.lifecycle().reports().records();
    let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Checkout::pays", "Checkout::pays (retry 1)"]);
    assert!(records.iter().all(|r| r.status == Some(RecordStatus::Failed)));

    let last = records[1].last_entry().unwrap();
    assert!(last.message.contains("total mismatch"));
    assert!(last.screenshot.is_some());

    let driver = launcher.last_driver().unwrap();
    assert_eq!(driver.count(|c| *c == DriverCall::Screenshot), 2);

    let json = report_json(dir.path());
    assert_eq!(json["totals"]["failed"], 2);
    assert_eq!(json["metadata"]["mode"], "headless");
    assert!(dir.path().join("reports/report.html").exists());
}

#[tokio::test]
async fn test_flaky_test_passes_on_retry() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicU32::new(0));
    let runner = suite(dir.path(), ExecutionMode::Headless, Arc::new(RecordingLauncher::new()));

    let counter = Arc::clone(&runs);
    let class = TestClass::new("Search").test(TestCase::new("finds", move |ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(ctx.attempt() > 1, "index not warm yet");
            Ok(())
        }
    }));
    let results = runner.run(vec![class]).await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(outcome_of(&results, "finds"), &TestOutcome::Passed);
    assert_eq!((results.passed, results.retried), (1, 1));
    assert!(results.success());
}

#[tokio::test]
async fn test_headless_click_falls_back_to_script() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::with_setup(|driver: &RecordingDriver| {
        driver.fail_next_click(DriverError::ClickIntercepted("cookie banner".into()));
    }));
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let class = TestClass::new("Login").test(TestCase::new("submits", |ctx| async move {
        ctx.ui().click(&Locator::id("submit")).await?;
        Ok(())
    }));
    let results = runner.run(vec![class]).await;

    assert_eq!(outcome_of(&results, "submits"), &TestOutcome::Passed);
    assert_eq!(results.results[0].attempts, 1);
    assert_eq!(launcher.last_driver().unwrap().script_clicks(), 1);
}

#[tokio::test]
async fn test_interactive_click_does_not_fall_back() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::with_setup(|driver: &RecordingDriver| {
        driver.fail_next_click(DriverError::ClickIntercepted("cookie banner".into()));
    }));
    let runner = suite(dir.path(), ExecutionMode::Interactive, launcher.clone());

    let class = TestClass::new("Login").test(TestCase::new("submits", |ctx| async move {
        ctx.ui().click(&Locator::id("submit")).await?;
        Ok(())
    }));
    let results = runner.run(vec![class]).await;

    // The intercepted click fails the first attempt; the retry gets through.
    assert_eq!(outcome_of(&results, "submits"), &TestOutcome::Passed);
    assert_eq!(results.results[0].attempts, 2);
    assert_eq!(launcher.last_driver().unwrap().script_clicks(), 0);
}

#[tokio::test]
async fn test_concurrent_classes_use_isolated_sessions() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let classes: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|name| {
            let mut class = TestClass::new(name);
            for page in 1..=3 {
                class = class.test(TestCase::new(format!("page-{}", page), move |ctx| async move {
                    let url = format!("{}{}/{}", ctx.base_url(), name, page);
                    ctx.ui().navigate(&url).await?;
                    tokio::task::yield_now().await;
                    let current = ctx.ui().current_url().await?;
                    anyhow::ensure!(current == url, "expected {}, saw {}", url, current);
                    Ok(())
                }));
            }
            class
        })
        .collect();
    let results = runner.run(classes).await;

    assert_eq!((results.total, results.passed), (9, 9));

    let drivers = launcher.drivers();
    assert_eq!(drivers.len(), 3);
    for driver in &drivers {
        let visited: Vec<_> = driver
            .navigations()
            .into_iter()
            .filter(|url| url != BASE)
            .collect();
        assert_eq!(visited.len(), 3);
        let class = visited[0]
            .trim_start_matches(BASE)
            .split('/')
            .next()
            .unwrap()
            .to_string();
        assert!(visited.iter().all(|url| url.starts_with(&format!("{}{}/", BASE, class))));
        assert_eq!(driver.quit_count(), 1);
    }
    assert!(runner.lifecycle().store().is_empty());

    let records = runner.lifecycle().reports().records();
    assert_eq!(records.len(), 9);
    for record in &records {
        let class = record.title.split("::").next().unwrap();
        assert!(records
            .iter()
            .filter(|r| r.worker == record.worker)
            .all(|r| r.title.starts_with(class)));
    }
}

#[tokio::test]
async fn test_one_session_per_class_while_running() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let runner = suite(dir.path(), ExecutionMode::Interactive, launcher.clone());

    let lifecycle = Arc::clone(runner.lifecycle());
    let class = TestClass::new("Profile").test(TestCase::new("loads", move |ctx| {
        let lifecycle = Arc::clone(&lifecycle);
        async move {
            anyhow::ensure!(lifecycle.store().contains(ctx.worker()), "no session for worker");
            anyhow::ensure!(lifecycle.store().len() == 1, "unexpected extra sessions");
            Ok(())
        }
    }));
    let results = runner.run(vec![class]).await;

    assert!(results.success());
    assert!(runner.lifecycle().store().is_empty());
    assert_eq!(launcher.launches().len(), 1);
    assert!(launcher.last_driver().unwrap().is_closed());
}

#[tokio::test]
async fn test_class_setup_failure_still_flushes_report() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    launcher.fail_launches(DriverError::Other("chromedriver unreachable".into()));
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let class = TestClass::new("Orders")
        .test(TestCase::new("lists", |_ctx| async { Ok(()) }))
        .test(TestCase::new("filters", |_ctx| async { Ok(()) }));
    let results = runner.run(vec![class]).await;

    assert_eq!(results.failed, 2);
    assert_eq!(launcher.launches().len(), 1);
    assert!(results.results.iter().all(|r| r.attempts == 1));
    match outcome_of(&results, "lists") {
        TestOutcome::Failed(cause) => assert!(cause.contains("chromedriver unreachable")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(runner.lifecycle().store().is_empty());

    let json = report_json(dir.path());
    assert_eq!(json["totals"]["failed"], 2);
}

#[tokio::test]
async fn test_panicking_test_fails_and_class_continues() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let class = TestClass::new("Cart")
        .test(TestCase::new("explodes", |_ctx| async {
            let items: Vec<u32> = Vec::new();
            assert!(!items.is_empty(), "boom");
            Ok(())
        }))
        .test(TestCase::new("survives", |_ctx| async { Ok(()) }));
    let results = runner.run(vec![class]).await;

    match outcome_of(&results, "explodes") {
        TestOutcome::Failed(cause) => assert!(cause.contains("boom")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(outcome_of(&results, "survives"), &TestOutcome::Passed);
    assert_eq!(launcher.last_driver().unwrap().quit_count(), 1);
}

#[tokio::test]
async fn test_skip_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let runner = suite(dir.path(), ExecutionMode::Headless, Arc::new(RecordingLauncher::new()));

    let class = TestClass::new("Billing").test(TestCase::new("invoices", |_ctx| async {
        Err(skip("billing disabled on ci"))
    }));
    let results = runner.run(vec![class]).await;

    assert_eq!(
        outcome_of(&results, "invoices"),
        &TestOutcome::Skipped(Some("billing disabled on ci".into()))
    );
    assert_eq!((results.skipped, results.results[0].attempts), (1, 1));
    assert!(results.success());
}

#[tokio::test]
async fn test_retain_session_keeps_previous_page() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let runner = suite(dir.path(), ExecutionMode::Interactive, launcher.clone());

    let wizard = format!("{}wizard/step-1", BASE);
    let first_url = wizard.clone();
    let class = TestClass::new("Wizard")
        .test(TestCase::new("opens", move |ctx| {
            let url = first_url.clone();
            async move {
                ctx.ui().navigate(&url).await?;
                Ok(())
            }
        }))
        .test(
            TestCase::new("continues", |ctx| async move {
                let url = ctx.ui().current_url().await?;
                anyhow::ensure!(url.ends_with("wizard/step-1"), "lost place: {}", url);
                Ok(())
            })
            .retain_session(),
        )
        .test(TestCase::new("independent", |ctx| async move {
            let url = ctx.ui().current_url().await?;
            anyhow::ensure!(url == BASE, "guard did not reset: {}", url);
            Ok(())
        }));
    let results = runner.run(vec![class]).await;

    assert_eq!(results.passed, 3);
    assert_eq!(
        launcher.last_driver().unwrap().navigations(),
        vec![BASE.to_string(), wizard, BASE.to_string()]
    );
}

#[tokio::test]
async fn test_guard_leaves_authenticated_area_alone() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let class = TestClass::new("Wallets")
        .test(TestCase::new("login", |ctx| async move {
            let url = format!("{}dashboard/wallets", ctx.base_url());
            ctx.ui().navigate(&url).await?;
            Ok(())
        }))
        .test(TestCase::new("list", |_ctx| async { Ok(()) }));
    runner.run(vec![class]).await;

    let navigations = launcher.last_driver().unwrap().navigations();
    assert_eq!(navigations.len(), 2);
    assert!(navigations[1].ends_with("dashboard/wallets"));
}

fn guarded_suite(
    dir: &Path,
    launcher: Arc<RecordingLauncher>,
    predicate: AuthenticatedPredicate,
) -> SuiteRunner {
    let lifecycle = LifecycleController::new(
        Arc::new(config(dir)),
        Arc::new(ModeResolver::fixed(ExecutionMode::Headless)),
        launcher,
    )
    .with_authenticated_predicate(predicate);
    SuiteRunner::new(Arc::new(lifecycle))
}

fn leave_then_stay(class: &str) -> TestClass {
    TestClass::new(class)
        .test(TestCase::new("opens", |ctx| async move {
            let url = format!("{}account/keys", ctx.base_url());
            ctx.ui().navigate(&url).await?;
            Ok(())
        }))
        .test(TestCase::new("lists", |_ctx| async { Ok(()) }))
}

#[tokio::test]
async fn test_custom_predicate_decides_what_is_authenticated() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let predicate: AuthenticatedPredicate = Arc::new(|url: &str| url.contains("/account/"));
    let runner = guarded_suite(dir.path(), launcher.clone(), predicate);

    let results = runner.run(vec![leave_then_stay("Keys")]).await;

    assert_eq!(results.passed, 2);
    let navigations = launcher.last_driver().unwrap().navigations();
    assert_eq!(navigations, vec![BASE.to_string(), format!("{}account/keys", BASE)]);
}

#[tokio::test]
async fn test_panicking_predicate_does_not_abort_class() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let predicate: AuthenticatedPredicate = Arc::new(|_: &str| -> bool { panic!("predicate bug") });
    let runner = guarded_suite(dir.path(), launcher.clone(), predicate);

    let results = runner.run(vec![leave_then_stay("Keys")]).await;

    assert_eq!(outcome_of(&results, "opens"), &TestOutcome::Passed);
    assert_eq!(outcome_of(&results, "lists"), &TestOutcome::Passed);
    let records = runner.lifecycle().reports().records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == Some(RecordStatus::Passed)));
    assert_eq!(launcher.last_driver().unwrap().quit_count(), 1);
}

#[tokio::test]
async fn test_lost_session_fails_once_without_retry() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let lifecycle = Arc::clone(runner.lifecycle());
    let class = TestClass::new("Vault")
        .test(TestCase::new("locks", move |ctx| {
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                if let Some(session) = lifecycle.store().remove(ctx.worker()) {
                    session.close().await?;
                }
                Ok(())
            }
        }))
        .test(TestCase::new("unlocks", |_ctx| async { Ok(()) }));
    let results = runner.run(vec![class]).await;

    assert_eq!(outcome_of(&results, "locks"), &TestOutcome::Passed);
    match outcome_of(&results, "unlocks") {
        TestOutcome::Failed(cause) => assert!(cause.contains("test setup failed")),
        other => panic!("unexpected outcome {:?}", other),
    }
    let unlocks = results.results.iter().find(|r| r.name == "unlocks").unwrap();
    assert_eq!(unlocks.attempts, 1);

    let records = runner.lifecycle().reports().records();
    let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Vault::locks", "Vault::unlocks"]);
    assert_eq!(records[1].status, Some(RecordStatus::Failed));
    assert_eq!(launcher.last_driver().unwrap().quit_count(), 1);
}

#[tokio::test]
async fn test_report_is_flushed_once() {
    let dir = TempDir::new().unwrap();
    let runner = suite(dir.path(), ExecutionMode::Headless, Arc::new(RecordingLauncher::new()));

    let class = TestClass::new("Home").test(TestCase::new("renders", |_ctx| async { Ok(()) }));
    let results = runner.run(vec![class]).await;
    let path = runner.write_results(&results).unwrap();

    assert!(path.ends_with("test-results.json"));
    assert!(runner.lifecycle().after_suite().is_none());
}

#[tokio::test]
async fn test_yaml_scenario_runs_end_to_end() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::with_setup(|driver: &RecordingDriver| {
        driver.hide(Locator::css(".error-banner"));
    }));
    let runner = suite(dir.path(), ExecutionMode::Headless, launcher.clone());

    let scenario = Scenario::from_yaml(
        r#"
name: login
tests:
  - name: signs-in
    steps:
      - action: enter_text
        target: { name: email }
        value: qa@example.com
      - action: click
        target: { id: submit }
      - action: navigate
        url: /dashboard
      - action: wait_settled
      - action: assert_url_contains
        fragment: dashboard
      - action: screenshot
        name: dashboard
  - name: shows-error
    steps:
      - action: assert_visible
        target: { css: ".error-banner" }
"#,
    )
    .unwrap();
    let results = runner.run(vec![scenario.into_class()]).await;

    assert_eq!(outcome_of(&results, "signs-in"), &TestOutcome::Passed);
    match outcome_of(&results, "shows-error") {
        TestOutcome::Failed(cause) => {
            assert!(cause.contains("step 1"));
            assert!(cause.contains(".error-banner"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let driver = launcher.last_driver().unwrap();
    assert!(driver.calls().contains(&DriverCall::SendKeys(
        Locator::Name("email".into()),
        "qa@example.com".into()
    )));
    assert!(driver.navigations().contains(&"https://app.test/dashboard".to_string()));

    let shots: Vec<_> = std::fs::read_dir(dir.path().join("shots")).unwrap().collect();
    assert_eq!(shots.len(), 1);

    let records = runner.lifecycle().reports().records();
    assert!(records[0]
        .entries
        .iter()
        .any(|e| e.message == "Step 1: Enter text into name=email"));
}
