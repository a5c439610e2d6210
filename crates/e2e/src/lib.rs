//! BrowserBench E2E Harness
//!
//! This crate runs browser test classes against a WebDriver server:
//! - One browser session per test class, isolated per worker
//! - Interactive or headless execution, resolved once per run
//! - Mode-adaptive clicks, waits and scrolling
//! - One bounded retry for failed tests
//! - A single HTML/JSON report with failure screenshots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SuiteRunner (tokio tasks)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LifecycleController                                        │
//! │    ├── ModeResolver -> ExecutionMode                        │
//! │    ├── SessionFactory -> Session ─┐                         │
//! │    │                              ├── SessionStore[worker]  │
//! │    ├── NavigationGuard            │                         │
//! │    ├── ArtifactCapture ───────────┘                         │
//! │    └── ReportingSink -> report.html, report.json            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Interactor (per worker)                                    │
//! │    └── InteractionStrategy: Interactive | Headless          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserDriver (thirtyfour WebDriver | RecordingDriver)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Test classes come from code ([`TestClass`]) or from YAML files
//! ([`Scenario`]).

pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod factory;
pub mod interaction;
pub mod lifecycle;
pub mod mode;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod testing;
pub mod webdriver;

pub use config::{ConfigSource, EnvSource, HarnessConfig, LayeredSource, MapSource, TomlSource};
pub use driver::{BrowserDriver, DriverLauncher, LaunchOptions, Locator};
pub use error::{DriverError, HarnessError, HarnessResult};
pub use lifecycle::{LifecycleController, TestOutcome};
pub use mode::{ExecutionMode, ModeResolver};
pub use runner::{skip, Skip, SuiteRunner, TestCase, TestClass, TestContext, TestSuiteResult};
pub use scenario::Scenario;
pub use session::{Session, SessionStore, WorkerId};
pub use webdriver::WebDriverLauncher;
