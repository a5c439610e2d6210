//! Harness configuration
//!
//! Configuration comes from a read-only key-value [`ConfigSource`]. Every key is
//! optional; [`HarnessConfig::from_source`] fills the gaps with defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// Prefix used by [`EnvSource`] when mapping keys onto environment variables.
pub const ENV_PREFIX: &str = "BROWSERBENCH_";

/// Well-known configuration keys
pub mod keys {
    pub const BASE_URL: &str = "base_url";
    pub const HEADLESS: &str = "headless";
    pub const ENVIRONMENT: &str = "environment";
    pub const OPERATOR: &str = "operator";
    pub const WEBDRIVER_URL: &str = "webdriver_url";
    pub const ARTIFACTS_DIR: &str = "artifacts_dir";
    pub const REPORT_DIR: &str = "report_dir";
    pub const AUTHENTICATED_MARKER: &str = "authenticated_marker";
    pub const MAX_RETRIES: &str = "retry.max_retries";
    pub const MAX_PARALLEL_CLASSES: &str = "runner.max_parallel_classes";
    pub const WINDOW_WIDTH: &str = "browser.window_width";
    pub const WINDOW_HEIGHT: &str = "browser.window_height";
    pub const USER_AGENT: &str = "browser.user_agent";
    pub const INTERACTIVE_TIMEOUT_MS: &str = "timing.interactive_timeout_ms";
    pub const HEADLESS_TIMEOUT_MS: &str = "timing.headless_timeout_ms";
    pub const POLL_INTERVAL_MS: &str = "timing.poll_interval_ms";
    pub const READY_STATE_BOUND_MS: &str = "timing.ready_state_bound_ms";
    pub const SETTLE_PAUSE_MS: &str = "timing.settle_pause_ms";
    pub const SCROLL_PAUSE_MS: &str = "timing.scroll_pause_ms";
    pub const INPUT_SETTLE_PAUSE_MS: &str = "timing.input_settle_pause_ms";
}

/// Read-only key-value lookup.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory source, mostly for tests and programmatic overrides.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Environment variables: `timing.poll_interval_ms` becomes
/// `BROWSERBENCH_TIMING_POLL_INTERVAL_MS`.
#[derive(Debug, Clone, Default)]
pub struct EnvSource;

impl EnvSource {
    pub fn var_name(key: &str) -> String {
        format!("{}{}", ENV_PREFIX, key.replace('.', "_").to_uppercase())
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key)).ok()
    }
}

/// TOML file flattened into dotted keys.
///
/// A missing or unreadable file yields an empty source.
#[derive(Debug, Clone, Default)]
pub struct TomlSource {
    values: HashMap<String, String>,
}

impl TomlSource {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                debug!("No config file at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> HarnessResult<Self> {
        let table: toml::Table = content
            .parse()
            .map_err(|e: toml::de::Error| HarnessError::Config(e.to_string()))?;
        let mut values = HashMap::new();
        flatten("", &toml::Value::Table(table), &mut values);
        Ok(Self { values })
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten(&key, v, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

impl ConfigSource for TomlSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Ordered chain of sources, first hit wins.
#[derive(Clone, Default)]
pub struct LayeredSource {
    layers: Vec<Arc<dyn ConfigSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Arc::new(source));
        self
    }
}

impl ConfigSource for LayeredSource {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}

/// Named wait durations, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Bound for element waits in interactive mode
    pub interactive_timeout_ms: u64,

    /// Bound for element waits in headless mode
    pub headless_timeout_ms: u64,

    /// Interval between polls of a bounded wait
    pub poll_interval_ms: u64,

    /// Upper bound for the document.readyState poll
    pub ready_state_bound_ms: u64,

    /// Extra pause after the page reports ready (headless only)
    pub settle_pause_ms: u64,

    /// Pause after a script-driven scroll (headless only)
    pub scroll_pause_ms: u64,

    /// Pause after typing into an input (headless only)
    pub input_settle_pause_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            interactive_timeout_ms: 15_000,
            headless_timeout_ms: 30_000,
            poll_interval_ms: 250,
            ready_state_bound_ms: 10_000,
            settle_pause_ms: 1_000,
            scroll_pause_ms: 300,
            input_settle_pause_ms: 200,
        }
    }
}

impl TimingConfig {
    /// All pauses and bounds set to zero. Handy for unit tests.
    pub fn immediate() -> Self {
        Self {
            interactive_timeout_ms: 0,
            headless_timeout_ms: 0,
            poll_interval_ms: 0,
            ready_state_bound_ms: 0,
            settle_pause_ms: 0,
            scroll_pause_ms: 0,
            input_settle_pause_ms: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_state_bound(&self) -> Duration {
        Duration::from_millis(self.ready_state_bound_ms)
    }

    pub fn settle_pause(&self) -> Duration {
        Duration::from_millis(self.settle_pause_ms)
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }

    pub fn input_settle_pause(&self) -> Duration {
        Duration::from_millis(self.input_settle_pause_ms)
    }
}

/// Browser launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Synthetic viewport used in headless mode
    pub window_width: u32,
    pub window_height: u32,

    /// Desktop user agent presented in headless mode
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            window_width: 1920,
            window_height: 1080,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Fully resolved harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Entry URL of the system under test
    pub base_url: String,

    /// Environment label recorded in the report
    pub environment: String,

    /// Who ran the suite (falls back to USER/USERNAME)
    pub operator: String,

    /// WebDriver endpoint (chromedriver, selenium grid)
    pub webdriver_url: String,

    /// Screenshot files are written here
    pub artifacts_dir: PathBuf,

    /// Durable reports are written here
    pub report_dir: PathBuf,

    /// Substring of a URL that marks an authenticated area
    pub authenticated_marker: String,

    /// Retries allowed per test method
    pub max_retries: u32,

    /// Test classes allowed to run concurrently
    pub max_parallel_classes: usize,

    pub browser: BrowserConfig,

    pub timing: TimingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            environment: "local".to_string(),
            operator: default_operator(),
            webdriver_url: "http://localhost:9515".to_string(),
            artifacts_dir: PathBuf::from("test-results/screenshots"),
            report_dir: PathBuf::from("test-results"),
            authenticated_marker: "dashboard".to_string(),
            max_retries: 1,
            max_parallel_classes: 4,
            browser: BrowserConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

fn default_operator() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

impl HarnessConfig {
    /// Build the configuration from a source, falling back to defaults for
    /// absent keys. Present but malformed numeric values are rejected.
    pub fn from_source(source: &dyn ConfigSource) -> HarnessResult<Self> {
        let d = Self::default();
        let dt = TimingConfig::default();

        Ok(Self {
            base_url: source.get(keys::BASE_URL).unwrap_or(d.base_url),
            environment: source.get(keys::ENVIRONMENT).unwrap_or(d.environment),
            operator: source.get(keys::OPERATOR).unwrap_or(d.operator),
            webdriver_url: source.get(keys::WEBDRIVER_URL).unwrap_or(d.webdriver_url),
            artifacts_dir: source
                .get(keys::ARTIFACTS_DIR)
                .map(PathBuf::from)
                .unwrap_or(d.artifacts_dir),
            report_dir: source
                .get(keys::REPORT_DIR)
                .map(PathBuf::from)
                .unwrap_or(d.report_dir),
            authenticated_marker: source
                .get(keys::AUTHENTICATED_MARKER)
                .unwrap_or(d.authenticated_marker),
            max_retries: parsed(source, keys::MAX_RETRIES, d.max_retries)?,
            max_parallel_classes: parsed(
                source,
                keys::MAX_PARALLEL_CLASSES,
                d.max_parallel_classes,
            )?
            .max(1),
            browser: BrowserConfig {
                window_width: parsed(source, keys::WINDOW_WIDTH, d.browser.window_width)?,
                window_height: parsed(source, keys::WINDOW_HEIGHT, d.browser.window_height)?,
                user_agent: source.get(keys::USER_AGENT).unwrap_or(d.browser.user_agent),
            },
            timing: TimingConfig {
                interactive_timeout_ms: parsed(
                    source,
                    keys::INTERACTIVE_TIMEOUT_MS,
                    dt.interactive_timeout_ms,
                )?,
                headless_timeout_ms: parsed(
                    source,
                    keys::HEADLESS_TIMEOUT_MS,
                    dt.headless_timeout_ms,
                )?,
                poll_interval_ms: parsed(source, keys::POLL_INTERVAL_MS, dt.poll_interval_ms)?,
                ready_state_bound_ms: parsed(
                    source,
                    keys::READY_STATE_BOUND_MS,
                    dt.ready_state_bound_ms,
                )?,
                settle_pause_ms: parsed(source, keys::SETTLE_PAUSE_MS, dt.settle_pause_ms)?,
                scroll_pause_ms: parsed(source, keys::SCROLL_PAUSE_MS, dt.scroll_pause_ms)?,
                input_settle_pause_ms: parsed(
                    source,
                    keys::INPUT_SETTLE_PAUSE_MS,
                    dt.input_settle_pause_ms,
                )?,
            },
        })
    }

    /// Path of the HTML report
    pub fn html_report_path(&self) -> PathBuf {
        self.report_dir.join("report.html")
    }

    /// Path of the JSON report
    pub fn json_report_path(&self) -> PathBuf {
        self.report_dir.join("report.json")
    }
}

fn parsed<T: FromStr>(source: &dyn ConfigSource, key: &str, default: T) -> HarnessResult<T>
where
    T::Err: std::fmt::Display,
{
    match source.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| HarnessError::Config(format!("{} = {:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
