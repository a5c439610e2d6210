//! Browser driver abstraction
//!
//! Everything above this module talks to a browser through [`BrowserDriver`].
//! The production implementation lives in [`crate::webdriver`]; an in-memory
//! recording implementation lives in [`crate::testing`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::BrowserConfig;
use crate::error::DriverResult;
use crate::mode::ExecutionMode;

/// Element locator. Selector strings are owned by the calling test code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
    Id(String),
    Name(String),
    LinkText(String),
    Tag(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::XPath(s) => write!(f, "xpath={}", s),
            Locator::Id(s) => write!(f, "id={}", s),
            Locator::Name(s) => write!(f, "name={}", s),
            Locator::LinkText(s) => write!(f, "link={}", s),
            Locator::Tag(s) => write!(f, "tag={}", s),
        }
    }
}

/// One live browser.
///
/// Implementations must make `quit` safe to call more than once.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    async fn maximize_window(&self) -> DriverResult<()>;

    /// Native pointer click
    async fn click(&self, target: &Locator) -> DriverResult<()>;

    /// `element.click()` executed as page script
    async fn script_click(&self, target: &Locator) -> DriverResult<()>;

    /// Scroll the element to the center of the viewport via page script
    async fn scroll_into_view(&self, target: &Locator) -> DriverResult<()>;

    async fn clear(&self, target: &Locator) -> DriverResult<()>;

    async fn send_keys(&self, target: &Locator, text: &str) -> DriverResult<()>;

    async fn is_displayed(&self, target: &Locator) -> DriverResult<bool>;

    async fn is_enabled(&self, target: &Locator) -> DriverResult<bool>;

    /// Value of `document.readyState`
    async fn ready_state(&self) -> DriverResult<String>;

    async fn screenshot_png(&self) -> DriverResult<Vec<u8>>;

    async fn quit(&self) -> DriverResult<()>;
}

/// Starts browsers.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> DriverResult<Arc<dyn BrowserDriver>>;
}

/// Browser command line and capability switches for one launch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub mode: ExecutionMode,
    pub args: Vec<String>,
    /// Chrome switches removed from the default command line
    pub exclude_switches: Vec<String>,
}

impl LaunchOptions {
    /// Baseline switches applied in every mode, plus the headless set when
    /// `mode` is headless.
    pub fn for_mode(mode: ExecutionMode, browser: &BrowserConfig) -> Self {
        let mut args: Vec<String> = [
            "--disable-blink-features=AutomationControlled",
            "--disable-notifications",
            "--remote-allow-origins=*",
            "--ignore-certificate-errors",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if mode.is_headless() {
            args.push("--headless=new".to_string());
            args.push(format!(
                "--window-size={},{}",
                browser.window_width, browser.window_height
            ));
            args.push("--disable-gpu".to_string());
            args.push("--no-sandbox".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push(format!("--user-agent={}", browser.user_agent));
            args.push("--disable-web-security".to_string());
            args.push("--allow-running-insecure-content".to_string());
        }

        Self {
            mode,
            args,
            exclude_switches: vec!["enable-automation".to_string()],
        }
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}
