//! W3C WebDriver backend built on `thirtyfour`

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thirtyfour::prelude::*;
use tracing::{debug, info};

use crate::driver::{BrowserDriver, DriverLauncher, LaunchOptions, Locator};
use crate::error::{DriverError, DriverResult};

const SCRIPT_CLICK: &str = "arguments[0].click();";
const SCRIPT_SCROLL_CENTER: &str =
    "arguments[0].scrollIntoView({block: 'center', inline: 'center'});";
const SCRIPT_READY_STATE: &str = "return document.readyState;";

impl From<WebDriverError> for DriverError {
    fn from(e: WebDriverError) -> Self {
        let message = e.to_string();
        match e {
            WebDriverError::ElementClickIntercepted(_) => DriverError::ClickIntercepted(message),
            WebDriverError::NoSuchElement(_) => DriverError::NoSuchElement(message),
            WebDriverError::StaleElementReference(_) => DriverError::StaleElement(message),
            WebDriverError::Timeout(_) => DriverError::Timeout(message),
            _ if message.to_ascii_lowercase().contains("invalid session id") => {
                DriverError::SessionClosed
            }
            _ => DriverError::Other(message),
        }
    }
}

fn by(target: &Locator) -> By {
    match target {
        Locator::Css(s) => By::Css(s.as_str()),
        Locator::XPath(s) => By::XPath(s.as_str()),
        Locator::Id(s) => By::Id(s.as_str()),
        Locator::Name(s) => By::Name(s.as_str()),
        Locator::LinkText(s) => By::LinkText(s.as_str()),
        Locator::Tag(s) => By::Tag(s.as_str()),
    }
}

/// Launches Chrome sessions against a WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    server_url: String,
}

impl WebDriverLauncher {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl DriverLauncher for WebDriverLauncher {
    async fn launch(&self, options: &LaunchOptions) -> DriverResult<Arc<dyn BrowserDriver>> {
        let mut caps = DesiredCapabilities::chrome();
        for arg in &options.args {
            caps.add_arg(arg)?;
        }
        if !options.exclude_switches.is_empty() {
            caps.add_experimental_option("excludeSwitches", options.exclude_switches.clone())?;
        }

        info!(
            server = %self.server_url,
            mode = %options.mode,
            "Starting browser session"
        );
        let driver = WebDriver::new(&self.server_url, caps).await?;
        Ok(Arc::new(ThirtyfourDriver::new(driver)))
    }
}

/// [`BrowserDriver`] over a `thirtyfour::WebDriver`.
///
/// The handle is cloned out of the mutex for every call so the lock is never
/// held across a browser round trip.
pub struct ThirtyfourDriver {
    driver: Mutex<Option<WebDriver>>,
}

impl ThirtyfourDriver {
    pub fn new(driver: WebDriver) -> Self {
        Self {
            driver: Mutex::new(Some(driver)),
        }
    }

    fn handle(&self) -> DriverResult<WebDriver> {
        self.driver.lock().clone().ok_or(DriverError::SessionClosed)
    }

    async fn element(&self, target: &Locator) -> DriverResult<(WebDriver, WebElement)> {
        let driver = self.handle()?;
        let element = driver.find(by(target)).await?;
        Ok((driver, element))
    }

    async fn run_on(&self, target: &Locator, script: &str) -> DriverResult<()> {
        let (driver, element) = self.element(target).await?;
        driver.execute(script, vec![element.to_json()?]).await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ThirtyfourDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.handle()?.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.handle()?.current_url().await?.to_string())
    }

    async fn maximize_window(&self) -> DriverResult<()> {
        self.handle()?.maximize_window().await?;
        Ok(())
    }

    async fn click(&self, target: &Locator) -> DriverResult<()> {
        let (_, element) = self.element(target).await?;
        element.click().await?;
        Ok(())
    }

    async fn script_click(&self, target: &Locator) -> DriverResult<()> {
        self.run_on(target, SCRIPT_CLICK).await
    }

    async fn scroll_into_view(&self, target: &Locator) -> DriverResult<()> {
        self.run_on(target, SCRIPT_SCROLL_CENTER).await
    }

    async fn clear(&self, target: &Locator) -> DriverResult<()> {
        let (_, element) = self.element(target).await?;
        element.clear().await?;
        Ok(())
    }

    async fn send_keys(&self, target: &Locator, text: &str) -> DriverResult<()> {
        let (_, element) = self.element(target).await?;
        element.send_keys(text).await?;
        Ok(())
    }

    async fn is_displayed(&self, target: &Locator) -> DriverResult<bool> {
        let (_, element) = self.element(target).await?;
        Ok(element.is_displayed().await?)
    }

    async fn is_enabled(&self, target: &Locator) -> DriverResult<bool> {
        let (_, element) = self.element(target).await?;
        Ok(element.is_enabled().await?)
    }

    async fn ready_state(&self) -> DriverResult<String> {
        let ret = self.handle()?.execute(SCRIPT_READY_STATE, Vec::new()).await?;
        Ok(ret.json().as_str().unwrap_or_default().to_string())
    }

    async fn screenshot_png(&self) -> DriverResult<Vec<u8>> {
        Ok(self.handle()?.screenshot_as_png().await?)
    }

    async fn quit(&self) -> DriverResult<()> {
        let driver = self.driver.lock().take();
        match driver {
            Some(driver) => {
                debug!("Quitting browser session");
                driver.quit().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}
