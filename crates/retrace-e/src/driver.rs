use crate::webdriver::{DEFAULT_WEBDRIVER_URL, WebDriverClient, map_cmd_error};
use async_trait::async_trait;
use fantoccini::Locator;
use retrace_engine::driver::{Driver, DriverError, NavigationWait};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const URL_POLL: Duration = Duration::from_millis(100);

/// Tags the current document so a reload to the same URL is still seen as a
/// new page: the fresh `window` comes up without the property.
const MARK_DOCUMENT: &str =
    "window.__retraceDocument = true; return { url: window.location.href, marked: true };";
const READ_DOCUMENT: &str =
    "return { url: window.location.href, marked: window.__retraceDocument === true };";

#[derive(Debug, Clone, PartialEq, Eq)]
struct DocumentState {
    url: String,
    marked: bool,
}

impl DocumentState {
    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            url: value.get("url")?.as_str()?.to_string(),
            marked: value.get("marked")?.as_bool()?,
        })
    }

    /// True once the page is no longer the document that was marked.
    fn left(&self, start: &DocumentState) -> bool {
        self.url != start.url || (start.marked && !self.marked)
    }
}

/// Replay driver speaking W3C WebDriver to an existing endpoint
/// (chromedriver, geckodriver, WPEWebDriver, Selenium).
pub struct EmbeddedDriver {
    client: Option<WebDriverClient>,
    webdriver_url: String,
    capabilities: Option<serde_json::Map<String, serde_json::Value>>,
}

impl EmbeddedDriver {
    pub fn new() -> Self {
        Self::with_url(DEFAULT_WEBDRIVER_URL.to_string())
    }

    pub fn with_url(webdriver_url: String) -> Self {
        Self {
            client: None,
            webdriver_url,
            capabilities: None,
        }
    }

    pub fn with_capabilities(mut self, caps: serde_json::Map<String, serde_json::Value>) -> Self {
        self.capabilities = Some(caps);
        self
    }

    pub fn webdriver_url(&self) -> &str {
        &self.webdriver_url
    }

    fn client(&self) -> Result<&fantoccini::Client, DriverError> {
        self.client
            .as_ref()
            .map(|c| &c.client)
            .ok_or(DriverError::NotReady)
    }

    /// Run one of the document scripts. `None` when the page would not run
    /// it, as happens while the next document is loading.
    async fn read_document(&self, script: &str) -> Result<Option<DocumentState>, DriverError> {
        match self.client()?.execute(script, Vec::new()).await {
            Ok(value) => Ok(DocumentState::from_value(&value)),
            Err(e) => {
                let err = map_cmd_error(e, None);
                if err.is_fatal() {
                    return Err(err);
                }
                debug!("Document script failed: {}", err);
                Ok(None)
            }
        }
    }

    async fn unmarked_document(&self) -> Result<Option<DocumentState>, DriverError> {
        match self.client()?.current_url().await {
            Ok(url) => Ok(Some(DocumentState {
                url: url.to_string(),
                marked: false,
            })),
            Err(e) => {
                let err = map_cmd_error(e, None);
                if err.is_fatal() {
                    Err(err)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

impl Default for EmbeddedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for EmbeddedDriver {
    async fn launch(&mut self) -> Result<(), DriverError> {
        info!("Connecting to WebDriver at {}...", self.webdriver_url);
        let client = WebDriverClient::connect(&self.webdriver_url, self.capabilities.clone())
            .await
            .map_err(|e| DriverError::Fatal(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| DriverError::Fatal(e.to_string()))?;
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        self.client()?
            .wait()
            .at_most(timeout)
            .every(URL_POLL)
            .for_element(Locator::Css(selector))
            .await
            .map_err(|e| map_cmd_error(e, Some(selector)))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self
            .client()?
            .find(Locator::Css(selector))
            .await
            .map_err(|e| map_cmd_error(e, Some(selector)))?;
        element
            .clear()
            .await
            .map_err(|e| map_cmd_error(e, Some(selector)))?;
        element
            .send_keys(value)
            .await
            .map_err(|e| map_cmd_error(e, Some(selector)))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .client()?
            .find(Locator::Css(selector))
            .await
            .map_err(|e| map_cmd_error(e, Some(selector)))?;
        element
            .click()
            .await
            .map_err(|e| map_cmd_error(e, Some(selector)))?;
        Ok(())
    }

    /// WebDriver has no navigation events. Mark the document, then poll for
    /// a URL change or for the mark to disappear. Pages that refuse scripts
    /// are watched by URL alone.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<NavigationWait, DriverError> {
        let deadline = Instant::now() + timeout;
        let start = match self.read_document(MARK_DOCUMENT).await? {
            Some(start) => start,
            None => self
                .unmarked_document()
                .await?
                .ok_or_else(|| DriverError::Navigation("page URL unavailable".into()))?,
        };

        while Instant::now() < deadline {
            tokio::time::sleep(URL_POLL).await;
            let now = if start.marked {
                self.read_document(READ_DOCUMENT).await?
            } else {
                self.unmarked_document().await?
            };
            if let Some(now) = now
                && now.left(&start)
            {
                debug!("Observed navigation to {}", now.url);
                return Ok(NavigationWait::Navigated { url: now.url });
            }
        }
        Ok(NavigationWait::TimedOut)
    }

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        info!("Navigating to: {}", url);
        self.client()?
            .goto(url)
            .await
            .map_err(|e| match map_cmd_error(e, None) {
                err if err.is_fatal() => err,
                err => DriverError::Navigation(err.to_string()),
            })
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.client()?
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| map_cmd_error(e, None))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.client()?
            .screenshot()
            .await
            .map_err(|e| map_cmd_error(e, None))
    }
}
