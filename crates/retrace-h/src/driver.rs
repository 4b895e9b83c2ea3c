use crate::cdp::{BrowserSession, LaunchOptions};
use crate::inject::{classify_cdp_error, evaluate_json, js_string};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::cdp::browser_protocol::page::{EventFrameNavigated, EventNavigatedWithinDocument};
use futures::StreamExt;
use retrace_engine::driver::{Driver, DriverError, NavigationWait};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const SELECTOR_POLL: Duration = Duration::from_millis(100);

/// Replay driver backed by a Chromium instance over CDP.
pub struct HeadlessDriver {
    session: Option<BrowserSession>,
    options: LaunchOptions,
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self::new_with_visibility(false)
    }

    /// Binary and profile locations come from the environment; see
    /// `LaunchOptions::from_env`.
    pub fn new_with_visibility(visible: bool) -> Self {
        Self::with_options(LaunchOptions::from_env(visible))
    }

    pub fn with_options(options: LaunchOptions) -> Self {
        Self {
            session: None,
            options,
        }
    }

    /// The page the driver acts on, once launched.
    pub fn page(&self) -> Option<&Page> {
        self.session.as_ref().map(BrowserSession::page)
    }

    fn active_page(&self) -> Result<&Page, DriverError> {
        self.page().ok_or(DriverError::NotReady)
    }
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn cdp_error(e: chromiumoxide::error::CdpError) -> DriverError {
    classify_cdp_error(&e.to_string())
}

#[async_trait]
impl Driver for HeadlessDriver {
    async fn launch(&mut self) -> Result<(), DriverError> {
        info!("Launching headless driver (Chromium)...");
        self.session = Some(BrowserSession::launch(&self.options).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(session) = self.session.take() {
            session.close().await?;
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let page = self.active_page()?;
        let script = format!(
            "(() => {{ try {{ return document.querySelector({}) !== null; }} catch (e) {{ return 'invalid'; }} }})()",
            js_string(selector)
        );
        let deadline = Instant::now() + timeout;

        loop {
            match evaluate_json(page, &script).await {
                Ok(Value::Bool(true)) => return Ok(()),
                Ok(Value::String(s)) if s == "invalid" => {
                    return Err(DriverError::SelectorInvalid {
                        selector: selector.to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("Selector probe for {} failed: {}", selector, e),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::timeout(format!("wait_for_selector {}", selector)));
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let page = self.active_page()?;
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return 'missing';
                if (el.disabled || el.readOnly) return 'disabled';
                el.focus();
                if ('value' in el) {{ el.value = {val}; }} else {{ el.textContent = {val}; }}
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return 'ok';
            }})()"#,
            sel = js_string(selector),
            val = js_string(value)
        );
        match evaluate_json(page, &script).await? {
            Value::String(s) if s == "ok" => Ok(()),
            Value::String(s) if s == "missing" => Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            }),
            _ => Err(DriverError::ElementNotInteractable {
                selector: selector.to_string(),
                reason: "disabled or read-only".into(),
            }),
        }
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let page = self.active_page()?;
        let element = page.find_element(selector).await.map_err(|e| {
            match cdp_error(e) {
                DriverError::ConnectionLost => DriverError::ConnectionLost,
                _ => DriverError::ElementNotFound {
                    selector: selector.to_string(),
                },
            }
        })?;
        element
            .click()
            .await
            .map_err(|e| match cdp_error(e) {
                DriverError::ConnectionLost => DriverError::ConnectionLost,
                other => DriverError::ElementNotInteractable {
                    selector: selector.to_string(),
                    reason: other.to_string(),
                },
            })?;
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<NavigationWait, DriverError> {
        let page = self.active_page()?;
        let frames = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(cdp_error)?
            .filter(|ev| futures::future::ready(ev.frame.parent_id.is_none()))
            .map(|ev| ev.frame.url.clone());
        let same_document = page
            .event_listener::<EventNavigatedWithinDocument>()
            .await
            .map_err(cdp_error)?
            .map(|ev| ev.url.clone());
        let mut navigations = Box::pin(futures::stream::select(frames, same_document));

        match tokio::time::timeout(timeout, navigations.next()).await {
            Ok(Some(url)) => {
                debug!("Observed navigation to {}", url);
                Ok(NavigationWait::Navigated { url })
            }
            Ok(None) => Err(DriverError::ConnectionLost),
            Err(_) => Ok(NavigationWait::TimedOut),
        }
    }

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let page = self.active_page()?;
        info!("Navigating to: {}", url);
        page.goto(url).await.map_err(|e| match cdp_error(e) {
            DriverError::ConnectionLost => DriverError::ConnectionLost,
            other => DriverError::Navigation(other.to_string()),
        })?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let page = self.active_page()?;
        Ok(page.url().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let page = self.active_page()?;
        page.screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(|e| match cdp_error(e) {
                DriverError::ConnectionLost => DriverError::ConnectionLost,
                other => DriverError::Script(format!("screenshot: {}", other)),
            })
    }
}
