//! Live recording host: streams page events from a Chromium page into a
//! recorder service.
//!
//! A small shim is injected into every document. It reports clicks, input,
//! history changes and subtree mutations through a CDP binding; the selector
//! resolver and all state live on the Rust side.

use crate::inject::{classify_cdp_error, evaluate_json, retry_on_context_error};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use futures::StreamExt;
use retrace_engine::error::DriverError;
use retrace_engine::protocol::PageEvent;
use retrace_engine::service::{LocationProbe, RecorderHandle};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const BINDING_NAME: &str = "__retraceEmit";

const RECORDER_JS: &str = include_str!("recorder.js");

pub struct RecordingHost {
    task: JoinHandle<()>,
}

impl RecordingHost {
    /// Install the binding and shim on `page` and forward its events to
    /// `handle` until the page or the service goes away.
    pub async fn attach(page: &Page, handle: RecorderHandle) -> Result<Self, DriverError> {
        let mut events = page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;

        page.execute(AddBindingParams::new(BINDING_NAME))
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;

        // Survives navigations; the evaluate below covers the current document.
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(RECORDER_JS))
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        retry_on_context_error("Recorder injection", || page.evaluate(RECORDER_JS)).await?;

        let task = tokio::spawn(async move {
            while let Some(call) = events.next().await {
                if call.name != BINDING_NAME {
                    continue;
                }
                match serde_json::from_str::<PageEvent>(&call.payload) {
                    Ok(event) => {
                        debug!("Page event: {:?}", event);
                        if handle.emit(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed page event: {}", e),
                }
            }
            info!("Recording host stopped");
        });

        info!("Recording host attached");
        Ok(Self { task })
    }

    pub fn detach(self) {
        self.task.abort();
    }
}

/// Reads `location.href` for the recorder's polling fallback.
pub struct PageLocationProbe {
    page: Page,
}

impl PageLocationProbe {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl LocationProbe for PageLocationProbe {
    async fn current_url(&self) -> Result<String, DriverError> {
        match evaluate_json(&self.page, "location.href").await? {
            serde_json::Value::String(url) => Ok(url),
            other => Err(DriverError::Script(format!("unexpected location: {}", other))),
        }
    }
}
