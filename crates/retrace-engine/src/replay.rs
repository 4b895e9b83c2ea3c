//! Sequential replay of a recorded session against a `Driver`.
//!
//! Each action waits for its element within a bound, then fills or clicks it.
//! A click is issued while a navigation wait is already listening, so page
//! transitions it triggers are awaited before the next action. Missing
//! elements and element-level failures are recorded and skipped; only fatal
//! driver errors abort the run.

use crate::config::ReplayConfig;
use crate::driver::{Driver, DriverError, NavigationWait};
use crate::template::{self, Variables};
use retrace_common::protocol::{Action, ActionKind, Session};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How a recorded `goto` is replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GotoPolicy {
    /// Observational record only; the next action's selector wait syncs.
    #[default]
    Marker,
    /// Navigate the driver to the recorded URL.
    Navigate,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub wait_timeout: Duration,
    pub navigation_timeout: Duration,
    pub pacing: Duration,
    pub goto_policy: GotoPolicy,
    pub start_url: Option<String>,
    pub variables: Variables,
    /// Skipped and failed steps are captured here as PNGs.
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self::from(&ReplayConfig::default())
    }
}

impl From<&ReplayConfig> for ReplayOptions {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            pacing: Duration::from_millis(config.pacing_ms),
            goto_policy: config.goto_policy,
            start_url: config.start_url.clone(),
            variables: Variables::new(),
            screenshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Performed,
    Navigated,
    Skipped,
    Failed,
    Marker,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Performed => "performed",
            StepStatus::Navigated => "navigated",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
            StepStatus::Marker => "marker",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Saved page capture, for steps that did not go through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl StepOutcome {
    fn new(index: usize, action: &Action, status: StepStatus) -> Self {
        Self {
            index,
            kind: action.kind(),
            selector: action.selector().map(str::to_string),
            value: action.value().map(str::to_string),
            url: action.url().map(str::to_string),
            status,
            note: None,
            screenshot: None,
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    pub steps: Vec<StepOutcome>,
}

impl ReplayReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn skipped(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    /// True when every action was performed or was a marker.
    pub fn is_clean(&self) -> bool {
        self.skipped() == 0 && self.failed() == 0
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Driver failed at action {index} ({}): {source}", action.kind())]
    DriverFatal {
        index: usize,
        action: Box<Action>,
        source: DriverError,
    },

    #[error("Could not open start URL {url}: {source}")]
    StartFailed { url: String, source: DriverError },
}

pub struct ReplayEngine {
    options: ReplayOptions,
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new(ReplayOptions::default())
    }
}

impl ReplayEngine {
    pub fn new(options: ReplayOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.options.variables = variables;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.screenshot_dir = Some(dir.into());
        self
    }

    /// Replay `session` strictly in order.
    pub async fn run<D: Driver + ?Sized>(
        &self,
        driver: &D,
        session: &Session,
    ) -> Result<ReplayReport, ReplayError> {
        let vars = &self.options.variables;
        let actions: Vec<Action> = session
            .iter()
            .map(|a| template::render_action(a, vars))
            .collect();
        let mut report = ReplayReport {
            start_url: match &self.options.start_url {
                Some(url) => Some(template::render(url, vars)),
                None => first_web_url(&actions),
            },
            steps: Vec::with_capacity(actions.len()),
        };

        if let Some(url) = &report.start_url {
            info!("Opening start URL {}", url);
            if let Err(e) = driver.goto(url).await {
                if e.is_fatal() {
                    return Err(ReplayError::StartFailed {
                        url: url.clone(),
                        source: e,
                    });
                }
                warn!("Start URL {} failed to load: {}", url, e);
            }
        }

        info!("Replaying {} action(s)", actions.len());
        for (index, action) in actions.iter().enumerate() {
            let mut outcome = self.step(driver, index, action).await?;
            match outcome.status {
                StepStatus::Skipped | StepStatus::Failed => {
                    warn!(
                        "Step {} {} {}: {}",
                        index,
                        action.kind(),
                        outcome.status,
                        outcome.note.as_deref().unwrap_or("")
                    );
                    if let Some(dir) = &self.options.screenshot_dir {
                        outcome.screenshot = capture(driver, dir, &outcome).await;
                    }
                }
                _ => info!("Step {} {} {}", index, action.kind(), outcome.status),
            }
            report.steps.push(outcome);

            if !self.options.pacing.is_zero() {
                tokio::time::sleep(self.options.pacing).await;
            }
        }

        info!(
            "Replay finished: {} step(s), {} skipped, {} failed",
            report.steps.len(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    async fn step<D: Driver + ?Sized>(
        &self,
        driver: &D,
        index: usize,
        action: &Action,
    ) -> Result<StepOutcome, ReplayError> {
        let fatal = |source: DriverError| ReplayError::DriverFatal {
            index,
            action: Box::new(action.clone()),
            source,
        };
        let failed = |e: DriverError| {
            StepOutcome::new(index, action, StepStatus::Failed)
                .with_note(format!("{}. {}", e, e.recovery_hint()))
        };

        let selector = match action {
            Action::Goto { url, .. } => {
                return match self.options.goto_policy {
                    GotoPolicy::Marker => Ok(StepOutcome::new(index, action, StepStatus::Marker)),
                    GotoPolicy::Navigate => match driver.goto(url).await {
                        Ok(()) => Ok(StepOutcome::new(index, action, StepStatus::Navigated)),
                        Err(e) if e.is_fatal() => Err(fatal(e)),
                        Err(e) => Ok(failed(e)),
                    },
                };
            }
            Action::Click { selector, .. } | Action::Fill { selector, .. } => selector,
        };

        match driver.wait_for_selector(selector, self.options.wait_timeout).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(fatal(e)),
            Err(e) => {
                debug!("Wait for {} ended with {}", selector, e.code());
                return Ok(StepOutcome::new(index, action, StepStatus::Skipped)
                    .with_note(format!("element not found: {}", selector)));
            }
        }

        match action {
            Action::Fill { value, .. } => match driver.fill(selector, value).await {
                Ok(()) => Ok(StepOutcome::new(index, action, StepStatus::Performed)),
                Err(e) if e.is_fatal() => Err(fatal(e)),
                Err(e) => Ok(failed(e)),
            },
            Action::Click { .. } => {
                // The navigation wait is polled first so it is listening
                // before the click lands.
                let (navigation, clicked) = tokio::join!(
                    driver.wait_for_navigation(self.options.navigation_timeout),
                    driver.click(selector)
                );
                match clicked {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(fatal(e)),
                    Err(e) => return Ok(failed(e)),
                }
                match navigation {
                    Ok(NavigationWait::Navigated { url }) => {
                        Ok(StepOutcome::new(index, action, StepStatus::Navigated).with_note(url))
                    }
                    Ok(NavigationWait::TimedOut) => {
                        Ok(StepOutcome::new(index, action, StepStatus::Performed))
                    }
                    Err(e) if e.is_fatal() => Err(fatal(e)),
                    Err(e) => {
                        debug!("Navigation wait after click failed: {}", e);
                        Ok(StepOutcome::new(index, action, StepStatus::Performed))
                    }
                }
            }
            Action::Goto { .. } => Ok(StepOutcome::new(index, action, StepStatus::Marker)),
        }
    }
}

/// Save the page as `step-NNN-<status>.png` under `dir`. A capture that
/// fails is logged and left out of the report; the step outcome stands.
async fn capture<D: Driver + ?Sized>(
    driver: &D,
    dir: &Path,
    outcome: &StepOutcome,
) -> Option<String> {
    let bytes = match driver.screenshot().await {
        Ok(bytes) => bytes,
        Err(DriverError::NotSupported(_)) => {
            debug!("Driver cannot take screenshots");
            return None;
        }
        Err(e) => {
            warn!("Screenshot for step {} failed: {}", outcome.index, e);
            return None;
        }
    };
    let path = dir.join(format!("step-{:03}-{}.png", outcome.index, outcome.status));
    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, &bytes).await
    };
    match written.await {
        Ok(()) => Some(path.display().to_string()),
        Err(e) => {
            warn!("Could not save {}: {}", path.display(), e);
            None
        }
    }
}

/// Where replay should begin: the first action's `http(s)` URL. A leading
/// `goto` contributes its target, any other action the page it was recorded
/// on. Later actions are never consulted, since opening a page reached
/// mid-session would run the earlier steps against the wrong document.
pub fn choose_start_url(session: &Session) -> Option<String> {
    first_web_url(session.actions())
}

fn first_web_url(actions: &[Action]) -> Option<String> {
    let first = actions.first()?;
    let target = match first {
        Action::Goto { url, .. } => Some(url.as_str()),
        Action::Click { .. } | Action::Fill { .. } => None,
    };
    target
        .filter(|u| is_web_url(u))
        .or_else(|| first.context().page_url.as_deref().filter(|u| is_web_url(u)))
        .map(str::to_string)
}

fn is_web_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
