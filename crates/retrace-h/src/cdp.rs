//! Chromium process lifecycle: launch with its own profile directory, open the
//! one page replay and recording act on, and keep that page's JS thread from
//! blocking on dialogs.

use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use retrace_engine::driver::DriverError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EXECUTABLE_ENV: &str = "CHROME_BIN";
const PROFILE_ENV: &str = "RETRACE_USER_DATA_DIR";

/// How to start Chromium.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub visible: bool,
    /// Browser binary. chromiumoxide searches the usual locations when unset.
    pub executable: Option<PathBuf>,
    /// Profile directory to reuse across runs. A scratch directory is
    /// created, and removed on close, when unset.
    pub profile_dir: Option<PathBuf>,
}

impl LaunchOptions {
    /// Fills the binary and profile from `CHROME_BIN` and
    /// `RETRACE_USER_DATA_DIR`.
    pub fn from_env(visible: bool) -> Self {
        Self {
            visible,
            executable: std::env::var_os(EXECUTABLE_ENV).map(PathBuf::from),
            profile_dir: std::env::var_os(PROFILE_ENV).map(PathBuf::from),
        }
    }
}

enum Profile {
    Kept(PathBuf),
    Scratch(TempDir),
}

impl Profile {
    fn prepare(dir: Option<&Path>) -> Result<Self, DriverError> {
        match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| fatal("create profile dir", e))?;
                Ok(Profile::Kept(dir.to_path_buf()))
            }
            None => tempfile::Builder::new()
                .prefix("retrace-profile-")
                .tempdir()
                .map(Profile::Scratch)
                .map_err(|e| fatal("create profile dir", e)),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Profile::Kept(path) => path,
            Profile::Scratch(dir) => dir.path(),
        }
    }

    fn release(self) {
        if let Profile::Scratch(dir) = self {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                debug!("Could not remove profile {}: {}", path.display(), e);
            }
        }
    }
}

fn fatal(what: &str, e: impl std::fmt::Display) -> DriverError {
    DriverError::Fatal(format!("{}: {}", what, e))
}

fn browser_config(options: &LaunchOptions, profile: &Path) -> Result<BrowserConfig, DriverError> {
    // Sandboxing fails inside most containers.
    let mut builder = BrowserConfig::builder().no_sandbox().user_data_dir(profile);
    if options.visible {
        builder = builder.with_head();
    }
    if let Some(executable) = &options.executable {
        builder = builder.chrome_executable(executable);
    }
    builder.build().map_err(|e| fatal("browser config", e))
}

/// A running Chromium and the single page a driver works in.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    profile: Profile,
}

impl BrowserSession {
    pub async fn launch(options: &LaunchOptions) -> Result<Self, DriverError> {
        let profile = Profile::prepare(options.profile_dir.as_deref())?;
        let config = browser_config(options, profile.path())?;
        info!(
            "Starting Chromium ({}, profile {})",
            if options.visible { "visible" } else { "headless" },
            profile.path().display()
        );

        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| fatal("launch browser", e))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
            debug!("CDP handler finished");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| fatal("open page", e))?;
        forward_console(&page).await?;
        accept_dialogs(&page).await?;

        Ok(Self {
            browser,
            handler,
            page,
            profile,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn close(mut self) -> Result<(), DriverError> {
        let closed = self.browser.close().await.map_err(|e| fatal("close browser", e));
        if let Err(e) = self.handler.await {
            debug!("CDP handler join failed: {}", e);
        }
        self.profile.release();
        closed.map(|_| ())
    }
}

/// Page console output goes to the debug log under `retrace_h::console`.
async fn forward_console(page: &Page) -> Result<(), DriverError> {
    let mut calls = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(|e| fatal("subscribe to console", e))?;
    tokio::spawn(async move {
        while let Some(call) = calls.next().await {
            let text: Vec<String> = call
                .args
                .iter()
                .filter_map(|arg| {
                    arg.value
                        .as_ref()
                        .map(|v| v.to_string())
                        .or_else(|| arg.description.clone())
                })
                .collect();
            debug!(target: "retrace_h::console", "{:?}: {}", call.r#type, text.join(" "));
        }
    });
    Ok(())
}

/// An open `alert`/`confirm` stalls every script on the page, including the
/// recorder's listeners and the replay selector checks.
async fn accept_dialogs(page: &Page) -> Result<(), DriverError> {
    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(|e| fatal("subscribe to dialogs", e))?;
    let page = page.clone();
    tokio::spawn(async move {
        while let Some(dialog) = dialogs.next().await {
            info!("Accepting {:?} dialog: {}", dialog.r#type, dialog.message);
            if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(true)).await {
                warn!("Dialog could not be accepted: {}", e);
            }
        }
    });
    Ok(())
}
