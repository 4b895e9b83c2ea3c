use async_trait::async_trait;
pub use retrace_common::error::DriverError;
use std::time::Duration;

/// Outcome of a bounded wait for a page transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationWait {
    Navigated { url: String },
    TimedOut,
}

impl NavigationWait {
    pub fn navigated(&self) -> bool {
        matches!(self, NavigationWait::Navigated { .. })
    }
}

/// The browser automation interface the replay engine drives.
///
/// Element and navigation methods take `&self` so a click can run alongside
/// a navigation wait on the same driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Launch the backend (start browser, connect to endpoint, etc.)
    async fn launch(&mut self) -> Result<(), DriverError>;

    /// Close the backend and cleanup resources.
    async fn close(&mut self) -> Result<(), DriverError>;

    /// Wait until `selector` matches an element, bounded by `timeout`.
    ///
    /// A miss is reported as `DriverError::Timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Replace the matched input's value.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Wait for the next top-level navigation. Not seeing one within `timeout`
    /// is a normal outcome, not an error.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<NavigationWait, DriverError>;

    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    /// Current page URL, when the backend can report it.
    async fn current_url(&self) -> Result<String, DriverError> {
        Err(DriverError::NotSupported("current_url".into()))
    }

    /// PNG capture of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Err(DriverError::NotSupported("screenshot".into()))
    }
}
