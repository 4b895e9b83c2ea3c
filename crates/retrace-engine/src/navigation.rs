use retrace_common::protocol::NavigationTrigger;
use tracing::debug;

/// Turns location-change notifications into `goto` decisions.
///
/// History interception, back/forward and polling all feed `observe`; only a
/// URL that differs from the last recorded one produces a `goto`, so
/// coincident triggers for one navigation collapse into a single action.
#[derive(Debug, Clone, Default)]
pub struct NavigationDetector {
    last_recorded: Option<String>,
}

impl NavigationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline(url: impl Into<String>) -> Self {
        Self {
            last_recorded: Some(url.into()),
        }
    }

    pub fn last_recorded(&self) -> Option<&str> {
        self.last_recorded.as_deref()
    }

    /// Returns the URL to record, if any.
    ///
    /// While inactive the baseline follows the page, so starting a recording
    /// on an already-visited route does not emit a `goto` for it.
    pub fn observe(&mut self, url: &str, trigger: NavigationTrigger, active: bool) -> Option<String> {
        if url.is_empty() {
            return None;
        }
        if self.last_recorded.as_deref() == Some(url) {
            return None;
        }
        self.last_recorded = Some(url.to_string());
        if !active {
            return None;
        }
        debug!("Navigation to {} via {:?}", url, trigger);
        Some(url.to_string())
    }

    /// Whether a DOM mutation batch should rebind capture listeners.
    pub fn needs_reattach(&self, added: usize, removed: usize, active: bool) -> bool {
        active && (added > 0 || removed > 0)
    }
}
