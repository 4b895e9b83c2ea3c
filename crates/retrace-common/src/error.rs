/// Errors reported by a replay driver.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    // ============================================================
    // Element Errors
    // ============================================================
    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Element {selector} is not interactable: {reason}")]
    ElementNotInteractable { selector: String, reason: String },

    #[error("Invalid selector: {selector}")]
    SelectorInvalid { selector: String },

    // ============================================================
    // Execution Errors
    // ============================================================
    #[error("Timeout: {operation}")]
    Timeout { operation: String },

    #[error("Script execution error: {0}")]
    Script(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    // ============================================================
    // System Errors
    // ============================================================
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not ready")]
    NotReady,

    #[error("Browser failure: {0}")]
    Fatal(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Serialization(err.to_string())
    }
}

impl DriverError {
    pub fn timeout(operation: impl Into<String>) -> Self {
        DriverError::Timeout {
            operation: operation.into(),
        }
    }

    /// Stable error code for logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            DriverError::ElementNotFound { .. } => "ELEMENT_NOT_FOUND",
            DriverError::ElementNotInteractable { .. } => "ELEMENT_NOT_INTERACTABLE",
            DriverError::SelectorInvalid { .. } => "SELECTOR_INVALID",
            DriverError::Timeout { .. } => "TIMEOUT",
            DriverError::Script(_) => "SCRIPT_ERROR",
            DriverError::Navigation(_) => "NAVIGATION_ERROR",
            DriverError::ConnectionLost => "CONNECTION_LOST",
            DriverError::NotReady => "NOT_READY",
            DriverError::Fatal(_) => "DRIVER_FATAL",
            DriverError::Serialization(_) => "SERIALIZATION_ERROR",
            DriverError::NotSupported(_) => "NOT_SUPPORTED",
        }
    }

    /// Whether the automation backend itself is gone. Fatal errors abort a
    /// replay; everything else only affects the current action.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::ConnectionLost | DriverError::NotReady | DriverError::Fatal(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            DriverError::ElementNotFound { .. } | DriverError::Timeout { .. } => {
                "Page structure may have changed since recording"
            }
            DriverError::ElementNotInteractable { .. } => "Element may be hidden or disabled",
            DriverError::SelectorInvalid { .. } => "Fix selector syntax in the action log",
            DriverError::ConnectionLost | DriverError::NotReady | DriverError::Fatal(_) => {
                "Restart the browser and replay again"
            }
            _ => "Check the action log entry",
        }
    }
}
