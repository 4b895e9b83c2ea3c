use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder};
use retrace_engine::error::DriverError;

/// Default endpoint of a locally running WebDriver server.
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

pub struct WebDriverClient {
    pub client: Client,
}

impl WebDriverClient {
    pub async fn connect(
        url: &str,
        capabilities: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut caps = serde_json::Map::new();

        // Default capabilities (W3C standard)
        // If user provided caps, merge them
        if let Some(user_caps) = capabilities {
            for (k, v) in user_caps {
                caps.insert(k, v);
            }
        }

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(url)
            .await
            .map_err(|e| format!("Failed to connect to WebDriver at {}: {}", url, e))?;

        Ok(Self { client })
    }

    pub async fn close(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.client
            .close()
            .await
            .map_err(|e| format!("Failed to close session: {}", e))?;
        Ok(())
    }
}

/// Map a WebDriver command error onto the driver error taxonomy.
pub fn map_cmd_error(err: CmdError, selector: Option<&str>) -> DriverError {
    if err.is_no_such_element() {
        return DriverError::ElementNotFound {
            selector: selector.unwrap_or_default().to_string(),
        };
    }
    match err {
        CmdError::WaitTimeout => DriverError::timeout(match selector {
            Some(s) => format!("wait_for_selector {}", s),
            None => "webdriver wait".to_string(),
        }),
        CmdError::Lost(e) => {
            tracing::error!("WebDriver connection lost: {}", e);
            DriverError::ConnectionLost
        }
        other => {
            let message = other.to_string();
            let lower = message.to_ascii_lowercase();
            if lower.contains("invalid session id") || lower.contains("no such window") {
                DriverError::Fatal(message)
            } else if lower.contains("invalid selector") {
                DriverError::SelectorInvalid {
                    selector: selector.unwrap_or_default().to_string(),
                }
            } else if lower.contains("not interactable") || lower.contains("click intercepted") {
                DriverError::ElementNotInteractable {
                    selector: selector.unwrap_or_default().to_string(),
                    reason: message,
                }
            } else {
                DriverError::Script(message)
            }
        }
    }
}
