use chromiumoxide::Page;
use retrace_engine::error::DriverError;
use std::future::Future;
use std::time::Duration;

/// Timeout for a single JavaScript evaluation. Guards against a dialog
/// blocking the JS thread.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

/// Delay between retries when context is not found (page navigating).
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Check if an error indicates the page context is unavailable (e.g., during navigation).
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

/// Map a CDP error message onto the driver error taxonomy.
pub fn classify_cdp_error(message: &str) -> DriverError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("websocket")
        || lower.contains("channel")
        || lower.contains("connection")
        || lower.contains("target closed")
        || lower.contains("browser has disconnected")
    {
        DriverError::ConnectionLost
    } else if lower.contains("not a valid selector") || lower.contains("syntaxerror") {
        DriverError::Script(message.to_string())
    } else if lower.contains("could not find node") || lower.contains("not found") {
        DriverError::Script(format!("element lookup failed: {}", message))
    } else if lower.contains("timeout") || lower.contains("timed out") {
        DriverError::timeout(message.to_string())
    } else {
        DriverError::Script(message.to_string())
    }
}

/// Retry an async operation that may fail due to context errors during page navigation.
/// Returns immediately on success or non-context errors; retries only on context errors.
pub async fn retry_on_context_error<T, E, F, Fut>(
    operation_name: &str,
    mut operation: F,
) -> Result<T, DriverError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let err_str = e.to_string();
                if is_context_error(&err_str) {
                    tracing::debug!(
                        "{} context error (attempt {}/{}), retrying...",
                        operation_name,
                        attempt + 1,
                        MAX_CONTEXT_RETRIES
                    );
                    last_error = Some(err_str);
                    tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
                    continue;
                }
                return Err(classify_cdp_error(&err_str));
            }
        }
    }

    Err(DriverError::Script(last_error.unwrap_or_else(|| {
        format!("{} failed after retries", operation_name)
    })))
}

/// Evaluate `expression` and deserialize its result, retrying across
/// navigations.
pub async fn evaluate_json(page: &Page, expression: &str) -> Result<serde_json::Value, DriverError> {
    retry_on_context_error("Evaluation", || evaluate_with_timeout(page, expression)).await
}

async fn evaluate_with_timeout(page: &Page, expression: &str) -> Result<serde_json::Value, String> {
    match tokio::time::timeout(EVAL_TIMEOUT, page.evaluate(expression)).await {
        Err(_) => Err("Evaluation timed out - possibly blocked by a dialog".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Ok(Ok(result)) => Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null)),
    }
}

/// JSON-encode a string for splicing into a script.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
