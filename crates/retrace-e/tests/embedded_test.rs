//! WebDriver replay integration tests
//!
//! These tests talk to a running WebDriver server (chromedriver, geckodriver,
//! WPEWebDriver). Point `RETRACE_WEBDRIVER_URL` at it and run with:
//! cargo test -p retrace-e -- --ignored

use retrace_e::EmbeddedDriver;
use retrace_e::webdriver::map_cmd_error;
use retrace_engine::driver::Driver;
use retrace_engine::error::DriverError;
use retrace_engine::protocol::{Action, Session};
use retrace_engine::replay::{ReplayEngine, ReplayOptions, StepStatus};
use serial_test::serial;
use std::time::Duration;

const FORM_PAGE: &str = "data:text/html,<html><body><input id='q'>\
<a id='next' href='data:text/html,<title>Next</title>next'>Next</a></body></html>";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn driver() -> EmbeddedDriver {
    match std::env::var("RETRACE_WEBDRIVER_URL") {
        Ok(url) => EmbeddedDriver::with_url(url),
        Err(_) => EmbeddedDriver::new(),
    }
}

#[tokio::test]
async fn test_calls_before_launch_are_not_ready() {
    let driver = driver();
    let err = driver.click("#q").await.unwrap_err();
    assert!(matches!(err, DriverError::NotReady));
    let err = driver
        .wait_for_selector("#q", Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::NotReady));
}

#[test]
fn test_wait_timeout_maps_to_timeout() {
    let err = map_cmd_error(fantoccini::error::CmdError::WaitTimeout, Some("#q"));
    assert!(err.is_timeout());
}

#[tokio::test]
#[serial]
#[ignore] // Requires a WebDriver server
async fn test_embedded_lifecycle() {
    init_tracing();
    let mut driver = driver();
    driver.launch().await.expect("Failed to connect to WebDriver");

    driver.goto(FORM_PAGE).await.expect("Navigation failed");
    let url = driver.current_url().await.expect("current_url failed");
    assert!(url.starts_with("data:"));

    driver.close().await.expect("Close failed");
}

#[tokio::test]
#[serial]
#[ignore] // Requires a WebDriver server
async fn test_embedded_replay() {
    init_tracing();
    let mut driver = driver();
    driver.launch().await.expect("Failed to connect to WebDriver");

    let session = Session::from(vec![
        Action::fill("#q", "{{term}}", 1),
        Action::click("#missing", 2),
        Action::click("#next", 3),
    ]);
    let engine = ReplayEngine::new(ReplayOptions {
        start_url: Some(FORM_PAGE.to_string()),
        wait_timeout: Duration::from_millis(500),
        navigation_timeout: Duration::from_secs(2),
        pacing: Duration::from_millis(50),
        ..Default::default()
    })
    .with_variables([("term".to_string(), "rust".to_string())].into());

    let report = engine.run(&driver, &session).await.expect("Replay failed");
    assert_eq!(report.steps[0].status, StepStatus::Performed);
    assert_eq!(report.steps[0].value.as_deref(), Some("rust"));
    assert_eq!(report.steps[1].status, StepStatus::Skipped);
    assert_eq!(report.steps[2].status, StepStatus::Performed);

    driver.close().await.expect("Close failed");
}

#[tokio::test]
#[serial]
#[ignore] // Requires a WebDriver server
async fn test_embedded_same_url_reload_is_navigation() {
    init_tracing();
    let mut driver = driver();
    driver.launch().await.expect("Failed to connect to WebDriver");

    let page = "data:text/html,<button id='again' onclick='location.reload()'>Again</button>";
    let session = Session::from(vec![Action::click("#again", 1)]);
    let engine = ReplayEngine::new(ReplayOptions {
        start_url: Some(page.to_string()),
        wait_timeout: Duration::from_millis(500),
        navigation_timeout: Duration::from_secs(3),
        ..Default::default()
    });

    let report = engine.run(&driver, &session).await.expect("Replay failed");
    assert_eq!(report.steps[0].status, StepStatus::Navigated);

    let png = driver.screenshot().await.expect("screenshot failed");
    assert!(png.starts_with(b"\x89PNG"));

    driver.close().await.expect("Close failed");
}
