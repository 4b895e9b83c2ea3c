use retrace_engine::config::RecorderConfig;
use retrace_engine::driver::Driver;
use retrace_engine::protocol::{Action, ActionKind, ControlCommand, Session};
use retrace_engine::recorder::Recorder;
use retrace_engine::replay::{ReplayEngine, ReplayOptions, StepStatus};
use retrace_engine::service::RecorderService;
use retrace_h::HeadlessDriver;
use retrace_h::recording::RecordingHost;
use serial_test::serial;
use std::time::Duration;

const FORM_PAGE: &str = "data:text/html,<html><head><title>Form</title></head><body>\
<form onsubmit='return false'><input id='name'><button id='go' type='button' \
onclick=\"document.title='Hello '+document.getElementById('name').value\">Go</button></form></body></html>";

#[tokio::test]
async fn test_page_is_absent_before_launch() {
    let driver = HeadlessDriver::new();
    assert!(driver.page().is_none());
    assert!(matches!(
        driver.screenshot().await,
        Err(retrace_engine::driver::DriverError::NotReady)
    ));
}

async fn launch() -> Option<HeadlessDriver> {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init()
        .ok();

    let mut driver = HeadlessDriver::new();
    match driver.launch().await {
        Ok(()) => Some(driver),
        Err(e) => {
            eprintln!("Failed to launch browser (is Chromium installed?): {}", e);
            None
        }
    }
}

#[tokio::test]
#[serial]
async fn test_headless_replay_fill_and_click() {
    let Some(mut driver) = launch().await else {
        return;
    };

    let session = Session::from(vec![
        Action::fill("#name", "Alice", 1),
        Action::click("#go", 2),
        Action::click("#does-not-exist", 3),
    ]);
    let engine = ReplayEngine::new(ReplayOptions {
        start_url: Some(FORM_PAGE.to_string()),
        wait_timeout: Duration::from_millis(500),
        navigation_timeout: Duration::from_millis(500),
        ..Default::default()
    });

    let report = engine.run(&driver, &session).await.expect("Replay failed");
    assert_eq!(report.steps[0].status, StepStatus::Performed);
    assert_eq!(report.steps[1].status, StepStatus::Performed);
    assert_eq!(report.steps[2].status, StepStatus::Skipped);

    let title = driver
        .page()
        .expect("page")
        .get_title()
        .await
        .expect("title")
        .unwrap_or_default();
    assert_eq!(title, "Hello Alice");

    let png = driver.screenshot().await.expect("screenshot failed");
    assert!(png.starts_with(b"\x89PNG"));

    driver.close().await.expect("Close failed");
}

#[tokio::test]
#[serial]
async fn test_headless_recording_captures_fill_and_click() {
    let Some(mut driver) = launch().await else {
        return;
    };
    driver.goto(FORM_PAGE).await.expect("Navigation failed");

    let (service, handle) = RecorderService::new(
        Recorder::new(&RecorderConfig::default()),
        Duration::from_millis(700),
    );
    let task = service.spawn();
    let page = driver.page().expect("page").clone();
    let host = RecordingHost::attach(&page, handle.clone())
        .await
        .expect("Attach failed");

    assert!(handle.send(ControlCommand::Start).await.unwrap().ok);
    driver.fill("#name", "Bob").await.expect("fill");
    driver.click("#go").await.expect("click");
    tokio::time::sleep(Duration::from_millis(800)).await;

    let actions = handle
        .send(ControlCommand::GetAll)
        .await
        .unwrap()
        .actions
        .unwrap();
    let kinds: Vec<_> = actions.iter().map(Action::kind).collect();
    assert_eq!(kinds, vec![ActionKind::Fill, ActionKind::Click]);
    assert_eq!(actions[0].selector(), Some("#name"));
    assert_eq!(actions[0].value(), Some("Bob"));
    assert_eq!(actions[1].selector(), Some("#go"));

    host.detach();
    drop(handle);
    task.await.unwrap();
    driver.close().await.expect("Close failed");
}
